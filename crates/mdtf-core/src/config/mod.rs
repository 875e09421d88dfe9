pub mod defaults;
pub mod plugins;
pub mod registry;
pub mod resolved;

pub use defaults::{DefaultsRegistry, DefaultsTier};
pub use plugins::{PluginRegistry, PluginTable, PluginTableSpec};
pub use registry::{ConfigRegistry, SubcommandsDoc};
pub use resolved::{PluginBinding, ResolvedConfig};
