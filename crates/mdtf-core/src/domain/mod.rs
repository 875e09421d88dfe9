pub mod errors;

pub use errors::{FrameworkError, FrameworkErrorKind, FrameworkResult};
