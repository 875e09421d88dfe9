pub mod build;
pub mod capture;
pub mod frontend;
pub mod preparse;
pub mod spec;

pub use build::{build_command, build_root_command};
pub use capture::{CaptureContext, capture_matches};
pub use frontend::{
    EntryFn, EntryPoints, FrontendOutcome, Invocation, resolve_invocation, run_frontend,
};
pub use preparse::{preparse_input_file, preparse_selections, preparse_site};
pub use spec::{
    ArgAction, ArgCount, ArgGroupSpec, ArgSpec, CommandSpec, ParserSpec, ValueType,
    canonical_dest,
};
