pub mod jsonc;
pub mod paths;
pub mod tokens;

pub use jsonc::{ParseError, load_json_file, parse_permissive_json, write_json_file};
pub use paths::{expand_env_vars, find_files, resolve_path};
pub use tokens::split_token_file;
