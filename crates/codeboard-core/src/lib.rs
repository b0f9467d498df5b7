pub mod config;
pub mod skip;
pub mod types;

pub use config::Config;
pub use skip::{should_skip_file, skip_reason};
pub use types::*;
