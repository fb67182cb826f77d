pub mod builder;
pub mod defaults;
pub mod merge;
pub mod types;

pub use builder::{ConfigBuilder, load_config_file};
pub use types::*;
