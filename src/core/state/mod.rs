pub mod settings;

pub use settings::{Defaults, EnvOverrides, FileConfig, ServerSettings, UserConfig};
