pub mod visibility_config;

pub use visibility_config::{VisibilityConfig, CONFIG};
