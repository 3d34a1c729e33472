/// Open MOBA Visibility Library
///
/// 2D 桌面畫布的視線可見性、光照可見性與戰爭迷霧探索

pub mod comp;
pub mod config;
pub mod error;
pub mod fog;
pub mod state;
pub mod vision;

// Re-export commonly used types
pub use crate::error::{Result, VisibilityError};
pub use crate::state::{CanvasLayer, LayerState, RefreshHandle, RefreshTrigger, SceneSource, StaticScene, VisibilityLayer};
pub use crate::vision::{LightingVisibility, TestOptions, ViewerContext, VisibilityLevel};
