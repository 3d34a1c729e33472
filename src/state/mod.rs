/// 視野圖層狀態模組
///
/// 場景輸入、刷新排程、物件可見性系統與圖層本體
pub mod layer;
pub mod restrict;
pub mod scene;
pub mod scheduler;

pub use layer::{CanvasLayer, VisibilityLayer};
pub use restrict::RestrictVisibilitySystem;
pub use scene::{PlaceableData, SceneConfig, SceneSource, StaticScene};
pub use scheduler::{LayerState, RefreshHandle, RefreshStats, RefreshTrigger, VisibilityRefreshScheduler};
