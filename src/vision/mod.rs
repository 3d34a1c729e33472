/// 視野系統模組
///
/// 光源登記、視線多邊形、可見性測試與光照合併
pub mod geometry_utils;
pub mod lighting;
pub mod los_backend;
pub mod registry;
pub mod source;

pub use self::{
    geometry_utils::{Bounds, GeometryUtils},
    lighting::{LightingOptions, LightingVisibility, LightingVisibilityResolver, VisibilityLevel},
    los_backend::{LosBackend, RaySweepBackend, WallSegment},
    los_test::{
        LosTestEngine, ObserverPolicy, StrictPolicy, Target, Test, TestConfig, TestOptions,
        UnrestrictedObserverPolicy, ViewerContext, VisibilitySnapshot,
    },
    registry::VisionSourceRegistry,
    source::{Capability, DetectionFilter, LosPolygon, SourceData, SourceKind, SourcePolygons, VisionMode, VisionSource},
};
