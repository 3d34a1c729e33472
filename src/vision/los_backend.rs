/// 視線多邊形計算
///
/// 以射線掃描牆壁求出光源的 los / fov 多邊形
use serde::{Deserialize, Serialize};
use vek::Vec2;

use super::geometry_utils::{Bounds, GeometryUtils};
use super::source::{LosPolygon, SourceData, SourcePolygons};

/// 遮擋視線的牆段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallSegment {
    pub start: Vec2<f32>,
    pub end: Vec2<f32>,
    /// 開啟的門或透明牆不擋視線
    #[serde(default = "default_blocks_sight")]
    pub blocks_sight: bool,
}

fn default_blocks_sight() -> bool {
    true
}

impl WallSegment {
    pub fn new(start: Vec2<f32>, end: Vec2<f32>) -> Self {
        Self { start, end, blocks_sight: true }
    }
}

/// 視線幾何能力：給一個光源，回傳它的多邊形組
///
/// 幾何無效時回傳 None，該光源在測試中不產生貢獻
pub trait LosBackend: Send + Sync {
    fn compute(&self, source: &SourceData, walls: &[WallSegment], scene: &Bounds) -> Option<SourcePolygons>;
}

/// 射線掃描實作
#[derive(Debug, Clone)]
pub struct RaySweepBackend {
    /// 全周射線數量
    precision: u32,
}

impl RaySweepBackend {
    pub fn new(precision: u32) -> Self {
        Self { precision: precision.max(3) }
    }

    /// 沿單一方向找最近的遮擋距離
    fn cast(origin: Vec2<f32>, direction: Vec2<f32>, max_distance: f32, walls: &[WallSegment]) -> f32 {
        let mut nearest = max_distance;
        for wall in walls.iter().filter(|w| w.blocks_sight) {
            if let Some(t) = GeometryUtils::ray_segment_intersection(origin, direction, wall.start, wall.end) {
                if t < nearest {
                    nearest = t;
                }
            }
        }
        nearest
    }

    fn sweep(&self, source: &SourceData, max_distance: f32, walls: &[WallSegment]) -> Option<LosPolygon> {
        let full_circle = source.angle >= 360.0;
        let sweep = source.angle.clamp(0.0, 360.0).to_radians();
        if sweep <= 0.0 {
            return None;
        }

        // 扇形依比例分配射線，至少兩條邊界射線
        let steps = if full_circle {
            self.precision
        } else {
            ((self.precision as f32 * sweep / std::f32::consts::TAU).ceil() as u32).max(2)
        };
        let start = if full_circle {
            0.0
        } else {
            source.rotation.to_radians() - sweep / 2.0
        };
        let step = sweep / steps as f32;

        let mut points = Vec::with_capacity(steps as usize + 2);
        if !full_circle {
            points.push(source.origin);
        }
        let ray_count = if full_circle { steps } else { steps + 1 };
        for i in 0..ray_count {
            let angle = start + i as f32 * step;
            let direction = Vec2::new(angle.cos(), angle.sin());
            let distance = Self::cast(source.origin, direction, max_distance, walls);
            points.push(source.origin + direction * distance);
        }

        LosPolygon::new(points)
    }
}

impl Default for RaySweepBackend {
    fn default() -> Self {
        Self::new(360)
    }
}

impl LosBackend for RaySweepBackend {
    fn compute(&self, source: &SourceData, walls: &[WallSegment], scene: &Bounds) -> Option<SourcePolygons> {
        if !source.origin.x.is_finite() || !source.origin.y.is_finite() {
            return None;
        }
        if !source.radius.is_finite() || source.radius <= 0.0 {
            return None;
        }

        let fov = self.sweep(source, source.radius, walls)?;
        let scene_reach = scene.farthest_corner_distance(source.origin).max(source.radius);
        let los = self.sweep(source, scene_reach, walls)?;
        Some(SourcePolygons { los, fov })
    }
}
