/// 視野與光源定義
use serde::{Deserialize, Serialize};
use vek::Vec2;

use super::geometry_utils::{Bounds, GeometryUtils};
use super::lighting::{LightingOptions, VisibilityLevel};

/// 光源種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// 棋子視野
    Vision,
    /// 環境光源
    Light,
}

/// 感知能力，同時用於光源的偵測限制與目標可被偵測的方式
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Sight,
    Darkvision,
    Tremorsense,
    SeeInvisibility,
    Heat,
    Custom(String),
}

/// 光源的偵測限制
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionFilter {
    /// 目標必須具備的感知能力
    pub capability: Capability,
    /// 偵測距離上限（含高度差），None 表示不限
    #[serde(default)]
    pub range: Option<f32>,
}

/// 視野模式
///
/// 各模式對光照通道的要求是固定的資料，由 `lighting_options` 一次列舉
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum VisionMode {
    Basic,
    Darkvision,
    Monochromatic,
    Tremorsense,
    LightAmplification,
    Blindness,
    Custom { id: String, lighting: LightingOptions },
}

impl VisionMode {
    pub fn id(&self) -> &str {
        match self {
            VisionMode::Basic => "basic",
            VisionMode::Darkvision => "darkvision",
            VisionMode::Monochromatic => "monochromatic",
            VisionMode::Tremorsense => "tremorsense",
            VisionMode::LightAmplification => "lightAmplification",
            VisionMode::Blindness => "blindness",
            VisionMode::Custom { id, .. } => id,
        }
    }

    /// 該模式啟用時對光照通道的要求
    pub fn lighting_options(&self) -> LightingOptions {
        use VisibilityLevel::*;
        match self {
            VisionMode::Basic => LightingOptions::default(),
            VisionMode::Darkvision => LightingOptions {
                background: Some(Required),
                ..Default::default()
            },
            VisionMode::Monochromatic => LightingOptions {
                background: Some(Required),
                coloration: Some(Disabled),
                ..Default::default()
            },
            VisionMode::Tremorsense => LightingOptions {
                background: Some(Required),
                illumination: Some(Disabled),
                coloration: Some(Disabled),
                darkness: Some(Disabled),
            },
            VisionMode::LightAmplification => LightingOptions {
                background: Some(Required),
                illumination: Some(Required),
                ..Default::default()
            },
            VisionMode::Blindness => LightingOptions {
                background: Some(Disabled),
                illumination: Some(Disabled),
                coloration: Some(Disabled),
                darkness: Some(Disabled),
            },
            VisionMode::Custom { lighting, .. } => *lighting,
        }
    }
}

impl Default for VisionMode {
    fn default() -> Self {
        VisionMode::Basic
    }
}

/// 光源設定（由場景提供）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceData {
    pub id: String,
    pub kind: SourceKind,
    pub origin: Vec2<f32>,
    #[serde(default)]
    pub elevation: f32,
    /// 視野 / 光照半徑
    pub radius: f32,
    /// 扇形角度（度），360 為全周
    #[serde(default = "default_angle")]
    pub angle: f32,
    /// 扇形朝向（度）
    #[serde(default)]
    pub rotation: f32,
    #[serde(default)]
    pub vision_mode: Option<VisionMode>,
    #[serde(default)]
    pub detection: Option<DetectionFilter>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_angle() -> f32 {
    360.0
}

fn default_active() -> bool {
    true
}

impl SourceData {
    /// 建立棋子視野
    pub fn vision(id: &str, origin: Vec2<f32>, radius: f32) -> Self {
        Self {
            id: id.to_string(),
            kind: SourceKind::Vision,
            origin,
            elevation: 0.0,
            radius,
            angle: 360.0,
            rotation: 0.0,
            vision_mode: Some(VisionMode::Basic),
            detection: None,
            active: true,
        }
    }

    /// 建立環境光源
    pub fn light(id: &str, origin: Vec2<f32>, radius: f32) -> Self {
        Self {
            kind: SourceKind::Light,
            vision_mode: None,
            ..Self::vision(id, origin, radius)
        }
    }

    pub fn with_vision_mode(mut self, mode: VisionMode) -> Self {
        self.vision_mode = Some(mode);
        self
    }

    pub fn with_detection(mut self, capability: Capability, range: Option<f32>) -> Self {
        self.detection = Some(DetectionFilter { capability, range });
        self
    }

    pub fn with_cone(mut self, angle: f32, rotation: f32) -> Self {
        self.angle = angle;
        self.rotation = rotation;
        self
    }

    pub fn with_elevation(mut self, elevation: f32) -> Self {
        self.elevation = elevation;
        self
    }

    /// 位置、半徑或角度改變時需要重算多邊形
    pub fn geometry_changed(&self, other: &SourceData) -> bool {
        self.origin != other.origin
            || self.radius != other.radius
            || self.angle != other.angle
            || self.rotation != other.rotation
    }
}

/// 視線多邊形
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LosPolygon {
    pub points: Vec<Vec2<f32>>,
    pub bounds: Bounds,
}

impl LosPolygon {
    /// 少於三個頂點或含非有限座標時回傳 None
    pub fn new(points: Vec<Vec2<f32>>) -> Option<Self> {
        if points.len() < 3 || points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return None;
        }
        let bounds = Bounds::from_points(&points)?;
        if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
            return None;
        }
        Some(Self { points, bounds })
    }

    /// 包含判定（邊界算在內）
    pub fn contains(&self, point: Vec2<f32>) -> bool {
        if !self.bounds.contains_point_padded(point, super::geometry_utils::EDGE_EPSILON) {
            return false;
        }
        GeometryUtils::point_in_polygon_inclusive(point, &self.points)
    }

    pub fn area(&self) -> f32 {
        GeometryUtils::polygon_area(&self.points)
    }
}

/// 光源的多邊形組
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePolygons {
    /// 只受牆壁限制、延伸到場景邊界的視線範圍
    pub los: LosPolygon,
    /// 再以半徑限制的視野範圍
    pub fov: LosPolygon,
}

/// 已登記的光源
#[derive(Debug, Clone, PartialEq)]
pub struct VisionSource {
    pub data: SourceData,
    /// 幾何無效時為 None，測試時視為沒有貢獻
    pub polygons: Option<SourcePolygons>,
}

impl VisionSource {
    pub fn new(data: SourceData, polygons: Option<SourcePolygons>) -> Self {
        Self { data, polygons }
    }

    /// 尚未計算幾何的光源
    pub fn unresolved(data: SourceData) -> Self {
        Self { data, polygons: None }
    }

    pub fn id(&self) -> &str {
        &self.data.id
    }

    pub fn is_vision(&self) -> bool {
        self.data.kind == SourceKind::Vision
    }

    pub fn lighting_options(&self) -> LightingOptions {
        match (&self.data.kind, &self.data.vision_mode) {
            (SourceKind::Vision, Some(mode)) => mode.lighting_options(),
            _ => LightingOptions::default(),
        }
    }

    /// 依全域照明選擇用於測試的多邊形
    ///
    /// 全域照明下視野光源看到整個視線範圍，環境光源永遠只照亮自身半徑
    pub fn visible_region(&self, global_illumination: bool) -> Option<&LosPolygon> {
        let polygons = self.polygons.as_ref()?;
        if global_illumination && self.is_vision() {
            Some(&polygons.los)
        } else {
            Some(&polygons.fov)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_los_polygon_rejects_degenerate() {
        assert!(LosPolygon::new(vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0)]).is_none());
        assert!(LosPolygon::new(vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 0.0),
        ]).is_none());
        assert!(LosPolygon::new(vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(f32::NAN, 0.0),
            Vec2::new(2.0, 2.0),
        ]).is_none());
    }

    #[test]
    fn test_geometry_changed() {
        let a = SourceData::vision("a", Vec2::new(0.0, 0.0), 10.0);
        let mut b = a.clone();
        b.detection = Some(DetectionFilter { capability: Capability::Heat, range: None });
        assert!(!a.geometry_changed(&b));
        b.origin = Vec2::new(1.0, 0.0);
        assert!(a.geometry_changed(&b));
    }

    #[test]
    fn test_light_source_lighting_options_ignored() {
        let light = VisionSource::unresolved(
            SourceData::light("l", Vec2::new(0.0, 0.0), 5.0).with_vision_mode(VisionMode::Blindness),
        );
        assert_eq!(light.lighting_options(), LightingOptions::default());
    }

    #[test]
    fn test_vision_mode_ids() {
        assert_eq!(VisionMode::Darkvision.id(), "darkvision");
        let custom = VisionMode::Custom { id: "heat".to_string(), lighting: LightingOptions::default() };
        assert_eq!(custom.id(), "heat");
    }
}
