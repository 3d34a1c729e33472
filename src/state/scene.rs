/// 場景輸入
///
/// 圖層只透過 `SceneSource` 讀取場景，不持有場景本身
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use vek::Vec2;

use crate::comp::PlaceableKind;
use crate::error::{Result, VisibilityError};
use crate::fog::FogConfig;
use crate::vision::{Bounds, Capability, LightingVisibility, SourceData, WallSegment};

/// 場景層級設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub dimensions: Bounds,
    /// 全域照明
    pub global_light: bool,
    /// 黑暗程度超過此值時全域照明失效，None 表示不限
    pub global_light_threshold: Option<f32>,
    /// 0 為全亮，1 為全暗
    pub darkness_level: f32,
    /// 關閉時不限制視野
    pub token_vision: bool,
    /// 沒有物件時測試點的高度
    pub ambient_elevation: f32,
    /// 沒有啟用視野光源時的光照可見性
    pub default_lighting: LightingVisibility,
    /// 探索貼圖解析度，None 時依場景大小自動決定
    pub fog_resolution: Option<f32>,
    pub fog: FogConfig,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            dimensions: Bounds::new(Vec2::new(0.0, 0.0), Vec2::new(1000.0, 1000.0)),
            global_light: false,
            global_light_threshold: None,
            darkness_level: 0.0,
            token_vision: true,
            ambient_elevation: 0.0,
            default_lighting: LightingVisibility::default(),
            fog_resolution: None,
            fog: FogConfig::default(),
        }
    }
}

impl SceneConfig {
    pub fn global_illumination(&self) -> bool {
        self.global_light
            && self.global_light_threshold.map_or(true, |t| self.darkness_level <= t)
    }
}

/// 場景中受視野限制的物件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceableData {
    pub id: String,
    pub kind: PlaceableKind,
    /// 中心位置
    pub position: Vec2<f32>,
    #[serde(default)]
    pub elevation: f32,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
    #[serde(default)]
    pub hidden: bool,
    /// 可被偵測的方式，預設只能被看見
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<Capability>,
}

fn default_capabilities() -> Vec<Capability> {
    vec![Capability::Sight]
}

impl PlaceableData {
    pub fn token(id: &str, position: Vec2<f32>, width: f32, height: f32) -> Self {
        Self {
            id: id.to_string(),
            kind: PlaceableKind::Token,
            position,
            elevation: 0.0,
            width,
            height,
            hidden: false,
            capabilities: default_capabilities(),
        }
    }

    pub fn door(id: &str, position: Vec2<f32>) -> Self {
        Self { kind: PlaceableKind::DoorControl, ..Self::token(id, position, 0.0, 0.0) }
    }

    pub fn note(id: &str, position: Vec2<f32>) -> Self {
        Self { kind: PlaceableKind::Note, ..Self::token(id, position, 0.0, 0.0) }
    }
}

/// 圖層讀取場景的介面
pub trait SceneSource {
    fn scene_id(&self) -> &str;
    fn config(&self) -> SceneConfig;
    fn walls(&self) -> Vec<WallSegment>;
    fn active_sources(&self) -> Vec<SourceData>;
    fn placeables(&self) -> Vec<PlaceableData>;
}

/// 以資料描述的場景，可從 JSON 載入
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticScene {
    pub scene_id: String,
    pub config: SceneConfig,
    pub walls: Vec<WallSegment>,
    pub sources: Vec<SourceData>,
    pub placeables: Vec<PlaceableData>,
}

impl StaticScene {
    pub fn new(scene_id: &str, config: SceneConfig) -> Self {
        Self { scene_id: scene_id.to_string(), config, ..Default::default() }
    }

    pub fn with_wall(mut self, wall: WallSegment) -> Self {
        self.walls.push(wall);
        self
    }

    pub fn with_source(mut self, source: SourceData) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_placeable(mut self, placeable: PlaceableData) -> Self {
        self.placeables.push(placeable);
        self
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let scene: StaticScene = serde_json::from_str(content)
            .map_err(|e| VisibilityError::Config(format!("場景格式錯誤: {}", e)))?;
        if scene.scene_id.trim().is_empty() {
            return Err(VisibilityError::Config("場景缺少 scene_id".to_string()));
        }
        Ok(scene)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| VisibilityError::Config(format!("無法讀取場景 {}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
    }
}

impl SceneSource for StaticScene {
    fn scene_id(&self) -> &str {
        &self.scene_id
    }

    fn config(&self) -> SceneConfig {
        self.config.clone()
    }

    fn walls(&self) -> Vec<WallSegment> {
        self.walls.clone()
    }

    fn active_sources(&self) -> Vec<SourceData> {
        self.sources.iter().filter(|s| s.active).cloned().collect()
    }

    fn placeables(&self) -> Vec<PlaceableData> {
        self.placeables.clone()
    }
}
