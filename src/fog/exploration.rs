/// 戰爭迷霧探索管理
///
/// 持有目前場景的探索貼圖、上次持久化的版本與未探索區域的覆蓋圖
use image::{imageops, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vek::Vec2;

use super::storage::{FogStore, PersistedFog};
use super::texture::{ExplorationTexture, TextureConfiguration, EXPLORED};
use crate::error::Result;
use crate::vision::source::LosPolygon;

/// 場景的迷霧設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FogConfig {
    /// 關閉時不產生任何迷霧
    pub enabled: bool,
    /// 是否記錄探索過的區域
    pub exploration: bool,
    /// 未探索區域的覆蓋圖
    pub overlay_image: Option<PathBuf>,
    pub explored_color: [u8; 4],
    pub unexplored_color: [u8; 4],
}

impl Default for FogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exploration: true,
            overlay_image: None,
            explored_color: [0, 0, 0, 96],
            unexplored_color: [0, 0, 0, 255],
        }
    }
}

impl FogConfig {
    fn records_exploration(&self) -> bool {
        self.enabled && self.exploration
    }
}

pub struct FogExplorationManager {
    store: Arc<dyn FogStore>,
    scene_id: String,
    fog: FogConfig,
    texture: Option<ExplorationTexture>,
    /// 上次寫入儲存的版本
    persisted: Option<ExplorationTexture>,
    overlay: Option<RgbaImage>,
    overlay_scene: Option<String>,
    debounce: Duration,
    commit_threshold: u32,
    pending_merges: u32,
    last_merge: Option<Instant>,
}

impl FogExplorationManager {
    pub fn new(store: Arc<dyn FogStore>, debounce: Duration, commit_threshold: u32) -> Self {
        Self {
            store,
            scene_id: String::new(),
            fog: FogConfig::default(),
            texture: None,
            persisted: None,
            overlay: None,
            overlay_scene: None,
            debounce,
            commit_threshold: commit_threshold.max(1),
            pending_merges: 0,
            last_merge: None,
        }
    }

    /// 讀取持久化的迷霧，沒有或設定不符時配置全新貼圖
    ///
    /// 在初始化工作執行緒上呼叫；讀取錯誤原樣回傳
    pub fn load_persisted(
        store: &dyn FogStore,
        scene_id: &str,
        config: TextureConfiguration,
    ) -> Result<ExplorationTexture> {
        match store.load(scene_id)? {
            Some(fog) if fog.config == config => fog.decode(),
            Some(fog) => {
                log::warn!(
                    "場景 {} 的迷霧貼圖設定已變更（{}x{} -> {}x{}），捨棄舊的探索紀錄",
                    scene_id, fog.config.width, fog.config.height, config.width, config.height
                );
                Ok(ExplorationTexture::allocate(config))
            }
            None => Ok(ExplorationTexture::allocate(config)),
        }
    }

    pub fn store(&self) -> Arc<dyn FogStore> {
        self.store.clone()
    }

    /// 安裝初始化完成的貼圖並重建畫面
    pub fn install(&mut self, scene_id: &str, fog: FogConfig, texture: ExplorationTexture) {
        if self.overlay_scene.as_deref() != Some(scene_id) || self.fog.overlay_image != fog.overlay_image {
            self.overlay = None;
            self.overlay_scene = None;
        }
        self.scene_id = scene_id.to_string();
        self.fog = fog;
        self.persisted = Some(texture);
        self.pending_merges = 0;
        self.last_merge = None;
        self.reset_exploration();
    }

    /// 以上次持久化的點陣重建記憶體中的探索狀態，並重新套用覆蓋圖
    pub fn reset_exploration(&mut self) {
        self.texture = self.persisted.clone();
        self.pending_merges = 0;
        self.last_merge = None;
        self.ensure_overlay();
    }

    /// 覆蓋圖每個場景只讀一次
    fn ensure_overlay(&mut self) {
        if self.overlay_scene.as_deref() == Some(self.scene_id.as_str()) {
            return;
        }
        let Some(config) = self.texture_configuration().copied() else {
            return;
        };
        self.overlay = self.fog.overlay_image.as_ref().and_then(|path| match image::open(path) {
            Ok(img) => Some(imageops::resize(
                &img.to_rgba8(),
                config.width,
                config.height,
                imageops::FilterType::Triangle,
            )),
            Err(e) => {
                log::warn!("無法讀取迷霧覆蓋圖 {}: {}，改用未探索顏色", path.display(), e);
                None
            }
        });
        self.overlay_scene = Some(self.scene_id.clone());
    }

    /// 將可見區域併入探索貼圖，回傳新探索的像素數
    pub fn merge_visibility<'a, I>(&mut self, polygons: I) -> usize
    where
        I: IntoIterator<Item = &'a LosPolygon>,
    {
        if !self.fog.records_exploration() {
            return 0;
        }
        let Some(texture) = self.texture.as_mut() else {
            return 0;
        };
        let changed: usize = polygons.into_iter().map(|p| texture.rasterize(p)).sum();
        if changed > 0 {
            self.pending_merges += 1;
            self.last_merge = Some(Instant::now());
        }
        changed
    }

    /// 有未寫入的變更時，安靜一段時間或累積足夠次數才寫入
    pub fn persist_if_due(&mut self, now: Instant) -> Result<bool> {
        let Some(last) = self.last_merge else {
            return Ok(false);
        };
        let quiet = now.saturating_duration_since(last) >= self.debounce;
        if quiet || self.pending_merges >= self.commit_threshold {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// 立即寫入儲存
    pub fn flush(&mut self) -> Result<()> {
        if !self.fog.records_exploration() {
            return Ok(());
        }
        let Some(texture) = self.texture.as_ref() else {
            return Ok(());
        };
        let document = PersistedFog::encode(&self.scene_id, texture)?;
        self.store.save(&document)?;
        self.persisted = Some(texture.clone());
        self.pending_merges = 0;
        self.last_merge = None;
        log::debug!("場景 {} 的迷霧已儲存", self.scene_id);
        Ok(())
    }

    pub fn has_pending_changes(&self) -> bool {
        self.last_merge.is_some()
    }

    /// 清除探索紀錄，記憶體與儲存皆清空
    pub fn clear_exploration(&mut self) -> Result<()> {
        if let Some(texture) = self.texture.as_mut() {
            texture.clear();
        }
        if let Some(persisted) = self.persisted.as_mut() {
            persisted.clear();
        }
        self.pending_merges = 0;
        self.last_merge = None;
        self.store.delete(&self.scene_id)?;
        log::info!("場景 {} 的探索紀錄已清除", self.scene_id);
        Ok(())
    }

    /// 產生迷霧畫面；未啟用迷霧時為 None
    pub fn render_surface(&self) -> Option<RgbaImage> {
        if !self.fog.enabled {
            return None;
        }
        let texture = self.texture.as_ref()?;
        let config = texture.config();
        let explored = Rgba(self.fog.explored_color);
        let unexplored = Rgba(self.fog.unexplored_color);
        let surface = RgbaImage::from_fn(config.width, config.height, |x, y| {
            if self.fog.exploration && texture.image().get_pixel(x, y).0[0] == EXPLORED {
                explored
            } else {
                self.overlay.as_ref().map_or(unexplored, |o| *o.get_pixel(x, y))
            }
        });
        Some(surface)
    }

    pub fn is_explored(&self, point: Vec2<f32>) -> bool {
        self.fog.records_exploration() && self.texture.as_ref().map_or(false, |t| t.is_explored(point))
    }

    pub fn texture_configuration(&self) -> Option<&TextureConfiguration> {
        self.texture.as_ref().map(|t| t.config())
    }

    pub fn texture(&self) -> Option<&ExplorationTexture> {
        self.texture.as_ref()
    }

    pub fn persisted(&self) -> Option<&ExplorationTexture> {
        self.persisted.as_ref()
    }

    pub fn fog_config(&self) -> &FogConfig {
        &self.fog
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    /// 卸載場景時釋放貼圖
    pub fn release(&mut self) {
        if self.has_pending_changes() {
            if let Err(e) = self.flush() {
                log::warn!("卸載前寫入迷霧失敗: {}", e);
            }
        }
        self.texture = None;
        self.persisted = None;
        self.overlay = None;
        self.overlay_scene = None;
    }
}
