/// 視野圖層
///
/// 每個場景工作階段建立一個，持有光源登記表、光照解析器、視線測試引擎、
/// 迷霧管理器與刷新排程；不存在全域的圖層實例
use hashbrown::{HashMap, HashSet};
use image::RgbaImage;
use specs::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vek::Vec2;

use super::restrict::RestrictVisibilitySystem;
use super::scene::{PlaceableData, SceneConfig, SceneSource};
use super::scheduler::{LayerState, RefreshHandle, RefreshStats, RefreshTrigger, VisibilityRefreshScheduler};
use crate::comp::{Detectable, Elevation, Footprint, Placeable, Pos};
use crate::config::VisibilityConfig;
use crate::error::{Result, VisibilityError};
use crate::fog::{ExplorationTexture, FogExplorationManager, FogStore, TextureConfiguration};
use crate::vision::{
    LightingVisibility, LightingVisibilityResolver, LosBackend, LosTestEngine, ObserverPolicy, RaySweepBackend,
    SourceData, TestOptions, ViewerContext, VisibilitySnapshot, VisionSourceRegistry,
};

/// 畫布圖層的生命週期
pub trait CanvasLayer {
    /// 載入場景並開始非同步初始化
    fn draw(&mut self, scene: &dyn SceneSource) -> Result<()>;
    /// 釋放場景相關的所有狀態
    fn tear_down(&mut self);
}

pub struct VisibilityLayer {
    config: VisibilityConfig,
    world: World,
    registry: VisionSourceRegistry,
    resolver: LightingVisibilityResolver,
    engine: LosTestEngine,
    fog: FogExplorationManager,
    scheduler: VisibilityRefreshScheduler,
    viewer: ViewerContext,
    snapshot: Arc<VisibilitySnapshot>,
    lighting: LightingVisibility,
    scene_id: Option<String>,
    scene: SceneConfig,
    texture_config: Option<TextureConfiguration>,
    placeables: HashMap<String, Entity>,
}

impl VisibilityLayer {
    pub fn new(config: VisibilityConfig, store: Arc<dyn FogStore>, viewer: ViewerContext) -> Self {
        let backend: Arc<dyn LosBackend> = Arc::new(RaySweepBackend::new(config.los_precision));
        Self::with_backend(config, store, viewer, backend)
    }

    /// 使用自訂的視線幾何實作
    pub fn with_backend(
        config: VisibilityConfig,
        store: Arc<dyn FogStore>,
        viewer: ViewerContext,
        backend: Arc<dyn LosBackend>,
    ) -> Self {
        let mut world = World::new();
        world.register::<Pos>();
        world.register::<Elevation>();
        world.register::<Footprint>();
        world.register::<Detectable>();
        world.register::<Placeable>();

        let fog = FogExplorationManager::new(store, config.persist_debounce(), config.commit_threshold);
        Self {
            engine: LosTestEngine::new(config.default_tolerance),
            registry: VisionSourceRegistry::new(backend),
            resolver: LightingVisibilityResolver::default(),
            scheduler: VisibilityRefreshScheduler::new(),
            snapshot: Arc::new(VisibilitySnapshot::default()),
            lighting: LightingVisibility::default(),
            scene_id: None,
            scene: SceneConfig::default(),
            texture_config: None,
            placeables: HashMap::new(),
            config,
            world,
            fog,
            viewer,
        }
    }

    pub fn set_policy(&mut self, policy: Arc<dyn ObserverPolicy>) {
        self.engine.set_policy(policy);
    }

    pub fn initialized(&self) -> bool {
        self.scheduler.state().is_initialized()
    }

    pub fn state(&self) -> LayerState {
        self.scheduler.state()
    }

    /// 最近一次刷新的光照可見性
    pub fn lighting_visibility(&self) -> LightingVisibility {
        self.lighting
    }

    pub fn texture_configuration(&self) -> Option<&TextureConfiguration> {
        self.texture_config.as_ref()
    }

    pub fn refresh_handle(&self) -> RefreshHandle {
        self.scheduler.handle()
    }

    pub fn stats(&self) -> &RefreshStats {
        self.scheduler.stats()
    }

    pub fn refresh_count(&self) -> u64 {
        self.scheduler.stats().completed
    }

    pub fn snapshot(&self) -> &VisibilitySnapshot {
        &self.snapshot
    }

    pub fn viewer(&self) -> &ViewerContext {
        &self.viewer
    }

    /// 測試某點對目前觀察者是否可見，未初始化時一律不可見
    pub fn test_visibility(&self, point: Vec2<f32>, options: TestOptions) -> Result<bool> {
        if !self.initialized() {
            return Ok(false);
        }
        self.engine.test_visibility(&self.snapshot, &self.viewer, point, options)
    }

    /// 每個 tick 呼叫一次：處理初始化結果與合併後的刷新請求，並在到期時寫回迷霧
    ///
    /// 回傳本 tick 是否執行了刷新
    pub fn tick(&mut self, now: Instant) -> Result<bool> {
        let requests = self.scheduler.drain_requests();
        let mut refresh = self.scheduler.note_requests(requests);

        if self.scheduler.state() == LayerState::Initializing {
            if let Some(result) = self.scheduler.poll_initialization() {
                refresh |= self.finish_initialization(result)?;
            }
        }

        if refresh {
            self.run_refresh()?;
        }
        if self.initialized() {
            self.fog.persist_if_due(now)?;
        }
        Ok(refresh)
    }

    /// 阻塞等待初始化完成，回傳圖層是否已初始化
    pub fn wait_for_initialization(&mut self, timeout: Duration) -> Result<bool> {
        if self.scheduler.state() == LayerState::Initializing {
            if let Some(result) = self.scheduler.wait_initialization(timeout) {
                if self.finish_initialization(result)? {
                    self.run_refresh()?;
                }
            }
        }
        Ok(self.initialized())
    }

    fn finish_initialization(&mut self, result: Result<ExplorationTexture>) -> Result<bool> {
        let texture = match result {
            Ok(texture) => texture,
            Err(e) => {
                self.scheduler.finish_initialization(false);
                self.texture_config = None;
                log::warn!("視野圖層初始化失敗: {}", e);
                return Err(e);
            }
        };

        let scene_id = self.scene_id.clone().unwrap_or_default();
        self.fog.install(&scene_id, self.scene.fog.clone(), texture);
        self.lighting = self.resolver.resolve(&self.registry.active_sources());
        self.snapshot = Arc::new(self.build_snapshot());
        let deferred = self.scheduler.finish_initialization(true);
        log::info!("場景 {} 視野圖層初始化完成", scene_id);
        Ok(deferred)
    }

    fn build_snapshot(&self) -> VisibilitySnapshot {
        VisibilitySnapshot {
            sources: self.registry.active_sources(),
            lighting: self.lighting,
            global_illumination: self.scene.global_illumination(),
            token_vision: self.scene.token_vision,
            ambient_elevation: self.scene.ambient_elevation,
        }
    }

    /// 刷新視野；初始化中則延後到完成時執行一次
    pub fn refresh_visibility(&mut self) -> Result<()> {
        match self.scheduler.state() {
            LayerState::Initialized | LayerState::Idle => self.run_refresh(),
            LayerState::TornDown => Ok(()),
            _ => {
                self.scheduler.note_requests(1);
                Ok(())
            }
        }
    }

    fn run_refresh(&mut self) -> Result<()> {
        self.scheduler.begin_refresh();
        self.lighting = self.resolver.resolve(&self.registry.active_sources());
        self.snapshot = Arc::new(self.build_snapshot());
        self.restrict_visibility();

        let snapshot = self.snapshot.clone();
        let revealed = snapshot
            .sources
            .iter()
            .filter(|s| s.is_vision() && s.data.active)
            .filter_map(|s| s.visible_region(snapshot.global_illumination));
        let explored = self.fog.merge_visibility(revealed);
        self.scheduler.end_refresh(explored);
        log::debug!("視野刷新完成，光源 {} 個，新探索 {} 像素", snapshot.sources.len(), explored);
        Ok(())
    }

    /// 依目前快照更新所有物件的顯示狀態，回傳可見物件數
    pub fn restrict_visibility(&mut self) -> usize {
        if !self.initialized() {
            return 0;
        }
        let mut system = RestrictVisibilitySystem::new(self.engine.clone(), self.snapshot.clone(), self.viewer.clone());
        system.run_now(&self.world);
        self.world.maintain();
        system.visible
    }

    /// 以上次持久化的迷霧重建探索狀態
    pub fn reset_exploration(&mut self) {
        if self.initialized() {
            self.fog.reset_exploration();
        }
    }

    pub fn flush_exploration(&mut self) -> Result<()> {
        self.fog.flush()
    }

    pub fn clear_exploration(&mut self) -> Result<()> {
        self.fog.clear_exploration()
    }

    pub fn render_exploration(&self) -> Option<RgbaImage> {
        self.fog.render_surface()
    }

    pub fn is_explored(&self, point: Vec2<f32>) -> bool {
        self.fog.is_explored(point)
    }

    pub fn fog(&self) -> &FogExplorationManager {
        &self.fog
    }

    pub fn register_source(&mut self, data: SourceData) -> Result<()> {
        let id = data.id.clone();
        self.registry.register(data)?;
        self.scheduler.handle().request(RefreshTrigger::SourceMoved(id));
        Ok(())
    }

    /// 回傳是否重算了幾何
    pub fn update_source(&mut self, data: SourceData) -> Result<bool> {
        let id = data.id.clone();
        let recomputed = self.registry.update(data)?;
        self.scheduler.handle().request(RefreshTrigger::SourceMoved(id));
        Ok(recomputed)
    }

    pub fn unregister_source(&mut self, id: &str) -> bool {
        let removed = self.registry.unregister(id).is_some();
        if removed {
            self.scheduler.handle().request(RefreshTrigger::SourceMoved(id.to_string()));
        }
        removed
    }

    /// 設定觀察者選取的物件，未知的 id 會被忽略
    pub fn set_controlled(&mut self, ids: &[&str]) {
        let controlled: HashSet<Entity> = ids.iter().filter_map(|id| self.placeables.get(*id).copied()).collect();
        self.viewer.controlled = controlled;
        self.scheduler.handle().request(RefreshTrigger::TokenSelection);
    }

    pub fn set_viewer(&mut self, viewer: ViewerContext) {
        self.viewer = viewer;
        self.scheduler.handle().request(RefreshTrigger::TokenSelection);
    }

    pub fn placeable_entity(&self, id: &str) -> Option<Entity> {
        self.placeables.get(id).copied()
    }

    /// 物件最近一次 restrict 後是否顯示
    pub fn placeable_visible(&self, id: &str) -> Option<bool> {
        let entity = self.placeables.get(id)?;
        self.world.read_storage::<Placeable>().get(*entity).map(|p| p.visible)
    }

    pub fn move_placeable(&mut self, id: &str, position: Vec2<f32>) -> Result<()> {
        let entity = *self
            .placeables
            .get(id)
            .ok_or_else(|| VisibilityError::InvalidTestInput(format!("找不到物件 {}", id)))?;
        let mut positions = self.world.write_storage::<Pos>();
        if let Some(pos) = positions.get_mut(entity) {
            pos.0 = position;
        }
        Ok(())
    }

    fn spawn_placeable(&mut self, data: PlaceableData) {
        let mut placeable = Placeable::new(&data.id, data.kind);
        placeable.hidden = data.hidden;
        let entity = self
            .world
            .create_entity()
            .with(Pos(data.position))
            .with(Elevation(data.elevation))
            .with(Footprint { width: data.width, height: data.height })
            .with(Detectable { capabilities: data.capabilities })
            .with(placeable)
            .build();
        self.placeables.insert(data.id, entity);
    }

    fn clear_scene(&mut self) {
        self.registry.clear();
        self.world.delete_all();
        self.world.maintain();
        self.placeables.clear();
        self.viewer.controlled.clear();
        self.snapshot = Arc::new(VisibilitySnapshot::default());
        self.lighting = LightingVisibility::default();
    }
}

impl CanvasLayer for VisibilityLayer {
    fn draw(&mut self, scene: &dyn SceneSource) -> Result<()> {
        if self.scheduler.state() == LayerState::Initializing && self.scene_id.as_deref() == Some(scene.scene_id()) {
            log::warn!("場景 {} 初始化尚未完成，略過 draw", scene.scene_id());
            return Ok(());
        }

        let config = scene.config();
        let texture_config =
            TextureConfiguration::for_scene(&config.dimensions, config.fog_resolution, self.config.max_texture_size)?;

        if self.fog.texture_configuration().is_some() {
            self.fog.release();
        }
        self.clear_scene();
        self.registry.set_geometry(scene.walls(), config.dimensions);
        for source in scene.active_sources() {
            if let Err(e) = self.registry.register(source) {
                log::warn!("略過光源: {}", e);
            }
        }
        for placeable in scene.placeables() {
            self.spawn_placeable(placeable);
        }
        self.resolver.set_scene_default(config.default_lighting);

        self.scene_id = Some(scene.scene_id().to_string());
        self.scene = config;
        if let Err(e) = self.scheduler.begin_initialization(self.fog.store(), scene.scene_id(), texture_config) {
            self.texture_config = None;
            return Err(e);
        }
        self.texture_config = Some(texture_config);
        Ok(())
    }

    fn tear_down(&mut self) {
        self.fog.release();
        self.clear_scene();
        self.scheduler.tear_down();
        self.scene_id = None;
        self.texture_config = None;
        log::info!("視野圖層已卸載");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fog::MemoryFogStore;
    use crate::state::scene::StaticScene;

    fn scene() -> StaticScene {
        let config = SceneConfig {
            dimensions: crate::vision::Bounds::new(Vec2::new(0.0, 0.0), Vec2::new(100.0, 100.0)),
            ..Default::default()
        };
        StaticScene::new("test", config)
            .with_source(SourceData::vision("hero", Vec2::new(20.0, 20.0), 10.0))
            .with_placeable(PlaceableData::door("door", Vec2::new(25.0, 20.0)))
            .with_placeable(PlaceableData::note("note", Vec2::new(80.0, 80.0)))
    }

    fn layer() -> VisibilityLayer {
        VisibilityLayer::new(VisibilityConfig::default(), Arc::new(MemoryFogStore::new()), ViewerContext::player("p1"))
    }

    #[test]
    fn test_uninitialized_layer_sees_nothing() {
        let layer = layer();
        assert!(!layer.initialized());
        assert!(!layer.test_visibility(Vec2::new(20.0, 20.0), TestOptions::default()).unwrap());
    }

    #[test]
    fn test_draw_initialize_refresh() {
        let mut layer = layer();
        layer.draw(&scene()).unwrap();
        assert_eq!(layer.state(), LayerState::Initializing);
        assert!(layer.wait_for_initialization(Duration::from_secs(5)).unwrap());

        // 場景啟用後自動刷新一次
        assert_eq!(layer.state(), LayerState::Idle);
        assert_eq!(layer.refresh_count(), 1);
        assert!(layer.test_visibility(Vec2::new(22.0, 20.0), TestOptions::default()).unwrap());
        assert_eq!(layer.placeable_visible("door"), Some(true));
        assert_eq!(layer.placeable_visible("note"), Some(false));
        assert!(layer.is_explored(Vec2::new(20.0, 20.0)));
        assert_eq!(layer.texture_configuration().unwrap().width, 100);
    }

    #[test]
    fn test_source_changes_request_refresh() {
        let mut layer = layer();
        layer.draw(&scene()).unwrap();
        layer.wait_for_initialization(Duration::from_secs(5)).unwrap();
        let before = layer.refresh_count();

        layer.update_source(SourceData::vision("hero", Vec2::new(80.0, 80.0), 10.0)).unwrap();
        assert!(layer.tick(Instant::now()).unwrap());
        assert_eq!(layer.refresh_count(), before + 1);
        assert_eq!(layer.placeable_visible("note"), Some(true));
        assert_eq!(layer.placeable_visible("door"), Some(false));
        assert!(!layer.tick(Instant::now()).unwrap());
    }

    #[test]
    fn test_tear_down_clears_state() {
        let mut layer = layer();
        layer.draw(&scene()).unwrap();
        layer.wait_for_initialization(Duration::from_secs(5)).unwrap();
        layer.tear_down();
        assert_eq!(layer.state(), LayerState::TornDown);
        assert!(layer.placeable_entity("door").is_none());
        assert!(layer.texture_configuration().is_none());
        assert!(!layer.test_visibility(Vec2::new(20.0, 20.0), TestOptions::default()).unwrap());
    }
}
