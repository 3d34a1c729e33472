/// 光源登記表
///
/// 持有場景中所有光源及其計算好的多邊形，引擎與解析器只拿快照
use hashbrown::HashMap;
use std::sync::Arc;
use vek::Vec2;

use super::geometry_utils::Bounds;
use super::los_backend::{LosBackend, RaySweepBackend, WallSegment};
use super::source::{SourceData, VisionSource};
use crate::error::{Result, VisibilityError};

pub struct VisionSourceRegistry {
    sources: HashMap<String, Arc<VisionSource>>,
    backend: Arc<dyn LosBackend>,
    walls: Vec<WallSegment>,
    scene_bounds: Bounds,
}

impl VisionSourceRegistry {
    pub fn new(backend: Arc<dyn LosBackend>) -> Self {
        Self {
            sources: HashMap::new(),
            backend,
            walls: Vec::new(),
            scene_bounds: Bounds::new(Vec2::zero(), Vec2::zero()),
        }
    }

    /// 設定遮擋幾何並重算所有光源
    pub fn set_geometry(&mut self, walls: Vec<WallSegment>, scene_bounds: Bounds) {
        self.walls = walls;
        self.scene_bounds = scene_bounds;
        let ids: Vec<String> = self.sources.keys().cloned().collect();
        for id in ids {
            if let Some(existing) = self.sources.get(&id) {
                let data = existing.data.clone();
                let source = self.build(data);
                self.sources.insert(id, Arc::new(source));
            }
        }
    }

    /// 登記光源；同 id 的既有光源會被取代
    pub fn register(&mut self, data: SourceData) -> Result<Arc<VisionSource>> {
        if data.id.trim().is_empty() {
            return Err(VisibilityError::InvalidSource("光源 id 不可為空".to_string()));
        }
        let source = Arc::new(self.build(data));
        self.sources.insert(source.data.id.clone(), source.clone());
        Ok(source)
    }

    /// 更新光源設定，幾何相關欄位改變時才重算多邊形
    ///
    /// 回傳幾何是否重算
    pub fn update(&mut self, data: SourceData) -> Result<bool> {
        let existing = match self.sources.get(&data.id) {
            Some(existing) => existing.clone(),
            None => {
                self.register(data)?;
                return Ok(true);
            }
        };

        if existing.data.geometry_changed(&data) {
            let source = self.build(data);
            self.sources.insert(source.data.id.clone(), Arc::new(source));
            Ok(true)
        } else {
            let source = VisionSource::new(data, existing.polygons.clone());
            self.sources.insert(source.data.id.clone(), Arc::new(source));
            Ok(false)
        }
    }

    pub fn unregister(&mut self, id: &str) -> Option<Arc<VisionSource>> {
        self.sources.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<VisionSource>> {
        self.sources.get(id)
    }

    /// 啟用中光源的快照，順序不固定
    pub fn active_sources(&self) -> Vec<Arc<VisionSource>> {
        self.sources
            .values()
            .filter(|s| s.data.active)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn clear(&mut self) {
        self.sources.clear();
        self.walls.clear();
    }

    fn build(&self, data: SourceData) -> VisionSource {
        let polygons = self.backend.compute(&data, &self.walls, &self.scene_bounds);
        if polygons.is_none() {
            let err = VisibilityError::InvalidSourceGeometry {
                source_id: data.id.clone(),
                reason: format!("origin={:?} radius={} angle={}", data.origin, data.radius, data.angle),
            };
            log::warn!("{}，此光源不參與視線測試", err);
        }
        VisionSource::new(data, polygons)
    }
}

impl Default for VisionSourceRegistry {
    fn default() -> Self {
        Self::new(Arc::new(RaySweepBackend::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> VisionSourceRegistry {
        let mut registry = VisionSourceRegistry::default();
        registry.set_geometry(Vec::new(), Bounds::new(Vec2::new(0.0, 0.0), Vec2::new(100.0, 100.0)));
        registry
    }

    #[test]
    fn test_register_and_snapshot() {
        let mut registry = registry();
        registry.register(SourceData::vision("a", Vec2::new(10.0, 10.0), 5.0)).unwrap();
        let mut b = SourceData::light("b", Vec2::new(20.0, 20.0), 5.0);
        b.active = false;
        registry.register(b).unwrap();

        assert_eq!(registry.len(), 2);
        let active = registry.active_sources();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id(), "a");
        assert!(active[0].polygons.is_some());
    }

    #[test]
    fn test_reject_empty_id() {
        let mut registry = registry();
        let err = registry.register(SourceData::vision("  ", Vec2::new(0.0, 0.0), 5.0)).unwrap_err();
        assert!(matches!(err, VisibilityError::InvalidSource(_)));
    }

    #[test]
    fn test_degenerate_source_kept_without_polygons() {
        let mut registry = registry();
        let source = registry.register(SourceData::vision("a", Vec2::new(0.0, 0.0), -1.0)).unwrap();
        assert!(source.polygons.is_none());
        assert_eq!(registry.active_sources().len(), 1);
    }

    #[test]
    fn test_update_recomputes_only_on_geometry_change() {
        let mut registry = registry();
        registry.register(SourceData::vision("a", Vec2::new(10.0, 10.0), 5.0)).unwrap();

        let mut moved = registry.get("a").unwrap().data.clone();
        moved.vision_mode = None;
        assert!(!registry.update(moved.clone()).unwrap());

        moved.origin = Vec2::new(50.0, 50.0);
        assert!(registry.update(moved).unwrap());
        let polygons = registry.get("a").unwrap().polygons.as_ref().unwrap();
        assert!(polygons.fov.contains(Vec2::new(50.0, 50.0)));
        assert!(!polygons.fov.contains(Vec2::new(10.0, 10.0)));
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_updates() {
        let mut registry = registry();
        registry.register(SourceData::vision("a", Vec2::new(10.0, 10.0), 5.0)).unwrap();
        let snapshot = registry.active_sources();
        registry.update(SourceData::vision("a", Vec2::new(60.0, 60.0), 5.0)).unwrap();
        assert_eq!(snapshot[0].data.origin, Vec2::new(10.0, 10.0));
    }

    #[test]
    fn test_set_geometry_recomputes() {
        let mut registry = registry();
        registry.register(SourceData::vision("a", Vec2::new(10.0, 10.0), 20.0)).unwrap();
        assert!(registry.get("a").unwrap().polygons.as_ref().unwrap().fov.contains(Vec2::new(20.0, 10.0)));

        registry.set_geometry(
            vec![WallSegment::new(Vec2::new(15.0, 0.0), Vec2::new(15.0, 30.0))],
            Bounds::new(Vec2::new(0.0, 0.0), Vec2::new(100.0, 100.0)),
        );
        assert!(!registry.get("a").unwrap().polygons.as_ref().unwrap().fov.contains(Vec2::new(20.0, 10.0)));
    }
}
