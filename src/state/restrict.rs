/// 依視野更新物件的顯示狀態
use specs::prelude::*;
use std::sync::Arc;

use crate::comp::{Detectable, Elevation, Footprint, Placeable, PlaceableKind, Pos};
use crate::vision::{Capability, LosTestEngine, Target, TestOptions, ViewerContext, VisibilitySnapshot};

/// 對所有物件跑一次可見性測試
pub struct RestrictVisibilitySystem {
    engine: LosTestEngine,
    snapshot: Arc<VisibilitySnapshot>,
    viewer: ViewerContext,
    /// 本次可見的物件數
    pub visible: usize,
    /// 本次顯示狀態有變化的物件數
    pub changed: usize,
}

impl RestrictVisibilitySystem {
    pub fn new(engine: LosTestEngine, snapshot: Arc<VisibilitySnapshot>, viewer: ViewerContext) -> Self {
        Self { engine, snapshot, viewer, visible: 0, changed: 0 }
    }

    /// 棋子用自身大小的四分之一當容差，其餘物件用預設值
    fn tolerance(&self, kind: PlaceableKind, footprint: Option<&Footprint>) -> f32 {
        match (kind, footprint) {
            (PlaceableKind::Token, Some(f)) => (f.width.min(f.height) / 4.0).max(0.0),
            _ => self.engine.default_tolerance(),
        }
    }

    fn is_visible(
        &self,
        entity: Entity,
        pos: &Pos,
        placeable: &Placeable,
        elevation: Option<&Elevation>,
        footprint: Option<&Footprint>,
        detectable: Option<&Detectable>,
    ) -> bool {
        if placeable.hidden && !self.viewer.unrestricted {
            return false;
        }
        let controlled = self.viewer.controlled.contains(&entity);
        if controlled && placeable.kind == PlaceableKind::Token {
            return true;
        }

        let target = Target {
            entity: Some(entity),
            elevation: elevation.map_or(self.snapshot.ambient_elevation, |e| e.0),
            capabilities: detectable.map_or_else(|| vec![Capability::Sight], |d| d.capabilities.clone()),
            controlled,
        };
        let options = TestOptions {
            tolerance: Some(self.tolerance(placeable.kind, footprint)),
            object: Some(target),
        };
        match self.engine.test_visibility(&self.snapshot, &self.viewer, pos.0, options) {
            Ok(visible) => visible,
            Err(e) => {
                log::warn!("物件 {} 的可見性測試失敗: {}", placeable.id, e);
                false
            }
        }
    }
}

impl<'a> System<'a> for RestrictVisibilitySystem {
    type SystemData = (
        Entities<'a>,
        ReadStorage<'a, Pos>,
        ReadStorage<'a, Elevation>,
        ReadStorage<'a, Footprint>,
        ReadStorage<'a, Detectable>,
        WriteStorage<'a, Placeable>,
    );

    fn run(&mut self, (entities, positions, elevations, footprints, detectables, mut placeables): Self::SystemData) {
        let mut visible = 0;
        let mut changed = 0;
        for (entity, pos, placeable, elevation, footprint, detectable) in (
            &entities,
            &positions,
            &mut placeables,
            (&elevations).maybe(),
            (&footprints).maybe(),
            (&detectables).maybe(),
        )
            .join()
        {
            let now_visible = self.is_visible(entity, pos, placeable, elevation, footprint, detectable);
            if now_visible != placeable.visible {
                changed += 1;
                placeable.visible = now_visible;
            }
            if now_visible {
                visible += 1;
            }
        }
        self.visible = visible;
        self.changed = changed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{Bounds, SourceData, VisionSourceRegistry};
    use vek::Vec2;

    fn world() -> World {
        let mut world = World::new();
        world.register::<Pos>();
        world.register::<Elevation>();
        world.register::<Footprint>();
        world.register::<Detectable>();
        world.register::<Placeable>();
        world
    }

    fn snapshot() -> Arc<VisibilitySnapshot> {
        let mut registry = VisionSourceRegistry::default();
        registry.set_geometry(Vec::new(), Bounds::new(Vec2::new(0.0, 0.0), Vec2::new(100.0, 100.0)));
        registry.register(SourceData::vision("hero", Vec2::new(10.0, 10.0), 10.0)).unwrap();
        Arc::new(VisibilitySnapshot { sources: registry.active_sources(), token_vision: true, ..Default::default() })
    }

    fn spawn(world: &mut World, placeable: Placeable, at: Vec2<f32>) -> Entity {
        world.create_entity().with(Pos(at)).with(placeable).build()
    }

    fn run(world: &World, viewer: ViewerContext) -> RestrictVisibilitySystem {
        let mut system = RestrictVisibilitySystem::new(LosTestEngine::default(), snapshot(), viewer);
        system.run_now(world);
        system
    }

    #[test]
    fn test_restrict_toggles_visibility() {
        let mut world = world();
        let near = spawn(&mut world, Placeable::new("near", PlaceableKind::DoorControl), Vec2::new(15.0, 10.0));
        let far = spawn(&mut world, Placeable::new("far", PlaceableKind::Note), Vec2::new(80.0, 80.0));

        let system = run(&world, ViewerContext::player("p1"));
        assert_eq!(system.visible, 1);
        assert_eq!(system.changed, 1);
        let placeables = world.read_storage::<Placeable>();
        assert!(placeables.get(near).unwrap().visible);
        assert!(!placeables.get(far).unwrap().visible);
    }

    #[test]
    fn test_token_tolerance_uses_footprint() {
        let mut world = world();
        // 中心距視野邊緣 4，只有大棋子的容差夠
        let big = world
            .create_entity()
            .with(Pos(Vec2::new(24.0, 10.0)))
            .with(Footprint { width: 20.0, height: 20.0 })
            .with(Placeable::new("big", PlaceableKind::Token))
            .build();
        let small = world
            .create_entity()
            .with(Pos(Vec2::new(24.0, 10.0)))
            .with(Footprint { width: 4.0, height: 4.0 })
            .with(Placeable::new("small", PlaceableKind::Token))
            .build();

        run(&world, ViewerContext::player("p1"));
        let placeables = world.read_storage::<Placeable>();
        assert!(placeables.get(big).unwrap().visible);
        assert!(!placeables.get(small).unwrap().visible);
    }

    #[test]
    fn test_hidden_only_for_unrestricted() {
        let mut world = world();
        let mut hidden = Placeable::new("secret", PlaceableKind::Note);
        hidden.hidden = true;
        let entity = spawn(&mut world, hidden, Vec2::new(12.0, 10.0));

        run(&world, ViewerContext::player("p1"));
        assert!(!world.read_storage::<Placeable>().get(entity).unwrap().visible);

        run(&world, ViewerContext::observer("gm"));
        assert!(world.read_storage::<Placeable>().get(entity).unwrap().visible);
    }

    #[test]
    fn test_controlled_token_always_visible() {
        let mut world = world();
        let token = spawn(&mut world, Placeable::new("mine", PlaceableKind::Token), Vec2::new(90.0, 90.0));
        let mut viewer = ViewerContext::player("p1");
        viewer.controlled.insert(token);
        run(&world, viewer);
        assert!(world.read_storage::<Placeable>().get(token).unwrap().visible);
    }

    #[test]
    fn test_detection_capabilities_respected() {
        let mut registry = VisionSourceRegistry::default();
        registry.set_geometry(Vec::new(), Bounds::new(Vec2::new(0.0, 0.0), Vec2::new(100.0, 100.0)));
        registry
            .register(SourceData::vision("seer", Vec2::new(10.0, 10.0), 10.0).with_detection(Capability::SeeInvisibility, None))
            .unwrap();
        let snapshot = Arc::new(VisibilitySnapshot { sources: registry.active_sources(), token_vision: true, ..Default::default() });

        let mut world = world();
        let plain = spawn(&mut world, Placeable::new("plain", PlaceableKind::Note), Vec2::new(12.0, 10.0));
        let ghost = world
            .create_entity()
            .with(Pos(Vec2::new(12.0, 10.0)))
            .with(Detectable { capabilities: vec![Capability::SeeInvisibility] })
            .with(Placeable::new("ghost", PlaceableKind::Note))
            .build();

        let mut system = RestrictVisibilitySystem::new(LosTestEngine::default(), snapshot, ViewerContext::player("p1"));
        system.run_now(&world);
        let placeables = world.read_storage::<Placeable>();
        assert!(!placeables.get(plain).unwrap().visible);
        assert!(placeables.get(ghost).unwrap().visible);
    }
}
