use anyhow::{Context, Result};
use log::{info, warn};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vek::Vec2;

use omb_visibility::config::CONFIG;
use omb_visibility::fog::FileFogStore;
use omb_visibility::state::{CanvasLayer, PlaceableData, SceneConfig, StaticScene, VisibilityLayer};
use omb_visibility::vision::{Bounds, SourceData, TestOptions, ViewerContext, WallSegment};

const TPS: u64 = 10;
const DEMO_TICKS: u32 = 60;

/// 固定頻率的 tick 時鐘
struct Clock {
    target_dt: Duration,
    last: Instant,
    dt: Duration,
}

impl Clock {
    fn new(target_dt: Duration) -> Self {
        Self { target_dt, last: Instant::now(), dt: target_dt }
    }

    fn dt(&self) -> Duration {
        self.dt
    }

    /// 睡到下一個 tick
    fn tick(&mut self) {
        let elapsed = self.last.elapsed();
        if elapsed < self.target_dt {
            spin_sleep::sleep(self.target_dt - elapsed);
        }
        let now = Instant::now();
        self.dt = now - self.last;
        self.last = now;
    }
}

fn init_logger() -> Result<()> {
    if log4rs::init_file("log4rs.yml", Default::default()).is_ok() {
        return Ok(());
    }
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {h({l})} {t} - {m}{n}")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(log::LevelFilter::Info))
        .context("無法建立 log 設定")?;
    log4rs::init_config(config).context("無法初始化 log")?;
    warn!("找不到 log4rs.yml，使用預設的 console 輸出");
    Ok(())
}

fn demo_scene() -> StaticScene {
    let config = SceneConfig {
        dimensions: Bounds::new(Vec2::new(0.0, 0.0), Vec2::new(400.0, 300.0)),
        darkness_level: 0.6,
        ..Default::default()
    };
    StaticScene::new("demo-crypt", config)
        .with_wall(WallSegment::new(Vec2::new(200.0, 0.0), Vec2::new(200.0, 120.0)))
        .with_wall(WallSegment::new(Vec2::new(200.0, 180.0), Vec2::new(200.0, 300.0)))
        .with_source(SourceData::vision("hero", Vec2::new(60.0, 150.0), 90.0))
        .with_source(SourceData::light("brazier", Vec2::new(320.0, 80.0), 40.0))
        .with_placeable(PlaceableData::token("goblin", Vec2::new(300.0, 150.0), 20.0, 20.0))
        .with_placeable(PlaceableData::door("crypt-door", Vec2::new(200.0, 150.0)))
}

fn main() -> Result<()> {
    init_logger()?;

    let scene = match std::env::args().nth(1) {
        Some(path) => StaticScene::from_file(&path).with_context(|| format!("無法載入場景 {}", path))?,
        None => demo_scene(),
    };

    let store = Arc::new(FileFogStore::new(&CONFIG.fog_directory));
    let mut layer = VisibilityLayer::new(CONFIG.clone(), store, ViewerContext::player("player-1"));
    layer.draw(&scene)?;
    layer.wait_for_initialization(Duration::from_secs(5))?;

    let mut clock = Clock::new(Duration::from_secs_f64(1.0 / TPS as f64));
    for step in 0..DEMO_TICKS {
        // 英雄沿著走廊往東走
        if let Some(mut hero) = scene.sources.iter().find(|s| s.id == "hero").cloned() {
            hero.origin.x += step as f32 * 5.0;
            layer.update_source(hero)?;
        }
        if layer.tick(Instant::now())? {
            let goblin = layer.placeable_visible("goblin").unwrap_or(false);
            let door = layer.test_visibility(Vec2::new(200.0, 150.0), TestOptions::default())?;
            info!("tick {} dt={:?} goblin 可見={} 門可見={}", step, clock.dt(), goblin, door);
        }
        clock.tick();
    }

    layer.flush_exploration()?;
    if let Some(surface) = layer.render_exploration() {
        let explored = layer.fog().texture().map_or(0, |t| t.explored_count());
        info!("探索畫面 {}x{}，已探索 {} 像素", surface.width(), surface.height(), explored);
    }
    info!("刷新統計: {:?}", layer.stats());
    layer.tear_down();
    Ok(())
}
