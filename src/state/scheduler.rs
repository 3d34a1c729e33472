/// 視野刷新排程
///
/// 單執行緒 tick 模型：只有貼圖配置與迷霧讀取在工作執行緒進行，
/// 結果經由 channel 回到 tick；刷新請求同樣經由 channel 進來並在每個 tick 合併
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::{Result, VisibilityError};
use crate::fog::{ExplorationTexture, FogExplorationManager, FogStore, TextureConfiguration};

/// 圖層生命週期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerState {
    Uninitialized,
    /// 等待貼圖配置與迷霧讀取
    Initializing,
    /// 初始化完成，尚未刷新過
    Initialized,
    Refreshing,
    Idle,
    TornDown,
}

impl LayerState {
    pub fn is_initialized(self) -> bool {
        matches!(self, LayerState::Initialized | LayerState::Refreshing | LayerState::Idle)
    }
}

/// 刷新原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshTrigger {
    SourceMoved(String),
    LightingChanged,
    SceneActivated,
    TokenSelection,
    Explicit,
}

/// 外部呼叫者只能透過此 handle 請求刷新
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    tx: Sender<RefreshTrigger>,
}

impl RefreshHandle {
    /// 圖層已不存在時回傳 false
    pub fn request(&self, trigger: RefreshTrigger) -> bool {
        self.tx.send(trigger).is_ok()
    }
}

/// 刷新統計
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshStats {
    pub requested: u64,
    /// 同一個 tick 內被合併的請求
    pub coalesced: u64,
    /// 初始化期間延後的請求
    pub deferred: u64,
    /// 圖層卸載後丟棄的請求
    pub dropped: u64,
    pub completed: u64,
    pub initializations: u64,
    pub failed_initializations: u64,
    pub last_refresh: Option<DateTime<Utc>>,
    pub last_explored_pixels: usize,
}

type InitMessage = (u64, Result<ExplorationTexture>);

pub struct VisibilityRefreshScheduler {
    state: LayerState,
    tx: Sender<RefreshTrigger>,
    rx: Receiver<RefreshTrigger>,
    init_rx: Option<Receiver<InitMessage>>,
    pending_scene: Option<String>,
    /// 每次初始化遞增，用來忽略過期的結果
    generation: u64,
    deferred: bool,
    last_trigger: Option<RefreshTrigger>,
    stats: RefreshStats,
}

impl VisibilityRefreshScheduler {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            state: LayerState::Uninitialized,
            tx,
            rx,
            init_rx: None,
            pending_scene: None,
            generation: 0,
            deferred: false,
            last_trigger: None,
            stats: RefreshStats::default(),
        }
    }

    pub fn handle(&self) -> RefreshHandle {
        RefreshHandle { tx: self.tx.clone() }
    }

    pub fn state(&self) -> LayerState {
        self.state
    }

    pub fn stats(&self) -> &RefreshStats {
        &self.stats
    }

    pub fn last_trigger(&self) -> Option<&RefreshTrigger> {
        self.last_trigger.as_ref()
    }

    pub fn has_deferred(&self) -> bool {
        self.deferred
    }

    /// 在工作執行緒讀取迷霧並配置貼圖
    ///
    /// 同一場景已在初始化中時不重複啟動，回傳 false；
    /// 換成另一個場景時取代進行中的初始化，舊的結果會因世代不符被忽略。
    /// 完成後固定執行一次場景啟用的刷新
    pub fn begin_initialization(
        &mut self,
        store: Arc<dyn FogStore>,
        scene_id: &str,
        config: TextureConfiguration,
    ) -> Result<bool> {
        if self.state == LayerState::Initializing {
            if self.pending_scene.as_deref() == Some(scene_id) {
                log::warn!("場景 {} 已在初始化中，略過重複的 draw", scene_id);
                return Ok(false);
            }
            log::info!("場景 {} 取代進行中的初始化 {:?}", scene_id, self.pending_scene);
        }

        self.generation += 1;
        let generation = self.generation;
        let (init_tx, init_rx) = crossbeam_channel::bounded(1);
        let scene = scene_id.to_string();
        let spawned = thread::Builder::new()
            .name(format!("fog-init-{}", generation))
            .spawn(move || {
                let result = FogExplorationManager::load_persisted(store.as_ref(), &scene, config).map_err(|e| match e {
                    VisibilityError::InitializationFailure(_) => e,
                    other => VisibilityError::InitializationFailure(format!("無法讀取場景 {} 的迷霧: {}", scene, other)),
                });
                let _ = init_tx.send((generation, result));
            });
        if let Err(e) = spawned {
            return Err(self.abandon_initialization(VisibilityError::InitializationFailure(format!(
                "無法啟動初始化執行緒: {}",
                e
            ))));
        }

        self.init_rx = Some(init_rx);
        self.pending_scene = Some(scene_id.to_string());
        self.state = LayerState::Initializing;
        self.deferred = true;
        self.last_trigger = Some(RefreshTrigger::SceneActivated);
        self.stats.initializations += 1;
        log::info!("場景 {} 開始初始化（{}x{}）", scene_id, config.width, config.height);
        Ok(true)
    }

    /// 初始化無法開始時回到 Uninitialized
    fn abandon_initialization(&mut self, error: VisibilityError) -> VisibilityError {
        self.init_rx = None;
        self.pending_scene = None;
        self.state = LayerState::Uninitialized;
        self.stats.failed_initializations += 1;
        log::warn!("{}", error);
        error
    }

    /// 非阻塞地檢查初始化結果
    pub fn poll_initialization(&mut self) -> Option<Result<ExplorationTexture>> {
        let rx = self.init_rx.as_ref()?;
        match rx.try_recv() {
            Ok(message) => self.accept(message),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(Self::worker_lost())),
        }
    }

    /// 阻塞等待初始化結果，逾時回傳 None
    pub fn wait_initialization(&mut self, timeout: Duration) -> Option<Result<ExplorationTexture>> {
        let rx = self.init_rx.as_ref()?;
        match rx.recv_timeout(timeout) {
            Ok(message) => self.accept(message),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(Self::worker_lost())),
        }
    }

    fn accept(&mut self, (generation, result): InitMessage) -> Option<Result<ExplorationTexture>> {
        if generation != self.generation {
            log::debug!("忽略過期的初始化結果 #{}", generation);
            return None;
        }
        Some(result)
    }

    fn worker_lost() -> VisibilityError {
        VisibilityError::InitializationFailure("初始化執行緒意外結束".to_string())
    }

    /// 記錄初始化結果，回傳是否有延後的刷新需要立刻執行
    ///
    /// 失敗時回到 Uninitialized，延後的請求保留到下一次成功的初始化
    pub fn finish_initialization(&mut self, success: bool) -> bool {
        self.init_rx = None;
        self.pending_scene = None;
        if success {
            self.state = LayerState::Initialized;
            std::mem::take(&mut self.deferred)
        } else {
            self.state = LayerState::Uninitialized;
            self.stats.failed_initializations += 1;
            false
        }
    }

    /// 取出本 tick 累積的請求數
    pub fn drain_requests(&mut self) -> u64 {
        let mut count = 0;
        while let Ok(trigger) = self.rx.try_recv() {
            self.last_trigger = Some(trigger);
            count += 1;
        }
        self.stats.requested += count;
        count
    }

    /// 依目前狀態處理請求，回傳是否應立即刷新
    pub fn note_requests(&mut self, count: u64) -> bool {
        if count == 0 {
            return false;
        }
        match self.state {
            LayerState::Initializing | LayerState::Refreshing => {
                self.deferred = true;
                self.stats.deferred += count;
                false
            }
            LayerState::Initialized | LayerState::Idle => {
                self.stats.coalesced += count - 1;
                true
            }
            // 初始化前或失敗後的請求留給下一次成功的初始化
            LayerState::Uninitialized => {
                self.deferred = true;
                self.stats.deferred += count;
                false
            }
            LayerState::TornDown => {
                self.stats.dropped += count;
                false
            }
        }
    }

    pub fn begin_refresh(&mut self) {
        self.state = LayerState::Refreshing;
    }

    pub fn end_refresh(&mut self, explored_pixels: usize) {
        self.state = LayerState::Idle;
        self.stats.completed += 1;
        self.stats.last_refresh = Some(Utc::now());
        self.stats.last_explored_pixels = explored_pixels;
    }

    /// 刷新失敗時回到可刷新的狀態
    pub fn abort_refresh(&mut self) {
        self.state = LayerState::Idle;
    }

    pub fn tear_down(&mut self) {
        while self.rx.try_recv().is_ok() {}
        self.generation += 1;
        self.init_rx = None;
        self.pending_scene = None;
        self.deferred = false;
        self.state = LayerState::TornDown;
    }
}

impl Default for VisibilityRefreshScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fog::MemoryFogStore;
    use crate::vision::Bounds;
    use vek::Vec2;

    fn texture_config() -> TextureConfiguration {
        TextureConfiguration::for_scene(&Bounds::new(Vec2::new(0.0, 0.0), Vec2::new(10.0, 10.0)), Some(1.0), 64)
            .unwrap()
    }

    fn start(scheduler: &mut VisibilityRefreshScheduler) {
        start_scene(scheduler, "s");
    }

    fn start_scene(scheduler: &mut VisibilityRefreshScheduler, scene_id: &str) {
        let store: Arc<dyn FogStore> = Arc::new(MemoryFogStore::new());
        assert!(scheduler.begin_initialization(store, scene_id, texture_config()).unwrap());
    }

    #[test]
    fn test_requests_during_initialization_are_deferred_once() {
        let mut scheduler = VisibilityRefreshScheduler::new();
        start(&mut scheduler);
        let handle = scheduler.handle();
        handle.request(RefreshTrigger::SourceMoved("a".to_string()));
        handle.request(RefreshTrigger::Explicit);

        let count = scheduler.drain_requests();
        assert_eq!(count, 2);
        assert!(!scheduler.note_requests(count));
        assert!(scheduler.has_deferred());

        let result = scheduler.wait_initialization(Duration::from_secs(5)).unwrap();
        assert!(result.is_ok());
        assert!(scheduler.finish_initialization(true));
        assert!(!scheduler.has_deferred());
        assert_eq!(scheduler.state(), LayerState::Initialized);
        assert_eq!(scheduler.stats().deferred, 2);
    }

    #[test]
    fn test_requests_are_coalesced() {
        let mut scheduler = VisibilityRefreshScheduler::new();
        start(&mut scheduler);
        scheduler.wait_initialization(Duration::from_secs(5)).unwrap().unwrap();
        scheduler.finish_initialization(true);

        let handle = scheduler.handle();
        for _ in 0..3 {
            handle.request(RefreshTrigger::LightingChanged);
        }
        let count = scheduler.drain_requests();
        assert!(scheduler.note_requests(count));
        assert_eq!(scheduler.stats().coalesced, 2);
        let count = scheduler.drain_requests();
        assert!(!scheduler.note_requests(count));
    }

    #[test]
    fn test_duplicate_draw_is_ignored() {
        let mut scheduler = VisibilityRefreshScheduler::new();
        start(&mut scheduler);
        let store: Arc<dyn FogStore> = Arc::new(MemoryFogStore::new());
        assert!(!scheduler.begin_initialization(store, "s", texture_config()).unwrap());
    }

    #[test]
    fn test_failure_returns_to_uninitialized() {
        let mut scheduler = VisibilityRefreshScheduler::new();
        start(&mut scheduler);
        scheduler.wait_initialization(Duration::from_secs(5));
        assert!(!scheduler.finish_initialization(false));
        assert_eq!(scheduler.state(), LayerState::Uninitialized);
        assert_eq!(scheduler.stats().failed_initializations, 1);
        start(&mut scheduler);
        assert_eq!(scheduler.state(), LayerState::Initializing);
    }

    #[test]
    fn test_tear_down_drops_requests() {
        let mut scheduler = VisibilityRefreshScheduler::new();
        start(&mut scheduler);
        scheduler.handle().request(RefreshTrigger::Explicit);
        scheduler.tear_down();
        assert_eq!(scheduler.state(), LayerState::TornDown);
        assert!(scheduler.poll_initialization().is_none());
        let count = scheduler.drain_requests();
        assert_eq!(count, 0);
        scheduler.handle().request(RefreshTrigger::Explicit);
        let count = scheduler.drain_requests();
        assert!(!scheduler.note_requests(count));
        assert_eq!(scheduler.stats().dropped, 1);
    }

    #[test]
    fn test_initialization_always_schedules_activation_refresh() {
        let mut scheduler = VisibilityRefreshScheduler::new();
        start(&mut scheduler);
        assert!(scheduler.has_deferred());
        assert_eq!(scheduler.last_trigger(), Some(&RefreshTrigger::SceneActivated));
        scheduler.wait_initialization(Duration::from_secs(5)).unwrap().unwrap();
        assert!(scheduler.finish_initialization(true));
        let count = scheduler.drain_requests();
        assert!(!scheduler.note_requests(count));
    }

    #[test]
    fn test_other_scene_replaces_pending_initialization() {
        let mut scheduler = VisibilityRefreshScheduler::new();
        start_scene(&mut scheduler, "a");
        start_scene(&mut scheduler, "b");
        assert_eq!(scheduler.state(), LayerState::Initializing);
        assert_eq!(scheduler.stats().initializations, 2);

        let result = scheduler.wait_initialization(Duration::from_secs(5)).unwrap();
        assert!(result.is_ok());
        assert!(scheduler.finish_initialization(true));
        assert_eq!(scheduler.state(), LayerState::Initialized);
    }

    #[test]
    fn test_abandoned_initialization_leaves_layer_uninitialized() {
        let mut scheduler = VisibilityRefreshScheduler::new();
        start(&mut scheduler);
        scheduler.wait_initialization(Duration::from_secs(5)).unwrap().unwrap();
        scheduler.finish_initialization(true);
        scheduler.begin_refresh();
        scheduler.end_refresh(0);
        assert_eq!(scheduler.state(), LayerState::Idle);

        let err = scheduler.abandon_initialization(VisibilityError::InitializationFailure("x".to_string()));
        assert!(matches!(err, VisibilityError::InitializationFailure(_)));
        assert_eq!(scheduler.state(), LayerState::Uninitialized);
        assert!(!scheduler.state().is_initialized());
        assert!(scheduler.poll_initialization().is_none());
        assert_eq!(scheduler.stats().failed_initializations, 1);
    }
}
