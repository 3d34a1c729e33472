use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, VisibilityError};

/// 視野圖層設定
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct VisibilityConfig {
    /// 可見性測試的預設容差（世界單位）
    pub default_tolerance: f32,
    /// 視線多邊形的射線數量
    pub los_precision: u32,
    /// 探索貼圖邊長上限（像素）
    pub max_texture_size: u32,
    /// 最後一次揭露後多久寫回迷霧（毫秒）
    pub persist_debounce_ms: u64,
    /// 累積多少次揭露強制寫回
    pub commit_threshold: u32,
    /// 迷霧檔案目錄
    pub fog_directory: PathBuf,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            default_tolerance: 2.0,
            los_precision: 360,
            max_texture_size: 4096,
            persist_debounce_ms: 2000,
            commit_threshold: 70,
            fog_directory: PathBuf::from("fog"),
        }
    }
}

impl VisibilityConfig {
    /// 從 toml 檔載入
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| VisibilityError::Config(format!("無法讀取 {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// 從 toml 字串載入
    pub fn from_toml_str(content: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Setting {
            #[serde(default)]
            visibility: VisibilityConfig,
        }
        let setting: Setting = toml::from_str(content)?;
        setting.visibility.validate()?;
        Ok(setting.visibility)
    }

    fn validate(&self) -> Result<()> {
        if !self.default_tolerance.is_finite() || self.default_tolerance < 0.0 {
            return Err(VisibilityError::Config(format!(
                "default_tolerance 必須為非負數: {}",
                self.default_tolerance
            )));
        }
        if self.los_precision < 3 {
            return Err(VisibilityError::Config("los_precision 至少為 3".to_string()));
        }
        if self.max_texture_size == 0 {
            return Err(VisibilityError::Config("max_texture_size 不可為 0".to_string()));
        }
        Ok(())
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }
}

lazy_static! {
    /// 執行檔使用的全域設定，讀不到 visibility.toml 時退回預設值
    pub static ref CONFIG: VisibilityConfig = match VisibilityConfig::from_file("visibility.toml") {
        Ok(config) => config,
        Err(e) => {
            log::warn!("使用預設視野設定: {}", e);
            VisibilityConfig::default()
        }
    };
}
