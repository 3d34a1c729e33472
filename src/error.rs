/// 視野子系統錯誤類型

use thiserror::Error;

/// 視野與戰爭迷霧錯誤
#[derive(Debug, Error)]
pub enum VisibilityError {
    /// 貼圖配置或迷霧讀取失敗，本次 draw 終止，可重試
    #[error("初始化失敗: {0}")]
    InitializationFailure(String),

    /// 光源沒有可用的視線多邊形（僅記錄，不往外拋）
    #[error("光源 {source_id} 的視線幾何無效: {reason}")]
    InvalidSourceGeometry { source_id: String, reason: String },

    /// 呼叫端傳入的測試參數不合法
    #[error("可見性測試參數無效: {0}")]
    InvalidTestInput(String),

    /// 無法註冊的光源
    #[error("無效的光源: {0}")]
    InvalidSource(String),

    /// 迷霧持久化讀寫失敗
    #[error("迷霧持久化失敗: {0}")]
    Persistence(String),

    /// 配置檔錯誤
    #[error("配置錯誤: {0}")]
    Config(String),
}

impl From<std::io::Error> for VisibilityError {
    fn from(e: std::io::Error) -> Self {
        VisibilityError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for VisibilityError {
    fn from(e: serde_json::Error) -> Self {
        VisibilityError::Persistence(e.to_string())
    }
}

impl From<image::ImageError> for VisibilityError {
    fn from(e: image::ImageError) -> Self {
        VisibilityError::Persistence(e.to_string())
    }
}

impl From<toml::de::Error> for VisibilityError {
    fn from(e: toml::de::Error) -> Self {
        VisibilityError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VisibilityError>;
