/// 迷霧持久化
use base64::Engine;
use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::texture::{ExplorationTexture, TextureConfiguration};
use crate::error::{Result, VisibilityError};

/// 每個場景一份的迷霧文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedFog {
    pub scene_id: String,
    pub config: TextureConfiguration,
    /// base64 編碼的灰階 PNG
    pub explored: String,
    pub saved_at: DateTime<Utc>,
}

impl PersistedFog {
    pub fn encode(scene_id: &str, texture: &ExplorationTexture) -> Result<Self> {
        let png = texture.encode_png()?;
        Ok(Self {
            scene_id: scene_id.to_string(),
            config: *texture.config(),
            explored: base64::engine::general_purpose::STANDARD.encode(&png),
            saved_at: Utc::now(),
        })
    }

    pub fn decode(&self) -> Result<ExplorationTexture> {
        let png = base64::engine::general_purpose::STANDARD
            .decode(self.explored.as_bytes())
            .map_err(|e| VisibilityError::Persistence(format!("base64 解碼失敗: {}", e)))?;
        ExplorationTexture::decode_png(self.config, &png)
    }
}

/// 迷霧的持久化儲存
pub trait FogStore: Send + Sync {
    fn load(&self, scene_id: &str) -> Result<Option<PersistedFog>>;
    fn save(&self, fog: &PersistedFog) -> Result<()>;
    fn delete(&self, scene_id: &str) -> Result<()>;
}

/// 以 JSON 檔案儲存，一個場景一個檔案
#[derive(Debug, Clone)]
pub struct FileFogStore {
    directory: PathBuf,
}

impl FileFogStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self { directory: directory.as_ref().to_path_buf() }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, scene_id: &str) -> PathBuf {
        let name: String = scene_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.directory.join(format!("{}.json", name))
    }
}

impl FogStore for FileFogStore {
    fn load(&self, scene_id: &str) -> Result<Option<PersistedFog>> {
        let path = self.path_for(scene_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let fog: PersistedFog = serde_json::from_str(&content)?;
        Ok(Some(fog))
    }

    /// 先寫暫存檔再改名，寫到一半中斷時舊檔仍完整
    fn save(&self, fog: &PersistedFog) -> Result<()> {
        fs::create_dir_all(&self.directory)?;
        let path = self.path_for(&fog.scene_id);
        let tmp = self.directory.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp, serde_json::to_vec(fog)?)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        log::debug!("迷霧已寫入 {}", path.display());
        Ok(())
    }

    fn delete(&self, scene_id: &str) -> Result<()> {
        let path = self.path_for(scene_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// 記憶體內儲存，測試與不需落地的場景使用
#[derive(Debug, Default)]
pub struct MemoryFogStore {
    documents: Mutex<HashMap<String, PersistedFog>>,
}

impl MemoryFogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }
}

impl FogStore for MemoryFogStore {
    fn load(&self, scene_id: &str) -> Result<Option<PersistedFog>> {
        Ok(self.documents.lock().get(scene_id).cloned())
    }

    fn save(&self, fog: &PersistedFog) -> Result<()> {
        self.documents.lock().insert(fog.scene_id.clone(), fog.clone());
        Ok(())
    }

    fn delete(&self, scene_id: &str) -> Result<()> {
        self.documents.lock().remove(scene_id);
        Ok(())
    }
}
