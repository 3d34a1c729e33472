/// 戰爭迷霧模組
pub mod exploration;
pub mod storage;
pub mod texture;

pub use self::{
    exploration::{FogConfig, FogExplorationManager},
    storage::{FileFogStore, FogStore, MemoryFogStore, PersistedFog},
    texture::{AlphaMode, ExplorationTexture, MipmapMode, Msaa, ScaleMode, TextureConfiguration, TextureFormat},
};
