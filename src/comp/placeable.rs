/// 畫布上受視野影響的物件
use serde::{Deserialize, Serialize};
use specs::{Component, VecStorage};
use vek::Vec2;

use crate::vision::source::Capability;

/// 中心位置
#[derive(Copy, Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pos(pub Vec2<f32>);

impl Component for Pos {
    type Storage = VecStorage<Self>;
}

/// 高度
#[derive(Copy, Clone, Default, Debug, PartialEq, Serialize, Deserialize)]
pub struct Elevation(pub f32);

impl Component for Elevation {
    type Storage = VecStorage<Self>;
}

/// 佔地尺寸（世界單位）
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub width: f32,
    pub height: f32,
}

impl Component for Footprint {
    type Storage = VecStorage<Self>;
}

/// 可被哪些感知能力偵測
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Detectable {
    pub capabilities: Vec<Capability>,
}

impl Component for Detectable {
    type Storage = VecStorage<Self>;
}

impl Detectable {
    /// 一般物件只能被看見
    pub fn sight() -> Self {
        Self { capabilities: vec![Capability::Sight] }
    }
}

/// 物件種類
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceableKind {
    Token,
    DoorControl,
    Note,
}

/// 受視野限制的物件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Placeable {
    pub id: String,
    pub kind: PlaceableKind,
    /// 主持人隱藏，只有不受限的觀察者看得到
    pub hidden: bool,
    /// 最近一次 restrict 的結果
    pub visible: bool,
}

impl Component for Placeable {
    type Storage = VecStorage<Self>;
}

impl Placeable {
    pub fn new(id: &str, kind: PlaceableKind) -> Self {
        Self { id: id.to_string(), kind, hidden: false, visible: false }
    }
}
