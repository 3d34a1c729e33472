/// 探索貼圖
///
/// 以 8 位元灰階點陣記錄已探索區域，255 表示已探索
use image::{GrayImage, ImageFormat, Luma};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use vek::Vec2;

use crate::error::{Result, VisibilityError};
use crate::vision::geometry_utils::{Bounds, EDGE_EPSILON};
use crate::vision::source::LosPolygon;

pub const EXPLORED: u8 = 255;
pub const UNEXPLORED: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MipmapMode {
    Off,
    On,
}

/// 多重取樣
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Msaa {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlphaMode {
    NoPremultiply,
    Premultiply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    /// 單通道
    Red,
    Rgba,
}

/// 探索貼圖設定，建立後不再變更，每個場景重建一次
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextureConfiguration {
    /// 每世界單位對應的像素數
    pub resolution: f32,
    pub width: u32,
    pub height: u32,
    /// 場景左上角的世界座標
    pub origin: Vec2<f32>,
    pub mipmap: MipmapMode,
    pub multisample: Msaa,
    pub scale_mode: ScaleMode,
    pub alpha_mode: AlphaMode,
    pub format: TextureFormat,
}

impl TextureConfiguration {
    /// 依場景範圍建立設定
    ///
    /// 沒有指定解析度時取 min(1, 最大邊長 / 場景最長邊)
    pub fn for_scene(scene: &Bounds, resolution: Option<f32>, max_texture_size: u32) -> Result<Self> {
        let (w, h) = (scene.width(), scene.height());
        if !w.is_finite() || !h.is_finite() || w <= 0.0 || h <= 0.0 {
            return Err(VisibilityError::InitializationFailure(format!("場景尺寸無效: {} x {}", w, h)));
        }

        let resolution = match resolution {
            Some(r) if r.is_finite() && r > 0.0 => r,
            Some(r) => {
                return Err(VisibilityError::InitializationFailure(format!("迷霧解析度無效: {}", r)));
            }
            None => (max_texture_size as f32 / w.max(h)).min(1.0),
        };

        // 扣掉浮點誤差，避免剛好填滿上限時多出一像素
        let width = (w * resolution - EDGE_EPSILON).ceil() as u32;
        let height = (h * resolution - EDGE_EPSILON).ceil() as u32;
        if width == 0 || height == 0 || width > max_texture_size || height > max_texture_size {
            return Err(VisibilityError::InitializationFailure(format!(
                "無法配置 {} x {} 的探索貼圖（上限 {}）",
                width, height, max_texture_size
            )));
        }

        Ok(Self {
            resolution,
            width,
            height,
            origin: scene.min,
            mipmap: MipmapMode::Off,
            multisample: Msaa::None,
            scale_mode: ScaleMode::Linear,
            alpha_mode: AlphaMode::NoPremultiply,
            format: TextureFormat::Red,
        })
    }

    /// 世界座標轉像素座標，超出貼圖時回傳 None
    pub fn world_to_pixel(&self, point: Vec2<f32>) -> Option<(u32, u32)> {
        let local = (point - self.origin) * self.resolution;
        if !local.x.is_finite() || !local.y.is_finite() || local.x < 0.0 || local.y < 0.0 {
            return None;
        }
        let (x, y) = (local.x.floor() as u32, local.y.floor() as u32);
        if x >= self.width || y >= self.height {
            return None;
        }
        Some((x, y))
    }

    /// 像素中心的世界座標
    pub fn pixel_center(&self, x: u32, y: u32) -> Vec2<f32> {
        self.origin + Vec2::new(x as f32 + 0.5, y as f32 + 0.5) / self.resolution
    }
}

/// 已配置的探索點陣
#[derive(Debug, Clone, PartialEq)]
pub struct ExplorationTexture {
    config: TextureConfiguration,
    pixels: GrayImage,
}

impl ExplorationTexture {
    pub fn allocate(config: TextureConfiguration) -> Self {
        Self {
            pixels: GrayImage::from_pixel(config.width, config.height, Luma([UNEXPLORED])),
            config,
        }
    }

    /// 以既有點陣建立，尺寸必須與設定相符
    pub fn from_image(config: TextureConfiguration, pixels: GrayImage) -> Result<Self> {
        if pixels.dimensions() != (config.width, config.height) {
            return Err(VisibilityError::Persistence(format!(
                "點陣尺寸 {:?} 與設定 {}x{} 不符",
                pixels.dimensions(),
                config.width,
                config.height
            )));
        }
        Ok(Self { config, pixels })
    }

    pub fn config(&self) -> &TextureConfiguration {
        &self.config
    }

    pub fn image(&self) -> &GrayImage {
        &self.pixels
    }

    /// 將多邊形畫入點陣，回傳新探索的像素數
    pub fn rasterize(&mut self, polygon: &LosPolygon) -> usize {
        let config = self.config;
        let Some((x0, y0, x1, y1)) = Self::pixel_span(&config, &polygon.bounds) else {
            return 0;
        };

        let mut changed = 0;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let pixel = self.pixels.get_pixel_mut(x, y);
                if pixel.0[0] == EXPLORED {
                    continue;
                }
                if polygon.contains(config.pixel_center(x, y)) {
                    pixel.0[0] = EXPLORED;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// 外接矩形覆蓋的像素範圍（含端點），完全在貼圖外時回傳 None
    fn pixel_span(config: &TextureConfiguration, bounds: &Bounds) -> Option<(u32, u32, u32, u32)> {
        let min = (bounds.min - config.origin) * config.resolution;
        let max = (bounds.max - config.origin) * config.resolution;
        if max.x < 0.0 || max.y < 0.0 || min.x >= config.width as f32 || min.y >= config.height as f32 {
            return None;
        }
        let x0 = min.x.floor().max(0.0) as u32;
        let y0 = min.y.floor().max(0.0) as u32;
        let x1 = (max.x.floor() as u32).min(config.width - 1);
        let y1 = (max.y.floor() as u32).min(config.height - 1);
        Some((x0, y0, x1, y1))
    }

    pub fn is_explored(&self, point: Vec2<f32>) -> bool {
        self.config
            .world_to_pixel(point)
            .map_or(false, |(x, y)| self.pixels.get_pixel(x, y).0[0] == EXPLORED)
    }

    pub fn explored_count(&self) -> usize {
        self.pixels.pixels().filter(|p| p.0[0] == EXPLORED).count()
    }

    pub fn clear(&mut self) {
        for pixel in self.pixels.pixels_mut() {
            pixel.0[0] = UNEXPLORED;
        }
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        image::DynamicImage::ImageLuma8(self.pixels.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }

    pub fn decode_png(config: TextureConfiguration, bytes: &[u8]) -> Result<Self> {
        let pixels = image::load_from_memory_with_format(bytes, ImageFormat::Png)?.to_luma8();
        Self::from_image(config, pixels)
    }
}
