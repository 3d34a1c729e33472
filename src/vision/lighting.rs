/// 光照可見性合併
///
/// 將所有啟用中視野模式對各光照通道的要求折疊成一份權威狀態
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::source::{SourceKind, VisionSource};

/// 通道可見性等級，排序即限制程度：Disabled < Enabled < Required
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityLevel {
    Disabled,
    Enabled,
    Required,
}

impl VisibilityLevel {
    fn is_active(self) -> bool {
        self != VisibilityLevel::Disabled
    }
}

/// 單一視野模式對光照通道的意見，None 表示不影響該通道
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingOptions {
    pub background: Option<VisibilityLevel>,
    pub illumination: Option<VisibilityLevel>,
    pub coloration: Option<VisibilityLevel>,
    pub darkness: Option<VisibilityLevel>,
}

/// 四個通道的等級（設定檔格式）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightingLevels {
    pub background: VisibilityLevel,
    pub illumination: VisibilityLevel,
    pub coloration: VisibilityLevel,
    pub darkness: VisibilityLevel,
}

impl From<LightingLevels> for LightingVisibility {
    fn from(levels: LightingLevels) -> Self {
        LightingVisibility::new(levels.background, levels.illumination, levels.coloration, levels.darkness)
    }
}

/// 光照通道可見性
///
/// `any` 永遠由四個通道推導，不可單獨修改
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LightingLevels")]
pub struct LightingVisibility {
    pub background: VisibilityLevel,
    pub illumination: VisibilityLevel,
    pub coloration: VisibilityLevel,
    pub darkness: VisibilityLevel,
    any: bool,
}

impl LightingVisibility {
    pub fn new(
        background: VisibilityLevel,
        illumination: VisibilityLevel,
        coloration: VisibilityLevel,
        darkness: VisibilityLevel,
    ) -> Self {
        let any = background.is_active()
            || illumination.is_active()
            || coloration.is_active()
            || darkness.is_active();
        Self { background, illumination, coloration, darkness, any }
    }

    /// 四個通道都啟用
    pub fn all_enabled() -> Self {
        Self::new(
            VisibilityLevel::Enabled,
            VisibilityLevel::Enabled,
            VisibilityLevel::Enabled,
            VisibilityLevel::Enabled,
        )
    }

    pub fn any(&self) -> bool {
        self.any
    }
}

impl Default for LightingVisibility {
    fn default() -> Self {
        Self::all_enabled()
    }
}

/// 光照可見性解析器
#[derive(Debug, Clone)]
pub struct LightingVisibilityResolver {
    /// 沒有啟用光源時使用的場景預設值
    scene_default: LightingVisibility,
}

impl LightingVisibilityResolver {
    pub fn new(scene_default: LightingVisibility) -> Self {
        Self { scene_default }
    }

    pub fn scene_default(&self) -> &LightingVisibility {
        &self.scene_default
    }

    pub fn set_scene_default(&mut self, scene_default: LightingVisibility) {
        self.scene_default = scene_default;
    }

    /// 折疊所有啟用中視野光源的光照意見
    pub fn resolve(&self, sources: &[Arc<VisionSource>]) -> LightingVisibility {
        let mut background = None;
        let mut illumination = None;
        let mut coloration = None;
        let mut darkness = None;
        let mut active = 0usize;

        for source in sources {
            if !source.data.active || source.data.kind != SourceKind::Vision {
                continue;
            }
            active += 1;
            let options = source.lighting_options();
            Self::fold(&mut background, options.background);
            Self::fold(&mut illumination, options.illumination);
            Self::fold(&mut coloration, options.coloration);
            Self::fold(&mut darkness, options.darkness);
        }

        if active == 0 {
            return self.scene_default;
        }

        // 沒有任何光源表態的通道沿用場景預設
        let d = &self.scene_default;
        LightingVisibility::new(
            background.unwrap_or(d.background),
            illumination.unwrap_or(d.illumination),
            coloration.unwrap_or(d.coloration),
            darkness.unwrap_or(d.darkness),
        )
    }

    fn fold(current: &mut Option<VisibilityLevel>, opinion: Option<VisibilityLevel>) {
        if let Some(level) = opinion {
            *current = Some(current.map_or(level, |c| c.max(level)));
        }
    }
}

impl Default for LightingVisibilityResolver {
    fn default() -> Self {
        Self::new(LightingVisibility::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::source::{SourceData, VisionMode};
    use vek::Vec2;

    fn source_with(id: &str, lighting: LightingOptions) -> Arc<VisionSource> {
        let data = SourceData::vision(id, Vec2::new(0.0, 0.0), 10.0)
            .with_vision_mode(VisionMode::Custom { id: id.to_string(), lighting });
        Arc::new(VisionSource::unresolved(data))
    }

    const LEVELS: [VisibilityLevel; 3] = [
        VisibilityLevel::Disabled,
        VisibilityLevel::Enabled,
        VisibilityLevel::Required,
    ];

    #[test]
    fn test_required_beats_disabled_on_darkness() {
        let resolver = LightingVisibilityResolver::default();
        let sources = vec![
            source_with("a", LightingOptions { darkness: Some(VisibilityLevel::Required), ..Default::default() }),
            source_with("b", LightingOptions { darkness: Some(VisibilityLevel::Disabled), ..Default::default() }),
        ];
        let lv = resolver.resolve(&sources);
        assert_eq!(lv.darkness, VisibilityLevel::Required);
        assert!(lv.any());
    }

    #[test]
    fn test_no_sources_returns_scene_default() {
        let default = LightingVisibility::new(
            VisibilityLevel::Disabled,
            VisibilityLevel::Enabled,
            VisibilityLevel::Disabled,
            VisibilityLevel::Disabled,
        );
        let resolver = LightingVisibilityResolver::new(default);
        assert_eq!(resolver.resolve(&[]), default);
    }

    #[test]
    fn test_source_without_opinion_keeps_default() {
        let resolver = LightingVisibilityResolver::default();
        let sources = vec![
            source_with("a", LightingOptions { background: Some(VisibilityLevel::Required), ..Default::default() }),
            source_with("b", LightingOptions::default()),
        ];
        let lv = resolver.resolve(&sources);
        assert_eq!(lv.background, VisibilityLevel::Required);
        assert_eq!(lv.illumination, VisibilityLevel::Enabled);
        assert_eq!(lv.coloration, VisibilityLevel::Enabled);
        assert_eq!(lv.darkness, VisibilityLevel::Enabled);
    }

    #[test]
    fn test_inactive_sources_are_ignored() {
        let resolver = LightingVisibilityResolver::default();
        let mut data = SourceData::vision("a", Vec2::new(0.0, 0.0), 10.0)
            .with_vision_mode(VisionMode::Blindness);
        data.active = false;
        let lv = resolver.resolve(&[Arc::new(VisionSource::unresolved(data))]);
        assert_eq!(lv, LightingVisibility::all_enabled());
    }

    /// 所有通道組合下 any 與「全部 Disabled」互為否定
    #[test]
    fn test_any_false_iff_all_disabled() {
        let resolver = LightingVisibilityResolver::default();
        for &bg in &LEVELS {
            for &il in &LEVELS {
                for &co in &LEVELS {
                    for &dk in &LEVELS {
                        let sources = vec![source_with("s", LightingOptions {
                            background: Some(bg),
                            illumination: Some(il),
                            coloration: Some(co),
                            darkness: Some(dk),
                        })];
                        let lv = resolver.resolve(&sources);
                        let all_disabled = [lv.background, lv.illumination, lv.coloration, lv.darkness]
                            .iter()
                            .all(|l| *l == VisibilityLevel::Disabled);
                        assert_eq!(lv.any(), !all_disabled);
                    }
                }
            }
        }
    }

    #[test]
    fn test_light_sources_have_no_opinion() {
        let resolver = LightingVisibilityResolver::default();
        let light = Arc::new(VisionSource::unresolved(SourceData::light("torch", Vec2::new(0.0, 0.0), 10.0)));
        let blind = source_with("blind", VisionMode::Blindness.lighting_options());
        let lv = resolver.resolve(&[light, blind]);
        assert_eq!(lv.illumination, VisibilityLevel::Disabled);
    }
}
