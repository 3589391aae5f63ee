//! Run configuration: a JSON file, overridden field by field from the command line.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CompositingError, CompositingResult};
use crate::renderer::blend::BlendOperator;
use crate::renderer::fragment::{ShaderFragment, presets};
use crate::renderer::strategy::StrategyKind;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// CPU rasteriser; always available.
    #[default]
    Software,
    /// Headless wgpu device; needs the `gpu` feature.
    Wgpu,
}

/// Which pair of reference generators to composite.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum FragmentSet {
    /// Half-transparent blue over y, half-transparent red over x.
    #[default]
    Gradients,
    /// Blue with an alpha ramp over y, opaque red ramp over x.
    Ramps,
}

impl FragmentSet {
    /// (source, destination)
    pub fn fragments(self) -> (ShaderFragment, ShaderFragment) {
        match self {
            FragmentSet::Gradients => (
                presets::blue_vertical_gradient(),
                presets::red_horizontal_gradient(),
            ),
            FragmentSet::Ramps => (presets::blue_alpha_ramp(), presets::red_double_ramp()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompositorConfig {
    pub width: u32,
    pub height: u32,
    pub strategy: StrategyKind,
    pub operator: String,
    pub fragments: FragmentSet,
    /// Frames the headless host drives before shutting down.
    pub frames: u64,
    /// Advance to the next registry operator every N frames.
    pub cycle_every: Option<u64>,
    pub backend: BackendKind,
    /// Write the final frame here as PNG.
    pub output: Option<PathBuf>,
    /// Suppress the per-frame FPS line.
    pub quiet: bool,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            strategy: StrategyKind::Fused,
            operator: BlendOperator::SourceOver.name().to_string(),
            fragments: FragmentSet::Gradients,
            frames: 120,
            cycle_every: None,
            backend: BackendKind::Software,
            output: None,
            quiet: false,
        }
    }
}

impl CompositorConfig {
    pub fn from_json_str(text: &str) -> CompositingResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| CompositingError::config(format!("invalid config json: {e}")))
    }

    pub fn load(path: &Path) -> CompositingResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CompositingError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            CompositingError::config(format!("invalid config json in {}: {e}", path.display()))
        })
    }

    pub fn resolution(&self) -> [u32; 2] {
        [self.width, self.height]
    }

    /// The configured operator. Case, surrounding whitespace and `_` vs `-`
    /// are forgiven here; the registry itself only knows exact names.
    pub fn blend_operator(&self) -> CompositingResult<BlendOperator> {
        BlendOperator::lookup(&normalize_operator_name(&self.operator))
    }

    pub fn validate(&self) -> CompositingResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CompositingError::config(format!(
                "viewport must be non-empty, got {}x{}",
                self.width, self.height
            )));
        }
        if let Err(e) = self.blend_operator() {
            return Err(CompositingError::config(e.to_string()));
        }
        if self.cycle_every == Some(0) {
            return Err(CompositingError::config("cycle_every must be at least 1"));
        }
        Ok(())
    }
}

fn normalize_operator_name(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace('_', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_window() {
        let cfg = CompositorConfig::default();
        assert_eq!(cfg.resolution(), [512, 512]);
        assert_eq!(cfg.blend_operator().unwrap(), BlendOperator::SourceOver);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = CompositorConfig::from_json_str(
            r#"{ "strategy": "multi-pass", "operator": "xor", "cycle_every": 10 }"#,
        )
        .unwrap();
        assert_eq!(cfg.strategy, StrategyKind::MultiPass);
        assert_eq!(cfg.operator, "xor");
        assert_eq!(cfg.cycle_every, Some(10));
        assert_eq!(cfg.width, 512);
        assert_eq!(cfg.backend, BackendKind::Software);
        assert_eq!(cfg.fragments, FragmentSet::Gradients);
    }

    #[test]
    fn ramps_pair_source_with_destination() {
        let (src, dst) = FragmentSet::Ramps.fragments();
        assert_eq!(src.name(), "blue-alpha-ramp");
        assert_eq!(dst.name(), "red-double-ramp");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = CompositorConfig::from_json_str(r#"{ "widht": 3 }"#).unwrap_err();
        assert!(matches!(err, CompositingError::Config(_)));
    }

    #[test]
    fn operator_name_is_normalized_before_lookup() {
        let cfg = CompositorConfig {
            operator: " Destination_Atop ".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.blend_operator().unwrap(), BlendOperator::DestinationAtop);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let bad = [
            CompositorConfig {
                width: 0,
                ..Default::default()
            },
            CompositorConfig {
                operator: "plus-lighter".to_string(),
                ..Default::default()
            },
            CompositorConfig {
                cycle_every: Some(0),
                ..Default::default()
            },
        ];
        for cfg in bad {
            let err = cfg.validate().unwrap_err();
            assert!(matches!(err, CompositingError::Config(_)), "{cfg:?}");
        }
    }

    #[test]
    fn load_reports_missing_file() {
        let err = CompositorConfig::load(Path::new("/nonexistent/compositor.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/compositor.json"));
    }
}
