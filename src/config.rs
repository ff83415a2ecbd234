// src/config.rs
// Type-safe configuration for scene upload and the wavefront path tracer
// Exists so the acceleration-structure layout and tracer knobs come from one validated place

use crate::error::{RenderError, RenderResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Acceleration structure layout. Fixed for the lifetime of a scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccelKind {
    #[serde(alias = "single", alias = "flat")]
    SingleLevel,
    #[serde(alias = "multi", alias = "instanced")]
    MultiLevel,
}

impl AccelKind {
    fn canonical(self) -> &'static str {
        match self {
            Self::SingleLevel => "single-level",
            Self::MultiLevel => "multi-level",
        }
    }
}

impl fmt::Display for AccelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

impl FromStr for AccelKind {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key = normalize_key(value);
        Ok(match key.as_str() {
            "singlelevel" | "single" | "flat" => Self::SingleLevel,
            "multilevel" | "multi" | "instanced" | "twolevel" => Self::MultiLevel,
            _ => return Err("unknown acceleration structure kind"),
        })
    }
}

fn normalize_key(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Scene-level parameters consumed by the upload subsystem.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneParameters {
    #[serde(default = "SceneParameters::default_accel")]
    pub accel: AccelKind,
    /// Maximum primitives per BVH leaf.
    #[serde(default = "SceneParameters::default_leaf_size")]
    pub bvh_max_leaf_size: u32,
    /// Optional device memory budget in bytes for the host-emulated device.
    #[serde(default)]
    pub device_memory_budget: Option<u64>,
}

impl SceneParameters {
    const fn default_accel() -> AccelKind {
        AccelKind::SingleLevel
    }

    const fn default_leaf_size() -> u32 {
        4
    }

    pub fn multilevel() -> Self {
        Self {
            accel: AccelKind::MultiLevel,
            ..Self::default()
        }
    }

    pub fn build_multilevel(&self) -> bool {
        self.accel == AccelKind::MultiLevel
    }
}

impl Default for SceneParameters {
    fn default() -> Self {
        Self {
            accel: Self::default_accel(),
            bvh_max_leaf_size: Self::default_leaf_size(),
            device_memory_budget: None,
        }
    }
}

/// Knobs of the wavefront path tracer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathTracerParams {
    #[serde(default = "PathTracerParams::default_max_depth")]
    pub max_depth: u32,
    /// Russian roulette continuation probability.
    #[serde(default = "PathTracerParams::default_rr")]
    pub rr: f32,
    /// Next-event estimation.
    #[serde(default = "PathTracerParams::default_nee")]
    pub nee: bool,
    #[serde(default = "PathTracerParams::default_spp")]
    pub spp: u32,
    #[serde(default)]
    pub seed: u64,
    /// Depth at which Russian roulette starts.
    #[serde(default = "PathTracerParams::default_rr_start_depth")]
    pub rr_start_depth: u32,
}

impl PathTracerParams {
    const fn default_max_depth() -> u32 {
        10
    }

    const fn default_rr() -> f32 {
        0.8
    }

    const fn default_nee() -> bool {
        true
    }

    const fn default_spp() -> u32 {
        1
    }

    const fn default_rr_start_depth() -> u32 {
        1
    }
}

impl Default for PathTracerParams {
    fn default() -> Self {
        Self {
            max_depth: Self::default_max_depth(),
            rr: Self::default_rr(),
            nee: Self::default_nee(),
            spp: Self::default_spp(),
            seed: 0,
            rr_start_depth: Self::default_rr_start_depth(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    #[serde(default)]
    pub scene: SceneParameters,
    #[serde(default)]
    pub path_tracer: PathTracerParams,
}

impl RendererConfig {
    pub fn from_json_str(json: &str) -> RenderResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> RenderResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> RenderResult<()> {
        let pt = &self.path_tracer;
        if pt.max_depth == 0 {
            return Err(RenderError::config("path_tracer.max_depth must be at least 1"));
        }
        if !(pt.rr > 0.0 && pt.rr <= 1.0) {
            return Err(RenderError::config(format!(
                "path_tracer.rr must be in (0, 1], got {}",
                pt.rr
            )));
        }
        if pt.spp == 0 {
            return Err(RenderError::config("path_tracer.spp must be at least 1"));
        }
        if self.scene.bvh_max_leaf_size == 0 {
            return Err(RenderError::config("scene.bvh_max_leaf_size must be at least 1"));
        }
        if self.scene.device_memory_budget == Some(0) {
            return Err(RenderError::config("scene.device_memory_budget must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tracer_json() {
        let config = RendererConfig::from_json_str("{}").unwrap();
        assert_eq!(config.path_tracer.max_depth, 10);
        assert!((config.path_tracer.rr - 0.8).abs() < 1e-6);
        assert!(config.path_tracer.nee);
        assert_eq!(config.scene.accel, AccelKind::SingleLevel);
    }

    #[test]
    fn parses_aliases_and_overrides() {
        let json = r#"{
            "scene": { "accel": "multi" },
            "path_tracer": { "max_depth": 3, "rr": 1.0, "nee": false }
        }"#;
        let config = RendererConfig::from_json_str(json).unwrap();
        assert!(config.scene.build_multilevel());
        assert_eq!(config.path_tracer.max_depth, 3);
        assert!(!config.path_tracer.nee);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = RendererConfig::from_json_str(r#"{"path_tracer": {"rr": 0.0}}"#).unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
        let err = RendererConfig::from_json_str(r#"{"path_tracer": {"max_depth": 0}}"#).unwrap_err();
        assert!(matches!(err, RenderError::Config(_)));
    }

    #[test]
    fn accel_kind_from_str() {
        assert_eq!("Two-Level".parse::<AccelKind>(), Ok(AccelKind::MultiLevel));
        assert_eq!("flat".parse::<AccelKind>(), Ok(AccelKind::SingleLevel));
        assert!("octree".parse::<AccelKind>().is_err());
        assert_eq!(AccelKind::MultiLevel.to_string(), "multi-level");
    }

    #[test]
    fn json_round_trip_preserves_config() {
        let mut config = RendererConfig::default();
        config.scene = SceneParameters::multilevel();
        let json = config.to_json_string().unwrap();
        assert_eq!(RendererConfig::from_json_str(&json).unwrap(), config);
    }
}
