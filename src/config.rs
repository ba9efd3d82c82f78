//! Linker settings.
use serde::{Deserialize, Serialize};
use std::{env, fmt, str::FromStr};
use tracing::warn;

pub use crate::types::tables::IMT_SIZE;

/// Default number of initialized types published together.
pub const VISIBILITY_BATCH_SIZE: usize = 48;
/// Fast-path sightings of an initialized-but-not-visible type before a
/// publish is requested.
pub const MAKE_VISIBLE_TRIGGER: u32 = 128;

/// How a batch of initialized types is made visible to other threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FenceStrategy {
    /// Pick the cheapest strategy the platform supports.
    #[default]
    Auto,
    /// No publication step: the memory model already orders the reads.
    Immediate,
    /// One process-wide `membarrier(2)` per batch.
    Membarrier,
    /// A checkpoint run by every attached thread.
    Checkpoint,
}

impl FenceStrategy {
    /// The strategy `Auto` stands for on this target.
    pub fn resolve(self) -> Self {
        match self {
            FenceStrategy::Auto if cfg!(any(target_arch = "x86", target_arch = "x86_64")) => {
                FenceStrategy::Immediate
            }
            FenceStrategy::Auto if crate::linker::visibility::membarrier_supported() => {
                FenceStrategy::Membarrier
            }
            FenceStrategy::Auto => FenceStrategy::Checkpoint,
            FenceStrategy::Membarrier if !crate::linker::visibility::membarrier_supported() => {
                warn!("membarrier is not supported here, publishing with checkpoints");
                FenceStrategy::Checkpoint
            }
            other => other,
        }
    }
}

impl FromStr for FenceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(FenceStrategy::Auto),
            "immediate" => Ok(FenceStrategy::Immediate),
            "membarrier" => Ok(FenceStrategy::Membarrier),
            "checkpoint" => Ok(FenceStrategy::Checkpoint),
            _ => Err(format!("unknown fence strategy {}", s)),
        }
    }
}

impl fmt::Display for FenceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FenceStrategy::Auto => "auto",
            FenceStrategy::Immediate => "immediate",
            FenceStrategy::Membarrier => "membarrier",
            FenceStrategy::Checkpoint => "checkpoint",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    pub visibility_batch_size: usize,
    pub fence: FenceStrategy,
    pub make_visible_trigger: u32,
    pub verification_enabled: bool,
    /// Running as the ahead-of-time compiler: verification failures that can
    /// be retried are deferred to runtime, and static initializers only run
    /// when explicitly allowed.
    pub aot_compiler: bool,
    /// Whether static initializers may run during ahead-of-time processing.
    pub aot_can_init_statics: bool,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            visibility_batch_size: VISIBILITY_BATCH_SIZE,
            fence: FenceStrategy::Auto,
            make_visible_trigger: MAKE_VISIBLE_TRIGGER,
            verification_enabled: true,
            aot_compiler: false,
            aot_can_init_statics: false,
        }
    }
}

impl LinkerConfig {
    /// Defaults overridden by `DEXLINK_VISIBILITY_BATCH`, `DEXLINK_FENCE`,
    /// `DEXLINK_VERIFY` and `DEXLINK_AOT`.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies the `DEXLINK_*` variables on top of `self`.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("DEXLINK_VISIBILITY_BATCH") {
            match v.parse::<usize>() {
                Ok(n) if n > 0 => self.visibility_batch_size = n,
                _ => warn!(value = %v, "ignoring invalid DEXLINK_VISIBILITY_BATCH"),
            }
        }
        if let Some(v) = lookup("DEXLINK_FENCE") {
            match v.parse() {
                Ok(fence) => self.fence = fence,
                Err(e) => warn!("ignoring DEXLINK_FENCE: {}", e),
            }
        }
        if let Some(v) = lookup("DEXLINK_VERIFY") {
            match parse_bool(&v) {
                Some(b) => self.verification_enabled = b,
                None => warn!(value = %v, "ignoring invalid DEXLINK_VERIFY"),
            }
        }
        if let Some(v) = lookup("DEXLINK_AOT") {
            match parse_bool(&v) {
                Some(b) => self.aot_compiler = b,
                None => warn!(value = %v, "ignoring invalid DEXLINK_AOT"),
            }
        }
        self
    }

    pub fn imt_size(&self) -> usize {
        IMT_SIZE
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> LinkerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LinkerConfig::default().with_overrides(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = LinkerConfig::default();
        assert_eq!(config.visibility_batch_size, 48);
        assert_eq!(config.make_visible_trigger, 128);
        assert_eq!(config.imt_size(), 43);
        assert!(config.verification_enabled);
        assert!(!config.aot_compiler);
    }

    #[test]
    fn test_env_overrides() {
        let config = from_map(&[
            ("DEXLINK_VISIBILITY_BATCH", "4"),
            ("DEXLINK_FENCE", "Checkpoint"),
            ("DEXLINK_VERIFY", "off"),
            ("DEXLINK_AOT", "1"),
        ]);
        assert_eq!(config.visibility_batch_size, 4);
        assert_eq!(config.fence, FenceStrategy::Checkpoint);
        assert!(!config.verification_enabled);
        assert!(config.aot_compiler);
    }

    #[test]
    fn test_overrides_layer_on_file_settings() {
        let file: LinkerConfig =
            serde_json::from_str(r#"{"visibility_batch_size": 8, "verification_enabled": false}"#)
                .unwrap();
        let map: HashMap<String, String> =
            [("DEXLINK_FENCE".to_string(), "Membarrier".to_string())].into();
        let config = file.with_overrides(|k| map.get(k).cloned());
        assert_eq!(config.visibility_batch_size, 8);
        assert!(!config.verification_enabled);
        assert_eq!(config.fence, FenceStrategy::Membarrier);
        assert_eq!(config.make_visible_trigger, 128);
    }

    #[test]
    fn test_bad_values_are_ignored() {
        let config = from_map(&[
            ("DEXLINK_VISIBILITY_BATCH", "0"),
            ("DEXLINK_FENCE", "lightning"),
            ("DEXLINK_VERIFY", "maybe"),
        ]);
        assert_eq!(config, LinkerConfig::default());
    }

    #[test]
    fn test_json_round_trip() {
        let config = LinkerConfig {
            fence: FenceStrategy::Immediate,
            ..LinkerConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"immediate\""));
        let back: LinkerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        let partial: LinkerConfig = serde_json::from_str("{\"visibility_batch_size\": 2}").unwrap();
        assert_eq!(partial.visibility_batch_size, 2);
        assert_eq!(partial.fence, FenceStrategy::Auto);
    }

    #[test]
    fn test_resolved_strategy_is_concrete() {
        assert_ne!(FenceStrategy::Auto.resolve(), FenceStrategy::Auto);
        assert_eq!(FenceStrategy::Checkpoint.resolve(), FenceStrategy::Checkpoint);
    }
}
