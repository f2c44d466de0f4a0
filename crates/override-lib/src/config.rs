//! Override configuration
//!
//! The operator mounts a `ClusterResourceOverride` document (YAML or JSON)
//! and points `CONFIGURATION_PATH` at it. Percentages are validated once
//! at load time; the resulting `Config` is immutable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable holding the configuration file path
pub const CONFIGURATION_ENV: &str = "CONFIGURATION_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration file specified, env var {0} is not set")]
    MissingPath(&'static str),

    #[error("unable to load file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode configuration - {0}")]
    Decode(#[from] serde_yaml::Error),

    #[error("{field} must not be negative, got {value}")]
    NegativePercent { field: &'static str, value: i64 },
}

/// User-facing override settings, as written in the configuration document
///
/// For each percentage, a non-zero value overwrites the corresponding
/// field in the pod spec; zero leaves it alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceOverrideSpec {
    /// Label pods that mount a PVC with the `spc_t` SELinux type
    #[serde(default)]
    pub force_selinux_relabel: bool,

    /// CPU limit as a percentage of the memory limit; 100 maps 1Gi to one core
    #[serde(default, rename = "limitCPUToMemoryPercent")]
    pub limit_cpu_to_memory_percent: i64,

    /// CPU request as a percentage of the CPU limit
    #[serde(default, rename = "cpuRequestToLimitPercent")]
    pub cpu_request_to_limit_percent: i64,

    /// Memory request as a percentage of the memory limit
    #[serde(default)]
    pub memory_request_to_limit_percent: i64,
}

/// Full `ClusterResourceOverrideConfig` object, with the settings under `spec`
#[derive(Deserialize)]
struct Document {
    spec: ClusterResourceOverrideSpec,
}

/// Effective override settings
///
/// Percentages are kept as integers so the request steps stay exact;
/// the `*_ratio` accessors give the fractional form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    pub force_selinux_relabel: bool,
    pub limit_cpu_to_memory_percent: i64,
    pub cpu_request_to_limit_percent: i64,
    pub memory_request_to_limit_percent: i64,
}

impl Config {
    /// Validate the percentages, rejecting negative values
    pub fn from_spec(spec: &ClusterResourceOverrideSpec) -> Result<Self, ConfigError> {
        let percent = |field: &'static str, value: i64| {
            if value < 0 {
                Err(ConfigError::NegativePercent { field, value })
            } else {
                Ok(value)
            }
        };

        Ok(Self {
            force_selinux_relabel: spec.force_selinux_relabel,
            limit_cpu_to_memory_percent: percent(
                "limitCPUToMemoryPercent",
                spec.limit_cpu_to_memory_percent,
            )?,
            cpu_request_to_limit_percent: percent(
                "cpuRequestToLimitPercent",
                spec.cpu_request_to_limit_percent,
            )?,
            memory_request_to_limit_percent: percent(
                "memoryRequestToLimitPercent",
                spec.memory_request_to_limit_percent,
            )?,
        })
    }

    /// Decode a YAML or JSON document
    ///
    /// A document with a top-level `spec` is decoded only as the full
    /// object, so a malformed `spec` is an error rather than an empty config.
    pub fn decode(content: &str) -> Result<Self, ConfigError> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)?;

        let spec = if value.get("spec").is_some() {
            serde_yaml::from_value::<Document>(value)?.spec
        } else {
            serde_yaml::from_value::<ClusterResourceOverrideSpec>(value)?
        };
        Self::from_spec(&spec)
    }

    /// Load from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::decode(&content)
    }

    /// Load from the file named by `CONFIGURATION_PATH`
    pub fn load_from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIGURATION_ENV) {
            Ok(path) if !path.is_empty() => Self::load(path),
            _ => Err(ConfigError::MissingPath(CONFIGURATION_ENV)),
        }
    }

    pub fn limit_cpu_to_memory_ratio(&self) -> f64 {
        self.limit_cpu_to_memory_percent as f64 / 100.0
    }

    pub fn cpu_request_to_limit_ratio(&self) -> f64 {
        self.cpu_request_to_limit_percent as f64 / 100.0
    }

    pub fn memory_request_to_limit_ratio(&self) -> f64 {
        self.memory_request_to_limit_percent as f64 / 100.0
    }

    /// True when no step of the override is enabled
    pub fn is_noop(&self) -> bool {
        self.limit_cpu_to_memory_percent == 0
            && self.cpu_request_to_limit_percent == 0
            && self.memory_request_to_limit_percent == 0
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LimitCPUToMemoryRatio={:.6} CpuRequestToLimitRatio={:.6} MemoryRequestToLimitRatio={:.6} ForceSelinuxRelabel={}",
            self.limit_cpu_to_memory_ratio(),
            self.cpu_request_to_limit_ratio(),
            self.memory_request_to_limit_ratio(),
            self.force_selinux_relabel
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_convert_percentages() {
        let spec = ClusterResourceOverrideSpec {
            force_selinux_relabel: false,
            limit_cpu_to_memory_percent: 400,
            cpu_request_to_limit_percent: 25,
            memory_request_to_limit_percent: 50,
        };

        let config = Config::from_spec(&spec).unwrap();
        assert_eq!(config.limit_cpu_to_memory_percent, 400);
        assert_eq!(config.limit_cpu_to_memory_ratio(), 4.0);
        assert_eq!(config.cpu_request_to_limit_ratio(), 0.25);
        assert_eq!(config.memory_request_to_limit_ratio(), 0.5);
        assert!(!config.is_noop());
    }

    #[test]
    fn test_negative_percent_rejected() {
        let spec = ClusterResourceOverrideSpec {
            cpu_request_to_limit_percent: -10,
            ..Default::default()
        };

        let err = Config::from_spec(&spec).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NegativePercent {
                field: "cpuRequestToLimitPercent",
                value: -10
            }
        ));
    }

    #[test]
    fn test_decode_full_object() {
        let yaml = r#"
apiVersion: admission.autoscaling.openshift.io/v1
kind: ClusterResourceOverrideConfig
spec:
  limitCPUToMemoryPercent: 200
  cpuRequestToLimitPercent: 25
  memoryRequestToLimitPercent: 50
  forceSelinuxRelabel: true
"#;
        let config = Config::decode(yaml).unwrap();
        assert_eq!(config.limit_cpu_to_memory_percent, 200);
        assert_eq!(config.cpu_request_to_limit_percent, 25);
        assert_eq!(config.memory_request_to_limit_percent, 50);
        assert!(config.force_selinux_relabel);
    }

    #[test]
    fn test_decode_bare_json() {
        let json = r#"{"memoryRequestToLimitPercent": 60}"#;
        let config = Config::decode(json).unwrap();

        assert_eq!(config.memory_request_to_limit_percent, 60);
        assert_eq!(config.cpu_request_to_limit_percent, 0);
        assert_eq!(config.limit_cpu_to_memory_percent, 0);
        assert!(!config.force_selinux_relabel);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Config::decode("spec: [1, 2"),
            Err(ConfigError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_mistyped_spec_field() {
        let quoted = "spec:\n  memoryRequestToLimitPercent: \"50\"\n  cpuRequestToLimitPercent: 25\n";
        assert!(matches!(Config::decode(quoted), Err(ConfigError::Decode(_))));

        let fractional = "spec:\n  cpuRequestToLimitPercent: 1.5\n";
        assert!(matches!(Config::decode(fractional), Err(ConfigError::Decode(_))));
    }

    #[test]
    fn test_decode_nested_negative_percent() {
        let err = Config::decode("spec:\n  memoryRequestToLimitPercent: -1\n").unwrap_err();
        assert!(matches!(err, ConfigError::NegativePercent { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "spec:\n  cpuRequestToLimitPercent: 10").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.cpu_request_to_limit_percent, 10);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/override.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/override.yaml"));
    }

    #[test]
    fn test_display() {
        let config = Config {
            force_selinux_relabel: true,
            limit_cpu_to_memory_percent: 200,
            cpu_request_to_limit_percent: 25,
            memory_request_to_limit_percent: 50,
        };

        assert_eq!(
            config.to_string(),
            "LimitCPUToMemoryRatio=2.000000 CpuRequestToLimitRatio=0.250000 MemoryRequestToLimitRatio=0.500000 ForceSelinuxRelabel=true"
        );
    }
}
