use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub detection: DetectionConfig,
    pub rectify: RectifyConfig,
    pub enhance: EnhanceConfig,
    pub ocr: OcrConfig,
    pub parser: ParserConfig,
    pub performance: PerformanceConfig,
}

impl ScanConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub area_fraction: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    pub max_side_len: u32,
    pub approx_epsilon: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            area_fraction: 0.2,
            canny_low: 50.0,
            canny_high: 150.0,
            max_side_len: 1024,
            approx_epsilon: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RectifyConfig {
    pub max_output_side: u32,
    pub min_side: u32,
}

impl Default for RectifyConfig {
    fn default() -> Self {
        Self {
            max_output_side: 3000,
            min_side: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    pub clip_percent: f32,
    pub sharpen_sigma: f32,
    pub sharpen_amount: f32,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            clip_percent: 1.0,
            sharpen_sigma: 1.0,
            sharpen_amount: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub timeout_ms: u64,
}

impl OcrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub confidence_threshold: f32,
    /// Token texts that carry no ticket data. Matched against the whole trimmed token.
    pub blacklist: Vec<String>,
    pub max_period_count: u8,
}

impl ParserConfig {
    pub fn is_noise(&self, text: &str) -> bool {
        let text = text.trim();
        self.blacklist
            .iter()
            .any(|entry| entry.trim().eq_ignore_ascii_case(text))
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            blacklist: DEFAULT_BLACKLIST.iter().map(|it| it.to_string()).collect(),
            max_period_count: 30,
        }
    }
}

const DEFAULT_BLACKLIST: &[&str] = &[
    "开奖", "开奖日期", "合计", "总计", "金额", "元", "¥", "￥", "$", "倍", "倍数", "注", "draw",
    "total", "amount", "sum",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub low_power: bool,
    pub workers: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            low_power: false,
            workers: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ScanConfig::from_toml_str(
            r#"
            [detection]
            area_fraction = 0.3

            [performance]
            low_power = true
            "#,
        )
        .expect("valid config");
        assert_eq!(config.detection.area_fraction, 0.3);
        assert_eq!(config.detection.canny_high, 150.0);
        assert!(config.performance.low_power);
        assert_eq!(config.parser.max_period_count, 30);
        assert_eq!(config.ocr.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_wrong_types() {
        let err = ScanConfig::from_toml_str("[ocr]\ntimeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("scan.toml");
        std::fs::write(&path, "[parser]\nblacklist = [\"foo\"]\n").expect("write config");
        let config = ScanConfig::load(&path).expect("load config");
        assert!(config.parser.is_noise(" FOO "));
        assert!(!config.parser.is_noise("合计"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ScanConfig::load("/nonexistent/scan.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
