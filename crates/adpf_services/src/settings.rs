//! Settings management

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// `"false"` turns per-frame result dumps off, anything else turns them on.
pub const VERBOSE_LOGGING_ENV: &str = "ADPF_VERBOSE_LOGGING";

/// Display refresh rate override, in Hz.
pub const FRAME_RATE_ENV: &str = "ADPF_FRAME_RATE";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed settings in {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Run settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub display: DisplaySettings,
    pub pipeline: PipelineSettings,
    pub run: RunSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Record raw durations and intervals of every named test.
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub frame_rate: f32,
    /// Framebuffer size of the headless surface.
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub stages: usize,
    pub heads_per_stage: usize,
    /// Seed for head placement.
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Frames per load test and for the baseline.
    pub samples: usize,
    /// Frames per calibration round.
    pub calibration_samples: usize,
    pub drawing_timeout_ms: u64,
    pub calibration: CalibrationMode,
    /// Load tests to run, in a shuffled order.
    pub tests: Vec<LoadTest>,
    /// Idle time before each phase of the transition test.
    pub transition_pause_ms: u64,
    pub shuffle_seed: u64,
}

/// Which calibration search to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMode {
    #[default]
    Regression,
    Joint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadTest {
    HeavyLoad,
    LightLoad,
    TransitionLoad,
}

impl LoadTest {
    pub const ALL: [LoadTest; 3] = [Self::HeavyLoad, Self::LightLoad, Self::TransitionLoad];

    /// Result key prefix.
    pub fn name(self) -> &'static str {
        match self {
            Self::HeavyLoad => "heavy_load",
            Self::LightLoad => "light_load",
            Self::TransitionLoad => "transition_load",
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { verbose: true }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            frame_rate: 60.0,
            width: 1080,
            height: 2400,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stages: 3,
            heads_per_stage: 4,
            seed: 1,
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            samples: 300,
            calibration_samples: 100,
            drawing_timeout_ms: 30_000,
            calibration: CalibrationMode::default(),
            tests: LoadTest::ALL.to_vec(),
            transition_pause_ms: 5_000,
            shuffle_seed: 0,
        }
    }
}

impl RunSettings {
    pub fn drawing_timeout(&self) -> Duration {
        Duration::from_millis(self.drawing_timeout_ms)
    }

    pub fn transition_pause(&self) -> Duration {
        Duration::from_millis(self.transition_pause_ms)
    }
}

impl Settings {
    /// Defaults, then the JSON file at `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `ADPF_*` overrides found through `lookup`. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(VERBOSE_LOGGING_ENV) {
            self.logging.verbose = value.trim() != "false";
        }
        if let Some(value) = lookup(FRAME_RATE_ENV) {
            match value.trim().parse::<f32>() {
                Ok(rate) => self.display.frame_rate = rate,
                Err(_) => tracing::warn!(value = %value, "ignoring unparseable frame rate override"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.pipeline.stages == 0 {
            return Err(SettingsError::Invalid("pipeline.stages must be at least 1".into()));
        }
        if !(self.display.frame_rate.is_finite() && self.display.frame_rate > 0.0) {
            return Err(SettingsError::Invalid(format!(
                "display.frame_rate must be positive, got {}",
                self.display.frame_rate
            )));
        }
        if self.run.samples == 0 || self.run.calibration_samples == 0 {
            return Err(SettingsError::Invalid("sample counts must be positive".into()));
        }
        Ok(())
    }
}
