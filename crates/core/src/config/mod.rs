use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{LipSyncError, Result};

/// Top-level configuration structure for both lip sync strategies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LipSyncConfig {
    pub volume: VolumeConfig,
    pub phoneme: PhonemeConfig,
}

impl LipSyncConfig {
    /// Parses a configuration document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.volume.analyser.validate()?;
        Ok(config)
    }

    /// Reads and parses a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Configuration for the volume-driven strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub analyser: AnalyserConfig,
    /// Average bin magnitude that maps to full loudness.
    pub loudness_reference: f32,
    /// Mouth weight written at full loudness. Kept below 1.0 so the loudest
    /// passages do not hold the mouth wide open.
    pub max_mouth_weight: f32,
    /// Frame cadence used by [`crate::VolumeLipSync::run`].
    pub frame_interval_ms: u64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            analyser: AnalyserConfig::default(),
            loudness_reference: 128.0,
            max_mouth_weight: 0.8,
            frame_interval_ms: 16,
        }
    }
}

impl VolumeConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

/// Settings of the frequency analysis node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserConfig {
    pub fft_size: usize,
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl AnalyserConfig {
    pub const MIN_FFT_SIZE: usize = 32;
    pub const MAX_FFT_SIZE: usize = 32_768;

    /// Number of usable frequency bins produced per analysis.
    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two()
            || !(Self::MIN_FFT_SIZE..=Self::MAX_FFT_SIZE).contains(&self.fft_size)
        {
            return Err(LipSyncError::InvalidInput(
                "fft_size must be a power of two between 32 and 32768",
            ));
        }

        if !(0.0..=1.0).contains(&self.smoothing_time_constant) {
            return Err(LipSyncError::InvalidInput(
                "smoothing_time_constant must be within [0, 1]",
            ));
        }

        if self.min_decibels >= self.max_decibels {
            return Err(LipSyncError::InvalidInput(
                "min_decibels must be lower than max_decibels",
            ));
        }

        Ok(())
    }
}

/// Configuration for the phoneme-driven strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhonemeConfig {
    /// Total playback time of a sequence when the caller does not pick one.
    pub default_duration_ms: u64,
}

impl Default for PhonemeConfig {
    fn default() -> Self {
        Self {
            default_duration_ms: 3_000,
        }
    }
}

impl PhonemeConfig {
    pub fn default_duration(&self) -> Duration {
        Duration::from_millis(self.default_duration_ms)
    }
}
