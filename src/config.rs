use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Platform quirks, resolved once when the engine is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformCapabilities {
    /// The platform delivers usable gyroscope and accelerometer samples.
    /// When `false` the normalizer falls back to smoothed orientation angles.
    pub has_reliable_motion: bool,
    /// Gyroscope drift is significant enough to sample a stillness bias.
    pub needs_drift_correction: bool,
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        Self {
            has_reliable_motion: true,
            needs_drift_correction: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Quiet period, in milliseconds, after which the raw gyro rate is taken as bias.
    pub stillness_threshold_ms: u64,
    /// Divisor of the exponential smoothing step.
    pub smoothing_factor: f32,
    /// Jumps larger than this (degrees) pass through unsmoothed.
    pub smoothing_bypass_degrees: f32,
    /// Fraction of the gravity disagreement corrected per motion sample.
    pub gravity_correction_gain: f32,
    /// Capacity of channel-backed sensor sources.
    pub event_buffer: usize,
    pub platform: PlatformCapabilities,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            stillness_threshold_ms: 200,
            smoothing_factor: 6.0,
            smoothing_bypass_degrees: 10.0,
            gravity_correction_gain: 0.02,
            event_buffer: 64,
            platform: PlatformCapabilities::default(),
        }
    }
}

impl FusionConfig {
    pub fn stillness_threshold(&self) -> Duration {
        Duration::from_millis(self.stillness_threshold_ms)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: FusionConfig =
            toml_edit::de::from_str(contents).context("invalid fusion config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would turn the filters into NaN or push them unstable.
    pub fn validate(&self) -> Result<()> {
        if self.smoothing_factor.is_nan() || self.smoothing_factor <= 0.0 {
            bail!("smoothing_factor must be positive, got {}", self.smoothing_factor);
        }
        if self.smoothing_bypass_degrees.is_nan() || self.smoothing_bypass_degrees < 0.0 {
            bail!(
                "smoothing_bypass_degrees must not be negative, got {}",
                self.smoothing_bypass_degrees
            );
        }
        if !(0.0..=1.0).contains(&self.gravity_correction_gain) {
            bail!(
                "gravity_correction_gain must be within [0, 1], got {}",
                self.gravity_correction_gain
            );
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml_edit::ser::to_string_pretty(self).context("failed to render fusion config")
    }
}

/// Load a [`FusionConfig`] from a TOML file. Missing keys keep their defaults.
pub fn load_config(path: &Path) -> Result<FusionConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = FusionConfig::from_toml(&contents)?;
    info!(?path, "Loaded fusion config");
    Ok(config)
}
