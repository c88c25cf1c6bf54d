//! Validation and conditioning of raw platform motion events.
//!
//! The normalizer drops readings from stub or inactive sensors, smooths the
//! orientation-only fallback signal and keeps a gyroscope bias sampled
//! during still phases. It never produces orientation quaternions itself.

use std::time::Duration;

use nalgebra::Vector3;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::{FusionConfig, PlatformCapabilities};
use crate::sample::{
    DeviceMotionEvent, DeviceOrientationEvent, EulerSample, MotionSample, NormalizedMotion,
};

/// Exponential smoothing of a single Euler axis, in degrees.
///
/// Each step moves `1 / factor` of the way from the previous output to the
/// new reading. Jumps larger than `bypass` degrees are treated as deliberate
/// motion and pass through unchanged. The first reading has nothing to
/// smooth against and passes through as well.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisSmoother {
    factor: f32,
    bypass: f32,
    last: Option<f32>,
}

impl AxisSmoother {
    pub fn new(factor: f32, bypass: f32) -> Self {
        Self {
            factor,
            bypass,
            last: None,
        }
    }

    pub fn smooth(&mut self, raw: f32) -> f32 {
        let smoothed = match self.last {
            Some(last) if (raw - last).abs() <= self.bypass => last + (raw - last) / self.factor,
            _ => raw,
        };
        self.last = Some(smoothed);
        smoothed
    }

    pub fn last(&self) -> Option<f32> {
        self.last
    }
}

/// Raw, still and adjusted gyroscope rates, `(alpha, beta, gamma)` in °/s.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GyroBias {
    /// Latest accepted sample.
    pub raw: Vector3<f32>,
    /// Snapshot of `raw` taken during the last still window.
    pub still: Vector3<f32>,
    /// `raw - still`.
    pub adjusted: Vector3<f32>,
}

impl GyroBias {
    fn record(&mut self, raw: Vector3<f32>) {
        self.raw = raw;
        self.adjusted = self.raw - self.still;
    }

    fn settle(&mut self) {
        self.still = self.raw;
        self.adjusted = self.raw - self.still;
    }
}

/// The Motion Signal Normalizer.
///
/// Driven by the session pump: every platform event goes through
/// [`Self::handle_motion`] or [`Self::handle_orientation`] together with the
/// time it arrived, and the pump calls [`Self::fire_stillness_timer`] once
/// [`Self::stillness_deadline`] has passed.
#[derive(Debug, Clone)]
pub struct MotionNormalizer {
    capabilities: PlatformCapabilities,
    stillness_threshold: Duration,
    alpha: AxisSmoother,
    beta: AxisSmoother,
    gamma: AxisSmoother,
    gyro: GyroBias,
    last_motion_at: Option<Instant>,
    stillness_deadline: Option<Instant>,
}

impl MotionNormalizer {
    pub fn new(config: &FusionConfig) -> Self {
        let smoother = AxisSmoother::new(config.smoothing_factor, config.smoothing_bypass_degrees);
        Self {
            capabilities: config.platform,
            stillness_threshold: config.stillness_threshold(),
            alpha: smoother,
            beta: smoother,
            gamma: smoother,
            gyro: GyroBias::default(),
            last_motion_at: None,
            stillness_deadline: None,
        }
    }

    pub fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    pub fn gyro(&self) -> &GyroBias {
        &self.gyro
    }

    /// When the armed stillness timer is due, if one is armed.
    pub fn stillness_deadline(&self) -> Option<Instant> {
        self.stillness_deadline
    }

    /// Handle a primary motion event.
    ///
    /// Returns `None` for events the fallback path owns, and for malformed
    /// events: zero interval, or missing rotation rate or gravity readings.
    pub fn handle_motion(&mut self, event: DeviceMotionEvent, now: Instant) -> Option<NormalizedMotion> {
        if !self.capabilities.has_reliable_motion {
            return None;
        }

        let gyro_available = event.rotation_rate.is_some_and(|rate| rate.is_available());
        let gravity_available = event
            .acceleration_including_gravity
            .is_some_and(|acc| acc.is_available());
        if event.interval == 0.0 || !(gyro_available && gravity_available) {
            trace!(interval = event.interval, gyro_available, gravity_available, "Dropping motion sample");
            return None;
        }

        let adjusted_rotation_rate = if self.capabilities.needs_drift_correction {
            let raw = event
                .rotation_rate
                .map_or_else(Vector3::zeros, |rate| rate.to_vector());
            self.gyro.record(raw);
            self.last_motion_at = Some(now);
            Some(self.gyro.adjusted)
        } else {
            None
        };

        Some(NormalizedMotion::Motion(MotionSample {
            event,
            adjusted_rotation_rate,
        }))
    }

    /// Handle an orientation event.
    ///
    /// On drift-prone platforms this rearms the stillness timer. Without a
    /// reliable motion sensor the angles become the output signal: smoothed
    /// per axis in degrees, converted to radians, gamma negated.
    pub fn handle_orientation(&mut self, event: DeviceOrientationEvent, now: Instant) -> Option<NormalizedMotion> {
        if self.capabilities.needs_drift_correction {
            self.stillness_deadline = Some(now + self.stillness_threshold);
        }

        if self.capabilities.has_reliable_motion {
            return None;
        }

        // headless browsers fire orientation events with empty values
        let (Some(alpha), Some(beta), Some(gamma)) = (event.alpha, event.beta, event.gamma) else {
            trace!("Dropping empty orientation sample");
            return None;
        };

        let alpha = self.alpha.smooth(alpha).to_radians();
        let beta = self.beta.smooth(beta).to_radians();
        let gamma = self.gamma.smooth(gamma).to_radians();

        Some(NormalizedMotion::Orientation(EulerSample {
            alpha,
            beta,
            gamma: -gamma,
        }))
    }

    /// Fire the stillness timer if it is due at `now`.
    ///
    /// The current raw rate becomes the new bias when the last motion sample
    /// is older than the threshold. Returns whether the bias was
    /// resampled.
    pub fn fire_stillness_timer(&mut self, now: Instant) -> bool {
        match self.stillness_deadline {
            Some(deadline) if deadline <= now => self.stillness_deadline = None,
            _ => return false,
        }

        let quiet = self
            .last_motion_at
            .map_or(true, |last| now.duration_since(last) > self.stillness_threshold);
        if quiet {
            self.gyro.settle();
            debug!(still = ?self.gyro.still, "Sampled gyro bias");
        }
        quiet
    }
}
