use std::sync::Arc;

use derivative::Derivative;
use nalgebra::UnitQuaternion;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::FusionConfig;
use crate::error::{EnableOutcome, FusionError};
use crate::fusion::{combine, DeltaTracker, OrientationFusion, YawPitch};
use crate::normalizer::MotionNormalizer;
use crate::pose::PoseEstimator;
use crate::sample::SensorEvent;
use crate::screen_rotation::ScreenRotation;
use crate::source::{PermissionBroker, PermissionState, SensorKind, SensorSource};
use crate::ChangeEvent;

/// Everything between a raw sensor event and a calibrated orientation.
#[derive(Debug, Clone)]
pub struct SensorPipeline {
    normalizer: MotionNormalizer,
    pose: PoseEstimator,
    fusion: OrientationFusion,
}

impl SensorPipeline {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            normalizer: MotionNormalizer::new(config),
            pose: PoseEstimator::new(config.gravity_correction_gain),
            fusion: OrientationFusion::default(),
        }
    }

    pub fn normalizer(&self) -> &MotionNormalizer {
        &self.normalizer
    }

    pub fn fusion(&self) -> &OrientationFusion {
        &self.fusion
    }

    /// Run one event through the pipeline.
    ///
    /// Returns the new render-frame orientation, or `None` when the event was
    /// dropped or only fed the stillness detector.
    pub fn process(&mut self, event: SensorEvent, now: Instant) -> Option<UnitQuaternion<f32>> {
        let sensor = match event {
            SensorEvent::Quaternion(reading) => {
                let unit = reading.to_unit();
                if unit.is_none() {
                    trace!(?reading, "Dropping zero-length quaternion");
                }
                unit
            }
            SensorEvent::Motion(motion) => self
                .normalizer
                .handle_motion(motion, now)
                .map(|normalized| self.pose.update(&normalized)),
            SensorEvent::Orientation(orientation) => self
                .normalizer
                .handle_orientation(orientation, now)
                .map(|normalized| self.pose.update(&normalized)),
        }?;
        Some(self.fusion.update(&sensor))
    }

    pub fn stillness_deadline(&self) -> Option<Instant> {
        self.normalizer.stillness_deadline()
    }

    pub fn fire_stillness_timer(&mut self, now: Instant) -> bool {
        self.normalizer.fire_stillness_timer(now)
    }
}

#[derive(Debug)]
struct Session {
    orientation: watch::Receiver<Option<UnitQuaternion<f32>>>,
    deltas: DeltaTracker,
    pump: JoinHandle<()>,
}

impl Session {
    fn spawn(
        events: mpsc::Receiver<SensorEvent>,
        config: &FusionConfig,
        changes: broadcast::Sender<ChangeEvent>,
    ) -> Self {
        let (orientation_tx, orientation) = watch::channel(None);
        let pump = tokio::spawn(pump_events(
            events,
            SensorPipeline::new(config),
            orientation_tx,
            changes,
        ));
        Self {
            orientation,
            deltas: DeltaTracker::default(),
            pump,
        }
    }
}

/// Session task: serializes sensor events and the stillness timer.
async fn pump_events(
    mut events: mpsc::Receiver<SensorEvent>,
    mut pipeline: SensorPipeline,
    orientation: watch::Sender<Option<UnitQuaternion<f32>>>,
    changes: broadcast::Sender<ChangeEvent>,
) {
    let mut accepted: u64 = 0;
    loop {
        let deadline = pipeline.stillness_deadline();
        tokio::select! {
            biased;
            event = events.recv() => {
                let Some(event) = event else {
                    debug!(accepted, "Sensor stream closed");
                    break;
                };
                let Some(quat) = pipeline.process(event, Instant::now()) else {
                    continue;
                };
                if orientation.is_closed() {
                    break;
                }
                orientation.send_replace(Some(quat));
                // no subscribers is fine
                let _ = changes.send(ChangeEvent { is_trusted: true });
                accepted += 1;
                if accepted % 1000 == 0 {
                    debug!(accepted, "Orientation samples processed");
                }
            }
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                pipeline.fire_stillness_timer(Instant::now());
            }
        }
    }
}

/// The orientation fusion engine.
///
/// Owns one sensor session at a time. Sensor events are processed on a
/// spawned task that publishes each calibrated orientation; queries read the
/// latest published value and never see a partial update.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct OrientationEngine<S: SensorSource> {
    config: FusionConfig,
    #[derivative(Debug = "ignore")]
    source: S,
    #[derivative(Debug = "ignore")]
    permissions: Option<Arc<dyn PermissionBroker>>,
    screen_rotation: ScreenRotation,
    changes: broadcast::Sender<ChangeEvent>,
    session: Option<Session>,
}

impl<S: SensorSource> OrientationEngine<S> {
    /// Build an engine reading the shared screen rotation compensator.
    pub fn new(config: FusionConfig, source: S) -> Self {
        Self::with_screen_rotation(config, source, ScreenRotation::acquire())
    }

    pub fn with_screen_rotation(config: FusionConfig, source: S, screen_rotation: ScreenRotation) -> Self {
        let (changes, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            config,
            source,
            permissions: None,
            screen_rotation,
            changes,
            session: None,
        }
    }

    #[must_use]
    pub fn with_permissions(mut self, broker: Arc<dyn PermissionBroker>) -> Self {
        self.permissions = Some(broker);
        self
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn screen_rotation(&self) -> &ScreenRotation {
        &self.screen_rotation
    }

    pub fn is_enabled(&self) -> bool {
        self.session.is_some()
    }

    /// One [`ChangeEvent`] per accepted orientation update.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Negotiate permissions and start a sensor session.
    ///
    /// Explicitly refused permissions leave the engine disabled. When
    /// negotiation itself fails, or no broker is installed, the sensor is
    /// started anyway.
    pub async fn enable(&mut self) -> Result<EnableOutcome, FusionError> {
        if self.session.is_some() {
            return Ok(EnableOutcome::AlreadyEnabled);
        }

        if let Some(broker) = self.permissions.clone() {
            let (accelerometer, gyroscope) = futures::join!(
                broker.query(SensorKind::Accelerometer),
                broker.query(SensorKind::Gyroscope)
            );
            match (accelerometer, gyroscope) {
                (Ok(accelerometer), Ok(gyroscope)) => {
                    for (sensor, state) in [
                        (SensorKind::Accelerometer, accelerometer),
                        (SensorKind::Gyroscope, gyroscope),
                    ] {
                        if state != PermissionState::Granted {
                            warn!(%sensor, ?state, "Sensor permission not granted");
                            return Err(FusionError::PermissionDenied { sensor });
                        }
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Permission negotiation failed, starting sensor anyway");
                }
            }
        }

        let events = self.source.start().inspect_err(|e| {
            warn!(error = %e, "Orientation sensor could not be started");
        })?;
        self.session = Some(Session::spawn(events, &self.config, self.changes.clone()));
        info!(platform = ?self.config.platform, "Orientation sensor enabled");
        Ok(EnableOutcome::Started)
    }

    /// Stop the session. Idempotent.
    ///
    /// The sensor is detached and the session task cancelled before this
    /// returns. Calibration and the delta snapshot are discarded, so the
    /// next [`enable`](Self::enable) calibrates from scratch.
    pub fn disable(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.pump.abort();
        self.source.stop();
        info!("Orientation sensor disabled");
    }

    /// Latest calibrated orientation, `None` while disabled or before the
    /// first accepted reading.
    pub fn orientation(&self) -> Option<UnitQuaternion<f32>> {
        self.session
            .as_ref()
            .and_then(|session| *session.orientation.borrow())
    }

    /// Yaw/pitch (degrees) turned since the previous call.
    pub fn yaw_pitch_delta(&mut self) -> YawPitch {
        let Some(session) = self.session.as_mut() else {
            return YawPitch::ZERO;
        };
        let current = *session.orientation.borrow();
        session.deltas.delta(current)
    }

    /// Render quaternion for the user's yaw/pitch (degrees) on top of the
    /// device orientation. Falls back to the identity device orientation.
    pub fn combined_quaternion(&self, yaw: f32, pitch: f32) -> UnitQuaternion<f32> {
        let device = self.orientation().unwrap_or_else(UnitQuaternion::identity);
        combine(&device, yaw, pitch, self.screen_rotation.radians())
    }

    /// [`Self::combined_quaternion`] as a [`mint`] quaternion for renderers.
    pub fn combined_mint(&self, yaw: f32, pitch: f32) -> mint::Quaternion<f32> {
        self.combined_quaternion(yaw, pitch).into()
    }
}

impl<S: SensorSource> Drop for OrientationEngine<S> {
    fn drop(&mut self) {
        self.disable();
    }
}
