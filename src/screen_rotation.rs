use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use tokio::sync::watch;
use tracing::debug;

use crate::math::normalize_degrees;

#[derive(Debug)]
struct Compensator {
    /// Degrees in [0, 360).
    angle: watch::Sender<f32>,
}

impl Compensator {
    fn new(degrees: f32) -> Arc<Self> {
        let (angle, _) = watch::channel(normalize_degrees(degrees));
        Arc::new(Self { angle })
    }
}

impl Drop for Compensator {
    fn drop(&mut self) {
        debug!("Screen rotation compensator released");
    }
}

fn shared() -> &'static Mutex<Weak<Compensator>> {
    static SHARED: OnceLock<Mutex<Weak<Compensator>>> = OnceLock::new();
    SHARED.get_or_init(|| Mutex::new(Weak::new()))
}

/// Read-only handle to a screen rotation compensator.
///
/// Handles are reference counted: cloning adds a consumer, dropping or
/// [`release`](Self::release) removes one, and the compensator is torn down
/// with the last consumer. Only the matching [`RotationNotifier`] can change
/// the angle.
#[derive(Debug, Clone)]
pub struct ScreenRotation {
    inner: Arc<Compensator>,
}

impl ScreenRotation {
    /// The process-wide compensator, created on first use and again after
    /// every consumer released it.
    pub fn acquire() -> Self {
        let mut slot = shared().lock().unwrap_or_else(PoisonError::into_inner);
        let inner = slot.upgrade().unwrap_or_else(|| {
            let inner = Compensator::new(0.0);
            *slot = Arc::downgrade(&inner);
            debug!("Screen rotation compensator created");
            inner
        });
        Self { inner }
    }

    /// An independent compensator and the notifier that drives it.
    pub fn detached(degrees: f32) -> (Self, RotationNotifier) {
        let inner = Compensator::new(degrees);
        let notifier = RotationNotifier {
            target: Arc::downgrade(&inner),
        };
        (Self { inner }, notifier)
    }

    pub fn degrees(&self) -> f32 {
        *self.inner.angle.borrow()
    }

    pub fn radians(&self) -> f32 {
        self.degrees().to_radians()
    }

    /// Watch the angle (degrees) for changes.
    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.inner.angle.subscribe()
    }

    pub fn consumers(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Give up this handle. Returns `true` if it was the last consumer.
    pub fn release(self) -> bool {
        Arc::into_inner(self.inner).is_some()
    }
}

/// Platform side of a compensator: applies rotation-change notifications.
#[derive(Debug, Clone)]
pub struct RotationNotifier {
    target: Weak<Compensator>,
}

impl RotationNotifier {
    /// Notifier for the process-wide compensator, if one is alive.
    pub fn shared() -> Option<Self> {
        let slot = shared().lock().unwrap_or_else(PoisonError::into_inner);
        (slot.strong_count() > 0).then(|| Self {
            target: slot.clone(),
        })
    }

    /// Apply a new screen angle. Returns `false` once every consumer is gone.
    pub fn notify(&self, degrees: f32) -> bool {
        let Some(compensator) = self.target.upgrade() else {
            return false;
        };
        let degrees = normalize_degrees(degrees);
        compensator.angle.send_replace(degrees);
        debug!(degrees, "Screen rotation changed");
        true
    }
}
