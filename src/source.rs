use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::FusionError;
use crate::sample::SensorEvent;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Accelerometer => f.write_str("accelerometer"),
            SensorKind::Gyroscope => f.write_str("gyroscope"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    Granted,
    Denied,
    Prompt,
}

/// Platform permission negotiation.
///
/// An `Err` means negotiation itself is unavailable; the engine then starts
/// the sensor anyway.
#[async_trait]
pub trait PermissionBroker: Send + Sync {
    async fn query(&self, sensor: SensorKind) -> anyhow::Result<PermissionState>;
}

/// A platform sensor that can be started and stopped.
///
/// `start` hands back the stream of raw events for one session. `stop` must
/// detach synchronously: nothing sent afterwards may reach the old stream.
pub trait SensorSource: Send {
    fn start(&mut self) -> Result<mpsc::Receiver<SensorEvent>, FusionError>;
    fn stop(&mut self);
}

type Slot = Arc<Mutex<Option<mpsc::Sender<SensorEvent>>>>;

/// A [`SensorSource`] fed from code through a [`SensorFeed`].
#[derive(Debug)]
pub struct ChannelSource {
    slot: Slot,
    capacity: usize,
    available: bool,
}

impl ChannelSource {
    pub fn new(capacity: usize) -> (Self, SensorFeed) {
        let slot: Slot = Arc::default();
        let source = Self {
            slot: slot.clone(),
            capacity: capacity.max(1),
            available: true,
        };
        (source, SensorFeed { slot })
    }

    /// A source standing in for a platform without orientation sensors.
    pub fn unavailable() -> Self {
        Self {
            slot: Arc::default(),
            capacity: 1,
            available: false,
        }
    }
}

impl SensorSource for ChannelSource {
    fn start(&mut self) -> Result<mpsc::Receiver<SensorEvent>, FusionError> {
        if !self.available {
            return Err(FusionError::SensorUnavailable);
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Producer half of a [`ChannelSource`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SensorFeed {
    slot: Slot,
}

impl SensorFeed {
    /// Deliver an event. Returns `false` when no session is listening.
    pub async fn push(&self, event: SensorEvent) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => {
                trace!("No active session, event discarded");
                false
            }
        }
    }

    pub fn is_listening(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }
}
