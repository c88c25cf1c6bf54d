use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{info, warn};

use yaw_pitch_fusion::sample::{
    DeviceMotionEvent, DeviceOrientationEvent, QuaternionReading, SensorEvent,
};
use yaw_pitch_fusion::{
    load_config, ChannelSource, FusionConfig, OrientationEngine, ScreenRotation, YawPitch,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Replay a recorded sensor stream through the orientation fusion engine",
    long_about = None
)]
struct Args {
    /// JSON-lines recording, `-` reads stdin
    #[arg(long, default_value = "-")]
    input: String,

    /// TOML fusion config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Screen rotation at the start of the recording
    #[arg(long, default_value_t = 0.0)]
    screen_degrees: f32,
}

#[derive(Deserialize, Debug)]
struct ReplayLine {
    /// Milliseconds since the start of the recording.
    at_ms: u64,
    #[serde(flatten)]
    record: ReplayRecord,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ReplayRecord {
    Motion(DeviceMotionEvent),
    Orientation(DeviceOrientationEvent),
    Quaternion(QuaternionReading),
    Screen { degrees: f32 },
    Frame(YawPitch),
}

#[derive(Serialize)]
struct FrameOutput {
    at_ms: u64,
    delta: YawPitch,
    quaternion: mint::Quaternion<f32>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yaw_pitch_fusion=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path).unwrap_or_else(|e| {
            warn!(?e, "Failed to load config, using defaults");
            FusionConfig::default()
        }),
        None => FusionConfig::default(),
    };

    let reader: Box<dyn AsyncRead + Unpin + Send> = if args.input == "-" {
        Box::new(tokio::io::stdin())
    } else {
        let file = tokio::fs::File::open(&args.input)
            .await
            .with_context(|| format!("failed to open recording {}", args.input))?;
        Box::new(file)
    };

    let frames = replay(reader, std::io::stdout(), config, args.screen_degrees).await?;
    info!(frames, "Replay finished");
    Ok(())
}

/// Drive an engine from a JSON-lines recording, writing one JSON line per
/// `frame` record to `out`. Returns the number of frames written.
async fn replay<R, W>(reader: R, mut out: W, config: FusionConfig, screen_degrees: f32) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: Write,
{
    let (rotation, notifier) = ScreenRotation::detached(screen_degrees);
    let (source, feed) = ChannelSource::new(config.event_buffer);
    let mut engine = OrientationEngine::with_screen_rotation(config, source, rotation);
    engine.enable().await?;

    let mut lines = FramedRead::new(reader, LinesCodec::new());
    let start = Instant::now();
    let mut frames = 0_u64;

    while let Some(line) = lines.try_next().await? {
        if line.trim().is_empty() {
            continue;
        }
        let ReplayLine { at_ms, record } = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Skipping undecodable record");
                continue;
            }
        };

        tokio::time::sleep_until(start + Duration::from_millis(at_ms)).await;

        let event = match record {
            ReplayRecord::Motion(motion) => SensorEvent::Motion(motion),
            ReplayRecord::Orientation(orientation) => SensorEvent::Orientation(orientation),
            ReplayRecord::Quaternion(reading) => SensorEvent::Quaternion(reading),
            ReplayRecord::Screen { degrees } => {
                notifier.notify(degrees);
                continue;
            }
            ReplayRecord::Frame(user) => {
                let output = FrameOutput {
                    at_ms,
                    delta: engine.yaw_pitch_delta(),
                    quaternion: engine.combined_mint(user.yaw, user.pitch),
                };
                serde_json::to_writer(&mut out, &output)?;
                writeln!(out)?;
                frames += 1;
                continue;
            }
        };

        feed.push(event).await;
        // let the session task drain the event before the next record
        tokio::task::yield_now().await;
    }

    engine.disable();
    out.flush()?;
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{UnitQuaternion, Vector3};
    use serde_json::{json, Value};
    use std::f32::consts::FRAC_PI_2;

    fn field(value: &Value, path: &[&str]) -> f32 {
        path.iter()
            .fold(value, |value, key| &value[*key])
            .as_f64()
            .unwrap() as f32
    }

    #[tokio::test(start_paused = true)]
    async fn replays_recording_into_frames() {
        let upright = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 15.0_f32.to_radians())
            * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), FRAC_PI_2);
        let reading = QuaternionReading::from(upright);
        let recording = [
            json!({"at_ms": 0, "kind": "quaternion", "x": reading.x, "y": reading.y, "z": reading.z, "w": reading.w})
                .to_string(),
            json!({"at_ms": 10, "kind": "frame", "yaw": 0.0, "pitch": 0.0}).to_string(),
            "{\"at_ms\": 15, \"kind\": \"teleport\"}".to_string(),
            "not json at all".to_string(),
            String::new(),
            json!({"at_ms": 20, "kind": "screen", "degrees": 90.0}).to_string(),
            json!({"at_ms": 30, "kind": "frame", "yaw": 0.0, "pitch": 10.0}).to_string(),
        ]
        .join("\n");

        let mut out = Vec::new();
        let frames = replay(recording.as_bytes(), &mut out, FusionConfig::default(), 0.0)
            .await
            .unwrap();
        assert_eq!(frames, 2);

        let lines: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        // calibrated onto forward, no user input
        let first = &lines[0];
        assert_eq!(first["at_ms"], 10);
        assert_eq!(field(first, &["delta", "yaw"]), 0.0);
        assert_eq!(field(first, &["delta", "pitch"]), 0.0);
        assert_abs_diff_eq!(field(first, &["quaternion", "s"]).abs(), 1.0, epsilon = 1e-4);
        for axis in ["x", "y", "z"] {
            assert_abs_diff_eq!(field(first, &["quaternion", "v", axis]), 0.0, epsilon = 1e-4);
        }

        // landscape screen: pitching up turns about the render Y axis
        let second = &lines[1];
        assert_eq!(second["at_ms"], 30);
        assert_abs_diff_eq!(field(second, &["delta", "yaw"]), 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(field(second, &["delta", "pitch"]), 0.0, epsilon = 1e-3);
        let s = field(second, &["quaternion", "s"]);
        let v_y = field(second, &["quaternion", "v", "y"]);
        assert_abs_diff_eq!(v_y / s, -(5.0_f32.to_radians().tan()), epsilon = 1e-4);
        assert_abs_diff_eq!(field(second, &["quaternion", "v", "x"]), 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(field(second, &["quaternion", "v", "z"]), 0.0, epsilon = 1e-4);
    }
}
