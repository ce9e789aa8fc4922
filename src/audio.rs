//! Microphone capture for voice calls.
//!
//! The capture device handle is not `Send`, so each recording runs on a
//! dedicated thread that owns the input stream and hands the captured
//! samples back over a channel when asked to stop. The controller itself
//! stays `Send` and lives inside the call session.

use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, warn};

use crate::error::CallError;

/// Captured mono PCM16 audio and the rate it was recorded at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl CapturedAudio {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }

    /// Raw little-endian PCM16 as a transport-safe payload.
    pub fn to_pcm16_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        B64.encode(&bytes)
    }

    /// WAV-framed payload, for transports that expect a file body.
    pub fn to_wav_base64(&self) -> Result<String, CallError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = std::io::Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| CallError::Capture(format!("wav framing failed: {e}")))?;
        for sample in &self.samples {
            writer
                .write_sample(*sample)
                .map_err(|e| CallError::Capture(format!("wav framing failed: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| CallError::Capture(format!("wav framing failed: {e}")))?;

        Ok(B64.encode(cursor.into_inner()))
    }
}

/// Seam between the call state machine and the platform microphone.
pub trait MicCapture: Send {
    /// Fails with a permission error when microphone access is not granted
    /// (no usable input device).
    fn check_access(&self) -> Result<(), CallError>;

    /// Begin capturing. Starting while a recording is already active is a
    /// caller error and leaves the active recording untouched.
    fn start(&mut self) -> Result<(), CallError>;

    /// Stop and return the captured audio. Idempotent: with no active
    /// recording this is a no-op returning `None`.
    fn stop(&mut self) -> Option<CapturedAudio>;

    fn is_recording(&self) -> bool;
}

struct ActiveRecording {
    stop_tx: Sender<()>,
    done_rx: Receiver<CapturedAudio>,
    handle: JoinHandle<()>,
}

/// Owns the one microphone recording a session may have in flight.
pub struct AudioCaptureController {
    sample_rate: u32,
    active: Option<ActiveRecording>,
}

impl AudioCaptureController {
    /// `sample_rate` is the preferred capture rate; the device's native
    /// rate wins when they disagree, and the captured payload reports the
    /// rate actually used.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            active: None,
        }
    }
}

impl MicCapture for AudioCaptureController {
    fn check_access(&self) -> Result<(), CallError> {
        if cpal::default_host().default_input_device().is_none() {
            return Err(CallError::Permission(
                "no microphone input device is available".to_string(),
            ));
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), CallError> {
        if self.active.is_some() {
            return Err(CallError::Capture(
                "a recording is already in progress".to_string(),
            ));
        }

        let preferred_rate = self.sample_rate;
        let (stop_tx, stop_rx) = channel();
        let (ready_tx, ready_rx) = channel();
        let (done_tx, done_rx) = channel();

        let handle = std::thread::spawn(move || {
            record_on_device(preferred_rate, stop_rx, ready_tx, done_tx);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.active = Some(ActiveRecording {
                    stop_tx,
                    done_rx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CallError::Capture(
                    "recording thread exited before starting".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) -> Option<CapturedAudio> {
        let recording = self.active.take()?;
        let _ = recording.stop_tx.send(());
        let audio = recording.done_rx.recv().ok();
        let _ = recording.handle.join();
        if let Some(ref audio) = audio {
            debug!(
                samples = audio.samples.len(),
                sample_rate = audio.sample_rate,
                "recording stopped"
            );
        }
        audio
    }

    fn is_recording(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for AudioCaptureController {
    fn drop(&mut self) {
        // Force-stop on teardown so the device is released on every exit
        // path; the samples are discarded.
        if let Some(recording) = self.active.take() {
            let _ = recording.stop_tx.send(());
            let _ = recording.handle.join();
        }
    }
}

/// Runs on the recording thread: owns the input stream for its lifetime,
/// signals readiness once capture starts, then waits for the stop signal.
fn record_on_device(
    preferred_rate: u32,
    stop_rx: Receiver<()>,
    ready_tx: Sender<Result<(), CallError>>,
    done_tx: Sender<CapturedAudio>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready_tx.send(Err(CallError::Permission(
            "no microphone input device is available".to_string(),
        )));
        return;
    };

    let supported = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready_tx.send(Err(CallError::Permission(format!(
                "microphone configuration unavailable: {e}"
            ))));
            return;
        }
    };

    let channels = supported.channels() as usize;
    let device_rate = supported.sample_rate();
    if device_rate != preferred_rate {
        debug!(device_rate, preferred_rate, "capturing at device rate");
    }

    let samples: Arc<Mutex<Vec<i16>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = samples.clone();
    let config = supported.config();
    let err_fn = |e: cpal::StreamError| warn!("input stream error: {e}");

    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend(data.iter().step_by(channels).copied());
                }
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend(
                        data.iter()
                            .step_by(channels)
                            .map(|s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16),
                    );
                }
            },
            err_fn,
            None,
        ),
        other => {
            let _ = ready_tx.send(Err(CallError::Capture(format!(
                "unsupported sample format {other:?}"
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(CallError::Capture(format!(
                "could not open input stream: {e}"
            ))));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CallError::Capture(format!(
            "could not start input stream: {e}"
        ))));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Blocks until stop() fires or the controller is dropped.
    let _ = stop_rx.recv();
    drop(stream);

    let captured = samples.lock().map(|mut buf| std::mem::take(&mut *buf));
    if let Ok(samples) = captured {
        let _ = done_tx.send(CapturedAudio {
            samples,
            sample_rate: device_rate,
        });
    }
}
