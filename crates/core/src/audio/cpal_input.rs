use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::audio::backlog::SampleBacklog;
use crate::audio::{AudioFrame, CaptureStream, InputDevice, ReadStatus};
use crate::{AudioConfig, BulbError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Callback chunks queued while the reader is busy.
const CHUNK_QUEUE: usize = 8;
/// Frames of audio kept while the capture thread waits on the hand-off.
const BACKLOG_FRAMES: usize = 4;

/// Microphone of the host audio backend; the default input unless named.
#[derive(Debug, Default, Clone)]
pub struct CpalInput {
    device_name: Option<String>,
}

impl CpalInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects an input device by name instead of the host default.
    pub fn with_device_name(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    fn find_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        let device = match &self.device_name {
            None => host.default_input_device(),
            Some(wanted) => host
                .input_devices()
                .map_err(|err| BulbError::DeviceUnavailable(err.to_string()))?
                .find(|device| device.name().map(|n| &n == wanted).unwrap_or(false)),
        };
        device.ok_or_else(|| BulbError::DeviceUnavailable("no input device found".into()))
    }
}

impl InputDevice for CpalInput {
    fn open(&mut self, config: &AudioConfig) -> Result<Box<dyn CaptureStream>> {
        let device = self.find_device()?;
        let supported = device
            .default_input_config()
            .map_err(|err| BulbError::DeviceUnavailable(err.to_string()))?;
        if supported.channels() == 0 {
            return Err(BulbError::DeviceUnavailable(
                "input device reported zero channels".into(),
            ));
        }

        let stream_config = cpal::StreamConfig {
            channels: supported.channels(),
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (sample_tx, sample_rx) = bounded(CHUNK_QUEUE);
        let (error_tx, error_rx) = bounded(1);
        let overruns = Arc::new(AtomicU64::new(0));
        let sink = ChunkSink {
            samples: sample_tx,
            errors: error_tx,
            overruns: overruns.clone(),
        };
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, sink),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, sink),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, sink),
            other => {
                return Err(BulbError::DeviceUnavailable(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        }
        .map_err(|err| BulbError::DeviceUnavailable(err.to_string()))?;

        stream
            .play()
            .map_err(|err| BulbError::DeviceUnavailable(err.to_string()))?;

        tracing::info!(
            device = %device.name().unwrap_or_default(),
            channels = stream_config.channels,
            "opened input device"
        );

        Ok(Box::new(CpalStream {
            _stream: stream,
            samples: sample_rx,
            errors: error_rx,
            overruns,
            backlog: SampleBacklog::new(config.frame_len, BACKLOG_FRAMES),
        }))
    }
}

struct CpalStream {
    _stream: cpal::Stream,
    samples: Receiver<Vec<i16>>,
    errors: Receiver<String>,
    overruns: Arc<AtomicU64>,
    backlog: SampleBacklog,
}

impl CpalStream {
    fn push_chunk(&mut self, chunk: &[i16]) {
        let trimmed = self.backlog.push(chunk);
        if trimmed > 0 {
            tracing::warn!(samples = trimmed, "capture backlog full, dropped oldest samples");
        }
    }
}

impl CaptureStream for CpalStream {
    fn read_frame(&mut self, frame: &mut AudioFrame) -> Result<ReadStatus> {
        let overruns = self.overruns.swap(0, Ordering::Relaxed);
        if overruns > 0 {
            tracing::warn!(chunks = overruns, "input overrun, dropped audio chunks");
        }

        while !self.backlog.fill(frame) {
            if let Ok(err) = self.errors.try_recv() {
                return Err(BulbError::DeviceUnavailable(err));
            }
            match self.samples.recv_timeout(POLL_INTERVAL) {
                Ok(chunk) => self.push_chunk(&chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(ReadStatus::Pending),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(BulbError::DeviceUnavailable(
                        "input stream closed".into(),
                    ))
                }
            }
        }
        Ok(ReadStatus::Frame)
    }
}

/// Callback side of the capture stream.
struct ChunkSink {
    samples: Sender<Vec<i16>>,
    errors: Sender<String>,
    overruns: Arc<AtomicU64>,
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sink: ChunkSink,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + Send + 'static,
    i16: FromSample<T>,
{
    let channels = config.channels as usize;
    let ChunkSink {
        samples,
        errors,
        overruns,
    } = sink;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            // Keep the first channel only.
            let mono: Vec<i16> = data
                .chunks(channels)
                .map(|chunk| chunk[0].to_sample::<i16>())
                .collect();
            if let Err(TrySendError::Full(_)) = samples.try_send(mono) {
                overruns.fetch_add(1, Ordering::Relaxed);
            }
        },
        move |err| {
            let _ = errors.try_send(err.to_string());
        },
        None,
    )
}
