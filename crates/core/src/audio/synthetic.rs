use std::f32::consts::PI;
use std::time::Duration;

use crate::audio::{AudioFrame, CaptureStream, InputDevice, ReadStatus};
use crate::{AudioConfig, BulbError, Result};

/// Describes the tone bursts produced by [`SyntheticInput`].
#[derive(Debug, Clone, PartialEq)]
pub struct PulsePattern {
    /// A pulse is emitted on every `period`-th frame (the last frame of each
    /// period). Zero disables pulses.
    pub period: usize,
    pub tone_hz: f32,
    /// Peak amplitude of the pulse in `[0, 1]` of full scale.
    pub amplitude: f32,
    /// Amplitude of the tone between pulses.
    pub floor: f32,
}

impl Default for PulsePattern {
    fn default() -> Self {
        Self {
            period: 10,
            tone_hz: 60.0,
            amplitude: 0.8,
            floor: 0.0,
        }
    }
}

/// Input device that generates a low-frequency pulse train.
///
/// Used for the demo mode of the command line tool and by tests; every call
/// to [`InputDevice::open`] restarts the pattern from the first frame.
#[derive(Debug, Clone)]
pub struct SyntheticInput {
    pattern: PulsePattern,
    frame_limit: Option<usize>,
    paced: bool,
}

impl SyntheticInput {
    pub fn new(pattern: PulsePattern) -> Self {
        Self {
            pattern,
            frame_limit: None,
            paced: false,
        }
    }

    /// Ends the stream after `limit` frames.
    pub fn with_frame_limit(mut self, limit: usize) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Sleeps for the real-time duration of each frame before returning it.
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }
}

impl InputDevice for SyntheticInput {
    fn open(&mut self, config: &AudioConfig) -> Result<Box<dyn CaptureStream>> {
        if config.sample_rate == 0 || config.frame_len == 0 {
            return Err(BulbError::DeviceUnavailable(
                "synthetic input needs a non-zero sample rate and frame length".into(),
            ));
        }

        let pace = self.paced.then(|| {
            Duration::from_secs_f64(config.frame_len as f64 / config.sample_rate as f64)
        });

        Ok(Box::new(SyntheticStream {
            pattern: self.pattern.clone(),
            sample_rate: config.sample_rate as f32,
            frame_limit: self.frame_limit,
            pace,
            frame_index: 0,
            phase: 0.0,
        }))
    }
}

struct SyntheticStream {
    pattern: PulsePattern,
    sample_rate: f32,
    frame_limit: Option<usize>,
    pace: Option<Duration>,
    frame_index: usize,
    phase: f32,
}

impl CaptureStream for SyntheticStream {
    fn read_frame(&mut self, frame: &mut AudioFrame) -> Result<ReadStatus> {
        if self
            .frame_limit
            .map(|limit| self.frame_index >= limit)
            .unwrap_or(false)
        {
            return Ok(ReadStatus::Ended);
        }

        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }

        let pulse = self.pattern.period > 0
            && self.frame_index % self.pattern.period == self.pattern.period - 1;
        let amplitude = if pulse {
            self.pattern.amplitude
        } else {
            self.pattern.floor
        };
        let amplitude = amplitude.clamp(0.0, 1.0) * i16::MAX as f32;
        let step = 2.0 * PI * self.pattern.tone_hz / self.sample_rate;

        for sample in frame.samples_mut() {
            *sample = (self.phase.sin() * amplitude) as i16;
            self.phase = (self.phase + step) % (2.0 * PI);
        }

        self.frame_index += 1;
        Ok(ReadStatus::Frame)
    }
}
