use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;

use crate::{AudioConfig, BulbError, Result};

#[cfg_attr(not(feature = "capture"), allow(dead_code))]
mod backlog;
#[cfg(feature = "capture")]
mod cpal_input;
mod synthetic;

#[cfg(feature = "capture")]
pub use cpal_input::CpalInput;
pub use synthetic::{PulsePattern, SyntheticInput};

/// One block of signed 16-bit samples read from the input device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    pub fn silent(len: usize) -> Self {
        Self {
            samples: vec![0; len],
        }
    }

    pub fn from_samples(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [i16] {
        &mut self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Outcome of a single blocking read on a [`CaptureStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The frame buffer was filled completely.
    Frame,
    /// No complete frame arrived within the device's poll interval.
    Pending,
    /// The device has no more samples to offer.
    Ended,
}

/// A capture device that can be opened repeatedly.
pub trait InputDevice: Send {
    /// Opens the device. Called on the capture thread, so the returned stream
    /// never has to cross threads.
    fn open(&mut self, config: &AudioConfig) -> Result<Box<dyn CaptureStream>>;
}

/// An open capture stream. Dropping it releases the device.
pub trait CaptureStream {
    fn read_frame(&mut self, frame: &mut AudioFrame) -> Result<ReadStatus>;
}

/// Continuously captures frames on a dedicated thread.
///
/// Frames are handed over through a rendezvous channel, so the capture thread
/// blocks until the consumer has taken the previous frame.
pub struct SignalSource {
    config: AudioConfig,
    device: Arc<Mutex<Box<dyn InputDevice>>>,
    running: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SignalSource {
    pub fn new(config: AudioConfig, device: Box<dyn InputDevice>) -> Self {
        Self {
            config,
            device: Arc::new(Mutex::new(device)),
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            thread: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Opens the device and starts the capture thread.
    ///
    /// Returns the receiving end of the frame hand-off. If the device cannot
    /// be opened the source stays stopped and `DeviceUnavailable` is returned.
    pub fn start(&mut self) -> Result<Receiver<AudioFrame>> {
        if self.is_running() {
            return Err(BulbError::msg("signal source is already running"));
        }
        self.join_finished();

        let (frame_tx, frame_rx) = bounded(0);
        let (stop_tx, stop_rx) = bounded(1);
        let (ready_tx, ready_rx) = bounded(1);

        let device = self.device.clone();
        let running = self.running.clone();
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("bulbdj-capture".into())
            .spawn(move || capture_loop(config, device, running, frame_tx, stop_rx, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!(
                    sample_rate = self.config.sample_rate,
                    frame_len = self.config.frame_len,
                    "audio capture started"
                );
                self.stop_tx = Some(stop_tx);
                self.thread = Some(handle);
                Ok(frame_rx)
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(BulbError::DeviceUnavailable(
                    "capture thread exited before opening the device".into(),
                ))
            }
        }
    }

    /// Halts capture and releases the device. Safe to call when stopped.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            tracing::info!("audio capture stopped");
        }
        self.running.store(false, Ordering::Release);
    }

    fn join_finished(&mut self) {
        self.stop_tx = None;
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SignalSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSource")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

fn capture_loop(
    config: AudioConfig,
    device: Arc<Mutex<Box<dyn InputDevice>>>,
    running: Arc<AtomicBool>,
    frame_tx: Sender<AudioFrame>,
    stop_rx: Receiver<()>,
    ready_tx: Sender<Result<()>>,
) {
    let mut device = device.lock();
    let mut stream = match device.open(&config) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    running.store(true, Ordering::Release);
    let _ = ready_tx.send(Ok(()));

    let mut frame = AudioFrame::silent(config.frame_len);
    loop {
        if !stop_rx.is_empty() {
            break;
        }

        match stream.read_frame(&mut frame) {
            Ok(ReadStatus::Frame) => {}
            Ok(ReadStatus::Pending) => continue,
            Ok(ReadStatus::Ended) => {
                tracing::info!("audio input ended");
                break;
            }
            Err(err) => {
                tracing::error!(error = %err, "audio capture aborted");
                break;
            }
        }

        select! {
            send(frame_tx, frame.clone()) -> res => {
                if res.is_err() {
                    tracing::debug!("frame consumer disconnected");
                    break;
                }
            }
            recv(stop_rx) -> _ => break,
        }
    }

    drop(stream);
    running.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Unplugged;

    impl InputDevice for Unplugged {
        fn open(&mut self, _config: &AudioConfig) -> Result<Box<dyn CaptureStream>> {
            Err(BulbError::DeviceUnavailable("permission denied".into()))
        }
    }

    fn small_config() -> AudioConfig {
        AudioConfig {
            sample_rate: 8_000,
            frame_len: 64,
        }
    }

    #[test]
    fn failed_open_leaves_source_stopped() {
        let mut source = SignalSource::new(small_config(), Box::new(Unplugged));

        let err = source.start().unwrap_err();
        assert!(matches!(err, BulbError::DeviceUnavailable(_)));
        assert!(!source.is_running());
    }

    #[test]
    fn stops_after_frame_limit() {
        let input = SyntheticInput::new(PulsePattern::default()).with_frame_limit(5);
        let mut source = SignalSource::new(small_config(), Box::new(input));

        let frames = source.start().unwrap();
        let received: Vec<AudioFrame> = frames.iter().collect();

        assert_eq!(received.len(), 5);
        assert!(received.iter().all(|frame| frame.len() == 64));
        source.stop();
        assert!(!source.is_running());
    }

    #[test]
    fn slow_consumer_gets_every_frame_in_capture_order() {
        let config = small_config();
        let mut input = SyntheticInput::new(PulsePattern {
            period: 3,
            floor: 0.2,
            ..Default::default()
        })
        .with_frame_limit(20);

        let mut expected = Vec::new();
        let mut stream = input.open(&config).unwrap();
        let mut frame = AudioFrame::silent(config.frame_len);
        while stream.read_frame(&mut frame).unwrap() == ReadStatus::Frame {
            expected.push(frame.clone());
        }
        drop(stream);

        let mut source = SignalSource::new(config, Box::new(input));
        let frames = source.start().unwrap();
        let mut received = Vec::new();
        for frame in frames.iter() {
            thread::sleep(Duration::from_millis(3));
            received.push(frame);
        }

        assert_eq!(expected.len(), 20);
        assert_eq!(received, expected);
        source.stop();
    }

    #[test]
    fn stop_while_blocked_on_hand_off() {
        let input = SyntheticInput::new(PulsePattern::default());
        let mut source = SignalSource::new(small_config(), Box::new(input));

        let frames = source.start().unwrap();
        assert!(source.is_running());
        frames.recv().unwrap();

        source.stop();
        assert!(!source.is_running());
        assert!(frames.iter().count() <= 1);
    }

    #[test]
    fn can_restart_after_input_ends() {
        let input = SyntheticInput::new(PulsePattern::default()).with_frame_limit(2);
        let mut source = SignalSource::new(small_config(), Box::new(input));

        assert_eq!(source.start().unwrap().iter().count(), 2);
        assert_eq!(source.start().unwrap().iter().count(), 2);
    }
}
