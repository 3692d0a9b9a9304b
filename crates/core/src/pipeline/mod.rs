//! Capture → analysis → colour → dispatch, wired across threads.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;

use crate::analysis::{
    BandLayout, BeatClassifier, MagnitudeSpectrum, Sensitivity, SensitivityHandle,
    SpectrumAnalyzer,
};
use crate::audio::{AudioFrame, InputDevice, SignalSource};
use crate::mapping::{Dispatch, FixtureBridge, FixtureDispatcher};
use crate::output::LatestValue;
use crate::render::{ColorSynthesizer, RenderedColor};
use crate::{AppConfig, BulbError, Result};

/// Selects beat-driven (on) or frequency-driven (off) rendering. Cheap to
/// clone and safe to flip from any thread.
#[derive(Debug, Clone)]
pub struct DetectorMode {
    beat: Arc<AtomicBool>,
}

impl DetectorMode {
    pub fn new(beat: bool) -> Self {
        Self {
            beat: Arc::new(AtomicBool::new(beat)),
        }
    }

    pub fn is_beat(&self) -> bool {
        self.beat.load(Ordering::Relaxed)
    }

    pub fn set_beat(&self, beat: bool) {
        self.beat.store(beat, Ordering::Relaxed);
    }
}

/// Result of processing one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    pub spectrum: MagnitudeSpectrum,
    pub beats: usize,
    pub color: Option<RenderedColor>,
}

/// Synchronous per-frame stages. [`LightPipeline`] drives one of these on
/// its processing thread; tests drive it directly.
#[derive(Debug)]
pub struct FrameProcessor {
    frame_len: usize,
    analyzer: SpectrumAnalyzer,
    classifier: BeatClassifier,
    synthesizer: ColorSynthesizer,
    dispatcher: FixtureDispatcher,
    mode: DetectorMode,
}

impl FrameProcessor {
    pub fn new(
        config: &AppConfig,
        sensitivity: SensitivityHandle,
        mode: DetectorMode,
    ) -> Result<Self> {
        Self::with_dispatcher(config, sensitivity, mode, FixtureDispatcher::new())
    }

    pub fn with_dispatcher(
        config: &AppConfig,
        sensitivity: SensitivityHandle,
        mode: DetectorMode,
        dispatcher: FixtureDispatcher,
    ) -> Result<Self> {
        let analyzer = SpectrumAnalyzer::new(config.audio.frame_len)?;
        let layout = BandLayout::new(config.audio.sample_rate, analyzer.bins());

        Ok(Self {
            frame_len: config.audio.frame_len,
            classifier: BeatClassifier::with_handle(
                layout.clone(),
                sensitivity,
                config.detector.history_len,
            ),
            synthesizer: ColorSynthesizer::new(layout, config.render.clone()),
            analyzer,
            dispatcher,
            mode,
        })
    }

    pub fn classifier(&self) -> &BeatClassifier {
        &self.classifier
    }

    /// Analyses a frame and renders a colour for the active mode.
    ///
    /// Beats are classified in both modes so the baseline keeps adapting, but
    /// only the beat mode renders them.
    pub fn process(&mut self, frame: &AudioFrame) -> Result<FrameOutcome> {
        if frame.len() != self.frame_len {
            return Err(BulbError::contract("frame processor", self.frame_len, frame.len()));
        }

        let spectrum = self.analyzer.analyze(frame)?;
        let events = self.classifier.classify(&spectrum)?;
        let color = if self.mode.is_beat() {
            self.synthesizer.update_from_beats(&events)
        } else {
            self.synthesizer.update_from_spectrum(&spectrum)?
        };

        tracing::trace!(beats = events.len(), ?color, "frame processed");
        Ok(FrameOutcome {
            spectrum,
            beats: events.len(),
            color,
        })
    }

    /// Turns a rendered colour into a dispatch for the current bridge state.
    pub fn dispatch(
        &mut self,
        color: RenderedColor,
        bridge: Option<&dyn FixtureBridge>,
    ) -> Dispatch {
        let fixtures = bridge
            .filter(|bridge| bridge.is_connected())
            .map(|bridge| bridge.fixtures());
        self.dispatcher.dispatch(color, fixtures.as_deref())
    }

    /// The terminal dispatch, produced once per run.
    pub fn stop(&mut self) -> Option<Dispatch> {
        self.synthesizer.stop().map(Dispatch::Stopped)
    }

    /// Re-arms the synthesizer and forgets the beat baseline for a new run.
    pub fn restart(&mut self) {
        self.classifier.reset();
        self.synthesizer.start();
    }
}

/// Owns the signal source and the processing thread, and exposes the latest
/// dispatch and spectrum to readers.
pub struct LightPipeline {
    source: SignalSource,
    sensitivity: SensitivityHandle,
    mode: DetectorMode,
    bridge: Option<Arc<dyn FixtureBridge>>,
    dispatches: Arc<LatestValue<Dispatch>>,
    spectrum: Arc<LatestValue<MagnitudeSpectrum>>,
    processor: Option<FrameProcessor>,
    worker: Option<JoinHandle<FrameProcessor>>,
}

impl LightPipeline {
    pub fn new(
        config: AppConfig,
        device: Box<dyn InputDevice>,
        bridge: Option<Arc<dyn FixtureBridge>>,
    ) -> Result<Self> {
        let sensitivity =
            SensitivityHandle::new(Sensitivity::from_setting(config.detector.sensitivity));
        let mode = DetectorMode::new(config.detector.beat_mode);
        let processor = FrameProcessor::new(&config, sensitivity.clone(), mode.clone())?;

        Ok(Self {
            source: SignalSource::new(config.audio.clone(), device),
            sensitivity,
            mode,
            bridge,
            dispatches: Arc::new(LatestValue::new()),
            spectrum: Arc::new(LatestValue::new()),
            processor: Some(processor),
            worker: None,
        })
    }

    /// Replaces the random source used for non-triad fixture hues.
    pub fn set_dispatcher(&mut self, dispatcher: FixtureDispatcher) {
        if let Some(processor) = self.processor.as_mut() {
            processor.dispatcher = dispatcher;
        }
    }

    pub fn sensitivity(&self) -> SensitivityHandle {
        self.sensitivity.clone()
    }

    pub fn mode(&self) -> DetectorMode {
        self.mode.clone()
    }

    /// Latest dispatch, for the delivery worker.
    pub fn dispatches(&self) -> Arc<LatestValue<Dispatch>> {
        self.dispatches.clone()
    }

    /// Latest spectrum, for a visualizer.
    pub fn spectrum(&self) -> Arc<LatestValue<MagnitudeSpectrum>> {
        self.spectrum.clone()
    }

    pub fn is_running(&self) -> bool {
        self.source.is_running()
    }

    /// Starts capture and processing. On failure nothing is left running.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            if self.source.is_running() {
                return Err(BulbError::msg("pipeline is already running"));
            }
            self.wait();
        }

        let mut processor = self
            .processor
            .take()
            .ok_or_else(|| BulbError::msg("pipeline processor was lost"))?;

        let frames = match self.source.start() {
            Ok(frames) => frames,
            Err(err) => {
                self.processor = Some(processor);
                return Err(err);
            }
        };

        processor.restart();
        self.dispatches.reopen();
        self.spectrum.reopen();

        let bridge = self.bridge.clone();
        let dispatches = self.dispatches.clone();
        let spectrum = self.spectrum.clone();
        let spawned = thread::Builder::new()
            .name("bulbdj-process".into())
            .spawn(move || {
                process_loop(&mut processor, frames, bridge.as_deref(), &dispatches, &spectrum);
                processor
            });
        match spawned {
            Ok(worker) => self.worker = Some(worker),
            Err(err) => {
                self.source.stop();
                return Err(err.into());
            }
        }
        tracing::info!("light pipeline started");
        Ok(())
    }

    /// Stops capture and waits for the terminal off colour to be published.
    pub fn stop(&mut self) {
        self.source.stop();
        self.wait();
    }

    /// Waits for the processing thread to finish, e.g. after the input ends.
    pub fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(processor) => self.processor = Some(processor),
                Err(_) => tracing::error!("processing thread panicked"),
            }
            tracing::info!("light pipeline stopped");
        }
    }
}

impl Drop for LightPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LightPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightPipeline")
            .field("source", &self.source)
            .field("sensitivity", &self.sensitivity.get())
            .field("beat_mode", &self.mode.is_beat())
            .field("bridge", &self.bridge.is_some())
            .finish()
    }
}

fn process_loop(
    processor: &mut FrameProcessor,
    frames: Receiver<AudioFrame>,
    bridge: Option<&dyn FixtureBridge>,
    dispatches: &LatestValue<Dispatch>,
    spectrum: &LatestValue<MagnitudeSpectrum>,
) {
    for frame in frames.iter() {
        match processor.process(&frame) {
            Ok(outcome) => {
                spectrum.publish(outcome.spectrum);
                if let Some(color) = outcome.color {
                    dispatches.publish(processor.dispatch(color, bridge));
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "processing stopped");
                break;
            }
        }
    }
    drop(frames);

    if let Some(stopped) = processor.stop() {
        dispatches.publish(stopped);
    }
    dispatches.close();
    spectrum.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CaptureStream, PulsePattern, ReadStatus, SyntheticInput};
    use crate::mapping::{FixtureCommand, FixtureState, HUE_BLUE, HUE_GREEN, HUE_RED};
    use crate::output::{DeliveryWorker, LatestValue};
    use crate::{AudioConfig, DetectorConfig};
    use parking_lot::Mutex;

    fn config() -> AppConfig {
        AppConfig {
            audio: AudioConfig {
                sample_rate: 44_100,
                frame_len: 1024,
            },
            detector: DetectorConfig {
                history_len: 43,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn count_beats(sensitivity: i32) -> usize {
        let config = config();
        let mut processor = FrameProcessor::new(
            &config,
            SensitivityHandle::new(Sensitivity::new(sensitivity)),
            DetectorMode::new(true),
        )
        .unwrap();

        let mut device = SyntheticInput::new(PulsePattern {
            period: 10,
            tone_hz: 60.0,
            amplitude: 0.8,
            floor: 0.0,
        });
        let mut stream = device.open(&config.audio).unwrap();
        let mut frame = AudioFrame::silent(config.audio.frame_len);

        let mut beats = 0;
        for _ in 0..50 {
            assert_eq!(stream.read_frame(&mut frame).unwrap(), ReadStatus::Frame);
            beats += processor.process(&frame).unwrap().beats;
        }
        beats
    }

    #[test]
    fn pulse_train_beats_do_not_decrease_with_sensitivity() {
        let counts: Vec<usize> = [0, 50, 100].into_iter().map(count_beats).collect();

        assert!(counts[0] > 0, "pulses should be detected: {counts:?}");
        assert!(counts[0] <= counts[1] && counts[1] <= counts[2], "{counts:?}");
    }

    #[test]
    fn silent_frames_never_beat() {
        let config = config();
        for sensitivity in [0, 50, 100] {
            let mut processor = FrameProcessor::new(
                &config,
                SensitivityHandle::new(Sensitivity::new(sensitivity)),
                DetectorMode::new(true),
            )
            .unwrap();
            for _ in 0..20 {
                let outcome = processor.process(&AudioFrame::silent(1024)).unwrap();
                assert!(outcome.spectrum.is_silent());
                assert_eq!(outcome.beats, 0);
            }
        }
    }

    #[test]
    fn frequency_mode_renders_bass_as_red() {
        let config = config();
        let mut processor = FrameProcessor::new(
            &config,
            SensitivityHandle::new(Sensitivity::DEFAULT),
            DetectorMode::new(false),
        )
        .unwrap();
        let mut device = SyntheticInput::new(PulsePattern {
            period: 1,
            tone_hz: 80.0,
            amplitude: 0.5,
            floor: 0.5,
        });
        let mut stream = device.open(&config.audio).unwrap();
        let mut frame = AudioFrame::silent(1024);
        stream.read_frame(&mut frame).unwrap();

        let color = processor.process(&frame).unwrap().color.unwrap();
        assert!(color.rgb.r > color.rgb.b);
        assert!(color.brightness > 0.0);
    }

    #[test]
    fn mode_flag_is_read_every_frame() {
        let config = config();
        let mode = DetectorMode::new(true);
        let mut processor = FrameProcessor::new(
            &config,
            SensitivityHandle::new(Sensitivity::DEFAULT),
            mode.clone(),
        )
        .unwrap();
        let loud = {
            let mut stream = SyntheticInput::new(PulsePattern {
                period: 1,
                ..Default::default()
            })
            .open(&config.audio)
            .unwrap();
            let mut frame = AudioFrame::silent(1024);
            stream.read_frame(&mut frame).unwrap();
            frame
        };

        // First frame only seeds the baseline, so beat mode stays dark.
        let beat_color = processor.process(&loud).unwrap().color.unwrap();
        assert_eq!(beat_color.brightness, 0.0);

        mode.set_beat(false);
        let spectrum_color = processor.process(&loud).unwrap().color.unwrap();
        assert!(spectrum_color.brightness > 0.0);
    }

    #[test]
    fn wrong_frame_length_is_contract_violation() {
        let mut processor = FrameProcessor::new(
            &config(),
            SensitivityHandle::new(Sensitivity::DEFAULT),
            DetectorMode::new(true),
        )
        .unwrap();
        let err = processor.process(&AudioFrame::silent(10)).unwrap_err();
        assert!(matches!(err, BulbError::ContractViolation { .. }));
    }

    struct TriadBridge {
        applied: Mutex<Vec<Vec<FixtureCommand>>>,
    }

    impl FixtureBridge for TriadBridge {
        fn is_connected(&self) -> bool {
            true
        }

        fn fixtures(&self) -> Vec<FixtureState> {
            [10, 20, 30]
                .into_iter()
                .map(|brightness| FixtureState { brightness })
                .collect()
        }

        fn apply(&self, batch: &[FixtureCommand]) -> Result<()> {
            self.applied.lock().push(batch.to_vec());
            Ok(())
        }
    }

    #[test]
    fn connected_triad_receives_fixed_hues() {
        let mut processor = FrameProcessor::new(
            &config(),
            SensitivityHandle::new(Sensitivity::DEFAULT),
            DetectorMode::new(true),
        )
        .unwrap();
        let bridge = TriadBridge {
            applied: Mutex::new(Vec::new()),
        };

        let dispatch = processor.dispatch(RenderedColor::OFF, Some(&bridge));

        let Dispatch::Fixtures(batch) = dispatch else {
            panic!("expected a fixture batch, got {dispatch:?}");
        };
        let expected: Vec<(u16, u8)> = vec![(HUE_RED, 10), (HUE_GREEN, 20), (HUE_BLUE, 30)];
        let actual: Vec<(u16, u8)> = batch.iter().map(|c| (c.hue, c.brightness)).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn pipeline_flushes_off_exactly_once_when_input_ends() {
        let input = SyntheticInput::new(PulsePattern::default()).with_frame_limit(30);
        let mut pipeline = LightPipeline::new(config(), Box::new(input), None).unwrap();
        let dispatches = pipeline.dispatches();

        pipeline.start().unwrap();
        pipeline.wait();

        assert_eq!(dispatches.take(), Some(Dispatch::Stopped(RenderedColor::OFF)));
        assert!(dispatches.is_closed());

        pipeline.stop();
        assert_eq!(dispatches.take(), None);
    }

    #[test]
    fn pipeline_delivers_to_bridge_and_restarts() {
        let bridge = Arc::new(TriadBridge {
            applied: Mutex::new(Vec::new()),
        });
        let input = SyntheticInput::new(PulsePattern::default())
            .with_frame_limit(12)
            .paced();
        let mut pipeline =
            LightPipeline::new(config(), Box::new(input), Some(bridge.clone())).unwrap();

        let mut delivered = Vec::new();
        for _ in 0..2 {
            pipeline.start().unwrap();
            let dispatches: Arc<LatestValue<Dispatch>> = pipeline.dispatches();
            let worker = DeliveryWorker::spawn(dispatches, Some(bridge.clone()), None).unwrap();
            pipeline.wait();
            worker.join();
            delivered.push(bridge.applied.lock().len());
        }

        assert!(delivered[0] > 0, "{delivered:?}");
        assert!(delivered[1] > delivered[0], "{delivered:?}");
        assert!(bridge.applied.lock().iter().all(|batch| batch.len() == 3));
    }

    #[test]
    fn sensitivity_handle_is_shared_with_classifier() {
        let input = SyntheticInput::new(PulsePattern::default());
        let pipeline = LightPipeline::new(config(), Box::new(input), None).unwrap();

        pipeline.sensitivity().set(-5);
        assert_eq!(pipeline.sensitivity().get(), Sensitivity::MIN);
        assert_eq!(
            pipeline.processor.as_ref().unwrap().classifier().sensitivity(),
            Sensitivity::MIN
        );
    }

    #[test]
    fn unavailable_device_leaves_pipeline_stopped() {
        struct Denied;
        impl InputDevice for Denied {
            fn open(&mut self, _config: &AudioConfig) -> Result<Box<dyn CaptureStream>> {
                Err(BulbError::DeviceUnavailable("microphone permission denied".into()))
            }
        }

        let mut pipeline = LightPipeline::new(config(), Box::new(Denied), None).unwrap();
        let err = pipeline.start().unwrap_err();

        assert!(matches!(err, BulbError::DeviceUnavailable(_)));
        assert!(!pipeline.is_running());
        assert!(pipeline.processor.is_some());
    }
}
