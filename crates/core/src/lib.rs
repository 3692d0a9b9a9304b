//! Core library for BulbDJ.
//!
//! Audio is captured on a dedicated thread, analysed into a magnitude
//! spectrum, classified into per-band beats and rendered into one colour per
//! frame. The colour is then mapped onto whatever fixtures the lighting
//! bridge reports, or handed to an on-screen demo when no bridge is
//! connected. Each module owns one stage of that pipeline.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod mapping;
pub mod output;
pub mod pipeline;
pub mod render;

pub use analysis::{
    BandLayout, BeatClassifier, BeatEvent, BeatKind, MagnitudeSpectrum, Sensitivity,
    SensitivityHandle, SpectrumAnalyzer,
};
pub use audio::{AudioFrame, InputDevice, PulsePattern, SignalSource, SyntheticInput};
pub use config::{AppConfig, AudioConfig, DetectorConfig, RenderConfig};
pub use error::{BulbError, Result};
pub use mapping::{
    DemoDisplay, Dispatch, FixtureBridge, FixtureCommand, FixtureDispatcher, FixtureState,
};
pub use output::{DeliveryWorker, LatestValue};
pub use pipeline::{DetectorMode, FrameProcessor, LightPipeline};
pub use render::{ColorSynthesizer, RenderedColor, Rgb};
