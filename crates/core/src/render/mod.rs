//! Fuses beats or spectral energy into a single colour per frame.

use serde::{Deserialize, Serialize};

use crate::analysis::{BandLayout, BeatEvent, BeatKind, MagnitudeSpectrum};
use crate::{BulbError, RenderConfig, Result};

/// Loudness (root of the summed band energies) mapped to full brightness.
const FULL_BRIGHTNESS_LOUDNESS: f32 = 0.25;

/// 8-bit RGB triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scales every channel by `factor` in `[0, 1]`.
    pub fn scaled(self, factor: f32) -> Self {
        let factor = factor.clamp(0.0, 1.0);
        let scale = |c: u8| (c as f32 * factor).round() as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }
}

/// Colour and overall brightness for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderedColor {
    pub rgb: Rgb,
    /// Overall brightness in `[0, 1]`.
    pub brightness: f32,
}

impl RenderedColor {
    pub const OFF: RenderedColor = RenderedColor {
        rgb: Rgb::BLACK,
        brightness: 0.0,
    };

    pub fn is_off(&self) -> bool {
        self.brightness == 0.0 && self.rgb == Rgb::BLACK
    }

    /// The colour as a display would show it, with brightness applied.
    pub fn display_rgb(&self) -> Rgb {
        self.rgb.scaled(self.brightness)
    }
}

/// Hue region each beat band flashes in.
fn beat_color(kind: BeatKind) -> [f32; 3] {
    match kind {
        BeatKind::Low => [1.0, 0.0, 0.0],
        BeatKind::Mid => [0.0, 1.0, 0.0],
        BeatKind::High => [0.0, 0.0, 1.0],
    }
}

/// LED renderer: turns analysis results into [`RenderedColor`] values.
///
/// Beat flashes and the spectrum colour keep separate state, so switching
/// mode does not bleed one into the other. After [`stop`](Self::stop) no
/// colour is produced until [`start`](Self::start).
#[derive(Debug)]
pub struct ColorSynthesizer {
    layout: BandLayout,
    config: RenderConfig,
    running: bool,
    /// Current beat flash per channel, decayed every beat update.
    flash: [f32; 3],
    flash_brightness: f32,
    /// Smoothed band weights and brightness for the spectrum mode.
    weights: [f32; 3],
    level: f32,
}

impl ColorSynthesizer {
    pub fn new(layout: BandLayout, config: RenderConfig) -> Self {
        Self {
            layout,
            config,
            running: true,
            flash: [0.0; 3],
            flash_brightness: 0.0,
            weights: [0.0; 3],
            level: 0.0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Re-arms the synthesizer after [`stop`](Self::stop).
    pub fn start(&mut self) {
        if !self.running {
            self.running = true;
            self.flash = [0.0; 3];
            self.flash_brightness = 0.0;
            self.weights = [0.0; 3];
            self.level = 0.0;
        }
    }

    /// Beat-driven update. Each event lights its band's hue at its intensity;
    /// several events combine by per-channel maximum, and so does the decayed
    /// previous flash.
    pub fn update_from_beats(&mut self, events: &[BeatEvent]) -> Option<RenderedColor> {
        if !self.running {
            return None;
        }

        let decay = self.config.beat_decay.clamp(0.0, 1.0);
        let mut channels = self.flash.map(|c| c * decay);
        let mut brightness = self.flash_brightness * decay;

        for event in events {
            let intensity = event.intensity.clamp(0.0, 1.0);
            for (channel, weight) in channels.iter_mut().zip(beat_color(event.kind)) {
                *channel = channel.max(weight * intensity);
            }
            brightness = brightness.max(intensity);
        }

        self.flash = channels;
        self.flash_brightness = brightness;
        Some(self.publish(channels, brightness))
    }

    /// Frequency-driven update. Low, mid and high energy drive red, green and
    /// blue in proportion to their share of the total; loudness only drives
    /// brightness.
    pub fn update_from_spectrum(
        &mut self,
        spectrum: &MagnitudeSpectrum,
    ) -> Result<Option<RenderedColor>> {
        if spectrum.len() != self.layout.bins() {
            return Err(BulbError::contract(
                "color synthesizer",
                self.layout.bins(),
                spectrum.len(),
            ));
        }
        if !self.running {
            return Ok(None);
        }

        let energies = self.layout.energies(spectrum);
        let total: f32 = energies.iter().sum();
        let (target, level) = if total > f32::EPSILON {
            let loudness = total.sqrt() / FULL_BRIGHTNESS_LOUDNESS;
            (energies.map(|e| e / total), loudness.min(1.0))
        } else {
            (self.weights, 0.0)
        };

        let keep = self.config.spectrum_smoothing.clamp(0.0, 0.99);
        for (weight, target) in self.weights.iter_mut().zip(target) {
            *weight = *weight * keep + target * (1.0 - keep);
        }
        self.level = self.level * keep + level * (1.0 - keep);

        Ok(Some(self.publish(self.weights, self.level)))
    }

    /// Produces the "off" colour once. Further calls return `None` until
    /// [`start`](Self::start).
    pub fn stop(&mut self) -> Option<RenderedColor> {
        if !self.running {
            return None;
        }
        self.running = false;
        tracing::debug!("color synthesizer stopped");
        Some(RenderedColor::OFF)
    }

    fn publish(&self, channels: [f32; 3], brightness: f32) -> RenderedColor {
        let peak = channels.iter().cloned().fold(0.0_f32, f32::max);
        let rgb = if peak > f32::EPSILON {
            let to_u8 = |c: f32| ((c / peak) * 255.0).round().clamp(0.0, 255.0) as u8;
            Rgb::new(to_u8(channels[0]), to_u8(channels[1]), to_u8(channels[2]))
        } else {
            Rgb::BLACK
        };

        RenderedColor {
            rgb,
            brightness: brightness.clamp(0.0, 1.0),
        }
    }
}
