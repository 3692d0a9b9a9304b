use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};

use crate::analysis::{BandEnergies, BandLayout, BeatKind, MagnitudeSpectrum};
use crate::{BulbError, Result};

/// Threshold ratio at sensitivity 0.
const MAX_THRESHOLD_RATIO: f32 = 3.0;
/// Threshold ratio at sensitivity 100.
const MIN_THRESHOLD_RATIO: f32 = 1.2;
/// Band energy below which nothing counts as a beat, and the floor used for
/// the baseline after silence.
const MIN_BEAT_ENERGY: f32 = 1e-4;

/// Beat detection sensitivity in `0..=100`. Higher values lower the
/// threshold and produce more beats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sensitivity(u8);

impl Sensitivity {
    pub const MIN: Sensitivity = Sensitivity(0);
    pub const MAX: Sensitivity = Sensitivity(100);
    pub const DEFAULT: Sensitivity = Sensitivity(50);

    /// Clamps `value` into the valid range.
    pub fn new(value: i32) -> Self {
        Self(value.clamp(Self::MIN.0 as i32, Self::MAX.0 as i32) as u8)
    }

    /// Interprets a stored setting where absence or `-1` means "never set".
    pub fn from_setting(value: Option<i32>) -> Self {
        match value {
            None | Some(-1) => Self::DEFAULT,
            Some(value) => Self::new(value),
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Ratio between a band's energy and its baseline that must be exceeded
    /// for a beat.
    pub fn threshold_ratio(self) -> f32 {
        let t = self.0 as f32 / Self::MAX.0 as f32;
        MAX_THRESHOLD_RATIO - (MAX_THRESHOLD_RATIO - MIN_THRESHOLD_RATIO) * t
    }
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Shared handle for reading and updating the sensitivity from other threads.
#[derive(Debug, Clone)]
pub struct SensitivityHandle {
    value: Arc<AtomicU8>,
}

impl SensitivityHandle {
    pub fn new(initial: Sensitivity) -> Self {
        Self {
            value: Arc::new(AtomicU8::new(initial.0)),
        }
    }

    pub fn get(&self) -> Sensitivity {
        Sensitivity(self.value.load(Ordering::Relaxed))
    }

    /// Clamps and stores a new value. Never fails.
    pub fn set(&self, value: i32) -> Sensitivity {
        let sensitivity = Sensitivity::new(value);
        self.value.store(sensitivity.0, Ordering::Relaxed);
        sensitivity
    }
}

/// A detected transient in one band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub kind: BeatKind,
    /// How far the band exceeded its threshold, in `[0, 1]`.
    pub intensity: f32,
}

/// Compares band energies against a rolling per-band baseline.
#[derive(Debug)]
pub struct BeatClassifier {
    layout: BandLayout,
    sensitivity: SensitivityHandle,
    history: VecDeque<BandEnergies>,
    history_len: usize,
}

impl BeatClassifier {
    pub fn new(layout: BandLayout, sensitivity: Sensitivity, history_len: usize) -> Self {
        Self::with_handle(layout, SensitivityHandle::new(sensitivity), history_len)
    }

    /// Builds a classifier that reads its sensitivity from a shared handle.
    pub fn with_handle(
        layout: BandLayout,
        sensitivity: SensitivityHandle,
        history_len: usize,
    ) -> Self {
        let history_len = history_len.max(1);
        Self {
            layout,
            sensitivity,
            history: VecDeque::with_capacity(history_len),
            history_len,
        }
    }

    pub fn sensitivity(&self) -> Sensitivity {
        self.sensitivity.get()
    }

    /// Clamps and applies a new sensitivity from the next frame on.
    pub fn set_sensitivity(&self, value: i32) -> Sensitivity {
        self.sensitivity.set(value)
    }

    pub fn sensitivity_handle(&self) -> SensitivityHandle {
        self.sensitivity.clone()
    }

    /// Forgets the adaptive baseline.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Classifies one frame and folds it into the baseline.
    ///
    /// Events are ordered by band, lowest first. A spectrum whose length does
    /// not match the band layout is a contract violation.
    pub fn classify(&mut self, spectrum: &MagnitudeSpectrum) -> Result<Vec<BeatEvent>> {
        if spectrum.len() != self.layout.bins() {
            return Err(BulbError::contract(
                "beat classifier",
                self.layout.bins(),
                spectrum.len(),
            ));
        }

        let threshold = self.sensitivity.get().threshold_ratio();
        let energies = self.layout.energies(spectrum);
        let mut events = Vec::new();

        if let Some(baseline) = self.baseline() {
            for kind in BeatKind::ALL {
                let energy = energies[kind.index()];
                if energy <= MIN_BEAT_ENERGY {
                    continue;
                }
                let ratio = energy / baseline[kind.index()].max(MIN_BEAT_ENERGY);
                if ratio > threshold {
                    let intensity = ((ratio - threshold) / threshold).clamp(0.0, 1.0);
                    tracing::debug!(?kind, ratio, intensity, "beat");
                    events.push(BeatEvent { kind, intensity });
                }
            }
        }

        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(energies);

        Ok(events)
    }

    fn baseline(&self) -> Option<BandEnergies> {
        if self.history.is_empty() {
            return None;
        }

        let mut sum = [0.0; 3];
        for frame in &self.history {
            for (total, energy) in sum.iter_mut().zip(frame) {
                *total += energy;
            }
        }
        let count = self.history.len() as f32;
        Some(sum.map(|total| total / count))
    }
}
