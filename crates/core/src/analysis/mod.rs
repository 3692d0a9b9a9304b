//! Frequency-domain analysis of captured frames and beat classification.

use std::ops::Range;

use serde::{Deserialize, Serialize};

mod beat;
mod spectrum;

pub use beat::{BeatClassifier, BeatEvent, Sensitivity, SensitivityHandle};
pub use spectrum::{MagnitudeSpectrum, SpectrumAnalyzer};

const LOW_BAND_MAX_HZ: f32 = 250.0;
const MID_BAND_MAX_HZ: f32 = 2_000.0;

/// Frequency bands a beat can be attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BeatKind {
    /// Kick drums and bass, below 250 Hz.
    Low,
    /// Snares, vocals and most melodic content.
    Mid,
    /// Hi-hats and cymbals, above 2 kHz.
    High,
}

impl BeatKind {
    /// All bands in ascending frequency order.
    pub const ALL: [BeatKind; 3] = [BeatKind::Low, BeatKind::Mid, BeatKind::High];

    pub fn index(self) -> usize {
        match self {
            BeatKind::Low => 0,
            BeatKind::Mid => 1,
            BeatKind::High => 2,
        }
    }
}

/// Energy per band, indexed by [`BeatKind::index`].
pub type BandEnergies = [f32; 3];

/// Maps spectrum bins onto the low, mid and high bands.
#[derive(Debug, Clone, PartialEq)]
pub struct BandLayout {
    bins: usize,
    ranges: [Range<usize>; 3],
}

impl BandLayout {
    /// Builds the layout for a spectrum of `bins` values computed at
    /// `sample_rate`. The DC bin is never assigned to a band.
    pub fn new(sample_rate: u32, bins: usize) -> Self {
        let nyquist = sample_rate as f32 * 0.5;
        let bin_hz = if bins > 1 {
            nyquist / (bins - 1) as f32
        } else {
            nyquist
        };
        let bin_for = |hz: f32| -> usize {
            if bin_hz <= 0.0 {
                return bins;
            }
            ((hz / bin_hz).ceil() as usize).clamp(1, bins.max(1))
        };

        let low_end = bin_for(LOW_BAND_MAX_HZ);
        let mid_end = bin_for(MID_BAND_MAX_HZ).max(low_end);
        let start = 1.min(bins);

        Self {
            bins,
            ranges: [start..low_end.max(start), low_end..mid_end, mid_end..bins.max(mid_end)],
        }
    }

    /// Number of spectrum bins this layout expects.
    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn range(&self, kind: BeatKind) -> Range<usize> {
        self.ranges[kind.index()].clone()
    }

    /// Mean squared magnitude of each band. Empty bands report zero.
    pub fn energies(&self, spectrum: &MagnitudeSpectrum) -> BandEnergies {
        let values = spectrum.values();
        let mut energies = [0.0; 3];
        for kind in BeatKind::ALL {
            let range = self.range(kind);
            let band = &values[range.start.min(values.len())..range.end.min(values.len())];
            if !band.is_empty() {
                let sum: f32 = band.iter().map(|m| m * m).sum();
                energies[kind.index()] = sum / band.len() as f32;
            }
        }
        energies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_are_contiguous_and_ascending() {
        let layout = BandLayout::new(44_100, 513);

        let low = layout.range(BeatKind::Low);
        let mid = layout.range(BeatKind::Mid);
        let high = layout.range(BeatKind::High);

        assert_eq!(low.start, 1);
        assert_eq!(low.end, mid.start);
        assert_eq!(mid.end, high.start);
        assert_eq!(high.end, 513);
        assert!(!low.is_empty() && !mid.is_empty() && !high.is_empty());
    }

    #[test]
    fn energies_follow_bins() {
        let layout = BandLayout::new(8_000, 33);
        let mut values = vec![0.0; 33];
        values[layout.range(BeatKind::High).start] = 2.0;

        let energies = layout.energies(&MagnitudeSpectrum::from_values(values));

        assert_eq!(energies[BeatKind::Low.index()], 0.0);
        assert_eq!(energies[BeatKind::Mid.index()], 0.0);
        assert!(energies[BeatKind::High.index()] > 0.0);
    }
}
