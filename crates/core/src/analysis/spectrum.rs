use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{AudioFrame, BulbError, Result};

/// Magnitude per frequency bin, lowest frequency first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MagnitudeSpectrum {
    values: Vec<f32>,
}

impl MagnitudeSpectrum {
    /// Wraps precomputed magnitudes. Negative and non-finite values are
    /// stored as zero.
    pub fn from_values(mut values: Vec<f32>) -> Self {
        for value in &mut values {
            if !value.is_finite() || *value < 0.0 {
                *value = 0.0;
            }
        }
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_silent(&self) -> bool {
        self.values.iter().all(|value| *value == 0.0)
    }
}

/// Hann-windowed real FFT over fixed-length frames.
///
/// The FFT buffers are reused between calls but never carry information from
/// one frame to the next, so the same frame always yields the same spectrum.
pub struct SpectrumAnalyzer {
    frame_len: usize,
    window: Vec<f32>,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl SpectrumAnalyzer {
    pub fn new(frame_len: usize) -> Result<Self> {
        if frame_len < 2 {
            return Err(BulbError::msg(
                "spectrum analysis requires frames with at least two samples",
            ));
        }

        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(frame_len);
        let input = plan.make_input_vec();
        let spectrum = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();

        Ok(Self {
            frame_len,
            window: (0..frame_len).map(|i| hann_value(i, frame_len)).collect(),
            plan,
            input,
            spectrum,
            scratch,
        })
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Length of every spectrum this analyzer produces.
    pub fn bins(&self) -> usize {
        self.frame_len / 2 + 1
    }

    pub fn analyze(&mut self, frame: &AudioFrame) -> Result<MagnitudeSpectrum> {
        if frame.len() != self.frame_len {
            return Err(BulbError::contract(
                "spectrum analyzer",
                self.frame_len,
                frame.len(),
            ));
        }

        for ((slot, sample), weight) in self
            .input
            .iter_mut()
            .zip(frame.samples())
            .zip(&self.window)
        {
            *slot = (*sample as f32 / 32_768.0) * weight;
        }

        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        let scale = 2.0 / self.frame_len as f32;
        let values = self
            .spectrum
            .iter()
            .map(|bin| bin.norm() * scale)
            .collect();

        Ok(MagnitudeSpectrum::from_values(values))
    }
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("frame_len", &self.frame_len)
            .finish()
    }
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
