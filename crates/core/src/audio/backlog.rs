use std::collections::VecDeque;

use crate::audio::AudioFrame;

/// Sample FIFO between a device callback and frame reads that never holds
/// more than a few frames. When it overflows the oldest samples go first, so
/// frames stay close to real time while the reader is stalled.
#[derive(Debug)]
pub(crate) struct SampleBacklog {
    samples: VecDeque<i16>,
    capacity: usize,
}

impl SampleBacklog {
    pub(crate) fn new(frame_len: usize, max_frames: usize) -> Self {
        let capacity = frame_len.max(1) * max_frames.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `chunk` and returns how many old samples were discarded.
    pub(crate) fn push(&mut self, chunk: &[i16]) -> usize {
        self.samples.extend(chunk.iter().copied());
        let overflow = self.samples.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.samples.drain(..overflow);
        }
        overflow
    }

    /// Moves the oldest `frame.len()` samples into `frame`. Returns `false`
    /// and leaves everything in place when not enough are buffered.
    pub(crate) fn fill(&mut self, frame: &mut AudioFrame) -> bool {
        let len = frame.len();
        if self.samples.len() < len {
            return false;
        }
        for (slot, sample) in frame.samples_mut().iter_mut().zip(self.samples.drain(..len)) {
            *slot = sample;
        }
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }
}
