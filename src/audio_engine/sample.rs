//! Decoded PCM sources the mixer plays from.
//!
//! The mixer never owns a sample. Callers keep the [`SampleRef`] alive for
//! as long as they want it heard; channels only hold a weak reference and
//! fall silent once the owner lets go.

use std::sync::Arc;

use crate::audio_engine::errors::DecodeError;

/// Shared handle to a sample owned by the caller.
pub type SampleRef = Arc<dyn Sample>;

/// Category tag attached to every sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleCategory {
    /// Ordinary sound effect.
    #[default]
    Effect,

    /// Spoken dialogue.
    Speech,
}

/// A seekable source of interleaved signed 16-bit PCM.
///
/// `read_frames` is called from the real-time thread while the device lock is
/// held. Implementations must not block on I/O or call back into the mixer.
pub trait Sample: Send + Sync {
    /// Native sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Interleaved channel count (1 or 2).
    fn channels(&self) -> usize;

    /// Length in frames.
    fn frame_count(&self) -> usize;

    /// Category tag.
    fn category(&self) -> SampleCategory {
        SampleCategory::Effect
    }

    /// Decodes frames starting at `frame` into `out`.
    ///
    /// `out` holds a whole number of frames in the sample's channel layout.
    /// Returns the number of frames written, which is zero only at the end of
    /// the sample.
    fn read_frames(&self, frame: usize, out: &mut [i16]) -> Result<usize, DecodeError>;
}

/// A fully decoded sample held in memory.
#[derive(Debug, Clone)]
pub struct PcmSample {
    sample_rate: u32,
    channels: usize,
    category: SampleCategory,
    samples: Arc<[i16]>,
}

impl PcmSample {
    /// Creates a sample from interleaved PCM. A trailing partial frame is ignored.
    pub fn new(sample_rate: u32, channels: usize, samples: Vec<i16>) -> Self {
        let channels = channels.clamp(1, 2);
        let mut samples = samples;
        samples.truncate(samples.len() - samples.len() % channels);

        Self {
            sample_rate,
            channels,
            category: SampleCategory::Effect,
            samples: Arc::from(samples.into_boxed_slice()),
        }
    }

    /// Creates a mono sample.
    pub fn mono(sample_rate: u32, samples: Vec<i16>) -> Self {
        Self::new(sample_rate, 1, samples)
    }

    /// Creates an interleaved stereo sample.
    pub fn stereo(sample_rate: u32, samples: Vec<i16>) -> Self {
        Self::new(sample_rate, 2, samples)
    }

    /// Sets the category tag.
    pub fn with_category(mut self, category: SampleCategory) -> Self {
        self.category = category;
        self
    }

    /// Raw interleaved samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }
}

impl Sample for PcmSample {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn frame_count(&self) -> usize {
        self.samples.len() / self.channels
    }

    fn category(&self) -> SampleCategory {
        self.category
    }

    fn read_frames(&self, frame: usize, out: &mut [i16]) -> Result<usize, DecodeError> {
        let frames = self.frame_count();
        if frame > frames {
            return Err(DecodeError::OutOfRange { frame, frames });
        }

        let wanted = out.len() / self.channels;
        let count = wanted.min(frames - frame);
        let start = frame * self.channels;
        let len = count * self.channels;
        out[..len].copy_from_slice(&self.samples[start..start + len]);
        Ok(count)
    }
}
