//! A single playback slot in the mixer pool.
//!
//! A [`Channel`] is created once when the mixer starts and recycled for every
//! sound it plays. It pulls PCM from a [`Sample`] through a small decode
//! window, steps a 16.16 fixed-point phase by the pitch-adjusted rate ratio,
//! linearly interpolates between neighbouring source frames, applies the
//! per-side gain and adds the result into the mixer's wide accumulator.
//!
//! All methods assume the caller holds the device lock.

use std::sync::{Arc, Weak};

use crate::audio_engine::constants::{
    DECODE_CHUNK_FRAMES, FRAC_BITS, FRAC_ONE, MAX_ATTENUATION, MAX_DISTANCE, PITCH_UNITY,
    VOLUME_MAX,
};
use crate::audio_engine::errors::DecodeError;
use crate::audio_engine::sample::{Sample, SampleCategory, SampleRef};
use crate::messages::MixerEvent;

/// Caller-visible handle for one playback assignment.
///
/// Ids are never negative. They are unique among live channels and only
/// repeat after the counter wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(i32);

impl InstanceId {
    pub(crate) fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Raw id value.
    pub fn get(self) -> i32 {
        self.0
    }
}

/// How many times a sound repeats after its first play-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Play once and go idle.
    #[default]
    Once,

    /// Repeat `n` more times after the first play-through.
    Repeat(u32),

    /// Loop until stopped.
    Forever,
}

impl From<i32> for LoopMode {
    fn from(value: i32) -> Self {
        match value {
            0 => LoopMode::Once,
            n if n < 0 => LoopMode::Forever,
            n => LoopMode::Repeat(n.unsigned_abs()),
        }
    }
}

/// Parameters for starting a sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayRequest {
    pub loop_mode: LoopMode,
    pub priority: i32,
    pub paused: bool,
    /// Playback speed in 16.16 fixed point; [`PITCH_UNITY`] is natural speed.
    pub pitch_shift: u32,
    pub left_volume: u8,
    pub right_volume: u8,
}

impl Default for PlayRequest {
    fn default() -> Self {
        Self {
            loop_mode: LoopMode::Once,
            priority: 0,
            paused: false,
            pitch_shift: PITCH_UNITY,
            left_volume: VOLUME_MAX,
            right_volume: VOLUME_MAX,
        }
    }
}

impl PlayRequest {
    pub fn with_loop(mut self, loop_mode: impl Into<LoopMode>) -> Self {
        self.loop_mode = loop_mode.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    pub fn with_pitch_shift(mut self, pitch_shift: u32) -> Self {
        self.pitch_shift = pitch_shift;
        self
    }

    pub fn with_volume(mut self, left: u8, right: u8) -> Self {
        self.left_volume = left;
        self.right_volume = right;
        self
    }
}

/// Maps a listener-relative position to per-side gains.
///
/// Distance attenuates both sides up to [`MAX_ATTENUATION`]. Angle is in
/// degrees, positive to the right; sounds behind the listener mirror to the
/// front.
pub fn pan_gains(distance: i32, angle: i32) -> (u8, u8) {
    let attenuation = distance.clamp(0, MAX_DISTANCE).min(MAX_ATTENUATION);
    let base = i32::from(VOLUME_MAX) - attenuation;

    let mut angle = angle.rem_euclid(360);
    if angle >= 180 {
        angle -= 360;
    }
    if angle > 90 {
        angle = 180 - angle;
    } else if angle < -90 {
        angle = -180 - angle;
    }

    let far = base * (90 - angle.abs()) / 90;
    let (left, right) = if angle >= 0 { (far, base) } else { (base, far) };
    (left as u8, right as u8)
}

#[derive(Debug, Clone, Copy, Default)]
struct Frame {
    left: i32,
    right: i32,
}

impl Frame {
    fn lerp(self, next: Frame, frac: i64) -> Frame {
        let step = |a: i32, b: i32| a + ((i64::from(b - a) * frac) >> FRAC_BITS) as i32;
        Frame {
            left: step(self.left, next.left),
            right: step(self.right, next.right),
        }
    }
}

/// One playback slot.
pub struct Channel {
    active: bool,
    paused: bool,
    sample: Option<Weak<dyn Sample>>,
    category: SampleCategory,
    instance_id: InstanceId,
    priority: i32,
    loop_mode: LoopMode,

    source_channels: usize,
    source_frames: usize,
    /// Source frames advanced per output frame, 16.16.
    step: u64,
    /// Read position in source frames, 16.16.
    cursor: u64,

    volume: (u8, u8),
    position: (i32, i32),
    pan: (u8, u8),

    output_rate: u32,
    output_channels: usize,

    window: Vec<i16>,
    window_start: usize,
    window_frames: usize,
}

impl Channel {
    /// Creates an idle channel for the given output format.
    pub fn new(output_rate: u32, output_channels: usize) -> Self {
        Self {
            active: false,
            paused: false,
            sample: None,
            category: SampleCategory::Effect,
            instance_id: InstanceId::new(-1),
            priority: 0,
            loop_mode: LoopMode::Once,
            source_channels: 1,
            source_frames: 0,
            step: FRAC_ONE,
            cursor: 0,
            volume: (VOLUME_MAX, VOLUME_MAX),
            position: (0, 0),
            pan: (VOLUME_MAX, VOLUME_MAX),
            output_rate: output_rate.max(1),
            output_channels: output_channels.clamp(1, 2),
            window: vec![0; DECODE_CHUNK_FRAMES * 2],
            window_start: 0,
            window_frames: 0,
        }
    }

    /// Starts playing `sample` from its first frame.
    pub fn assign(&mut self, sample: &SampleRef, request: &PlayRequest, instance_id: InstanceId) {
        let weak: Weak<dyn Sample> = Arc::downgrade(sample);

        self.active = true;
        self.paused = request.paused;
        self.sample = Some(weak);
        self.category = sample.category();
        self.instance_id = instance_id;
        self.priority = request.priority;
        self.loop_mode = request.loop_mode;

        self.source_channels = sample.channels().clamp(1, 2);
        self.source_frames = sample.frame_count();
        self.step = u64::from(sample.sample_rate()) * u64::from(request.pitch_shift)
            / u64::from(self.output_rate);
        self.cursor = 0;

        self.volume = (request.left_volume, request.right_volume);
        self.position = (0, 0);
        self.pan = (VOLUME_MAX, VOLUME_MAX);

        self.window_start = 0;
        self.window_frames = 0;
    }

    /// Goes idle immediately. No fade-out.
    pub fn stop(&mut self) {
        self.active = false;
        self.paused = false;
        self.sample = None;
        self.cursor = 0;
        self.window_frames = 0;
    }

    pub fn is_playing(&self) -> bool {
        self.active && self.sample.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn category(&self) -> SampleCategory {
        self.category
    }

    /// The assigned sample, if it is still alive.
    pub fn sample(&self) -> Option<SampleRef> {
        self.sample.as_ref().and_then(Weak::upgrade)
    }

    /// Whether this channel is playing exactly `sample` (by identity).
    pub fn is_playing_sample(&self, sample: &SampleRef) -> bool {
        self.is_playing()
            && self.sample.as_ref().is_some_and(|weak| {
                std::ptr::addr_eq(Weak::as_ptr(weak), Arc::as_ptr(sample))
            })
    }

    pub fn set_volume(&mut self, left: u8, right: u8) {
        self.volume = (left, right);
    }

    pub fn volume(&self) -> (u8, u8) {
        self.volume
    }

    pub fn set_2d_position(&mut self, distance: i32, angle: i32) {
        self.position = (distance, angle);
        self.pan = pan_gains(distance, angle);
    }

    pub fn position_2d(&self) -> (i32, i32) {
        self.position
    }

    /// Current read position, 16.16 source frames.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    fn gains(&self) -> (i64, i64) {
        let scale = |volume: u8, pan: u8| i64::from(volume) * i64::from(pan) / 255;
        (
            scale(self.volume.0, self.pan.0),
            scale(self.volume.1, self.pan.1),
        )
    }

    /// Resamples and adds this channel's contribution for one tick.
    ///
    /// `dst` is interleaved at the output layout. Returns an event when the
    /// channel went idle during the tick; the remaining frames are left
    /// untouched.
    pub fn resample_and_mix(&mut self, dst: &mut [i32]) -> Option<MixerEvent> {
        if !self.is_playing() {
            return None;
        }

        let instance_id = self.instance_id;
        let Some(sample) = self.sample() else {
            self.stop();
            return Some(MixerEvent::SampleDropped { instance_id });
        };

        match self.mix_frames(sample.as_ref(), dst) {
            Ok(true) => None,
            Ok(false) => {
                self.stop();
                Some(MixerEvent::ChannelFinished { instance_id })
            }
            Err(error) => {
                self.stop();
                Some(MixerEvent::DecodeFailed { instance_id, error })
            }
        }
    }

    /// Returns `Ok(false)` once the sample ran out with no loops left.
    fn mix_frames(&mut self, sample: &dyn Sample, dst: &mut [i32]) -> Result<bool, DecodeError> {
        // A zero step would never reach the end.
        if self.source_frames == 0 || self.step == 0 {
            return Ok(false);
        }

        let length = (self.source_frames as u64) << FRAC_BITS;
        let (left_gain, right_gain) = self.gains();
        let mono_gain = (left_gain + right_gain) / 2;

        for out in dst.chunks_exact_mut(self.output_channels) {
            let index = (self.cursor >> FRAC_BITS) as usize;
            let frac = (self.cursor & (FRAC_ONE - 1)) as i64;
            let (current, next) = self.frame_pair(sample, index)?;
            let frame = current.lerp(next, frac);

            match out {
                [mono] => {
                    let value = (frame.left + frame.right) / 2;
                    *mono = mono.saturating_add((i64::from(value) * mono_gain / 255) as i32);
                }
                [left, right] => {
                    *left = left.saturating_add((i64::from(frame.left) * left_gain / 255) as i32);
                    *right =
                        right.saturating_add((i64::from(frame.right) * right_gain / 255) as i32);
                }
                _ => {}
            }

            self.cursor += self.step;
            if !self.wrap_cursor(length) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Folds the cursor back into the sample, spending one repeat per pass
    /// crossed. Returns `false` once no passes are left.
    fn wrap_cursor(&mut self, length: u64) -> bool {
        if self.cursor < length {
            return true;
        }

        let passes = self.cursor / length;
        match self.loop_mode {
            LoopMode::Once => return false,
            LoopMode::Repeat(n) if passes > u64::from(n) => return false,
            LoopMode::Repeat(n) => {
                let left = n - passes as u32;
                self.loop_mode = if left == 0 {
                    LoopMode::Once
                } else {
                    LoopMode::Repeat(left)
                };
            }
            LoopMode::Forever => {}
        }
        self.cursor %= length;
        true
    }

    /// Frame `index` and its interpolation partner. The last frame pairs with
    /// itself.
    fn frame_pair(&mut self, sample: &dyn Sample, index: usize) -> Result<(Frame, Frame), DecodeError> {
        let needed = if index + 1 < self.source_frames { 2 } else { 1 };
        let window_end = self.window_start + self.window_frames;
        if index < self.window_start || index + needed > window_end {
            self.refill(sample, index)?;
        }
        if index + needed > self.window_start + self.window_frames {
            return Err(DecodeError::OutOfRange {
                frame: index,
                frames: self.source_frames,
            });
        }

        let current = self.window_frame(index - self.window_start);
        let next = if needed == 2 {
            self.window_frame(index + 1 - self.window_start)
        } else {
            current
        };
        Ok((current, next))
    }

    fn refill(&mut self, sample: &dyn Sample, start: usize) -> Result<(), DecodeError> {
        let len = DECODE_CHUNK_FRAMES * self.source_channels;
        let frames = sample.read_frames(start, &mut self.window[..len])?;
        self.window_start = start;
        self.window_frames = frames.min(DECODE_CHUNK_FRAMES);
        Ok(())
    }

    fn window_frame(&self, offset: usize) -> Frame {
        if self.source_channels == 2 {
            Frame {
                left: i32::from(self.window[offset * 2]),
                right: i32::from(self.window[offset * 2 + 1]),
            }
        } else {
            let value = i32::from(self.window[offset]);
            Frame {
                left: value,
                right: value,
            }
        }
    }
}
