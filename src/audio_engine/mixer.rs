//! Real-time mixer implementation.
//!
//! This module provides the [`RtMixer`] struct which owns the fixed pool of
//! [`Channel`]s, the optional [`MusicRoute`] and the allocation policy, and
//! renders one tick of output in [`RtMixer::mix`].
//!
//! `RtMixer` itself does no locking. [`AudioMixer`](crate::AudioMixer) keeps
//! it behind the device lock and every call here happens with that lock held.

use rtrb::{Consumer, Producer, RingBuffer};

use crate::audio_engine::channel::{Channel, InstanceId, PlayRequest};
use crate::audio_engine::constants::{EVENT_QUEUE_CAPACITY, MIX_CHUNK_FRAMES};
use crate::audio_engine::music::MusicRoute;
use crate::audio_engine::sample::{SampleCategory, SampleRef};
use crate::messages::MixerEvent;

/// Format the device actually delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channels per frame (1 or 2).
    pub channels: usize,
}

impl OutputFormat {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.clamp(1, 2),
        }
    }

    pub fn is_stereo(&self) -> bool {
        self.channels == 2
    }
}

/// Mixing core: channel pool, music route and allocation policy.
pub struct RtMixer {
    format: OutputFormat,

    /// Playback slots, allocated once.
    channels: Vec<Channel>,

    /// Last id handed out.
    id_counter: i32,

    music: Option<Box<dyn MusicRoute>>,

    /// Wide accumulator for one chunk of interleaved output.
    accum: Vec<i32>,

    events: Producer<MixerEvent>,
}

impl RtMixer {
    /// Creates a mixer with `num_channels` idle slots for `format`.
    ///
    /// Returns the consumer end of the event ring alongside.
    pub fn new(format: OutputFormat, num_channels: usize) -> (Self, Consumer<MixerEvent>) {
        let (events, consumer) = RingBuffer::new(EVENT_QUEUE_CAPACITY);
        let mixer = Self {
            format,
            channels: (0..num_channels)
                .map(|_| Channel::new(format.sample_rate, format.channels))
                .collect(),
            id_counter: 0,
            music: None,
            accum: vec![0; MIX_CHUNK_FRAMES * format.channels],
            events,
        };
        (mixer, consumer)
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    fn next_instance_id(&mut self) -> InstanceId {
        self.id_counter = if self.id_counter == i32::MAX {
            0
        } else {
            self.id_counter + 1
        };
        InstanceId::new(self.id_counter)
    }

    /// Starts `sample` on a free channel, or evicts the lowest-priority one.
    ///
    /// Eviction only happens when the victim's priority is strictly lower
    /// than `request.priority`; on a tie the playing sound keeps its slot and
    /// `None` is returned.
    pub fn play_sample(&mut self, sample: &SampleRef, request: &PlayRequest) -> Option<InstanceId> {
        let index = self
            .channels
            .iter()
            .position(|channel| !channel.is_playing())
            .or_else(|| {
                self.channels
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, channel)| channel.priority())
                    .map(|(index, _)| index)
            })?;

        let channel = &self.channels[index];
        if channel.is_playing() && channel.priority() >= request.priority {
            return None;
        }

        let instance_id = self.next_instance_id();
        self.channels[index].assign(sample, request, instance_id);
        Some(instance_id)
    }

    fn find(&self, instance_id: InstanceId) -> Option<&Channel> {
        self.channels
            .iter()
            .find(|channel| channel.is_playing() && channel.instance_id() == instance_id)
    }

    fn find_mut(&mut self, instance_id: InstanceId) -> Option<&mut Channel> {
        self.channels
            .iter_mut()
            .find(|channel| channel.is_playing() && channel.instance_id() == instance_id)
    }

    pub fn stop_sample(&mut self, instance_id: InstanceId) {
        if let Some(channel) = self.find_mut(instance_id) {
            channel.stop();
        }
    }

    /// Stops every channel playing `sample`.
    pub fn stop_sample_by_ref(&mut self, sample: &SampleRef) {
        for channel in &mut self.channels {
            if channel.is_playing_sample(sample) {
                channel.stop();
            }
        }
    }

    pub fn stop_all(&mut self) {
        for channel in &mut self.channels {
            channel.stop();
        }
    }

    pub fn is_playing(&self, instance_id: InstanceId) -> bool {
        self.find(instance_id).is_some()
    }

    pub fn is_playing_sample(&self, sample: &SampleRef) -> bool {
        self.channels
            .iter()
            .any(|channel| channel.is_playing_sample(sample))
    }

    /// Whether any channel is playing a speech sample.
    pub fn is_playing_voice(&self) -> bool {
        self.channels
            .iter()
            .any(|channel| channel.is_playing() && channel.category() == SampleCategory::Speech)
    }

    pub fn set_paused(&mut self, instance_id: InstanceId, paused: bool) {
        if let Some(channel) = self.find_mut(instance_id) {
            channel.set_paused(paused);
        }
    }

    pub fn is_paused(&self, instance_id: InstanceId) -> bool {
        self.find(instance_id).is_some_and(Channel::is_paused)
    }

    pub fn set_paused_all(&mut self, paused: bool) {
        for channel in &mut self.channels {
            channel.set_paused(paused);
        }
    }

    pub fn set_volume(&mut self, instance_id: InstanceId, left: u8, right: u8) {
        if let Some(channel) = self.find_mut(instance_id) {
            channel.set_volume(left, right);
        }
    }

    pub fn volume(&self, instance_id: InstanceId) -> Option<(u8, u8)> {
        self.find(instance_id).map(Channel::volume)
    }

    /// Positions a sound relative to the listener. Returns whether it is
    /// still playing.
    pub fn set_2d_position(&mut self, instance_id: InstanceId, distance: i32, angle: i32) -> bool {
        match self.find_mut(instance_id) {
            Some(channel) => {
                channel.set_2d_position(distance, angle);
                channel.is_playing()
            }
            None => false,
        }
    }

    pub fn position_2d(&self, instance_id: InstanceId) -> Option<(i32, i32)> {
        self.find(instance_id).map(Channel::position_2d)
    }

    /// Installs a music route, handing back the one it replaces.
    pub fn install_music_route(
        &mut self,
        route: Box<dyn MusicRoute>,
    ) -> Option<Box<dyn MusicRoute>> {
        self.music.replace(route)
    }

    /// Detaches the music route so it can be torn down outside the lock.
    pub fn take_music_route(&mut self) -> Option<Box<dyn MusicRoute>> {
        self.music.take()
    }

    pub fn has_music_route(&self) -> bool {
        self.music.is_some()
    }

    pub fn stop_music(&mut self, immediate: bool) {
        if let Some(route) = self.music.as_mut() {
            route.stop(immediate);
        }
    }

    /// Renders one tick into `output`.
    ///
    /// `output` is interleaved signed 16-bit at [`Self::format`]. It is always
    /// fully written: silence, plus the music route, plus every playing and
    /// unpaused channel in pool order. Contributions are summed wide and
    /// clipped once.
    pub fn mix(&mut self, output: &mut [i16]) {
        output.fill(0);

        if let Some(route) = self.music.as_mut() {
            route.produce_samples(output);
        }

        let chunk_len = self.accum.len();
        if chunk_len == 0 || self.channels.is_empty() {
            return;
        }

        for chunk in output.chunks_mut(chunk_len) {
            let accum = &mut self.accum[..chunk.len()];
            for (acc, &pcm) in accum.iter_mut().zip(chunk.iter()) {
                *acc = i32::from(pcm);
            }

            for channel in &mut self.channels {
                if !channel.is_playing() || channel.is_paused() {
                    continue;
                }
                if let Some(event) = channel.resample_and_mix(accum) {
                    // Full ring: the control thread is not draining, drop it.
                    let _ = self.events.push(event);
                }
            }

            for (pcm, &acc) in chunk.iter_mut().zip(accum.iter()) {
                *pcm = acc.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
            }
        }
    }
}
