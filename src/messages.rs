//! Notifications emitted from the real-time mixing thread.
//!
//! The callback cannot log or block, so anything the control thread should
//! hear about is pushed through an `rtrb` ring and drained later with
//! [`AudioMixer::poll_event`](crate::AudioMixer::poll_event).

use crate::audio_engine::InstanceId;
use crate::audio_engine::errors::DecodeError;

/// Message that is emitted from the audio thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixerEvent {
    /// A channel played its sample to the end (loops exhausted).
    ChannelFinished { instance_id: InstanceId },

    /// Reading from the sample failed; the channel went idle.
    DecodeFailed {
        instance_id: InstanceId,
        error: DecodeError,
    },

    /// The sample owner released the sample while it was still assigned.
    SampleDropped { instance_id: InstanceId },
}

impl MixerEvent {
    /// Instance the event refers to.
    pub fn instance_id(&self) -> InstanceId {
        match self {
            MixerEvent::ChannelFinished { instance_id }
            | MixerEvent::DecodeFailed { instance_id, .. }
            | MixerEvent::SampleDropped { instance_id } => *instance_id,
        }
    }
}
