//! Real-time sound-effect mixer.
//!
//! Many short sounds and one optional music stream are mixed into a single
//! 16-bit output under the device callback. See [`AudioMixer`] for the
//! control API.

pub mod audio_engine;
pub mod messages;

pub use audio_engine::sample_loader::load_sample;
pub use audio_engine::{
    AudioMixer, DecodeError, DeviceError, InstanceId, LoopMode, MixerSettings, MusicRoute,
    MusicRouteError, OutputFormat, PcmSample, PlayRequest, Sample, SampleCategory,
    SampleLoadError, SampleRef,
};
pub use messages::MixerEvent;
