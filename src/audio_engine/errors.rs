//! Mixer error types.

use thiserror::Error;

/// Errors that can occur while opening the output device.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The host exposes no default output device.
    #[error("no audio output device found")]
    NoOutputDevice,

    /// Failed to query the device's default configuration.
    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    /// Failed to enumerate the device's supported configurations.
    #[error("failed to query supported output configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    /// Failed to build the output stream.
    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    /// Failed to start the output stream.
    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    /// The device only offers a sample format the mixer cannot drive.
    #[error("unsupported output sample format: {0:?}")]
    UnsupportedSampleFormat(cpal::SampleFormat),

    /// The device reported a configuration without channels.
    #[error("unsupported output channel count: {0}")]
    UnsupportedChannels(u16),
}

/// Errors a [`Sample`](crate::audio_engine::sample::Sample) may report while
/// being read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The requested start frame lies past the end of the sample.
    #[error("read position {frame} is out of range (sample has {frames} frames)")]
    OutOfRange {
        /// Requested start frame.
        frame: usize,
        /// Total frames in the sample.
        frames: usize,
    },

    /// The underlying decoder failed.
    #[error("sample decode failed: {0}")]
    Backend(String),
}

/// Errors that can occur while constructing a music route.
#[derive(Debug, Error)]
pub enum MusicRouteError {
    /// The route could not be created.
    #[error("failed to create music route: {0}")]
    Construction(String),

    /// The route was created but its resources failed to load.
    #[error("failed to load music route resources: {0}")]
    Resources(String),
}

/// Errors that can occur while loading audio files.
#[derive(Debug, Error)]
pub enum SampleLoadError {
    /// Failed to open the audio file.
    #[error("failed to open file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to decode the audio file.
    #[error("failed to decode audio file: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    /// Audio file has no default track.
    #[error("audio file has no default track")]
    NoDefaultTrack,

    /// Audio file is missing sample rate information.
    #[error("audio file is missing a sample rate")]
    MissingSampleRate,

    /// Audio file is missing channel information.
    #[error("audio file is missing channel information")]
    MissingChannels,

    /// Unsupported channel layout.
    #[error("unsupported channel layout: file has {0} channels (only mono and stereo supported)")]
    UnsupportedChannels(usize),
}
