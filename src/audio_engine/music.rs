//! Optional music producer summed ahead of the sound-effect channels.

/// A secondary PCM producer (typically a software synthesiser) owned by the
/// mixer while it is open.
///
/// `produce_samples` runs on the real-time thread under the device lock; the
/// other methods run on the control thread with the route detached from the
/// mixer.
pub trait MusicRoute: Send {
    /// Adds interleaved 16-bit PCM at the mixer's output format into `out`.
    ///
    /// `out` already holds silence; implementations add to it rather than
    /// overwrite so several producers could share a buffer.
    fn produce_samples(&mut self, out: &mut [i16]);

    /// Stops the current music, either at once or letting it release.
    fn stop(&mut self, immediate: bool);

    /// Loads any banks or timbres the producer needs before its first tick.
    fn load_resources(&mut self) -> Result<(), crate::audio_engine::errors::MusicRouteError>;

    /// Releases everything the producer holds. Called once, right before drop.
    fn shutdown(&mut self);
}
