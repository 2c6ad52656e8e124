//! Audio Engine Module
//!
//! This module provides real-time sound-effect mixing. It is organized into
//! sub-modules, each with a specific responsibility:
//!
//! - [`audio_stream`]: CPAL device negotiation and the real-time callback
//! - [`channel`]: One playback slot, resampling and gain
//! - [`constants`]: Configuration constants and limits
//! - [`errors`]: Mixer error types
//! - [`mixer`]: Channel pool, allocation policy and the mix entry point
//! - [`music`]: The optional music producer interface
//! - [`sample`]: The PCM source interface and an in-memory implementation
//! - [`sample_loader`]: Audio file decoding
//!
//! The main [`AudioMixer`] struct owns the device lock and exposes the
//! control API. Every call takes the lock for its full duration, the same
//! lock the audio callback holds while it mixes, so a channel is never
//! reassigned mid-tick.

use rtrb::Consumer;
use std::sync::{Arc, Mutex};

use crate::audio_engine::audio_stream::{OutputDevice, lock_mixer, setup_logger};
use crate::audio_engine::constants::{DEFAULT_NUM_CHANNELS, DEFAULT_SAMPLE_RATE, DEFAULT_STEREO};
use crate::messages::MixerEvent;

pub mod audio_stream;
pub mod channel;
pub mod constants;
pub mod errors;
pub mod mixer;
pub mod music;
pub mod sample;
pub mod sample_loader;

pub use channel::{InstanceId, LoopMode, PlayRequest};
pub use errors::{DecodeError, DeviceError, MusicRouteError, SampleLoadError};
pub use mixer::{OutputFormat, RtMixer};
pub use music::MusicRoute;
pub use sample::{PcmSample, Sample, SampleCategory, SampleRef};

/// Requested mixer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixerSettings {
    /// Desired output rate in Hz. The device may deliver another.
    pub sample_rate: u32,
    /// Desired output layout.
    pub stereo: bool,
    /// Size of the channel pool.
    pub num_channels: usize,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            stereo: DEFAULT_STEREO,
            num_channels: DEFAULT_NUM_CHANNELS,
        }
    }
}

impl MixerSettings {
    fn requested_format(&self) -> OutputFormat {
        OutputFormat::new(self.sample_rate, if self.stereo { 2 } else { 1 })
    }
}

struct Engine {
    // Declared first: the stream (and its callback) is torn down before the
    // shared mixer state.
    stream: Option<cpal::Stream>,
    mixer: Arc<Mutex<RtMixer>>,
    events: Mutex<Consumer<MixerEvent>>,
    format: OutputFormat,
}

/// Sound-effect mixer bound to an output device.
///
/// A mixer whose device failed to open is permanently disabled: every call
/// is a no-op returning `None`/`false`. Check [`AudioMixer::is_enabled`].
pub struct AudioMixer {
    engine: Option<Engine>,
}

impl AudioMixer {
    /// Opens the default output device and starts mixing.
    ///
    /// Never fails; on a device error the mixer comes up disabled.
    pub fn new(settings: MixerSettings) -> Self {
        match Self::open(settings) {
            Ok(mixer) => mixer,
            Err(err) => {
                log::error!("Failed to open audio device, mixer disabled: {err}");
                Self::disabled()
            }
        }
    }

    /// Opens the default output device and starts mixing, reporting why the
    /// device could not be opened.
    pub fn open(settings: MixerSettings) -> Result<Self, DeviceError> {
        setup_logger();
        log::info!("Creating AudioMixer...");

        let device = OutputDevice::open(settings.requested_format())?;
        let format = device.format();

        let (mixer, events) = RtMixer::new(format, settings.num_channels);
        let mixer = Arc::new(Mutex::new(mixer));
        let stream = device.start(Arc::clone(&mixer))?;

        Ok(Self {
            engine: Some(Engine {
                stream: Some(stream),
                mixer,
                events: Mutex::new(events),
                format,
            }),
        })
    }

    /// Creates a mixer with no device attached.
    ///
    /// Output is pulled by calling [`AudioMixer::mix`] directly, e.g. for
    /// offline rendering.
    pub fn without_device(format: OutputFormat, num_channels: usize) -> Self {
        let (mixer, events) = RtMixer::new(format, num_channels);
        Self {
            engine: Some(Engine {
                stream: None,
                mixer: Arc::new(Mutex::new(mixer)),
                events: Mutex::new(events),
                format,
            }),
        }
    }

    /// Creates a permanently disabled mixer.
    pub fn disabled() -> Self {
        Self { engine: None }
    }

    /// Whether the mixer has a working output.
    pub fn is_enabled(&self) -> bool {
        self.engine.is_some()
    }

    /// Format obtained from the device.
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.engine.as_ref().map(|engine| engine.format)
    }

    fn with_mixer<R>(&self, f: impl FnOnce(&mut RtMixer) -> R) -> Option<R> {
        let engine = self.engine.as_ref()?;
        let mut guard = lock_mixer(&engine.mixer);
        Some(f(&mut guard))
    }

    /// Starts playing `sample`. Returns `None` when no channel is free and
    /// none has a lower priority than the request.
    pub fn play_sample(&self, sample: &SampleRef, request: PlayRequest) -> Option<InstanceId> {
        self.with_mixer(|mixer| mixer.play_sample(sample, &request))
            .flatten()
    }

    pub fn stop_sample(&self, instance_id: InstanceId) {
        self.with_mixer(|mixer| mixer.stop_sample(instance_id));
    }

    /// Stops every channel playing `sample`. Callers should do this before
    /// dropping a sample they want silenced at once.
    pub fn stop_sample_by_ref(&self, sample: &SampleRef) {
        self.with_mixer(|mixer| mixer.stop_sample_by_ref(sample));
    }

    pub fn is_playing(&self, instance_id: InstanceId) -> bool {
        self.with_mixer(|mixer| mixer.is_playing(instance_id))
            .unwrap_or(false)
    }

    pub fn is_playing_sample(&self, sample: &SampleRef) -> bool {
        self.with_mixer(|mixer| mixer.is_playing_sample(sample))
            .unwrap_or(false)
    }

    /// Whether any speech sample is playing.
    pub fn is_playing_voice(&self) -> bool {
        self.with_mixer(|mixer| mixer.is_playing_voice())
            .unwrap_or(false)
    }

    pub fn set_paused(&self, instance_id: InstanceId, paused: bool) {
        self.with_mixer(|mixer| mixer.set_paused(instance_id, paused));
    }

    pub fn is_paused(&self, instance_id: InstanceId) -> bool {
        self.with_mixer(|mixer| mixer.is_paused(instance_id))
            .unwrap_or(false)
    }

    pub fn set_paused_all(&self, paused: bool) {
        self.with_mixer(|mixer| mixer.set_paused_all(paused));
    }

    pub fn set_volume(&self, instance_id: InstanceId, left: u8, right: u8) {
        self.with_mixer(|mixer| mixer.set_volume(instance_id, left, right));
    }

    pub fn get_volume(&self, instance_id: InstanceId) -> Option<(u8, u8)> {
        self.with_mixer(|mixer| mixer.volume(instance_id)).flatten()
    }

    /// Positions a sound relative to the listener. Returns whether the sound
    /// is still playing.
    pub fn set_2d_position(&self, instance_id: InstanceId, distance: i32, angle: i32) -> bool {
        self.with_mixer(|mixer| mixer.set_2d_position(instance_id, distance, angle))
            .unwrap_or(false)
    }

    pub fn get_2d_position(&self, instance_id: InstanceId) -> Option<(i32, i32)> {
        self.with_mixer(|mixer| mixer.position_2d(instance_id))
            .flatten()
    }

    /// Stops the music and every channel.
    pub fn reset(&self) {
        if !self.is_enabled() {
            return;
        }

        log::info!("Resetting AudioMixer...");
        self.with_mixer(|mixer| {
            mixer.stop_music(false);
            mixer.stop_all();
        });
    }

    /// Creates the music route if none is open.
    ///
    /// `factory` receives the obtained output format. The route is built and
    /// its resources loaded before the device lock is taken; it only becomes
    /// visible to the callback once fully constructed. Returns whether a
    /// route is open afterwards.
    pub fn open_music_route<F>(&self, factory: F) -> bool
    where
        F: FnOnce(OutputFormat) -> Result<Box<dyn MusicRoute>, MusicRouteError>,
    {
        let Some(format) = self.output_format() else {
            return false;
        };
        if self.has_music_route() {
            return true;
        }

        let mut route = match factory(format) {
            Ok(route) => route,
            Err(err) => {
                log::error!("{err}");
                return false;
            }
        };
        if let Err(err) = route.load_resources() {
            log::error!("{err}");
            route.shutdown();
            return false;
        }

        let displaced = self
            .with_mixer(|mixer| {
                if mixer.has_music_route() {
                    Some(route)
                } else {
                    mixer.install_music_route(route)
                }
            })
            .flatten();

        // Lost a race with another opener: keep theirs.
        if let Some(mut extra) = displaced {
            extra.shutdown();
        } else {
            log::info!("Music route opened");
        }
        true
    }

    /// Detaches and destroys the music route, if any.
    pub fn close_music_route(&self) {
        let Some(mut route) = self.with_mixer(RtMixer::take_music_route).flatten() else {
            return;
        };

        log::info!("Destroying music route...");
        route.stop(true);
        route.shutdown();
    }

    pub fn has_music_route(&self) -> bool {
        self.with_mixer(|mixer| mixer.has_music_route())
            .unwrap_or(false)
    }

    /// Renders one tick into `output` under the device lock.
    ///
    /// This is the entry point the device callback uses; call it directly
    /// only on a mixer created with [`AudioMixer::without_device`]. A
    /// disabled mixer writes silence.
    pub fn mix(&self, output: &mut [i16]) {
        if self.with_mixer(|mixer| mixer.mix(output)).is_none() {
            output.fill(0);
        }
    }

    /// Pops the next event from the audio thread.
    pub fn poll_event(&self) -> Option<MixerEvent> {
        let engine = self.engine.as_ref()?;
        let mut events = engine.events.lock().ok()?;
        events.pop().ok()
    }

    /// Pops every pending event, logging failures.
    pub fn drain_events(&self) -> Vec<MixerEvent> {
        let mut drained = Vec::new();
        while let Some(event) = self.poll_event() {
            match &event {
                MixerEvent::DecodeFailed { instance_id, error } => {
                    log::error!("Sample {} stopped: {error}", instance_id.get());
                }
                MixerEvent::SampleDropped { instance_id } => {
                    log::warn!(
                        "Sample {} was released while still playing",
                        instance_id.get()
                    );
                }
                MixerEvent::ChannelFinished { instance_id } => {
                    log::debug!("Sample {} finished", instance_id.get());
                }
            }
            drained.push(event);
        }
        drained
    }
}

impl Drop for AudioMixer {
    fn drop(&mut self) {
        if !self.is_enabled() {
            return;
        }

        log::info!("Destroying AudioMixer...");
        self.close_music_route();
        if let Some(engine) = self.engine.as_mut() {
            engine.stream = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use cpal::traits::HostTrait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    fn create_test_sample(frames: usize, value: i16) -> SampleRef {
        Arc::new(PcmSample::mono(22_050, vec![value; frames]))
    }

    fn headless(num_channels: usize) -> AudioMixer {
        AudioMixer::without_device(OutputFormat::new(22_050, 1), num_channels)
    }

    #[derive(Default)]
    struct RouteProbe {
        produced: AtomicUsize,
        stopped_immediately: AtomicBool,
        stopped: AtomicBool,
        shut_down: AtomicBool,
    }

    struct ProbeRoute {
        probe: Arc<RouteProbe>,
        fail_resources: bool,
    }

    impl MusicRoute for ProbeRoute {
        fn produce_samples(&mut self, out: &mut [i16]) {
            self.probe.produced.fetch_add(1, Ordering::SeqCst);
            for s in out.iter_mut() {
                *s = s.saturating_add(7);
            }
        }

        fn stop(&mut self, immediate: bool) {
            self.probe.stopped.store(true, Ordering::SeqCst);
            if immediate {
                self.probe.stopped_immediately.store(true, Ordering::SeqCst);
            }
        }

        fn load_resources(&mut self) -> Result<(), MusicRouteError> {
            if self.fail_resources {
                Err(MusicRouteError::Resources("missing timbres".to_string()))
            } else {
                Ok(())
            }
        }

        fn shutdown(&mut self) {
            self.probe.shut_down.store(true, Ordering::SeqCst);
        }
    }

    fn probe_factory(
        probe: &Arc<RouteProbe>,
        fail_resources: bool,
    ) -> impl FnOnce(OutputFormat) -> Result<Box<dyn MusicRoute>, MusicRouteError> {
        let probe = Arc::clone(probe);
        move |_format| {
            Ok(Box::new(ProbeRoute {
                probe,
                fail_resources,
            }) as Box<dyn MusicRoute>)
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = MixerSettings::default();
        assert_eq!(settings.sample_rate, DEFAULT_SAMPLE_RATE);
        assert!(settings.stereo);
        assert_eq!(settings.requested_format(), OutputFormat::new(22_050, 2));
    }

    #[test]
    fn test_disabled_mixer_is_inert() {
        let mixer = AudioMixer::disabled();
        let sample = create_test_sample(10, 1);
        let id = InstanceId::new(1);

        assert!(!mixer.is_enabled());
        assert_eq!(mixer.output_format(), None);
        assert_eq!(mixer.play_sample(&sample, PlayRequest::default()), None);
        assert!(!mixer.is_playing(id));
        assert!(!mixer.is_playing_sample(&sample));
        assert!(!mixer.is_playing_voice());
        assert!(!mixer.is_paused(id));
        assert_eq!(mixer.get_volume(id), None);
        assert!(!mixer.set_2d_position(id, 1, 1));
        assert_eq!(mixer.get_2d_position(id), None);
        assert!(!mixer.open_music_route(|_| Err(MusicRouteError::Construction(
            "unreachable".to_string()
        ))));
        assert!(!mixer.has_music_route());
        assert_eq!(mixer.poll_event(), None);

        mixer.stop_sample(id);
        mixer.set_paused_all(true);
        mixer.reset();
        mixer.close_music_route();

        let mut output = vec![9i16; 16];
        mixer.mix(&mut output);
        assert!(output.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_scenario_four_channels() {
        let mixer = headless(4);
        let sample = create_test_sample(22_050, 1);
        let request = PlayRequest::default().with_priority(1);

        let ids: Vec<_> = (0..5).map(|_| mixer.play_sample(&sample, request)).collect();
        assert!(ids[..4].iter().all(Option::is_some));
        assert_eq!(ids[4], None);

        let second = ids[1].unwrap();
        mixer.stop_sample(second);
        assert!(!mixer.is_playing(second));

        let replacement = mixer.play_sample(&sample, request).unwrap();
        assert!(mixer.is_playing(replacement));
        for id in [ids[0], ids[2], ids[3]].into_iter().flatten() {
            assert!(mixer.is_playing(id));
        }
    }

    #[test]
    fn test_silence_floor() {
        let mixer = AudioMixer::without_device(OutputFormat::new(44_100, 2), 8);
        let mut output = vec![1i16; 2048];

        mixer.mix(&mut output);

        assert_eq!(output.len(), 2048);
        assert!(output.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_pause_and_resume_through_facade() {
        let mixer = headless(2);
        let sample = create_test_sample(100, 250);
        let id = mixer.play_sample(&sample, PlayRequest::default()).unwrap();

        mixer.set_paused(id, true);
        let mut output = vec![0i16; 32];
        mixer.mix(&mut output);
        assert!(output.iter().all(|&s| s == 0));
        assert!(mixer.is_playing(id));
        assert!(mixer.is_paused(id));

        mixer.set_paused_all(false);
        mixer.mix(&mut output);
        assert!(output.iter().all(|&s| s == 250));
    }

    #[test]
    fn test_reset_stops_everything() {
        let mixer = headless(3);
        let sample = create_test_sample(1000, 1);
        let probe = Arc::new(RouteProbe::default());
        assert!(mixer.open_music_route(probe_factory(&probe, false)));

        let ids: Vec<_> = (0..3)
            .map(|_| mixer.play_sample(&sample, PlayRequest::default()).unwrap())
            .collect();

        mixer.reset();

        assert!(ids.iter().all(|&id| !mixer.is_playing(id)));
        assert!(probe.stopped.load(Ordering::SeqCst));
        assert!(!probe.stopped_immediately.load(Ordering::SeqCst));
        assert!(mixer.has_music_route());
    }

    #[test]
    fn test_music_route_lifecycle() {
        let mixer = headless(1);
        let probe = Arc::new(RouteProbe::default());

        assert!(mixer.open_music_route(probe_factory(&probe, false)));
        assert!(mixer.has_music_route());

        // Already open: factory is not called again
        let second = Arc::new(RouteProbe::default());
        assert!(mixer.open_music_route(probe_factory(&second, false)));

        let mut output = vec![0i16; 16];
        mixer.mix(&mut output);
        assert!(output.iter().all(|&s| s == 7));
        assert_eq!(probe.produced.load(Ordering::SeqCst), 1);
        assert_eq!(second.produced.load(Ordering::SeqCst), 0);

        mixer.close_music_route();
        assert!(!mixer.has_music_route());
        assert!(probe.stopped_immediately.load(Ordering::SeqCst));
        assert!(probe.shut_down.load(Ordering::SeqCst));

        mixer.mix(&mut output);
        assert!(output.iter().all(|&s| s == 0));

        // Closing twice is harmless
        mixer.close_music_route();
    }

    #[test]
    fn test_music_route_failures_leave_no_route() {
        let mixer = headless(1);

        assert!(!mixer.open_music_route(|_| Err(MusicRouteError::Construction(
            "no synth".to_string()
        ))));
        assert!(!mixer.has_music_route());

        let probe = Arc::new(RouteProbe::default());
        assert!(!mixer.open_music_route(probe_factory(&probe, true)));
        assert!(!mixer.has_music_route());
        assert!(probe.shut_down.load(Ordering::SeqCst));
    }

    #[test]
    fn test_factory_receives_obtained_format() {
        let mixer = AudioMixer::without_device(OutputFormat::new(48_000, 2), 1);
        let probe = Arc::new(RouteProbe::default());
        let factory = probe_factory(&probe, false);

        assert!(mixer.open_music_route(|format| {
            assert_eq!(format, OutputFormat::new(48_000, 2));
            factory(format)
        }));
    }

    #[test]
    fn test_drop_closes_music_route() {
        let probe = Arc::new(RouteProbe::default());
        {
            let mixer = headless(1);
            assert!(mixer.open_music_route(probe_factory(&probe, false)));
        }
        assert!(probe.shut_down.load(Ordering::SeqCst));
    }

    #[test]
    fn test_events_drained() {
        let mixer = headless(2);
        let sample = create_test_sample(4, 1);
        let id = mixer.play_sample(&sample, PlayRequest::default()).unwrap();

        let doomed = create_test_sample(64, 1);
        let dropped_id = mixer.play_sample(&doomed, PlayRequest::default()).unwrap();
        drop(doomed);

        let mut output = vec![0i16; 16];
        mixer.mix(&mut output);

        let events = mixer.drain_events();
        assert_eq!(events.len(), 2);
        assert!(events.contains(&MixerEvent::ChannelFinished { instance_id: id }));
        assert!(events.contains(&MixerEvent::SampleDropped {
            instance_id: dropped_id
        }));
        assert_eq!(mixer.poll_event(), None);
    }

    #[test]
    fn test_control_thread_and_callback_interleave() {
        let mixer = headless(8);
        let sample = create_test_sample(64, 100);
        let running = Arc::new(AtomicBool::new(true));

        // Drive the shared state the way the device trampoline does
        let callback = {
            let shared = Arc::clone(&mixer.engine.as_ref().unwrap().mixer);
            let running = Arc::clone(&running);
            thread::spawn(move || {
                let mut output = vec![0i16; 256];
                while running.load(Ordering::SeqCst) {
                    lock_mixer(&shared).mix(&mut output);
                    // At most eight voices of 100 each
                    assert!(output.iter().all(|&s| (0..=800).contains(&s)));
                }
            })
        };

        for round in 0..2_000 {
            let request = PlayRequest::default().with_priority(round % 4);
            if let Some(id) = mixer.play_sample(&sample, request) {
                if round % 3 == 0 {
                    mixer.stop_sample(id);
                } else {
                    mixer.set_volume(id, 128, 128);
                }
            }
        }

        running.store(false, Ordering::SeqCst);
        callback.join().unwrap();
        mixer.reset();
        mixer.drain_events();
    }

    #[test]
    fn test_audio_mixer_creation() {
        // Actual stream creation requires audio hardware
        if cpal::default_host().default_output_device().is_none() {
            return;
        }

        // Either outcome is valid; a failed open must leave a disabled mixer
        let mixer = AudioMixer::new(MixerSettings::default());
        if let Some(format) = mixer.output_format() {
            assert!((1..=2).contains(&format.channels));
        }
        mixer.reset();
    }
}
