//! Audio Stream Module
//!
//! This module handles CPAL audio stream management including:
//! - Output device selection and format negotiation
//! - The real-time callback trampoline into [`RtMixer::mix`]
//! - Logger setup

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
    SupportedStreamConfig, SupportedStreamConfigRange,
};
use env_logger::{Builder, Env};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::audio_engine::constants::MIX_CHUNK_FRAMES;
use crate::audio_engine::errors::DeviceError;
use crate::audio_engine::mixer::{OutputFormat, RtMixer};

/// Setup and configure the logger for mixer operations
pub fn setup_logger() {
    // Users can override via `RUST_LOG`, e.g. `RUST_LOG=debug` when troubleshooting.
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .try_init()
        .unwrap_or(()); // Ignore initialization errors
}

/// Takes the device lock.
///
/// Nothing that runs under the lock panics, so a poisoned lock still guards
/// consistent state and is recovered.
pub fn lock_mixer(mixer: &Mutex<RtMixer>) -> MutexGuard<'_, RtMixer> {
    mixer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sample formats the trampoline can convert mixed 16-bit PCM into.
fn is_supported_format(format: SampleFormat) -> bool {
    matches!(
        format,
        SampleFormat::I8
            | SampleFormat::I16
            | SampleFormat::I32
            | SampleFormat::I64
            | SampleFormat::U8
            | SampleFormat::U16
            | SampleFormat::U32
            | SampleFormat::U64
            | SampleFormat::F32
            | SampleFormat::F64
    )
}

/// Picks the configuration closest to `requested` among `ranges`.
///
/// Preference order: 16-bit with the requested layout and rate, then the
/// requested layout in any convertible format, then any mono or stereo range
/// covering the rate, then any such range at its nearest rate. Returns `None`
/// when no range is mono or stereo in a convertible format.
fn choose_config(
    ranges: &[SupportedStreamConfigRange],
    requested: OutputFormat,
) -> Option<SupportedStreamConfig> {
    let rate = requested.sample_rate;
    let wanted_channels = requested.channels as u16;
    let covers_rate = |range: &SupportedStreamConfigRange| {
        range.min_sample_rate() <= rate && rate <= range.max_sample_rate()
    };
    let usable = |range: &SupportedStreamConfigRange| {
        (1..=2).contains(&range.channels()) && is_supported_format(range.sample_format())
    };

    let range = ranges
        .iter()
        .find(|range| {
            range.channels() == wanted_channels
                && range.sample_format() == SampleFormat::I16
                && covers_rate(range)
        })
        .or_else(|| {
            ranges.iter().find(|range| {
                usable(range) && range.channels() == wanted_channels && covers_rate(range)
            })
        })
        .or_else(|| ranges.iter().find(|range| usable(range) && covers_rate(range)))
        .or_else(|| ranges.iter().find(|range| usable(range)))?;

    let rate = rate.max(range.min_sample_rate()).min(range.max_sample_rate());
    Some(range.clone().with_sample_rate(rate))
}

/// Copies mixed frames into a device buffer.
///
/// Device channels past the mix layout are silenced, as is a trailing
/// partial frame.
fn write_frames<T>(out: &mut [T], device_channels: usize, pcm: &[i16], mix_channels: usize)
where
    T: Sample + FromSample<i16>,
{
    let whole = out.len() - out.len() % device_channels;
    let (frames, tail) = out.split_at_mut(whole);
    for (frame, mixed) in frames
        .chunks_exact_mut(device_channels)
        .zip(pcm.chunks_exact(mix_channels))
    {
        for (i, s) in frame.iter_mut().enumerate() {
            *s = mixed.get(i).map_or(T::EQUILIBRIUM, |&v| v.to_sample::<T>());
        }
    }
    tail.fill(T::EQUILIBRIUM);
}

/// Builds an output stream for device sample type `T`.
///
/// The callback holds a clone of `mixer` and takes the device lock for the
/// whole tick, mixing chunk by chunk into a preallocated scratch buffer.
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    format: OutputFormat,
    mixer: Arc<Mutex<RtMixer>>,
) -> Result<Stream, DeviceError>
where
    T: SizedSample + FromSample<i16>,
{
    let device_channels = usize::from(config.channels);
    let mix_channels = format.channels;
    let mut scratch = vec![0i16; MIX_CHUNK_FRAMES * mix_channels];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut guard = lock_mixer(&mixer);
            for chunk in data.chunks_mut(MIX_CHUNK_FRAMES * device_channels) {
                let frames = chunk.len() / device_channels;
                let pcm = &mut scratch[..frames * mix_channels];
                guard.mix(pcm);
                write_frames(chunk, device_channels, pcm, mix_channels);
            }
        },
        |err: cpal::StreamError| {
            log::error!("Audio stream error: {}", err);
        },
        None,
    )?;
    Ok(stream)
}

/// An output device with its negotiated stream configuration.
pub struct OutputDevice {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    format: OutputFormat,
}

impl OutputDevice {
    /// Opens the default output device, asking for `requested` as signed
    /// 16-bit PCM.
    ///
    /// Falls back to any mono or stereo configuration the trampoline can
    /// convert to, then to the device default. A default with more than two
    /// channels is driven as stereo with the extra channels silent.
    /// [`Self::format`] reports the format the mixer runs at.
    pub fn open(requested: OutputFormat) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(DeviceError::NoOutputDevice)?;

        let ranges: Vec<SupportedStreamConfigRange> = device.supported_output_configs()?.collect();
        let supported = match choose_config(&ranges, requested) {
            Some(supported) => supported,
            None => device.default_output_config()?,
        };

        let sample_format = supported.sample_format();
        if !is_supported_format(sample_format) {
            return Err(DeviceError::UnsupportedSampleFormat(sample_format));
        }
        let channels = supported.channels();
        if channels == 0 {
            return Err(DeviceError::UnsupportedChannels(channels));
        }

        let mut config = supported.config();
        config.buffer_size = BufferSize::Default;

        let format = OutputFormat::new(config.sample_rate, usize::from(channels));
        log::info!(
            "Audio opened using format: {} Hz from desired {} Hz, {} channels ({:?})",
            format.sample_rate,
            requested.sample_rate,
            format.channels,
            sample_format
        );
        if usize::from(channels) > format.channels {
            log::info!(
                "Device has {} channels, mixing to the first {}",
                channels,
                format.channels
            );
        }

        Ok(Self {
            device,
            config,
            sample_format,
            format,
        })
    }

    /// Format the mixer runs at.
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Builds and starts the output stream.
    ///
    /// Dropping the returned stream stops the callback.
    pub fn start(self, mixer: Arc<Mutex<RtMixer>>) -> Result<Stream, DeviceError> {
        let device = &self.device;
        let config = &self.config;
        let format = self.format;

        let stream = match self.sample_format {
            SampleFormat::I8 => build_stream::<i8>(device, config, format, mixer)?,
            SampleFormat::I16 => build_stream::<i16>(device, config, format, mixer)?,
            SampleFormat::I32 => build_stream::<i32>(device, config, format, mixer)?,
            SampleFormat::I64 => build_stream::<i64>(device, config, format, mixer)?,
            SampleFormat::U8 => build_stream::<u8>(device, config, format, mixer)?,
            SampleFormat::U16 => build_stream::<u16>(device, config, format, mixer)?,
            SampleFormat::U32 => build_stream::<u32>(device, config, format, mixer)?,
            SampleFormat::U64 => build_stream::<u64>(device, config, format, mixer)?,
            SampleFormat::F32 => build_stream::<f32>(device, config, format, mixer)?,
            SampleFormat::F64 => build_stream::<f64>(device, config, format, mixer)?,
            other => return Err(DeviceError::UnsupportedSampleFormat(other)),
        };

        stream.play()?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_setup() {
        // Multiple calls should be safe (though only the first takes effect)
        setup_logger();
        setup_logger();
    }

    #[test]
    fn test_lock_recovers_from_poison() {
        let (mixer, _events) = RtMixer::new(OutputFormat::new(22_050, 1), 2);
        let mixer = Arc::new(Mutex::new(mixer));

        let poisoner = Arc::clone(&mixer);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the device lock");
        })
        .join();

        assert!(mixer.is_poisoned());
        assert_eq!(lock_mixer(&mixer).num_channels(), 2);
    }

    fn range(
        channels: u16,
        min: u32,
        max: u32,
        format: SampleFormat,
    ) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            min,
            max,
            cpal::SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn test_choose_config_prefers_exact_i16() {
        let ranges = [
            range(2, 8_000, 96_000, SampleFormat::F32),
            range(2, 8_000, 96_000, SampleFormat::I16),
        ];
        let chosen = choose_config(&ranges, OutputFormat::new(22_050, 2)).unwrap();
        assert_eq!(chosen.sample_format(), SampleFormat::I16);
        assert_eq!(chosen.channels(), 2);
        assert_eq!(chosen.sample_rate(), 22_050);
    }

    #[test]
    fn test_choose_config_skips_multichannel_ranges() {
        let ranges = [
            range(8, 48_000, 48_000, SampleFormat::F32),
            range(2, 48_000, 48_000, SampleFormat::F32),
        ];
        let chosen = choose_config(&ranges, OutputFormat::new(22_050, 2)).unwrap();
        assert_eq!(chosen.channels(), 2);
        assert_eq!(chosen.sample_format(), SampleFormat::F32);
        assert_eq!(chosen.sample_rate(), 48_000);
    }

    #[test]
    fn test_choose_config_without_usable_range() {
        let ranges = [range(8, 48_000, 48_000, SampleFormat::F32)];
        assert!(choose_config(&ranges, OutputFormat::new(22_050, 2)).is_none());
    }

    #[test]
    fn test_write_frames_silences_extra_channels() {
        let pcm = [1000i16, -1000, 2000, -2000];
        let mut out = [7i16; 12];
        write_frames(&mut out, 6, &pcm, 2);
        assert_eq!(out, [1000, -1000, 0, 0, 0, 0, 2000, -2000, 0, 0, 0, 0]);
    }

    #[test]
    fn test_write_frames_converts_sample_type() {
        let pcm = [i16::MAX, 0, i16::MIN];
        let mut out = [0.5f32; 3];
        write_frames(&mut out, 1, &pcm, 1);
        assert!((out[0] - 1.0).abs() < 1e-3);
        assert_eq!(out[1], 0.0);
        assert_eq!(out[2], -1.0);

        let mut unsigned = [0u16; 2];
        write_frames(&mut unsigned, 2, &[0], 1);
        assert_eq!(unsigned, [32_768, 32_768]);
    }

    #[test]
    fn test_output_device_open() {
        // Actual stream creation requires audio hardware
        if cpal::default_host().default_output_device().is_none() {
            return;
        }

        if let Ok(device) = OutputDevice::open(OutputFormat::new(22_050, 2)) {
            let format = device.format();
            assert!(format.sample_rate > 0);
            assert!((1..=2).contains(&format.channels));
        }
    }
}
