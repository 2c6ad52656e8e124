//! Mixer configuration constants and limits.

/// Default requested output sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 22_050;

/// Default requested output layout (stereo).
pub const DEFAULT_STEREO: bool = true;

/// Default number of playback channels in the pool.
pub const DEFAULT_NUM_CHANNELS: usize = 16;

/// Number of fractional bits in the resampling phase accumulator.
pub const FRAC_BITS: u32 = 16;

/// Fixed-point representation of 1.0 in the phase accumulator.
pub const FRAC_ONE: u64 = 1 << FRAC_BITS;

/// Pitch shift that plays a sample at its natural speed.
pub const PITCH_UNITY: u32 = 0x10000;

/// Full-scale per-side volume.
pub const VOLUME_MAX: u8 = 255;

/// Largest distance accepted by the 2D positioner.
pub const MAX_DISTANCE: i32 = 255;

/// Largest attenuation distance can apply to the base gain.
pub const MAX_ATTENUATION: i32 = 192;

/// Frames accumulated per pass through the wide mixing scratch.
pub const MIX_CHUNK_FRAMES: usize = 1024;

/// Frames pulled from a sample per decode call.
pub const DECODE_CHUNK_FRAMES: usize = 512;

/// Capacity of the real-time event ring.
pub const EVENT_QUEUE_CAPACITY: usize = 256;
