//! Host-provided sinks the engine writes into (spec §6.2, §6.3).
//!
//! These traits are the Rust shape of interfaces the original bound across
//! a JNI boundary (`AudioTrack`, `android.graphics.Bitmap`). A host embeds
//! `prism-core` by implementing them (or using the reference
//! implementations below); the engine never assumes a particular audio
//! backend or windowing toolkit.

mod buffer_sink;
pub use buffer_sink::BufferFrameSink;

#[cfg(feature = "cpal-sink")]
mod cpal_sink;
#[cfg(feature = "cpal-sink")]
pub use cpal_sink::CpalAudioSink;

use crate::error::Result;

/// Host-provided audio output (spec §6.2). Sample format is always
/// interleaved signed 16-bit, matching the spec's fixed contract.
pub trait AudioSink: Send {
    /// Writes `length` interleaved S16 samples starting at `offset` in
    /// `buffer`. Returns the number of samples actually accepted; a sink
    /// returning fewer than requested is not itself an error, but a write
    /// that fails outright should return `Err`.
    fn write(&mut self, buffer: &[i16], offset: usize, length: usize) -> Result<usize>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn channel_count(&self) -> u16;
    fn sample_rate(&self) -> u32;
}

/// Opaque host-owned pixel buffer handle (spec §6.3's `bitmap`), analogous
/// to `android.graphics.Bitmap` in the system this was ported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bitmap {
    pub id: u64,
    pub width: u32,
    pub height: u32,
}

/// Host-provided frame output (spec §6.3). The engine allocates exactly
/// `frame_queue_capacity` bitmaps per `open` and releases them at `stop`.
///
/// `lock_pixels`/`unlock_pixels` in the original returned a raw pointer the
/// caller wrote through between matched calls; `with_locked_pixels` below
/// is the safe Rust equivalent — the closure's scope *is* the lock.
pub trait FrameSink: Send {
    fn allocate_bitmap(&mut self, width: u32, height: u32) -> Result<Bitmap>;

    /// Runs `f` with mutable access to `bitmap`'s raw pixel bytes. The
    /// engine calls this only during the scale/copy step of a video
    /// decoder, never while holding the queue mutex (spec §3 "pixel buffer
    /// is locked only during the scale/copy step").
    fn with_locked_pixels(
        &mut self,
        bitmap: &Bitmap,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> Result<()>;

    fn release_bitmap(&mut self, bitmap: &Bitmap);
}
