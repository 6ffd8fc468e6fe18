//! Structured error and status codes for the engine surface (spec §6.4, §7).

use thiserror::Error;

/// Everything that can go wrong opening, running, or driving the playback
/// engine. Variant names mirror the status codes of spec §6.4 so a host
/// binding can map them back onto integer codes if it needs to.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `open` was called while the engine was already playing.
    #[error("engine is already playing; call stop() first")]
    NotStopped,

    /// The container could not be opened (bad path, unreachable network
    /// source, or the interrupt callback fired before `open` finished).
    #[error("failed to open input: {0}")]
    OpenFailed(String),

    /// `avformat_find_stream_info` (via ffmpeg-next) failed.
    #[error("failed to read stream info: {0}")]
    StreamInfoFailed(String),

    /// No decoder is registered for the selected stream's codec.
    #[error("no decoder available for codec: {0}")]
    NoDecoder(String),

    /// The codec could not be opened against its context.
    #[error("failed to open codec: {0}")]
    OpenCodecFailed(String),

    /// A queue, frame, or scratch buffer allocation failed.
    #[error("allocation failed: {0}")]
    AllocFailed(String),

    /// The software scaler (YUV → RGB) could not be constructed.
    #[error("failed to build scaler: {0}")]
    ScalerFailed(String),

    /// The audio resampler could not be constructed or re-initialised.
    #[error("failed to build resampler: {0}")]
    ResamplerFailed(String),

    /// A bounded queue operation failed outside the ordinary predicate paths.
    #[error("queue operation failed: {0}")]
    QueueFailed(String),

    /// The host's [`AudioSink::write`](crate::sink::AudioSink::write) returned
    /// a negative count or otherwise signalled failure.
    #[error("audio sink write failed: {0}")]
    AudioWriteFailed(String),

    /// The host's [`FrameSink::lock_pixels`](crate::sink::FrameSink::lock_pixels) failed.
    #[error("bitmap lock failed: {0}")]
    BitmapLockFailed(String),

    /// A decode call into ffmpeg-next failed.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// A pipeline thread could not be spawned or joined.
    #[error("thread failure: {0}")]
    ThreadFailed(String),

    /// An operation requiring an open engine (`pause`, `resume`, `seek`,
    /// `render_start`/`render_stop`) was called while stopped.
    #[error("engine is not playing")]
    NotPlaying,

    /// `render_start` was called while already rendering.
    #[error("render_start called while already rendering")]
    AlreadyRendering,

    /// `render_frame` was woken by `render_stop` (or an equivalent
    /// interrupt) rather than by a delivered frame.
    #[error("render_frame was interrupted")]
    Interrupted,
}

impl From<ffmpeg_next::Error> for EngineError {
    fn from(err: ffmpeg_next::Error) -> Self {
        EngineError::DecodeFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
