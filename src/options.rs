//! `Engine::open` configuration (spec §4.9, added).

/// Explicit stream selection. `Auto` mirrors the original's `-1` sentinel
/// ("auto-select the best stream of this kind").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamSelect {
    #[default]
    Auto,
    Index(usize),
    /// The caller does not want this kind of stream opened at all.
    None,
}

/// Output pixel format for decoded video frames. RGB565 is the spec's
/// default (a typical embedded/mobile framebuffer format); RGBA8888 is kept
/// because the teacher's GPU pipeline consumed that format and some hosts
/// (anything feeding a texture upload) prefer it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb565,
    Rgba8888,
}

impl Default for PixelFormat {
    fn default() -> Self {
        PixelFormat::Rgb565
    }
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb565 => 2,
            PixelFormat::Rgba8888 => 4,
        }
    }

    pub(crate) fn to_ffmpeg(self) -> ffmpeg_next::format::Pixel {
        match self {
            PixelFormat::Rgb565 => ffmpeg_next::format::Pixel::RGB565,
            PixelFormat::Rgba8888 => ffmpeg_next::format::Pixel::RGBA,
        }
    }
}

/// Options accepted by `Engine::open` (spec §4.6 `open`, §4.9 added).
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub path: String,

    /// Container/protocol options applied via
    /// `ffmpeg_next::format::input_with_dictionary` — e.g. network
    /// timeouts, user agent, reconnect flags (original_source's
    /// `AVDictionary` parameter to `avformat_open_input`).
    pub ffmpeg_options: Vec<(String, String)>,

    pub video_stream: StreamSelect,
    pub audio_stream: StreamSelect,
    /// Tracked for selection symmetry only; never decoded (spec Non-goals).
    pub subtitle_stream: StreamSelect,

    /// Capacity of each per-stream packet queue. Spec default: 100.
    pub packet_queue_capacity: usize,
    /// Capacity of the RGB frame queue. Spec default: 8.
    pub frame_queue_capacity: usize,
    /// Output pixel format for scaled video frames. Spec default: RGB565.
    pub pixel_format: PixelFormat,
    /// Wall-clock bound on `open`, enforced via the ffmpeg interrupt
    /// callback (spec §4.6 step 2, `original_source`'s 7-second timeout).
    pub open_timeout: std::time::Duration,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            path: String::new(),
            ffmpeg_options: Vec::new(),
            video_stream: StreamSelect::Auto,
            audio_stream: StreamSelect::Auto,
            subtitle_stream: StreamSelect::None,
            packet_queue_capacity: 100,
            frame_queue_capacity: 8,
            pixel_format: PixelFormat::Rgb565,
            open_timeout: std::time::Duration::from_secs(7),
        }
    }
}

impl OpenOptions {
    pub fn new(path: impl Into<String>) -> Self {
        OpenOptions {
            path: path.into(),
            ..Default::default()
        }
    }
}
