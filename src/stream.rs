//! Stream-table data model (spec §3).

use crate::sink::Bitmap;

/// Media kind, indexing the stream table. `Subtitle` is tracked only for
/// stream-selection bookkeeping symmetry (original_source threads a
/// subtitle index through every fan-out array); this crate never spawns a
/// subtitle decoder (spec Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

impl StreamKind {
    pub const ACTIVE: [StreamKind; 2] = [StreamKind::Video, StreamKind::Audio];
}

/// A packet queue slot: either a demuxed packet or an end-of-stream marker
/// (spec §3 "Packet slot", §9 "Packet payloads with opaque ownership").
/// `ffmpeg_next::Packet` owns its buffer with refcounting, so there is no
/// separate "free" step distinct from dropping the `Option`.
pub struct PacketSlot {
    pub eos: bool,
    pub packet: Option<ffmpeg_next::Packet>,
}

impl PacketSlot {
    pub fn empty() -> Self {
        PacketSlot {
            eos: false,
            packet: None,
        }
    }
}

/// A pre-allocated RGB frame slot (spec §3 "RGB frame slot"). `bitmap` is
/// `None` only for an EOS marker slot.
pub struct FrameSlot {
    pub bitmap: Option<Bitmap>,
    pub time: f64,
    pub eos: bool,
}

impl FrameSlot {
    pub fn empty() -> Self {
        FrameSlot {
            bitmap: None,
            time: 0.0,
            eos: false,
        }
    }
}
