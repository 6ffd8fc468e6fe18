//! Opening a container with both a network-options dictionary and an
//! interrupt callback at once.
//!
//! `ffmpeg-next` exposes `format::input_with_dictionary` and
//! `format::input_with_interrupt` separately but not combined; this mirrors
//! the manual `avformat_open_input` wiring used for the same reason in
//! `tibellium-vidapps`' HLS input (`smelter_core::pipeline::hls_input`'s
//! `input_with_dictionary_and_interrupt`).

use std::ffi::CString;
use std::ptr;

use ffmpeg_next::{self as ffmpeg, Dictionary};
use ffmpeg_next::sys::{
    avformat_alloc_context, avformat_close_input, avformat_find_stream_info, avformat_open_input,
};

use crate::error::{EngineError, Result};

pub(crate) fn open_input<F>(
    path: &str,
    options: &[(String, String)],
    interrupt_fn: F,
) -> Result<ffmpeg::format::context::Input>
where
    F: FnMut() -> bool + 'static,
{
    let dictionary: Dictionary = options
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    unsafe {
        let mut ps = avformat_alloc_context();
        if ps.is_null() {
            return Err(EngineError::AllocFailed("avformat_alloc_context".into()));
        }

        (*ps).interrupt_callback = ffmpeg::util::interrupt::new(Box::new(interrupt_fn)).interrupt;

        let c_path = CString::new(path)
            .map_err(|_| EngineError::OpenFailed("path contains an interior NUL".into()))?;
        let mut opts = dictionary.disown();
        let res = avformat_open_input(&mut ps, c_path.as_ptr(), ptr::null_mut(), &mut opts);
        Dictionary::own(opts);

        if res != 0 {
            return Err(EngineError::OpenFailed(
                ffmpeg::Error::from(res).to_string(),
            ));
        }

        if avformat_find_stream_info(ps, ptr::null_mut()) < 0 {
            avformat_close_input(&mut ps);
            return Err(EngineError::StreamInfoFailed(
                "avformat_find_stream_info failed".into(),
            ));
        }

        Ok(ffmpeg::format::context::Input::wrap(ps))
    }
}
