//! Plain heap-buffer `FrameSink` — no GPU, no windowing toolkit.
//!
//! The teacher's `media/pipeline.rs` renders frames straight into a
//! `wgpu`/`tessera-ui` texture; that pipeline *is* the renderer the engine
//! must not depend on (spec §1 places the frame sink out of scope). This
//! is the headless reference implementation used by tests and by hosts
//! that want raw pixels (e.g. to encode, or to hand to their own
//! compositor).

use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::sink::{Bitmap, FrameSink};

pub struct BufferFrameSink {
    next_id: u64,
    buffers: HashMap<u64, Vec<u8>>,
    bytes_per_pixel: usize,
}

impl BufferFrameSink {
    pub fn new(bytes_per_pixel: usize) -> Self {
        BufferFrameSink {
            next_id: 0,
            buffers: HashMap::new(),
            bytes_per_pixel,
        }
    }

    /// Snapshot of a bitmap's current pixels, for tests.
    pub fn pixels(&self, bitmap: &Bitmap) -> Option<&[u8]> {
        self.buffers.get(&bitmap.id).map(Vec::as_slice)
    }
}

impl FrameSink for BufferFrameSink {
    fn allocate_bitmap(&mut self, width: u32, height: u32) -> Result<Bitmap> {
        let id = self.next_id;
        self.next_id += 1;
        let len = width as usize * height as usize * self.bytes_per_pixel;
        self.buffers.insert(id, vec![0u8; len]);
        Ok(Bitmap { id, width, height })
    }

    fn with_locked_pixels(
        &mut self,
        bitmap: &Bitmap,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> Result<()> {
        let buf = self
            .buffers
            .get_mut(&bitmap.id)
            .ok_or_else(|| EngineError::BitmapLockFailed(format!("unknown bitmap {}", bitmap.id)))?;
        f(buf);
        Ok(())
    }

    fn release_bitmap(&mut self, bitmap: &Bitmap) {
        self.buffers.remove(&bitmap.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_write_then_read_back() {
        let mut sink = BufferFrameSink::new(2);
        let bmp = sink.allocate_bitmap(4, 2).unwrap();
        assert_eq!(sink.pixels(&bmp).unwrap().len(), 16);

        sink.with_locked_pixels(&bmp, &mut |pixels| {
            pixels[0] = 0xAB;
        })
        .unwrap();

        assert_eq!(sink.pixels(&bmp).unwrap()[0], 0xAB);
        sink.release_bitmap(&bmp);
        assert!(sink.pixels(&bmp).is_none());
    }
}
