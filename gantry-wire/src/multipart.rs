use bytes::Bytes;
use smallvec::SmallVec;

use crate::codec::{CodecError, WireFrame};

/// Collects data frames until a complete multipart message is formed.
///
/// Invariants:
/// - Frames are appended in-order
/// - A message completes when `MORE == false`
/// - The frame limit is enforced eagerly
///
/// Dropping the buffer discards any partial message.
#[derive(Debug)]
pub struct MultipartBuffer {
    /// Most messages are 1-4 frames; those never touch the heap here.
    frames: SmallVec<[Bytes; 4]>,
    max_frames: usize,
}

impl MultipartBuffer {
    pub fn new(max_frames: usize) -> Self {
        Self {
            frames: SmallVec::new(),
            max_frames: max_frames.max(1),
        }
    }

    /// Push a data frame.
    ///
    /// Returns:
    /// - `Ok(None)` if the message is not complete
    /// - `Ok(Some(frames))` once the last frame arrived
    /// - `Err` when the message grows past the frame limit
    pub fn push_frame(&mut self, frame: WireFrame) -> Result<Option<Vec<Bytes>>, CodecError> {
        if self.frames.len() >= self.max_frames {
            self.frames.clear();
            return Err(CodecError::TooManyFrames(self.max_frames));
        }

        let more = frame.more();
        self.frames.push(frame.payload);

        if more {
            Ok(None)
        } else {
            Ok(Some(std::mem::take(&mut self.frames).into_vec()))
        }
    }

    /// A message is partially assembled.
    pub fn is_partial(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &'static [u8], more: bool) -> WireFrame {
        WireFrame::data(Bytes::from_static(body), more)
    }

    #[test]
    fn assembles_until_last_frame() {
        let mut mp = MultipartBuffer::new(8);
        assert_eq!(mp.push_frame(frame(b"a", true)).unwrap(), None);
        assert_eq!(mp.push_frame(frame(b"", true)).unwrap(), None);
        assert!(mp.is_partial());
        let msg = mp.push_frame(frame(b"c", false)).unwrap().unwrap();
        assert_eq!(msg, vec![&b"a"[..], &b""[..], &b"c"[..]]);
        assert!(!mp.is_partial());
    }

    #[test]
    fn single_frame_message() {
        let mut mp = MultipartBuffer::new(1);
        let msg = mp.push_frame(frame(b"only", false)).unwrap().unwrap();
        assert_eq!(msg.len(), 1);
    }

    #[test]
    fn frame_limit_resets_buffer() {
        let mut mp = MultipartBuffer::new(2);
        mp.push_frame(frame(b"1", true)).unwrap();
        mp.push_frame(frame(b"2", true)).unwrap();
        assert_eq!(
            mp.push_frame(frame(b"3", false)),
            Err(CodecError::TooManyFrames(2))
        );
        assert_eq!(mp.pending_frames(), 0);
    }
}
