//! Multipart messages.
//!
//! The application API moves messages as `Vec<Bytes>`; `Message` is the
//! builder used to assemble them. The "more" marker only exists on the wire:
//! every frame but the last carries it.

use bytes::Bytes;

/// A multipart message builder.
///
/// # Examples
///
/// ```
/// use gantry_core::message::Message;
///
/// // ROUTER reply: [identity] [payload]
/// let msg = Message::new()
///     .push(&b"client-7"[..])
///     .push_str("pong")
///     .into_frames();
/// assert_eq!(msg.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    frames: Vec<Bytes>,
}

impl Message {
    #[must_use]
    pub const fn new() -> Self {
        Self { frames: Vec::new() }
    }

    #[must_use]
    pub const fn from_frames(frames: Vec<Bytes>) -> Self {
        Self { frames }
    }

    /// Add a frame from anything convertible to `Bytes`.
    #[must_use]
    pub fn push(mut self, frame: impl Into<Bytes>) -> Self {
        self.frames.push(frame.into());
        self
    }

    /// Add a UTF-8 string frame.
    #[must_use]
    pub fn push_str(mut self, s: &str) -> Self {
        self.frames.push(Bytes::copy_from_slice(s.as_bytes()));
        self
    }

    /// Add a zero-length frame.
    #[must_use]
    pub fn push_empty(mut self) -> Self {
        self.frames.push(Bytes::new());
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    #[must_use]
    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames
    }
}

impl From<Vec<Bytes>> for Message {
    fn from(frames: Vec<Bytes>) -> Self {
        Self { frames }
    }
}

impl From<Message> for Vec<Bytes> {
    fn from(msg: Message) -> Self {
        msg.frames
    }
}
