//! Inbound demultiplexer.
//!
//! Turns the byte stream of one peer into application messages. On a ROUTER
//! the peer's identity is prepended as a synthetic first frame; on a DEALER
//! payload frames pass through unmodified. Messages of one peer come out in
//! arrival order.

use bytes::Bytes;
use gantry_core::identity::PeerIdentity;

use crate::codec::{CodecError, FrameDecoder};
use crate::multipart::MultipartBuffer;

#[derive(Debug)]
pub struct InboundDemux {
    decoder: FrameDecoder,
    multipart: MultipartBuffer,
    envelope: Option<Bytes>,
}

impl InboundDemux {
    pub fn new(max_frame_size: Option<usize>, max_message_frames: usize) -> Self {
        Self::with_decoder(FrameDecoder::new(max_frame_size), max_message_frames)
    }

    /// Continue from a decoder that already consumed the handshake; bytes the
    /// peer pipelined after its READY are still buffered in it.
    pub fn with_decoder(decoder: FrameDecoder, max_message_frames: usize) -> Self {
        Self {
            decoder,
            multipart: MultipartBuffer::new(max_message_frames),
            envelope: None,
        }
    }

    /// Prepend `identity` to every delivered message (ROUTER behavior).
    pub fn set_envelope(&mut self, identity: Option<&PeerIdentity>) {
        self.envelope = identity.map(|id| id.as_bytes().clone());
    }

    /// Feed received bytes and deliver every message they complete.
    ///
    /// Returns the number of messages delivered. A framing error leaves any
    /// partial message undelivered.
    pub fn feed<F>(&mut self, data: &[u8], deliver: F) -> Result<usize, CodecError>
    where
        F: FnMut(Vec<Bytes>),
    {
        self.decoder.extend(data);
        self.drain(deliver)
    }

    /// Deliver messages already buffered in the decoder.
    pub fn drain<F>(&mut self, mut deliver: F) -> Result<usize, CodecError>
    where
        F: FnMut(Vec<Bytes>),
    {
        let mut delivered = 0;
        while let Some(frame) = self.decoder.decode()? {
            if frame.is_command() {
                if self.multipart.is_partial() {
                    return Err(CodecError::CommandInMessage);
                }
                tracing::trace!(len = frame.payload.len(), "ignoring command frame");
                continue;
            }
            if let Some(mut frames) = self.multipart.push_frame(frame)? {
                if let Some(id) = &self.envelope {
                    frames.insert(0, id.clone());
                }
                deliver(frames);
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// A message is half received; it is lost if the stream ends now.
    pub fn has_partial(&self) -> bool {
        self.multipart.is_partial()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_message, WireFrame};

    fn wire(msgs: &[&[&'static str]]) -> Vec<u8> {
        let mut out = Vec::new();
        for m in msgs {
            let frames: Vec<Bytes> = m.iter().map(|f| Bytes::from_static(f.as_bytes())).collect();
            encode_message(&mut out, &frames);
        }
        out
    }

    #[test]
    fn router_prepends_identity() {
        let mut demux = InboundDemux::new(None, 16);
        demux.set_envelope(Some(&PeerIdentity::from_static(b"peer-a")));
        let mut got = Vec::new();
        let n = demux
            .feed(&wire(&[&["hello", ""], &["x"]]), |m| got.push(m))
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(got[0], vec![&b"peer-a"[..], &b"hello"[..], &b""[..]]);
        assert_eq!(got[1], vec![&b"peer-a"[..], &b"x"[..]]);
    }

    #[test]
    fn dealer_passes_payload_through() {
        let mut demux = InboundDemux::new(None, 16);
        let mut got = Vec::new();
        demux.feed(&wire(&[&["a", "b"]]), |m| got.push(m)).unwrap();
        assert_eq!(got, vec![vec![&b"a"[..], &b"b"[..]]]);
    }

    #[test]
    fn split_delivery_keeps_partial_message() {
        let bytes = wire(&[&["first", "second"]]);
        let (head, tail) = bytes.split_at(9);
        let mut demux = InboundDemux::new(None, 16);
        let mut got = Vec::new();

        assert_eq!(demux.feed(head, |m| got.push(m)).unwrap(), 0);
        assert!(demux.has_partial());
        assert_eq!(demux.feed(tail, |m| got.push(m)).unwrap(), 1);
        assert_eq!(got[0].len(), 2);
    }

    #[test]
    fn commands_between_messages_are_ignored() {
        let mut bytes = Vec::new();
        WireFrame::command(Bytes::from_static(b"\x04PING")).encode(&mut bytes);
        bytes.extend(wire(&[&["data"]]));
        let mut demux = InboundDemux::new(None, 16);
        let mut got = Vec::new();
        assert_eq!(demux.feed(&bytes, |m| got.push(m)).unwrap(), 1);
    }

    #[test]
    fn command_inside_message_is_a_violation() {
        let mut bytes = Vec::new();
        WireFrame::data(Bytes::from_static(b"a"), true).encode(&mut bytes);
        WireFrame::command(Bytes::from_static(b"\x04PING")).encode(&mut bytes);
        let mut demux = InboundDemux::new(None, 16);
        assert_eq!(
            demux.feed(&bytes, |_| {}),
            Err(CodecError::CommandInMessage)
        );
    }
}
