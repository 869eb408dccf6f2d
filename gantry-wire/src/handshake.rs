//! READY handshake.
//!
//! Each side sends exactly one COMMAND frame before any data:
//!
//! ```text
//! [5]["READY"] then properties: [name_len:u8][name][value_len:u32 BE][value]
//! ```
//!
//! Properties: `Socket-Type` (mandatory) and `Identity` (may be empty).
//! Unknown properties are ignored.

use bytes::{BufMut, Bytes, BytesMut};
use gantry_core::socket_type::SocketType;
use gantry_core::{GantryError, Result};

use crate::codec::{CodecError, WireFrame};

pub const READY: &[u8] = b"READY";
pub const PROP_SOCKET_TYPE: &[u8] = b"Socket-Type";
pub const PROP_IDENTITY: &[u8] = b"Identity";

/// Upper bound on a READY body; anything larger is not a handshake.
pub const MAX_READY_SIZE: usize = 1024;

/// What the peer announced in its READY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerReady {
    pub socket_type: SocketType,
    /// `None` when the peer sent no or an empty `Identity`.
    pub identity: Option<Bytes>,
}

/// Parsed command: name plus properties borrowed from the payload.
#[derive(Debug, Clone)]
pub struct Command<'a> {
    pub name: &'a [u8],
    pub props: Vec<(&'a [u8], &'a [u8])>,
}

impl<'a> Command<'a> {
    pub fn get(&self, prop: &[u8]) -> Option<&'a [u8]> {
        self.props.iter().find(|(n, _)| *n == prop).map(|(_, v)| *v)
    }
}

/// Build the READY command body.
pub fn build_ready(socket_type: SocketType, identity: Option<&[u8]>) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u8(READY.len() as u8);
    body.put_slice(READY);
    put_property(&mut body, PROP_SOCKET_TYPE, socket_type.as_str().as_bytes());
    put_property(&mut body, PROP_IDENTITY, identity.unwrap_or_default());
    body.freeze()
}

/// The READY command as a complete wire record.
pub fn ready_frame(socket_type: SocketType, identity: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    WireFrame::command(build_ready(socket_type, identity)).encode(&mut out);
    out
}

#[inline]
fn put_property(dst: &mut BytesMut, name: &[u8], value: &[u8]) {
    dst.put_u8(name.len() as u8);
    dst.put_slice(name);
    dst.put_u32(value.len() as u32);
    dst.put_slice(value);
}

/// Parse a command payload into name and properties.
pub fn parse_command(payload: &[u8]) -> std::result::Result<Command<'_>, CodecError> {
    let (&name_len, rest) = payload
        .split_first()
        .ok_or(CodecError::MalformedCommand("empty command"))?;
    let name_len = name_len as usize;
    if rest.len() < name_len {
        return Err(CodecError::MalformedCommand("truncated name"));
    }
    let (name, mut rest) = rest.split_at(name_len);

    let mut props = Vec::new();
    while !rest.is_empty() {
        let pn_len = rest[0] as usize;
        rest = &rest[1..];
        if rest.len() < pn_len + 4 {
            return Err(CodecError::MalformedCommand("truncated property name"));
        }
        let (pn, tail) = rest.split_at(pn_len);
        let vl = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]) as usize;
        let tail = &tail[4..];
        if tail.len() < vl {
            return Err(CodecError::MalformedCommand("truncated property value"));
        }
        let (value, tail) = tail.split_at(vl);
        props.push((pn, value));
        rest = tail;
    }

    Ok(Command { name, props })
}

/// Validate the peer's first frame and extract its READY properties.
pub fn accept_ready(frame: &WireFrame, local: SocketType) -> Result<PeerReady> {
    if !frame.is_command() {
        return Err(GantryError::protocol("expected READY command, got data frame"));
    }
    if frame.payload.len() > MAX_READY_SIZE {
        return Err(GantryError::protocol(format!(
            "READY body too large: {} bytes",
            frame.payload.len()
        )));
    }
    let cmd = parse_command(&frame.payload)?;
    if cmd.name != READY {
        return Err(GantryError::protocol(format!(
            "expected READY, got {:?}",
            String::from_utf8_lossy(cmd.name)
        )));
    }

    let socket_type = cmd
        .get(PROP_SOCKET_TYPE)
        .ok_or_else(|| GantryError::protocol("READY without Socket-Type"))
        .and_then(SocketType::from_wire)?;
    if !local.is_compatible(socket_type) {
        return Err(GantryError::IncompatiblePeer {
            local,
            peer: socket_type,
        });
    }

    let identity = cmd
        .get(PROP_IDENTITY)
        .filter(|id| !id.is_empty())
        .map(|id| frame.payload.slice_ref(id));

    Ok(PeerReady {
        socket_type,
        identity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FrameDecoder;

    fn decode_ready(wire: &[u8]) -> WireFrame {
        let mut dec = FrameDecoder::default();
        dec.extend(wire);
        dec.decode().unwrap().unwrap()
    }

    #[test]
    fn ready_layout() {
        let body = build_ready(SocketType::Router, None);
        let cmd = parse_command(&body).unwrap();
        assert_eq!(cmd.name, READY);
        assert_eq!(cmd.get(PROP_SOCKET_TYPE), Some(&b"ROUTER"[..]));
        assert_eq!(cmd.get(PROP_IDENTITY), Some(&b""[..]));
    }

    #[test]
    fn accepts_compatible_peer_with_identity() {
        let frame = decode_ready(&ready_frame(SocketType::Dealer, Some(b"worker-1")));
        let ready = accept_ready(&frame, SocketType::Router).unwrap();
        assert_eq!(ready.socket_type, SocketType::Dealer);
        assert_eq!(ready.identity.as_deref(), Some(&b"worker-1"[..]));
    }

    #[test]
    fn empty_identity_means_none() {
        let frame = decode_ready(&ready_frame(SocketType::Router, Some(b"")));
        let ready = accept_ready(&frame, SocketType::Router).unwrap();
        assert_eq!(ready.identity, None);
    }

    #[test]
    fn data_frame_is_not_a_handshake() {
        let frame = WireFrame::data(Bytes::from_static(b"hello"), false);
        assert!(matches!(
            accept_ready(&frame, SocketType::Router),
            Err(GantryError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn unknown_socket_type_is_rejected() {
        let mut body = BytesMut::new();
        body.put_u8(5);
        body.put_slice(READY);
        put_property(&mut body, PROP_SOCKET_TYPE, b"PUB");
        let frame = WireFrame::command(body.freeze());
        assert!(accept_ready(&frame, SocketType::Router).is_err());
    }

    #[test]
    fn truncated_properties_are_malformed() {
        let mut body = build_ready(SocketType::Dealer, Some(b"abc")).to_vec();
        body.truncate(body.len() - 1);
        assert_eq!(
            parse_command(&body).unwrap_err(),
            CodecError::MalformedCommand("truncated property value")
        );
    }
}
