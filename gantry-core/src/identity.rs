//! Peer identities.
//!
//! A ROUTER addresses every peer by an opaque byte string. Peers may announce
//! one during the handshake; otherwise the socket generates one. Generated
//! identities always start with `0x00`, which announced identities may not
//! use, so the two spaces never overlap.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::fmt;

use crate::error::{GantryError, Result};

/// Leading byte reserved for generated identities.
pub const GENERATED_PREFIX: u8 = 0x00;

/// Opaque, stable identity of one peer connection.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerIdentity(Bytes);

impl PeerIdentity {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub const fn from_static(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }

    #[inline]
    pub const fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    #[inline]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// True when the socket generated this identity rather than the peer.
    #[inline]
    pub fn is_generated(&self) -> bool {
        self.0.first() == Some(&GENERATED_PREFIX)
    }
}

impl From<Bytes> for PeerIdentity {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<PeerIdentity> for Bytes {
    fn from(id: PeerIdentity) -> Self {
        id.0
    }
}

impl AsRef<[u8]> for PeerIdentity {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printable = !self.0.is_empty() && self.0.iter().all(|b| b.is_ascii_graphic());
        if printable {
            // is_ascii_graphic guarantees valid UTF-8
            f.write_str(&String::from_utf8_lossy(&self.0))
        } else {
            f.write_str("0x")?;
            for b in self.0.iter() {
                write!(f, "{b:02x}")?;
            }
            Ok(())
        }
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerIdentity({self})")
    }
}

/// Random identity source with a bounded collision retry.
///
/// Identities are `[0x00, r0, .., rN]` with `width` random bytes.
pub struct IdentityGenerator {
    rng: StdRng,
    width: usize,
    max_attempts: usize,
}

impl IdentityGenerator {
    pub fn new(width: usize, max_attempts: usize) -> Self {
        Self::with_rng(StdRng::from_entropy(), width, max_attempts)
    }

    /// Generator with a caller-supplied RNG (seeded in tests).
    pub fn with_rng(rng: StdRng, width: usize, max_attempts: usize) -> Self {
        Self {
            rng,
            width: width.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    pub const fn width(&self) -> usize {
        self.width
    }

    pub const fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Produce an identity for which `taken` returns false.
    ///
    /// Fails with `IdentityExhausted` once `max_attempts` candidates collided.
    pub fn generate<F>(&mut self, taken: F) -> Result<PeerIdentity>
    where
        F: Fn(&PeerIdentity) -> bool,
    {
        let mut buf = vec![0u8; self.width + 1];
        for _ in 0..self.max_attempts {
            buf[0] = GENERATED_PREFIX;
            self.rng.fill_bytes(&mut buf[1..]);
            let candidate = PeerIdentity::new(Bytes::copy_from_slice(&buf));
            if !taken(&candidate) {
                return Ok(candidate);
            }
        }
        Err(GantryError::IdentityExhausted {
            attempts: self.max_attempts,
        })
    }
}

impl fmt::Debug for IdentityGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityGenerator")
            .field("width", &self.width)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
