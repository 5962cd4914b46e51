//! Opaque per-connection identifier assigned by the transport.

use std::fmt;

use rand::RngCore;

/// A short, URL-safe, random identifier assigned to an engine.io connection
/// when it is accepted. Reused unmodified as the socket.io `Client` id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid([u8; 12]);

impl Sid {
    /// Generates a new random id.
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl Default for Sid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use base64::Engine;
        f.write_str(&base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sid({self})")
    }
}

impl std::str::FromStr for Sid {
    type Err = base64::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(s)?;
        let mut bytes = [0u8; 12];
        let len = decoded.len().min(12);
        bytes[..len].copy_from_slice(&decoded[..len]);
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_unique_ids() {
        let a = Sid::new();
        let b = Sid::new();
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_through_display() {
        let sid = Sid::new();
        let s = sid.to_string();
        let parsed: Sid = s.parse().unwrap();
        assert_eq!(sid, parsed);
    }
}
