//! Control-code classification.
//!
//! The first byte of every frame exchanged over the control channel is a
//! control code. The bridge only ever reads this single byte; it carries no
//! other X.25 protocol state.

use std::fmt;

/// Disposition of an outbound frame, decided by its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    /// Data request (`0x00`). Counted toward transmit statistics.
    Data,

    /// Connection request (`0x01`). Session signaling, passed through
    /// uninterpreted.
    Connect,

    /// Disconnect request (`0x02`). Session signaling, passed through
    /// uninterpreted.
    Disconnect,

    /// Link-parameter change request (`0x03`). Not supported, but still
    /// forwarded: the peer decides what to do with it.
    SetParams,

    /// Any other first byte. The frame is dropped and counted.
    Unknown(u8),
}

impl ControlCode {
    /// Classify a control byte. Total over all byte values.
    pub const fn classify(byte: u8) -> Self {
        match byte {
            0x00 => ControlCode::Data,
            0x01 => ControlCode::Connect,
            0x02 => ControlCode::Disconnect,
            0x03 => ControlCode::SetParams,
            other => ControlCode::Unknown(other),
        }
    }

    /// Whether frames carrying this code are forwarded to the control
    /// channel. Everything except [`ControlCode::Unknown`] is.
    pub const fn is_forwarded(&self) -> bool {
        !matches!(self, ControlCode::Unknown(_))
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCode::Data => write!(f, "data"),
            ControlCode::Connect => write!(f, "connect"),
            ControlCode::Disconnect => write!(f, "disconnect"),
            ControlCode::SetParams => write!(f, "set-params"),
            ControlCode::Unknown(byte) => write!(f, "unknown(0x{:02x})", byte),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_named_codes() {
        assert_eq!(ControlCode::classify(0x00), ControlCode::Data);
        assert_eq!(ControlCode::classify(0x01), ControlCode::Connect);
        assert_eq!(ControlCode::classify(0x02), ControlCode::Disconnect);
        assert_eq!(ControlCode::classify(0x03), ControlCode::SetParams);
    }

    #[test]
    fn test_unknown_codes_not_forwarded() {
        for byte in 0x04..=0xFF_u8 {
            let code = ControlCode::classify(byte);
            assert_eq!(code, ControlCode::Unknown(byte));
            assert!(!code.is_forwarded());
        }
    }

    proptest! {
        #[test]
        fn classify_is_total_and_stable(byte: u8) {
            let code = ControlCode::classify(byte);
            // Named codes forward, everything else is Unknown(byte).
            match byte {
                0x00..=0x03 => prop_assert!(code.is_forwarded()),
                other => prop_assert_eq!(code, ControlCode::Unknown(other)),
            }
            // Classification is deterministic.
            prop_assert_eq!(code, ControlCode::classify(byte));
        }
    }
}
