//! SRD wire messages
//!
//! Every message travels as a [`HandshakeMessage`] envelope encoded with
//! bincode (fixed-width little-endian integers, trailing bytes rejected):
//!
//! ```text
//! signature: u32 = "SRD\0" | msg_type: u32 | seq_num: u8 | payload: u64 len + bytes | mac: Option<[u8; 32]>
//! ```
//!
//! The payload is the bincode encoding of the body struct for `msg_type`.
//! The exchange is always
//!
//! ```text
//! client                         server
//!   Initiate  (seq 0)  ------>
//!             <------  Offer     (seq 1)
//!   Accept    (seq 2)  ------>            MAC
//!             <------  Confirm   (seq 3)  MAC
//!   Delegate  (seq 4)  ------>            MAC, omitted when delegation is skipped
//! ```

use bincode::{DefaultOptions, Options};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::crypto::{MAC_LEN, NONCE_LEN};
use crate::error::{Result, SrdError};

/// Protocol version identifier
pub const SRD_VERSION: u16 = 0x0003;

/// Magic value opening every message ("SRD\0" little-endian)
pub const SRD_SIGNATURE: u32 = 0x0044_5253;

/// Session flag: the client will not send a Delegate message
pub const FLAG_SKIP_DELEGATION: u16 = 0x0001;

/// Bincode configuration shared by messages and blobs
pub(crate) fn wire() -> impl Options {
    DefaultOptions::new()
        .with_little_endian()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Message types in the SRD handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Initiate,
    Offer,
    Accept,
    Confirm,
    Delegate,
}

impl MessageType {
    /// Sequence number the message must carry
    pub fn seq_num(&self) -> u8 {
        match self {
            MessageType::Initiate => 0,
            MessageType::Offer => 1,
            MessageType::Accept => 2,
            MessageType::Confirm => 3,
            MessageType::Delegate => 4,
        }
    }

    /// Whether the message is authenticated with the integrity key
    pub fn has_mac(&self) -> bool {
        matches!(
            self,
            MessageType::Accept | MessageType::Confirm | MessageType::Delegate
        )
    }
}

/// Client opening message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initiate {
    pub version: u16,
    /// Union of cipher flags the client supports
    pub ciphers: u32,
    pub flags: u16,
}

/// Server key share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Union of cipher flags the server supports
    pub ciphers: u32,
    pub public_key: [u8; 32],
    pub nonce: [u8; NONCE_LEN],
}

/// Client key share and cipher choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accept {
    /// Exactly one cipher flag
    pub cipher: u32,
    pub public_key: [u8; 32],
    pub nonce: [u8; NONCE_LEN],
    /// Channel binding token over the client nonce
    pub cbt: Option<[u8; MAC_LEN]>,
}

/// Server key confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirm {
    /// Channel binding token over the server nonce
    pub cbt: Option<[u8; MAC_LEN]>,
}

/// Credential blob encrypted under the delegation key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegate {
    pub blob: Vec<u8>,
}

/// Handshake message envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeMessage {
    pub signature: u32,
    pub msg_type: MessageType,
    pub seq_num: u8,
    pub payload: Vec<u8>,
    pub mac: Option<[u8; MAC_LEN]>,
}

impl HandshakeMessage {
    /// Wrap a body, without MAC
    pub fn new<T: Serialize>(msg_type: MessageType, body: &T) -> Result<Self> {
        Ok(Self {
            signature: SRD_SIGNATURE,
            msg_type,
            seq_num: msg_type.seq_num(),
            payload: wire().serialize(body)?,
            mac: None,
        })
    }

    /// Bytes covered by the MAC: everything except the MAC itself
    pub fn authenticated_bytes(&self) -> Result<Vec<u8>> {
        Ok(wire().serialize(&(
            self.signature,
            self.msg_type,
            self.seq_num,
            &self.payload,
        ))?)
    }

    /// Decode the payload as the body type
    pub fn body<T: DeserializeOwned>(&self) -> Result<T> {
        wire()
            .deserialize(&self.payload)
            .map_err(|e| SrdError::Protocol(format!("malformed {:?} body: {e}", self.msg_type)))
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(wire().serialize(self)?)
    }

    /// Parse an envelope and check the framing invariants that do not depend
    /// on handshake state
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let msg: Self = wire()
            .deserialize(data)
            .map_err(|e| SrdError::Protocol(format!("malformed message: {e}")))?;

        if msg.signature != SRD_SIGNATURE {
            return Err(SrdError::Protocol("invalid signature".to_string()));
        }
        if msg.seq_num != msg.msg_type.seq_num() {
            return Err(SrdError::Protocol(format!(
                "sequence number {} does not match {:?}",
                msg.seq_num, msg.msg_type
            )));
        }
        if msg.mac.is_some() != msg.msg_type.has_mac() {
            return Err(SrdError::Protocol(format!(
                "MAC presence invalid for {:?}",
                msg.msg_type
            )));
        }

        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiate_envelope() {
        let body = Initiate {
            version: SRD_VERSION,
            ciphers: 0x0301,
            flags: 0,
        };
        let msg = HandshakeMessage::new(MessageType::Initiate, &body).unwrap();
        let bytes = msg.serialize().unwrap();

        assert_eq!(&bytes[..4], b"SRD\0");

        let decoded = HandshakeMessage::deserialize(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.body::<Initiate>().unwrap(), body);
    }

    #[test]
    fn test_bad_signature_rejected() {
        let msg = HandshakeMessage::new(MessageType::Confirm, &Confirm { cbt: None }).unwrap();
        let mut msg = HandshakeMessage {
            mac: Some([0u8; MAC_LEN]),
            ..msg
        };
        msg.signature = 0xdead_beef;
        let bytes = msg.serialize().unwrap();
        assert!(matches!(
            HandshakeMessage::deserialize(&bytes),
            Err(SrdError::Protocol(_))
        ));
    }

    #[test]
    fn test_sequence_mismatch_rejected() {
        let mut msg =
            HandshakeMessage::new(MessageType::Delegate, &Delegate { blob: vec![1, 2] }).unwrap();
        msg.mac = Some([0u8; MAC_LEN]);
        msg.seq_num = 2;
        let bytes = msg.serialize().unwrap();
        assert!(matches!(
            HandshakeMessage::deserialize(&bytes),
            Err(SrdError::Protocol(_))
        ));
    }

    #[test]
    fn test_missing_mac_rejected() {
        let msg = HandshakeMessage::new(MessageType::Confirm, &Confirm { cbt: None }).unwrap();
        let bytes = msg.serialize().unwrap();
        assert!(matches!(
            HandshakeMessage::deserialize(&bytes),
            Err(SrdError::Protocol(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let msg = HandshakeMessage::new(
            MessageType::Initiate,
            &Initiate {
                version: SRD_VERSION,
                ciphers: 1,
                flags: 0,
            },
        )
        .unwrap();
        let mut bytes = msg.serialize().unwrap();
        bytes.push(0);
        assert!(HandshakeMessage::deserialize(&bytes).is_err());
        assert!(HandshakeMessage::deserialize(&[]).is_err());
    }

    #[test]
    fn test_mac_excluded_from_authenticated_bytes() {
        let mut msg = HandshakeMessage::new(MessageType::Confirm, &Confirm { cbt: None }).unwrap();
        let before = msg.authenticated_bytes().unwrap();
        msg.mac = Some([0xaa; MAC_LEN]);
        assert_eq!(msg.authenticated_bytes().unwrap(), before);
    }
}
