//! SRD handshake state machine
//!
//! One [`Handshake`] type serves both roles; the role decides which message a
//! round expects and which one it produces.
//!
//! ```text
//! round | client                          | server
//! ------+---------------------------------+---------------------------------
//!   0   | (empty)   -> Initiate           | Initiate -> Offer
//!   1   | Offer     -> Accept             | Accept   -> Confirm
//!   2   | Confirm   -> Delegate, complete | Delegate -> (none), complete
//! ```
//!
//! With delegation skipped the server completes on Accept while sending
//! Confirm, and the client completes on Confirm with nothing to send.
//!
//! Keys are derived as soon as both key shares are known (Accept) so the MACs
//! can be checked, but they only leave this module through
//! [`Outcome::Completed`].

use crate::blob::Blob;
use crate::cipher::{CipherId, CipherRegistry};
use crate::crypto::{
    channel_binding, compute_mac, random_bytes, transcript_hash, verify_channel_binding,
    verify_mac, EphemeralKeypair, KeySchedule, SessionKeys, NONCE_LEN,
};
use crate::error::{Result, SrdError};
use crate::protocol::{
    Accept, Confirm, Delegate, HandshakeMessage, Initiate, MessageType, Offer,
    FLAG_SKIP_DELEGATION, SRD_VERSION,
};
use zeroize::Zeroize;

/// Number of input calls after which an honest endpoint is always terminal
pub const MAX_ROUNDS: u8 = 3;

/// Which end of the exchange a context drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Result of feeding one message to a context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// More rounds are needed
    Continue,
    /// Authentication succeeded, negotiated results are available
    Completed,
    /// Terminal failure, the context must be discarded
    Failed(SrdError),
}

impl Status {
    pub fn is_continue(&self) -> bool {
        matches!(self, Status::Continue)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_continue()
    }
}

/// Where the state machine stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Initial,
    /// Waiting for the peer message of the given round
    AwaitingPeer { round: u8 },
    Completed,
    Failed,
}

/// Material the owning context lends to a round
pub(crate) struct Credentials<'a> {
    pub blob: Option<&'a Blob>,
    pub cert: Option<&'a [u8]>,
}

pub(crate) enum Outcome {
    Continue,
    Completed {
        keys: SessionKeys,
        /// Blob delegated by the client (server side only)
        peer_blob: Option<Blob>,
    },
}

/// What a successful round hands back to the context
pub(crate) struct Advance {
    pub output: Option<Vec<u8>>,
    pub outcome: Outcome,
}

impl Advance {
    fn send(output: Vec<u8>) -> Self {
        Self {
            output: Some(output),
            outcome: Outcome::Continue,
        }
    }
}

pub(crate) struct Handshake {
    role: Role,
    state: HandshakeState,
    ciphers: Vec<CipherId>,
    skip_delegation: bool,
    /// Every message exchanged so far, as sent
    transcript: Vec<Vec<u8>>,
    keypair: Option<EphemeralKeypair>,
    client_nonce: [u8; NONCE_LEN],
    server_nonce: [u8; NONCE_LEN],
    /// Derived keys not yet published
    keys: Option<SessionKeys>,
}

impl Handshake {
    pub fn new(role: Role, ciphers: Vec<CipherId>, skip_delegation: bool) -> Self {
        Self {
            role,
            state: HandshakeState::Initial,
            ciphers,
            skip_delegation,
            transcript: Vec::new(),
            keypair: None,
            client_nonce: [0u8; NONCE_LEN],
            server_nonce: [0u8; NONCE_LEN],
            keys: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Run one round. On error the machine is left in `Failed`; the caller
    /// records the reason.
    pub fn advance(
        &mut self,
        input: &[u8],
        credentials: &Credentials<'_>,
        registry: &CipherRegistry,
    ) -> Result<Advance> {
        let round = match self.state {
            HandshakeState::Initial => 0,
            HandshakeState::AwaitingPeer { round } => round,
            HandshakeState::Completed | HandshakeState::Failed => {
                return Err(SrdError::Protocol("handshake already finished".to_string()))
            }
        };

        let result = match (self.role, round) {
            (Role::Client, 0) => self.client_initiate(input, credentials),
            (Role::Client, 1) => self.client_accept(input, credentials, registry),
            (Role::Client, 2) => self.client_delegate(input, credentials, registry),
            (Role::Server, 0) => self.server_offer(input),
            (Role::Server, 1) => self.server_confirm(input, credentials, registry),
            (Role::Server, 2) => self.server_finish(input, registry),
            _ => Err(SrdError::Protocol(format!("no round {round}"))),
        };

        match &result {
            Ok(Advance {
                outcome: Outcome::Completed { .. },
                ..
            }) => {
                self.state = HandshakeState::Completed;
                self.wipe();
            }
            Ok(_) => self.state = HandshakeState::AwaitingPeer { round: round + 1 },
            Err(_) => {
                self.state = HandshakeState::Failed;
                self.wipe();
            }
        }

        result
    }

    // Client: (empty) -> Initiate
    fn client_initiate(&mut self, input: &[u8], credentials: &Credentials<'_>) -> Result<Advance> {
        if !input.is_empty() {
            return Err(SrdError::Protocol(
                "client speaks first, no input expected".to_string(),
            ));
        }
        if !self.skip_delegation && credentials.blob.is_none() {
            return Err(SrdError::Config("missing credential blob".to_string()));
        }

        let flags = if self.skip_delegation {
            FLAG_SKIP_DELEGATION
        } else {
            0
        };
        let initiate = Initiate {
            version: SRD_VERSION,
            ciphers: CipherId::to_flags(&self.ciphers),
            flags,
        };

        let out = HandshakeMessage::new(MessageType::Initiate, &initiate)?.serialize()?;
        self.transcript.push(out.clone());
        Ok(Advance::send(out))
    }

    // Server: Initiate -> Offer
    fn server_offer(&mut self, input: &[u8]) -> Result<Advance> {
        let msg = read_message(input, MessageType::Initiate)?;
        let initiate: Initiate = msg.body()?;

        if initiate.version != SRD_VERSION {
            return Err(SrdError::Protocol(format!(
                "unsupported version 0x{:04x}",
                initiate.version
            )));
        }
        let peer_skips = initiate.flags & FLAG_SKIP_DELEGATION != 0;
        if peer_skips != self.skip_delegation {
            return Err(SrdError::Protocol("delegation mode mismatch".to_string()));
        }
        let client_ciphers = CipherId::from_flags(initiate.ciphers);
        if !self.ciphers.iter().any(|c| client_ciphers.contains(c)) {
            return Err(SrdError::Protocol("no common cipher".to_string()));
        }
        self.transcript.push(input.to_vec());

        let keypair = EphemeralKeypair::generate();
        self.server_nonce = random_bytes::<NONCE_LEN>();

        let offer = Offer {
            ciphers: CipherId::to_flags(&self.ciphers),
            public_key: keypair.public_bytes(),
            nonce: self.server_nonce,
        };
        self.keypair = Some(keypair);

        let out = HandshakeMessage::new(MessageType::Offer, &offer)?.serialize()?;
        self.transcript.push(out.clone());
        Ok(Advance::send(out))
    }

    // Client: Offer -> Accept
    fn client_accept(
        &mut self,
        input: &[u8],
        credentials: &Credentials<'_>,
        registry: &CipherRegistry,
    ) -> Result<Advance> {
        let msg = read_message(input, MessageType::Offer)?;
        let offer: Offer = msg.body()?;
        self.transcript.push(input.to_vec());

        let common: Vec<CipherId> = CipherId::from_flags(offer.ciphers)
            .into_iter()
            .filter(|c| self.ciphers.contains(c))
            .collect();
        let cipher = CipherId::best(&common)
            .ok_or_else(|| SrdError::Protocol("no common cipher".to_string()))?;

        let keypair = EphemeralKeypair::generate();
        self.client_nonce = random_bytes::<NONCE_LEN>();
        self.server_nonce = offer.nonce;

        let shared = keypair.agree(&offer.public_key)?;
        let hello_hash = transcript_hash(&self.transcript);
        let keys = KeySchedule::new(&shared, &self.client_nonce, &self.server_nonce)
            .derive(cipher, registry.get(cipher)?.key_len(), &hello_hash)?;

        let cbt = credentials
            .cert
            .map(|cert| channel_binding(keys.integrity_key(), &self.client_nonce, cert))
            .transpose()?;

        let accept = Accept {
            cipher: cipher.flag(),
            public_key: keypair.public_bytes(),
            nonce: self.client_nonce,
            cbt,
        };

        let out = self.seal(MessageType::Accept, &accept, &keys)?;
        self.keys = Some(keys);
        Ok(Advance::send(out))
    }

    // Server: Accept -> Confirm
    fn server_confirm(
        &mut self,
        input: &[u8],
        credentials: &Credentials<'_>,
        registry: &CipherRegistry,
    ) -> Result<Advance> {
        let msg = read_message(input, MessageType::Accept)?;
        let accept: Accept = msg.body()?;

        let cipher = CipherId::try_from(accept.cipher)
            .map_err(|_| SrdError::Protocol("invalid cipher choice".to_string()))?;
        if !self.ciphers.contains(&cipher) {
            return Err(SrdError::Protocol(format!("cipher {cipher} was not offered")));
        }

        let keypair = self
            .keypair
            .take()
            .ok_or_else(|| SrdError::Protocol("no key share for this round".to_string()))?;
        self.client_nonce = accept.nonce;

        let shared = keypair.agree(&accept.public_key)?;
        let hello_hash = transcript_hash(&self.transcript);
        let keys = KeySchedule::new(&shared, &self.client_nonce, &self.server_nonce)
            .derive(cipher, registry.get(cipher)?.key_len(), &hello_hash)?;

        self.check_mac(&msg, &keys)?;
        check_binding(
            keys.integrity_key(),
            &self.client_nonce,
            credentials.cert,
            accept.cbt.as_ref(),
        )?;
        self.transcript.push(input.to_vec());

        let cbt = credentials
            .cert
            .map(|cert| channel_binding(keys.integrity_key(), &self.server_nonce, cert))
            .transpose()?;

        let out = self.seal(MessageType::Confirm, &Confirm { cbt }, &keys)?;

        if self.skip_delegation {
            return Ok(Advance {
                output: Some(out),
                outcome: Outcome::Completed {
                    keys,
                    peer_blob: None,
                },
            });
        }

        self.keys = Some(keys);
        Ok(Advance::send(out))
    }

    // Client: Confirm -> Delegate
    fn client_delegate(
        &mut self,
        input: &[u8],
        credentials: &Credentials<'_>,
        registry: &CipherRegistry,
    ) -> Result<Advance> {
        let msg = read_message(input, MessageType::Confirm)?;
        let confirm: Confirm = msg.body()?;

        let keys = self.take_keys()?;
        self.check_mac(&msg, &keys)?;
        check_binding(
            keys.integrity_key(),
            &self.server_nonce,
            credentials.cert,
            confirm.cbt.as_ref(),
        )?;
        self.transcript.push(input.to_vec());

        if self.skip_delegation {
            return Ok(Advance {
                output: None,
                outcome: Outcome::Completed {
                    keys,
                    peer_blob: None,
                },
            });
        }

        let blob = credentials
            .blob
            .ok_or_else(|| SrdError::Config("missing credential blob".to_string()))?;
        let delegate = Delegate {
            blob: blob.encrypt(registry, keys.cipher(), keys.delegation_key())?,
        };

        let out = self.seal(MessageType::Delegate, &delegate, &keys)?;
        Ok(Advance {
            output: Some(out),
            outcome: Outcome::Completed {
                keys,
                peer_blob: None,
            },
        })
    }

    // Server: Delegate -> (none)
    fn server_finish(&mut self, input: &[u8], registry: &CipherRegistry) -> Result<Advance> {
        let msg = read_message(input, MessageType::Delegate)?;
        let delegate: Delegate = msg.body()?;

        let keys = self.take_keys()?;
        self.check_mac(&msg, &keys)?;

        let blob = Blob::decrypt(registry, keys.cipher(), keys.delegation_key(), &delegate.blob)
            .map_err(|err| match err {
                SrdError::Integrity => SrdError::Authentication,
                SrdError::Format(_) => SrdError::Protocol("malformed delegated blob".to_string()),
                other => other,
            })?;
        self.transcript.push(input.to_vec());

        Ok(Advance {
            output: None,
            outcome: Outcome::Completed {
                keys,
                peer_blob: Some(blob),
            },
        })
    }

    /// Encode `body` with a MAC over the transcript and record it
    fn seal<T: serde::Serialize>(
        &mut self,
        msg_type: MessageType,
        body: &T,
        keys: &SessionKeys,
    ) -> Result<Vec<u8>> {
        let mut msg = HandshakeMessage::new(msg_type, body)?;
        msg.mac = Some(compute_mac(
            keys.integrity_key(),
            &self.transcript,
            &msg.authenticated_bytes()?,
        )?);

        let out = msg.serialize()?;
        self.transcript.push(out.clone());
        Ok(out)
    }

    fn check_mac(&self, msg: &HandshakeMessage, keys: &SessionKeys) -> Result<()> {
        let tag = msg
            .mac
            .as_ref()
            .ok_or_else(|| SrdError::Protocol("missing MAC".to_string()))?;
        verify_mac(
            keys.integrity_key(),
            &self.transcript,
            &msg.authenticated_bytes()?,
            tag,
        )
    }

    fn take_keys(&mut self) -> Result<SessionKeys> {
        self.keys
            .take()
            .ok_or_else(|| SrdError::Protocol("keys not established".to_string()))
    }

    /// Force the machine into `Failed`, for errors raised outside a round
    pub(crate) fn fail(&mut self) {
        self.state = HandshakeState::Failed;
        self.wipe();
    }

    /// Drop everything secret once the machine is terminal
    fn wipe(&mut self) {
        self.keypair = None;
        self.keys = None;
        self.client_nonce.zeroize();
        self.server_nonce.zeroize();
        self.transcript.clear();
    }
}

fn read_message(input: &[u8], expected: MessageType) -> Result<HandshakeMessage> {
    if input.is_empty() {
        return Err(SrdError::Protocol(format!("expected {expected:?}, got nothing")));
    }

    let msg = HandshakeMessage::deserialize(input)?;
    if msg.msg_type != expected {
        return Err(SrdError::Protocol(format!(
            "expected {expected:?}, got {:?}",
            msg.msg_type
        )));
    }
    Ok(msg)
}

/// Both ends must agree on whether a certificate is bound, and on its token
fn check_binding(
    integrity_key: &[u8],
    nonce: &[u8; NONCE_LEN],
    cert: Option<&[u8]>,
    token: Option<&[u8; 32]>,
) -> Result<()> {
    match (cert, token) {
        (None, None) => Ok(()),
        (Some(cert), Some(token)) => verify_channel_binding(integrity_key, nonce, cert, token),
        _ => Err(SrdError::Authentication),
    }
}
