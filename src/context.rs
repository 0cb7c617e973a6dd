//! Per-endpoint authentication session
//!
//! A [`Context`] owns one side of the exchange: its configuration, the blob
//! it delegates (client) or received (server), the certificate used for
//! channel binding, the in-flight output message and, once completed, the
//! negotiated keys.

use tracing::{debug, warn};

use crate::blob::{Blob, TypedBlob};
use crate::cipher::{CipherId, CipherRegistry};
use crate::config::ContextConfig;
use crate::crypto::SessionKeys;
use crate::error::{Result, SrdError};
use crate::handshake::{
    Advance, Credentials, Handshake, HandshakeState, Outcome, Role, Status, MAX_ROUNDS,
};

pub struct Context {
    role: Role,
    registry: CipherRegistry,
    config: ContextConfig,
    handshake: Handshake,
    status: Status,
    round: u8,
    blob: Option<Blob>,
    cert_data: Option<Vec<u8>>,
    output: Option<Vec<u8>>,
    session: Option<SessionKeys>,
}

impl Context {
    /// Context with every built-in cipher and the default configuration
    pub fn new(role: Role) -> Self {
        let config = ContextConfig::default();
        let registry = CipherRegistry::default();
        let ciphers = registry.ids();
        Self::assemble(role, registry, config, ciphers)
    }

    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    /// Context over an explicit registry and configuration.
    ///
    /// Fails if none of the configured ciphers is registered.
    pub fn with_config(role: Role, registry: CipherRegistry, config: ContextConfig) -> Result<Self> {
        let ciphers = config.effective_ciphers(&registry)?;
        Ok(Self::assemble(role, registry, config, ciphers))
    }

    fn assemble(
        role: Role,
        registry: CipherRegistry,
        config: ContextConfig,
        ciphers: Vec<CipherId>,
    ) -> Self {
        debug!(%role, ?ciphers, skip_delegation = config.skip_delegation, "new SRD context");
        Self {
            role,
            handshake: Handshake::new(role, ciphers, config.skip_delegation),
            registry,
            config,
            status: Status::Continue,
            round: 0,
            blob: None,
            cert_data: None,
            output: None,
            session: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> HandshakeState {
        self.handshake.state()
    }

    /// Last status returned by [`Context::input`]
    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn registry(&self) -> &CipherRegistry {
        &self.registry
    }

    /// Feed the peer's latest message; pass an empty slice on the client's
    /// first round.
    ///
    /// Once terminal, the context ignores input and returns its terminal
    /// status again.
    pub fn input(&mut self, message: &[u8]) -> Status {
        if self.status.is_terminal() {
            return self.status.clone();
        }

        self.round += 1;
        self.output = None;

        let result = if message.len() > self.config.max_message_size {
            Err(SrdError::Protocol(format!(
                "message of {} bytes exceeds limit of {}",
                message.len(),
                self.config.max_message_size
            )))
        } else {
            let credentials = Credentials {
                blob: self.blob.as_ref(),
                cert: self.cert_data.as_deref(),
            };
            self.handshake.advance(message, &credentials, &self.registry)
        };

        self.status = match result {
            Ok(advance) => self.apply(advance),
            Err(err) => {
                self.fail(err);
                return self.status.clone();
            }
        };

        debug!(
            role = %self.role,
            round = self.round,
            status = ?self.status,
            output_len = self.output.as_ref().map_or(0, Vec::len),
            "SRD round"
        );
        self.status.clone()
    }

    fn apply(&mut self, advance: Advance) -> Status {
        self.output = advance.output;
        match advance.outcome {
            Outcome::Continue => Status::Continue,
            Outcome::Completed { keys, peer_blob } => {
                debug!(role = %self.role, cipher = %keys.cipher(), "SRD handshake completed");
                self.session = Some(keys);
                if let Some(blob) = peer_blob {
                    self.blob = Some(blob);
                }
                Status::Completed
            }
        }
    }

    fn fail(&mut self, err: SrdError) {
        match &err {
            SrdError::Authentication => {
                warn!(role = %self.role, round = self.round, "SRD authentication failed")
            }
            other => warn!(role = %self.role, round = self.round, error = %other, "SRD handshake failed"),
        }
        self.handshake.fail();
        self.output = None;
        self.status = Status::Failed(err);
    }

    /// Message to send for the current round, if any.
    ///
    /// Repeated calls return the same bytes until the next [`Context::input`].
    pub fn output(&self) -> Option<&[u8]> {
        match self.status {
            Status::Failed(_) => None,
            _ => self.output.as_deref(),
        }
    }

    /// `input` followed by `output`, for drivers that want both at once
    pub fn authenticate(&mut self, message: &[u8]) -> (Status, Option<Vec<u8>>) {
        let status = self.input(message);
        (status, self.output().map(<[u8]>::to_vec))
    }

    /// Set the blob delegated by a client, replacing any previous one
    pub fn set_blob(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.blob = Some(Blob::new(name, data));
    }

    pub fn set_typed_blob<T: TypedBlob>(&mut self, blob: &T) {
        self.blob = Some(blob.to_blob());
    }

    /// The held blob: the client's own, or on a completed server the one the
    /// client delegated
    pub fn blob(&self) -> Option<&Blob> {
        self.blob.as_ref()
    }

    pub fn blob_name(&self) -> Option<&str> {
        self.blob.as_ref().map(Blob::name)
    }

    pub fn blob_data(&self) -> Option<&[u8]> {
        self.blob.as_ref().map(Blob::data)
    }

    /// Decode the held blob as `T`; `None` if absent or named differently
    pub fn typed_blob<T: TypedBlob>(&self) -> Result<Option<T>> {
        match &self.blob {
            Some(blob) => T::from_blob(blob),
            None => Ok(None),
        }
    }

    /// Certificate bytes bound into the handshake. Both ends must set the
    /// same data, or neither.
    pub fn set_cert_data(&mut self, cert: impl Into<Vec<u8>>) {
        self.cert_data = Some(cert.into());
    }

    pub fn cert_data(&self) -> Option<&[u8]> {
        self.cert_data.as_deref()
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, Status::Completed)
    }

    /// Negotiated keys, available only once completed
    pub fn session_keys(&self) -> Option<&SessionKeys> {
        self.session.as_ref()
    }

    pub fn cipher(&self) -> Option<CipherId> {
        self.session.as_ref().map(SessionKeys::cipher)
    }

    pub fn delegation_key(&self) -> Option<&[u8]> {
        self.session.as_ref().map(SessionKeys::delegation_key)
    }

    pub fn integrity_key(&self) -> Option<&[u8]> {
        self.session.as_ref().map(SessionKeys::integrity_key)
    }

    /// Seal a blob under the negotiated cipher and delegation key
    pub fn encrypt_blob(&self, blob: &Blob) -> Result<Vec<u8>> {
        let keys = self.completed_keys()?;
        blob.encrypt(&self.registry, keys.cipher(), keys.delegation_key())
    }

    /// Open a blob sealed by the peer with [`Context::encrypt_blob`]
    pub fn decrypt_blob(&self, ciphertext: &[u8]) -> Result<Blob> {
        let keys = self.completed_keys()?;
        Blob::decrypt(&self.registry, keys.cipher(), keys.delegation_key(), ciphertext)
    }

    fn completed_keys(&self) -> Result<&SessionKeys> {
        self.session
            .as_ref()
            .ok_or_else(|| SrdError::Config("handshake not completed".to_string()))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("role", &self.role)
            .field("state", &self.handshake.state())
            .field("status", &self.status)
            .field("blob_name", &self.blob_name())
            .field("cipher", &self.cipher())
            .finish_non_exhaustive()
    }
}

/// Run a client and a server against each other in-process.
///
/// Each side is fed only what the other produced in the same pass, and the
/// loop ends once neither side is still continuing.
pub fn drive(client: &mut Context, server: &mut Context) -> (Status, Status) {
    let mut to_client: Vec<u8> = Vec::new();

    for _ in 0..=MAX_ROUNDS {
        let to_server = if client.status().is_continue() {
            client.authenticate(&to_client).1.unwrap_or_default()
        } else {
            Vec::new()
        };
        if client.status().is_terminal() && server.status().is_terminal() {
            break;
        }

        to_client = if server.status().is_continue() {
            server.authenticate(&to_server).1.unwrap_or_default()
        } else {
            Vec::new()
        };
        if client.status().is_terminal() && server.status().is_terminal() {
            break;
        }
    }

    (client.status().clone(), server.status().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BasicBlob;

    fn client_with_basic() -> Context {
        let mut client = Context::client();
        client.set_typed_blob(&BasicBlob::new("username", "password"));
        client
    }

    #[test]
    fn test_output_is_idempotent() {
        let mut client = client_with_basic();
        assert!(client.output().is_none());
        assert_eq!(client.input(&[]), Status::Continue);

        let first = client.output().unwrap().to_vec();
        let second = client.output().unwrap().to_vec();
        assert_eq!(first, second);
        assert_eq!(client.state(), HandshakeState::AwaitingPeer { round: 1 });
    }

    #[test]
    fn test_keys_absent_before_completion() {
        let mut client = client_with_basic();
        let mut server = Context::server();

        client.input(&[]);
        server.input(client.output().unwrap());

        assert!(client.cipher().is_none());
        assert!(client.delegation_key().is_none());
        assert!(server.integrity_key().is_none());
        assert!(matches!(
            client.encrypt_blob(&Blob::new("x", "y")),
            Err(SrdError::Config(_))
        ));
    }

    #[test]
    fn test_failed_status_is_sticky() {
        let mut server = Context::server();
        let status = server.input(&[]);
        assert!(matches!(status, Status::Failed(SrdError::Protocol(_))));

        assert_eq!(server.input(b"anything"), status);
        assert_eq!(server.input(&[]), status);
        assert!(server.output().is_none());
        assert_eq!(server.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_missing_blob_is_config_error() {
        let mut client = Context::client();
        assert!(matches!(
            client.input(&[]),
            Status::Failed(SrdError::Config(_))
        ));
    }

    #[test]
    fn test_oversized_input_rejected() {
        let config = ContextConfig::default().with_max_message_size(16);
        let mut server =
            Context::with_config(Role::Server, CipherRegistry::default(), config).unwrap();
        assert!(matches!(
            server.input(&[0u8; 17]),
            Status::Failed(SrdError::Protocol(_))
        ));
        assert_eq!(server.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_oversized_input_mid_handshake_fails_machine() {
        let config = ContextConfig::default().with_max_message_size(256);
        let mut client =
            Context::with_config(Role::Client, CipherRegistry::default(), config).unwrap();
        client.set_typed_blob(&BasicBlob::new("username", "password"));
        let mut server = Context::server();

        client.input(&[]);
        server.input(client.output().unwrap());
        let offer = server.output().unwrap().to_vec();
        assert_eq!(client.input(&offer), Status::Continue);
        assert_eq!(client.state(), HandshakeState::AwaitingPeer { round: 2 });

        let status = client.input(&[0u8; 257]);
        assert!(matches!(status, Status::Failed(SrdError::Protocol(_))));
        assert_eq!(client.state(), HandshakeState::Failed);
        assert!(client.output().is_none());
        assert!(client.delegation_key().is_none());

        assert_eq!(client.input(&[1u8; 8]), status);
        assert_eq!(client.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_config_without_registered_cipher() {
        let registry = CipherRegistry::builder()
            .with(CipherId::Aes256Gcm)
            .build()
            .unwrap();
        let config = ContextConfig::default().with_ciphers(&[CipherId::ChaCha20Poly1305]);
        assert!(matches!(
            Context::with_config(Role::Client, registry, config),
            Err(SrdError::Config(_))
        ));
    }

    #[test]
    fn test_blob_accessors_distinguish_empty_from_unset() {
        let mut client = Context::client();
        assert!(client.blob_name().is_none());
        assert!(client.blob_data().is_none());

        client.set_blob("Basic", Vec::new());
        assert_eq!(client.blob_name(), Some("Basic"));
        assert_eq!(client.blob_data(), Some(&[][..]));
    }

    #[test]
    fn test_typed_blob_by_name() {
        let client = client_with_basic();
        let basic = client.typed_blob::<BasicBlob>().unwrap().unwrap();
        assert_eq!(basic.username(), "username");
        assert!(client
            .typed_blob::<crate::blob::TextBlob>()
            .unwrap()
            .is_none());
    }
}
