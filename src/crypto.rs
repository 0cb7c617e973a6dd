//! Key exchange, key schedule and MAC helpers used by the handshake

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cipher::CipherId;
use crate::error::{Result, SrdError};

type HmacSha256 = Hmac<Sha256>;

pub const NONCE_LEN: usize = 32;
pub const MAC_LEN: usize = 32;
pub const INTEGRITY_KEY_LEN: usize = 32;

const DELEGATION_LABEL: &[u8] = b"SRD delegation key";
const INTEGRITY_LABEL: &[u8] = b"SRD integrity key";

/// Ephemeral X25519 keypair for one handshake
pub struct EphemeralKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Compute the shared secret with the peer's public key.
    ///
    /// A non-contributory result (low-order peer point) is rejected.
    pub fn agree(&self, peer_public: &[u8; 32]) -> Result<SharedSecret> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        if !shared.was_contributory() {
            return Err(SrdError::Authentication);
        }
        Ok(SharedSecret(shared.to_bytes()))
    }
}

/// Raw Diffie-Hellman output, wiped on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Negotiated results of a completed handshake
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    #[zeroize(skip)]
    cipher: CipherId,
    delegation_key: Vec<u8>,
    integrity_key: [u8; INTEGRITY_KEY_LEN],
}

impl SessionKeys {
    pub fn cipher(&self) -> CipherId {
        self.cipher
    }

    pub fn delegation_key(&self) -> &[u8] {
        &self.delegation_key
    }

    pub fn integrity_key(&self) -> &[u8] {
        &self.integrity_key
    }
}

/// Key bytes are compared in constant time
impl PartialEq for SessionKeys {
    fn eq(&self, other: &Self) -> bool {
        let keys = self
            .delegation_key
            .as_slice()
            .ct_eq(other.delegation_key.as_slice())
            & self.integrity_key[..].ct_eq(&other.integrity_key[..]);
        self.cipher == other.cipher && bool::from(keys)
    }
}

impl Eq for SessionKeys {}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

/// Key schedule for deriving the delegation and integrity keys
///
/// ```text
/// PRK             = HKDF-Extract(client_nonce || server_nonce, shared_secret)
/// delegation_key  = HKDF-Expand(PRK, "SRD delegation key" || cipher || H(hello), key len)
/// integrity_key   = HKDF-Expand(PRK, "SRD integrity key"  || cipher || H(hello), 32)
/// ```
///
/// `H(hello)` is the SHA-256 of the Initiate and Offer messages as sent.
pub struct KeySchedule {
    hkdf: Hkdf<Sha256>,
}

impl KeySchedule {
    pub fn new(
        shared_secret: &SharedSecret,
        client_nonce: &[u8; NONCE_LEN],
        server_nonce: &[u8; NONCE_LEN],
    ) -> Self {
        let mut salt = [0u8; 2 * NONCE_LEN];
        salt[..NONCE_LEN].copy_from_slice(client_nonce);
        salt[NONCE_LEN..].copy_from_slice(server_nonce);

        let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared_secret.as_bytes());
        salt.zeroize();
        Self { hkdf }
    }

    /// Derive both keys bound to the negotiated cipher and hello transcript.
    /// `key_len` is the key size of the cipher implementation in use.
    pub fn derive(
        &self,
        cipher: CipherId,
        key_len: usize,
        hello_hash: &[u8; 32],
    ) -> Result<SessionKeys> {
        let mut delegation_key = vec![0u8; key_len];
        self.expand(DELEGATION_LABEL, cipher, hello_hash, &mut delegation_key)?;

        let mut integrity_key = [0u8; INTEGRITY_KEY_LEN];
        self.expand(INTEGRITY_LABEL, cipher, hello_hash, &mut integrity_key)?;

        Ok(SessionKeys {
            cipher,
            delegation_key,
            integrity_key,
        })
    }

    fn expand(
        &self,
        label: &[u8],
        cipher: CipherId,
        hello_hash: &[u8; 32],
        out: &mut [u8],
    ) -> Result<()> {
        let flag = cipher.flag().to_le_bytes();
        self.hkdf
            .expand_multi_info(&[label, flag.as_slice(), hello_hash.as_slice()], out)
            .map_err(|_| SrdError::Crypto("HKDF expansion failed".to_string()))
    }
}

/// SHA-256 over a sequence of messages
pub fn transcript_hash(messages: &[Vec<u8>]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for msg in messages {
        hasher.update(msg);
    }
    hasher.finalize().into()
}

/// HMAC-SHA256 over the transcript hash and the authenticated message bytes
pub fn compute_mac(
    integrity_key: &[u8],
    transcript: &[Vec<u8>],
    message: &[u8],
) -> Result<[u8; MAC_LEN]> {
    let mut mac = new_hmac(integrity_key)?;
    mac.update(&transcript_hash(transcript));
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time check of a MAC produced by [`compute_mac`]
pub fn verify_mac(
    integrity_key: &[u8],
    transcript: &[Vec<u8>],
    message: &[u8],
    tag: &[u8],
) -> Result<()> {
    let mut mac = new_hmac(integrity_key)?;
    mac.update(&transcript_hash(transcript));
    mac.update(message);
    mac.verify_slice(tag).map_err(|_| SrdError::Authentication)
}

/// Channel binding token: HMAC-SHA256(integrity_key, nonce || cert)
pub fn channel_binding(
    integrity_key: &[u8],
    nonce: &[u8; NONCE_LEN],
    cert: &[u8],
) -> Result<[u8; MAC_LEN]> {
    let mut mac = new_hmac(integrity_key)?;
    mac.update(nonce);
    mac.update(cert);
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time check of a channel binding token
pub fn verify_channel_binding(
    integrity_key: &[u8],
    nonce: &[u8; NONCE_LEN],
    cert: &[u8],
    token: &[u8],
) -> Result<()> {
    let mut mac = new_hmac(integrity_key)?;
    mac.update(nonce);
    mac.update(cert);
    mac.verify_slice(token).map_err(|_| SrdError::Authentication)
}

fn new_hmac(key: &[u8]) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| SrdError::Crypto("invalid HMAC key".to_string()))
}

/// Generate random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

pub fn random_vec(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}
