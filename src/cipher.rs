//! Cipher suite registry
//!
//! Every cipher is an authenticated encryption scheme exposed through the
//! [`AeadCipher`] capability trait. The [`CipherRegistry`] maps negotiated
//! [`CipherId`]s to implementations and is passed around as a value, so tests
//! can swap in their own ciphers.
//!
//! Ciphertext layout produced by the built-in ciphers:
//!
//! ```text
//! nonce (12 or 24 bytes) || ciphertext || tag (16 bytes)
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use aead::generic_array::typenum::Unsigned;
use aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use serde::{Deserialize, Serialize};

use crate::crypto::random_vec;
use crate::error::{Result, SrdError};

const AES256_GCM_FLAG: u32 = 0x0000_0001;
const CHACHA20_POLY1305_FLAG: u32 = 0x0000_0100;
const XCHACHA20_POLY1305_FLAG: u32 = 0x0000_0200;

/// Symmetric ciphers that can be negotiated by the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherId {
    /// AES-256 in Galois/Counter Mode
    Aes256Gcm,
    /// ChaCha20 stream cipher with Poly1305 authenticator (96-bit nonce)
    ChaCha20Poly1305,
    /// ChaCha20-Poly1305 with an extended 192-bit nonce
    XChaCha20Poly1305,
}

impl CipherId {
    /// All built-in ciphers, most preferred first
    pub const ALL: [CipherId; 3] = [
        CipherId::XChaCha20Poly1305,
        CipherId::ChaCha20Poly1305,
        CipherId::Aes256Gcm,
    ];

    pub fn flag(&self) -> u32 {
        match self {
            CipherId::Aes256Gcm => AES256_GCM_FLAG,
            CipherId::ChaCha20Poly1305 => CHACHA20_POLY1305_FLAG,
            CipherId::XChaCha20Poly1305 => XCHACHA20_POLY1305_FLAG,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CipherId::Aes256Gcm => "AES-256-GCM",
            CipherId::ChaCha20Poly1305 => "ChaCha20-Poly1305",
            CipherId::XChaCha20Poly1305 => "XChaCha20-Poly1305",
        }
    }

    /// Decode every known cipher present in a flag set, in preference order.
    /// Unknown bits are ignored.
    pub fn from_flags(flags: u32) -> Vec<CipherId> {
        Self::ALL
            .iter()
            .copied()
            .filter(|c| flags & c.flag() != 0)
            .collect()
    }

    pub fn to_flags(ciphers: &[CipherId]) -> u32 {
        ciphers.iter().fold(0, |acc, c| acc | c.flag())
    }

    /// Pick the most preferred cipher out of a candidate set
    pub fn best(ciphers: &[CipherId]) -> Option<CipherId> {
        Self::ALL.iter().copied().find(|c| ciphers.contains(c))
    }
}

impl fmt::Display for CipherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<CipherId> for u32 {
    fn from(cipher: CipherId) -> Self {
        cipher.flag()
    }
}

impl TryFrom<u32> for CipherId {
    type Error = SrdError;

    /// Exactly one known flag must be set
    fn try_from(value: u32) -> Result<Self> {
        match value {
            AES256_GCM_FLAG => Ok(CipherId::Aes256Gcm),
            CHACHA20_POLY1305_FLAG => Ok(CipherId::ChaCha20Poly1305),
            XCHACHA20_POLY1305_FLAG => Ok(CipherId::XChaCha20Poly1305),
            other => Err(SrdError::Config(format!(
                "unsupported cipher identifier 0x{other:08x}"
            ))),
        }
    }
}

/// Authenticated encryption capability
///
/// `decrypt` must fail closed: any authentication failure returns
/// [`SrdError::Integrity`] and no plaintext.
pub trait AeadCipher: Send + Sync {
    fn key_len(&self) -> usize;

    fn nonce_len(&self) -> usize;

    /// Encrypt under a fresh nonce, returning `nonce || ciphertext || tag`
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Reverse of [`AeadCipher::encrypt`]
    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Adapter from a RustCrypto AEAD type to [`AeadCipher`]
pub struct RustCryptoAead<C> {
    _cipher: PhantomData<fn() -> C>,
}

impl<C> RustCryptoAead<C> {
    pub fn new() -> Self {
        Self {
            _cipher: PhantomData,
        }
    }
}

impl<C> Default for RustCryptoAead<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> RustCryptoAead<C>
where
    C: Aead + KeyInit,
{
    fn init(&self, key: &[u8]) -> Result<C> {
        if key.len() != <C::KeySize as Unsigned>::USIZE {
            return Err(SrdError::Config(format!(
                "key length {} does not match required {}",
                key.len(),
                <C::KeySize as Unsigned>::USIZE
            )));
        }
        C::new_from_slice(key).map_err(|_| SrdError::Config("invalid key".to_string()))
    }
}

impl<C> AeadCipher for RustCryptoAead<C>
where
    C: Aead + KeyInit,
{
    fn key_len(&self) -> usize {
        <C::KeySize as Unsigned>::USIZE
    }

    fn nonce_len(&self) -> usize {
        <C::NonceSize as Unsigned>::USIZE
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.init(key)?;
        let nonce = random_vec(self.nonce_len());

        let sealed = cipher
            .encrypt(aead::Nonce::<C>::from_slice(&nonce), plaintext)
            .map_err(|_| SrdError::Crypto("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(nonce.len() + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.init(key)?;
        let nonce_len = self.nonce_len();

        if ciphertext.len() < nonce_len + <C::TagSize as Unsigned>::USIZE {
            return Err(SrdError::Integrity);
        }

        let (nonce, sealed) = ciphertext.split_at(nonce_len);
        cipher
            .decrypt(aead::Nonce::<C>::from_slice(nonce), sealed)
            .map_err(|_| SrdError::Integrity)
    }
}

fn builtin(id: CipherId) -> Arc<dyn AeadCipher> {
    match id {
        CipherId::Aes256Gcm => Arc::new(RustCryptoAead::<Aes256Gcm>::new()),
        CipherId::ChaCha20Poly1305 => Arc::new(RustCryptoAead::<ChaCha20Poly1305>::new()),
        CipherId::XChaCha20Poly1305 => Arc::new(RustCryptoAead::<XChaCha20Poly1305>::new()),
    }
}

/// The set of ciphers an endpoint can use
#[derive(Clone)]
pub struct CipherRegistry {
    entries: Vec<(CipherId, Arc<dyn AeadCipher>)>,
}

impl CipherRegistry {
    pub fn builder() -> CipherRegistryBuilder {
        CipherRegistryBuilder::default()
    }

    /// Look up the implementation behind a negotiated identifier
    pub fn get(&self, id: CipherId) -> Result<&dyn AeadCipher> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == id)
            .map(|(_, cipher)| cipher.as_ref())
            .ok_or_else(|| SrdError::Config(format!("cipher {id} is not registered")))
    }

    pub fn supports(&self, id: CipherId) -> bool {
        self.entries.iter().any(|(entry, _)| *entry == id)
    }

    /// Registered identifiers in preference order
    pub fn ids(&self) -> Vec<CipherId> {
        CipherId::ALL
            .iter()
            .copied()
            .filter(|id| self.supports(*id))
            .collect()
    }

    pub fn encrypt(&self, id: CipherId, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.get(id)?.encrypt(key, plaintext)
    }

    pub fn decrypt(&self, id: CipherId, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.get(id)?.decrypt(key, ciphertext)
    }
}

impl Default for CipherRegistry {
    /// Every built-in cipher
    fn default() -> Self {
        Self {
            entries: CipherId::ALL.iter().map(|id| (*id, builtin(*id))).collect(),
        }
    }
}

impl fmt::Debug for CipherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(id, _)| id))
            .finish()
    }
}

/// Collects cipher selections and validates them in [`CipherRegistryBuilder::build`]
#[derive(Default)]
pub struct CipherRegistryBuilder {
    flags: Vec<u32>,
    custom: Vec<(CipherId, Arc<dyn AeadCipher>)>,
}

impl CipherRegistryBuilder {
    /// Add a built-in cipher
    pub fn with(mut self, id: CipherId) -> Self {
        self.flags.push(id.flag());
        self
    }

    /// Add built-in ciphers from a raw flag set, e.g. read from configuration
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags.push(flags);
        self
    }

    /// Register a custom implementation, replacing the built-in one for `id`
    pub fn with_cipher(mut self, id: CipherId, cipher: Arc<dyn AeadCipher>) -> Self {
        self.custom.push((id, cipher));
        self
    }

    pub fn build(self) -> Result<CipherRegistry> {
        let mut entries: Vec<(CipherId, Arc<dyn AeadCipher>)> = Vec::new();

        for flags in self.flags {
            let known = CipherId::from_flags(flags);
            let unknown = flags & !CipherId::to_flags(&known);
            if unknown != 0 || flags == 0 {
                return Err(SrdError::Config(format!(
                    "unsupported cipher flags 0x{flags:08x}"
                )));
            }
            for id in known {
                if !entries.iter().any(|(entry, _)| *entry == id) {
                    entries.push((id, builtin(id)));
                }
            }
        }

        for (id, cipher) in self.custom {
            entries.retain(|(entry, _)| *entry != id);
            entries.push((id, cipher));
        }

        if entries.is_empty() {
            return Err(SrdError::Config("cipher registry is empty".to_string()));
        }

        Ok(CipherRegistry { entries })
    }
}
