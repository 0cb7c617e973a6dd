//! Named payloads and their authenticated container
//!
//! A sealed blob is the cipher output over the canonical frame
//!
//! ```text
//! name_len: u64 | name: UTF-8 | data_len: u64 | data
//! ```
//!
//! so the name travels with the data and only the cipher and key are needed
//! to open it.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use bincode::Options;

use crate::cipher::{CipherId, CipherRegistry};
use crate::error::{Result, SrdError};
use crate::protocol::wire;

/// A named, opaque byte payload, wiped on drop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Blob {
    name: String,
    data: Vec<u8>,
}

impl Blob {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Serialize and seal the blob under `cipher`/`key`
    pub fn encrypt(&self, registry: &CipherRegistry, cipher: CipherId, key: &[u8]) -> Result<Vec<u8>> {
        let aead = registry.get(cipher)?;
        if key.len() != aead.key_len() {
            return Err(SrdError::Config(format!(
                "{cipher} requires a {} byte key, got {}",
                aead.key_len(),
                key.len()
            )));
        }

        let frame = Zeroizing::new(wire().serialize(self)?);
        aead.encrypt(key, &frame)
    }

    /// Open a sealed blob, verifying its integrity before parsing
    pub fn decrypt(
        registry: &CipherRegistry,
        cipher: CipherId,
        key: &[u8],
        ciphertext: &[u8],
    ) -> Result<Self> {
        let aead = registry.get(cipher)?;
        if key.len() != aead.key_len() {
            return Err(SrdError::Config(format!(
                "{cipher} requires a {} byte key, got {}",
                aead.key_len(),
                key.len()
            )));
        }

        let frame = Zeroizing::new(aead.decrypt(key, ciphertext)?);
        wire()
            .deserialize(&frame)
            .map_err(|e| SrdError::Format(format!("invalid blob frame: {e}")))
    }
}

/// A blob whose data has a known structure, identified by its name
pub trait TypedBlob: Sized {
    const NAME: &'static str;

    fn to_bytes(&self) -> Zeroizing<Vec<u8>>;

    fn from_bytes(data: &[u8]) -> Result<Self>;

    fn to_blob(&self) -> Blob {
        Blob::new(Self::NAME, self.to_bytes().to_vec())
    }

    /// Decode `blob` if it carries this type's name
    fn from_blob(blob: &Blob) -> Result<Option<Self>> {
        if blob.name() != Self::NAME {
            return Ok(None);
        }
        Self::from_bytes(blob.data()).map(Some)
    }
}

/// `username:password` credentials
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct BasicBlob {
    username: String,
    password: String,
}

impl BasicBlob {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for BasicBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicBlob")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl TypedBlob for BasicBlob {
    const NAME: &'static str = "Basic";

    fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(
            self.username.len() + 1 + self.password.len(),
        ));
        out.extend_from_slice(self.username.as_bytes());
        out.push(b':');
        out.extend_from_slice(self.password.as_bytes());
        out
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| SrdError::Format("Basic blob is not UTF-8".to_string()))?;

        let parts: Vec<&str> = text.split(':').collect();
        match parts.as_slice() {
            [username, password] => Ok(Self::new(username, password)),
            _ => Err(SrdError::Format(
                "Basic blob must be username:password".to_string(),
            )),
        }
    }
}

/// Free-form UTF-8 text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBlob {
    text: String,
}

impl TextBlob {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl TypedBlob for TextBlob {
    const NAME: &'static str = "Text";

    fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.text.as_bytes().to_vec())
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        String::from_utf8(data.to_vec())
            .map(|text| Self { text })
            .map_err(|_| SrdError::Format("Text blob is not UTF-8".to_string()))
    }
}

/// Windows logon credentials
///
/// ```text
/// username_len: u16 LE | password_len: u16 LE | username | 0x00 | password | 0x00
/// ```
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct LogonBlob {
    username: String,
    password: String,
}

impl LogonBlob {
    /// Fails if either field does not fit its 16-bit length prefix
    pub fn new(username: &str, password: &str) -> Result<Self> {
        for (field, value) in [("username", username), ("password", password)] {
            if value.len() > u16::MAX as usize {
                return Err(SrdError::Config(format!(
                    "Logon {field} longer than {} bytes",
                    u16::MAX
                )));
            }
        }

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for LogonBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogonBlob")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl TypedBlob for LogonBlob {
    const NAME: &'static str = "Logon";

    fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(
            6 + self.username.len() + self.password.len(),
        ));
        // lengths are bounded by LogonBlob::new
        out.extend_from_slice(&(self.username.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.password.len() as u16).to_le_bytes());
        out.extend_from_slice(self.username.as_bytes());
        out.push(0);
        out.extend_from_slice(self.password.as_bytes());
        out.push(0);
        out
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut rest = data;
        let username_len = take_u16(&mut rest)?;
        let password_len = take_u16(&mut rest)?;
        let username = take_terminated(&mut rest, username_len)?;
        let password = take_terminated(&mut rest, password_len)?;

        if !rest.is_empty() {
            return Err(SrdError::Format(format!(
                "{} trailing bytes after Logon blob",
                rest.len()
            )));
        }
        Self::new(username, password)
    }
}

fn take_u16(rest: &mut &[u8]) -> Result<usize> {
    let data: &[u8] = *rest;
    if data.len() < 2 {
        return Err(SrdError::Format("truncated Logon blob".to_string()));
    }
    *rest = &data[2..];
    Ok(u16::from_le_bytes([data[0], data[1]]) as usize)
}

/// `len` bytes of UTF-8 followed by a NUL
fn take_terminated<'a>(rest: &mut &'a [u8], len: usize) -> Result<&'a str> {
    let data: &'a [u8] = *rest;
    if data.len() < len + 1 {
        return Err(SrdError::Format("truncated Logon blob".to_string()));
    }
    if data[len] != 0 {
        return Err(SrdError::Format("unterminated Logon field".to_string()));
    }

    let text = std::str::from_utf8(&data[..len])
        .map_err(|_| SrdError::Format("Logon field is not UTF-8".to_string()))?;
    *rest = &data[len + 1..];
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random_bytes;

    #[test]
    fn test_round_trip_every_cipher() {
        let registry = CipherRegistry::default();
        let blob = Blob::new("Basic", "username:password");

        for cipher in CipherId::ALL {
            let key = random_bytes::<32>();
            let sealed = blob.encrypt(&registry, cipher, &key).unwrap();
            let opened = Blob::decrypt(&registry, cipher, &key, &sealed).unwrap();
            assert_eq!(opened, blob);
        }
    }

    #[test]
    fn test_empty_data_survives() {
        let registry = CipherRegistry::default();
        let key = random_bytes::<32>();
        let blob = Blob::new("empty", Vec::new());

        let sealed = blob.encrypt(&registry, CipherId::Aes256Gcm, &key).unwrap();
        let opened = Blob::decrypt(&registry, CipherId::Aes256Gcm, &key, &sealed).unwrap();
        assert_eq!(opened.name(), "empty");
        assert!(opened.data().is_empty());
    }

    #[test]
    fn test_every_flipped_byte_detected() {
        let registry = CipherRegistry::default();
        let key = random_bytes::<32>();
        let sealed = Blob::new("text/plain", "Client message!!!!!")
            .encrypt(&registry, CipherId::XChaCha20Poly1305, &key)
            .unwrap();

        for i in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x80;
            assert_eq!(
                Blob::decrypt(&registry, CipherId::XChaCha20Poly1305, &key, &tampered),
                Err(SrdError::Integrity),
                "byte {i} flip went undetected"
            );
        }
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let registry = CipherRegistry::default();
        let sealed = Blob::new("text/plain", "secret")
            .encrypt(&registry, CipherId::ChaCha20Poly1305, &[1u8; 32])
            .unwrap();
        assert_eq!(
            Blob::decrypt(&registry, CipherId::ChaCha20Poly1305, &[2u8; 32], &sealed),
            Err(SrdError::Integrity)
        );
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        let registry = CipherRegistry::default();
        let blob = Blob::new("text/plain", "x");
        assert!(matches!(
            blob.encrypt(&registry, CipherId::Aes256Gcm, &[0u8; 31]),
            Err(SrdError::Config(_))
        ));
        assert!(matches!(
            Blob::decrypt(&registry, CipherId::Aes256Gcm, &[0u8; 33], &[0u8; 64]),
            Err(SrdError::Config(_))
        ));
    }

    #[test]
    fn test_unregistered_cipher_rejected() {
        let registry = CipherRegistry::builder()
            .with(CipherId::Aes256Gcm)
            .build()
            .unwrap();
        let blob = Blob::new("text/plain", "x");
        assert!(matches!(
            blob.encrypt(&registry, CipherId::ChaCha20Poly1305, &[0u8; 32]),
            Err(SrdError::Config(_))
        ));
    }

    #[test]
    fn test_garbage_frame_is_format_error() {
        let registry = CipherRegistry::default();
        let key = [4u8; 32];
        let sealed = registry
            .encrypt(CipherId::Aes256Gcm, &key, &[0xff; 5])
            .unwrap();
        assert!(matches!(
            Blob::decrypt(&registry, CipherId::Aes256Gcm, &key, &sealed),
            Err(SrdError::Format(_))
        ));
    }

    #[test]
    fn test_basic_blob() {
        let basic = BasicBlob::new("username", "password");
        let blob = basic.to_blob();
        assert_eq!(blob.name(), "Basic");
        assert_eq!(blob.data(), b"username:password");

        let parsed = BasicBlob::from_blob(&blob).unwrap().unwrap();
        assert_eq!(parsed.username(), "username");
        assert_eq!(parsed.password(), "password");

        assert!(BasicBlob::from_bytes(b"no-separator").is_err());
        assert!(BasicBlob::from_bytes(b"a:b:c").is_err());
        assert!(BasicBlob::from_blob(&Blob::new("Text", "a:b")).unwrap().is_none());
    }

    #[test]
    fn test_blob_wipes_credentials() {
        let basic = BasicBlob::new("username", "password");
        let bytes: Zeroizing<Vec<u8>> = basic.to_bytes();
        assert_eq!(bytes.as_slice(), b"username:password");

        let mut blob = basic.to_blob();
        blob.zeroize();
        assert!(blob.name().is_empty());
        assert!(blob.data().is_empty());
    }

    #[test]
    fn test_logon_blob_layout() {
        let logon = LogonBlob::new("admin", "hunter2").unwrap();
        let blob = logon.to_blob();
        assert_eq!(blob.name(), "Logon");
        assert_eq!(
            blob.data(),
            b"\x05\x00\x07\x00admin\x00hunter2\x00".as_slice()
        );

        let parsed = LogonBlob::from_blob(&blob).unwrap().unwrap();
        assert_eq!(parsed, logon);
        assert_eq!(parsed.username(), "admin");
        assert_eq!(parsed.password(), "hunter2");

        let empty = LogonBlob::new("", "").unwrap();
        assert_eq!(&*empty.to_bytes(), &[0, 0, 0, 0, 0, 0]);
        assert_eq!(LogonBlob::from_bytes(&empty.to_bytes()).unwrap(), empty);
    }

    #[test]
    fn test_logon_blob_malformed() {
        let good = LogonBlob::new("admin", "hunter2").unwrap().to_bytes();

        // every strict prefix is truncated
        for len in 0..good.len() {
            assert!(
                matches!(LogonBlob::from_bytes(&good[..len]), Err(SrdError::Format(_))),
                "prefix of {len} bytes accepted"
            );
        }

        let mut unterminated = good.to_vec();
        unterminated[4 + 5] = b'!';
        assert!(matches!(
            LogonBlob::from_bytes(&unterminated),
            Err(SrdError::Format(_))
        ));

        let mut trailing = good.to_vec();
        trailing.push(0);
        assert!(matches!(
            LogonBlob::from_bytes(&trailing),
            Err(SrdError::Format(_))
        ));

        assert!(matches!(
            LogonBlob::from_bytes(b"\x01\x00\x00\x00\xff\x00\x00"),
            Err(SrdError::Format(_))
        ));
        assert!(LogonBlob::from_blob(&Blob::new("Basic", "a:b")).unwrap().is_none());
    }

    #[test]
    fn test_logon_field_too_long() {
        let long = "x".repeat(u16::MAX as usize + 1);
        assert!(matches!(LogonBlob::new(&long, "p"), Err(SrdError::Config(_))));
        assert!(LogonBlob::new(&long[1..], "p").is_ok());
    }

    #[test]
    fn test_text_blob() {
        let blob = TextBlob::new("hello").to_blob();
        assert_eq!(TextBlob::from_blob(&blob).unwrap().unwrap().text(), "hello");
        assert!(TextBlob::from_bytes(&[0xc3, 0x28]).is_err());
    }
}
