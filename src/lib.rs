//! # SRD: mutual authentication with credential delegation
//!
//! Two endpoints run a short message exchange that authenticates both ends
//! and leaves them with the same pair of keys:
//! - **X25519** ephemeral key exchange
//! - **HKDF-SHA256** for the delegation and integrity keys
//! - **HMAC-SHA256** transcript MACs and optional channel binding
//! - **AES-256-GCM / ChaCha20-Poly1305 / XChaCha20-Poly1305** for blobs
//!
//! The client finishes by delegating a credential blob (for instance a
//! `Basic` `username:password` pair) encrypted under the delegation key.
//!
//! ## Example
//!
//! ```rust,no_run
//! use srd::{Blob, Context, Status};
//!
//! let mut client = Context::client();
//! let mut server = Context::server();
//! client.set_blob("Basic", "username:password");
//!
//! // The client speaks first, with no input
//! let mut status = client.input(&[]);
//! let mut message = client.output().map(<[u8]>::to_vec).unwrap_or_default();
//! let mut at_server = true;
//! let mut peer_status = Status::Continue;
//!
//! // Alternate until neither side is still continuing
//! while status.is_continue() || peer_status.is_continue() {
//!     let (ctx, st) = if at_server {
//!         (&mut server, &mut peer_status)
//!     } else {
//!         (&mut client, &mut status)
//!     };
//!     if st.is_continue() {
//!         *st = ctx.input(&message);
//!         message = ctx.output().map(<[u8]>::to_vec).unwrap_or_default();
//!     } else {
//!         message.clear();
//!     }
//!     at_server = !at_server;
//! }
//!
//! assert_eq!(client.delegation_key(), server.delegation_key());
//! assert_eq!(server.blob_data(), Some(&b"username:password"[..]));
//!
//! // Keys stay usable for blobs after the handshake
//! let sealed = client.encrypt_blob(&Blob::new("text/plain", "hello")).unwrap();
//! let opened = server.decrypt_blob(&sealed).unwrap();
//! assert_eq!(opened.data(), b"hello");
//! ```

pub mod auth_header;
pub mod blob;
pub mod cipher;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod protocol;

pub use blob::{BasicBlob, Blob, LogonBlob, TextBlob, TypedBlob};
pub use cipher::{AeadCipher, CipherId, CipherRegistry, CipherRegistryBuilder};
pub use config::ContextConfig;
pub use context::{drive, Context};
pub use crypto::SessionKeys;
pub use error::{Result, SrdError};
pub use handshake::{HandshakeState, Role, Status};
pub use protocol::SRD_VERSION;
