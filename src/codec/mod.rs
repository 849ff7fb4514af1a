//! Payload codec
//!
//! Converts a finished clip into its transport form: base64 text, then a
//! symmetric ChaCha20-Poly1305 transform. The sealed output is
//! `base64(nonce || ciphertext)`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand_core::{OsRng, RngCore};
use thiserror::Error;

use crate::recorder::state::Clip;

/// Fixed pre-shared transport key, carried for compatibility with the
/// deployed verification service.
///
/// TODO: move key provisioning to a managed secret once the service grows
/// per-tenant keys.
const TRANSPORT_KEY: [u8; 32] = *b"facegate-static-transport-key-01";

const NONCE_LEN: usize = 12;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// The recorder produced no data; fatal to the current session.
    #[error("clip is empty")]
    EmptyClip,

    #[error("payload encryption failed")]
    Encrypt,

    #[error("payload decryption failed")]
    Decrypt,

    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Encrypted, transport-ready representation of a finished clip.
///
/// Immutable once produced; owned by the in-flight submission and discarded
/// when the remote call resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    ciphertext: String,
}

impl EncodedPayload {
    pub fn as_str(&self) -> &str {
        &self.ciphertext
    }
}

/// Encode-then-encrypt pipeline for finished clips.
pub struct PayloadCodec {
    key: [u8; 32],
}

impl PayloadCodec {
    /// Codec under the embedded pre-shared key.
    pub fn new() -> Self {
        Self::with_key(TRANSPORT_KEY)
    }

    /// Codec under an explicit key.
    pub fn with_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Base64-encode a clip. The clip must be non-empty.
    pub fn encode(clip: &Clip) -> Result<String, CodecError> {
        if clip.data.is_empty() {
            return Err(CodecError::EmptyClip);
        }
        Ok(BASE64.encode(&clip.data))
    }

    /// Encrypt encoded text under the transport key with a fresh nonce.
    pub fn encrypt(&self, text: &str) -> Result<String, CodecError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, text.as_bytes())
            .map_err(|_| CodecError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Encode then encrypt a clip into its submission payload.
    pub fn seal(&self, clip: &Clip) -> Result<EncodedPayload, CodecError> {
        let encoded = Self::encode(clip)?;
        let ciphertext = self.encrypt(&encoded)?;
        tracing::debug!(
            session = %clip.session.id,
            clip_bytes = clip.data.len(),
            payload_bytes = ciphertext.len(),
            "clip sealed for submission"
        );
        Ok(EncodedPayload { ciphertext })
    }

    /// Invert [`encrypt`](Self::encrypt): recover the base64 clip text.
    pub fn open(&self, payload: &EncodedPayload) -> Result<String, CodecError> {
        let sealed = BASE64.decode(&payload.ciphertext)?;
        if sealed.len() < NONCE_LEN {
            return Err(CodecError::Decrypt);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CodecError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CodecError::Decrypt)
    }
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new()
    }
}
