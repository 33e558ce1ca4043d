//! Envelope crypto for the WeCom callback protocol: SHA-1 signatures over
//! sorted inputs and AES-256-CBC message bodies with manual PKCS#7 padding.

use aes::Aes256;
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::warn;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Protocol pads plaintext to a 32-byte boundary (not the AES block size).
const PAD_BLOCK: usize = 32;
const RANDOM_PREFIX_LEN: usize = 16;
const LEN_FIELD_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("cipher text is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("AES key must decode to 32 bytes, got {0}")]
    KeyLength(usize),

    #[error("cipher text length {0} is not a multiple of the AES block size")]
    BlockAlignment(usize),

    #[error("decrypted payload too short: {0} bytes")]
    TooShort(usize),
}

/// Decrypted callback payload: the inner plaintext plus the tenant id the
/// sender embedded after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedPayload {
    pub plain_text: String,
    pub origin_id: String,
}

/// Holds the callback token, the decoded 32-byte AES key and the expected
/// tenant (corp) id for one WeCom app.
#[derive(Clone)]
pub struct CryptoEnvelope {
    token: String,
    aes_key: [u8; 32],
    tenant_id: String,
}

impl CryptoEnvelope {
    /// `encoding_aes_key` is the 43-char base64 value from the platform
    /// console; the protocol leaves the trailing `=` implied.
    pub fn new(
        token: impl Into<String>,
        encoding_aes_key: &str,
        tenant_id: impl Into<String>,
    ) -> Result<Self, DecryptError> {
        let raw = BASE64.decode(format!("{encoding_aes_key}="))?;
        let aes_key: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| DecryptError::KeyLength(raw.len()))?;
        Ok(Self {
            token: token.into(),
            aes_key,
            tenant_id: tenant_id.into(),
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// SHA-1 hex over the lexicographically sorted concatenation of the
    /// token, timestamp, nonce and (when present) the cipher text.
    pub fn compute_signature(&self, timestamp: &str, nonce: &str, extra: Option<&str>) -> String {
        let mut parts = vec![self.token.as_str(), timestamp, nonce];
        if let Some(extra) = extra {
            parts.push(extra);
        }
        parts.sort_unstable();
        let mut hasher = Sha1::new();
        for part in parts {
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Exact-match signature check. Any empty required input fails closed.
    pub fn verify_signature(
        &self,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        cipher_text: &str,
    ) -> bool {
        if signature.is_empty() || timestamp.is_empty() || nonce.is_empty() || self.token.is_empty()
        {
            return false;
        }
        let extra = (!cipher_text.is_empty()).then_some(cipher_text);
        self.compute_signature(timestamp, nonce, extra) == signature
    }

    /// Decrypt a base64 cipher text into the inner message.
    ///
    /// Plaintext layout: `16B random | u32 BE msg_len | msg | tenant_id`.
    /// Structural faults (bad base64, misaligned blocks, truncated payload)
    /// are hard errors; a malformed pad byte or declared length is recovered
    /// from, because the live platform emits both and the messages are still
    /// usable. A tenant id that does not match ours only warns.
    pub fn decrypt(&self, cipher_b64: &str) -> Result<DecryptedPayload, DecryptError> {
        let cipher = BASE64.decode(cipher_b64.trim())?;
        if cipher.is_empty() || cipher.len() % 16 != 0 {
            return Err(DecryptError::BlockAlignment(cipher.len()));
        }

        let iv = &self.aes_key[..16];
        let decryptor = Aes256CbcDec::new_from_slices(&self.aes_key, iv)
            .map_err(|_| DecryptError::KeyLength(self.aes_key.len()))?;
        let mut plain = decryptor
            .decrypt_padded_vec_mut::<NoPadding>(&cipher)
            .map_err(|_| DecryptError::BlockAlignment(cipher.len()))?;

        // Manual PKCS#7 strip. Valid pad is 1..=32; anything else means the
        // sender skipped padding, so keep the buffer whole and carry on.
        if let Some(&pad) = plain.last() {
            let pad = pad as usize;
            if (1..=PAD_BLOCK).contains(&pad) && pad <= plain.len() {
                plain.truncate(plain.len() - pad);
            } else {
                warn!("crypto: pad byte {} out of range, keeping full buffer", pad);
            }
        }

        if plain.len() <= RANDOM_PREFIX_LEN + LEN_FIELD_LEN {
            return Err(DecryptError::TooShort(plain.len()));
        }

        let body = &plain[RANDOM_PREFIX_LEN..];
        let declared = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
        let available = body.len() - LEN_FIELD_LEN;
        let msg_len = if declared > available {
            let recovered = available.saturating_sub(self.tenant_id.len());
            warn!(
                "crypto: declared message length {} exceeds {} available, recovering as {}",
                declared, available, recovered
            );
            recovered
        } else {
            declared
        };

        let msg = &body[LEN_FIELD_LEN..LEN_FIELD_LEN + msg_len];
        let origin = &body[LEN_FIELD_LEN + msg_len..];
        let plain_text = String::from_utf8_lossy(msg).into_owned();
        let origin_id = String::from_utf8_lossy(origin).into_owned();

        if origin_id != self.tenant_id {
            warn!(
                "crypto: tenant id mismatch, got {:?} expected {:?}",
                origin_id, self.tenant_id
            );
        }

        Ok(DecryptedPayload {
            plain_text,
            origin_id,
        })
    }

    /// Encrypt a reply into the base64 envelope format the platform expects.
    pub fn encrypt(&self, plain: &str) -> String {
        let msg = plain.as_bytes();
        let mut buf =
            Vec::with_capacity(RANDOM_PREFIX_LEN + LEN_FIELD_LEN + msg.len() + self.tenant_id.len() + PAD_BLOCK);
        buf.extend((0..RANDOM_PREFIX_LEN).map(|_| fastrand::u8(..)));
        buf.extend_from_slice(&(msg.len() as u32).to_be_bytes());
        buf.extend_from_slice(msg);
        buf.extend_from_slice(self.tenant_id.as_bytes());

        // PKCS#7 to the 32-byte protocol boundary; a full pad block when
        // already aligned.
        let mut pad = PAD_BLOCK - buf.len() % PAD_BLOCK;
        if pad == 0 {
            pad = PAD_BLOCK;
        }
        buf.extend(std::iter::repeat_n(pad as u8, pad));

        let iv = &self.aes_key[..16];
        // The key is validated at construction; a 32-byte key and 16-byte IV
        // cannot fail here.
        let cipher = Aes256CbcEnc::new_from_slices(&self.aes_key, iv)
            .map(|enc| enc.encrypt_padded_vec_mut::<NoPadding>(&buf))
            .unwrap_or_default();
        BASE64.encode(cipher)
    }
}

impl std::fmt::Debug for CryptoEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoEnvelope")
            .field("token", &"***")
            .field("aes_key", &"***")
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}
