//! Authenticated envelope around session records.
//!
//! Write pipeline: record -> JSON -> deflate (when large enough) ->
//! AES-256-GCM -> HMAC over (version, scheme, nonce, compressed flag,
//! ciphertext) -> MessagePack envelope. Read is the reverse with
//! verification first; every verification or decode failure surfaces as
//! `Corruption`, never `NotFound`.
//!
//! Key material comes from the configured secret, either directly
//! (padded/truncated to 32 bytes) or through PBKDF2-HMAC-SHA256 with a
//! stored salt. The MAC scheme is versioned: writers always emit the
//! configured digest, readers additionally accept the legacy digest while
//! `digest_fallback` is set.

use std::io::Read;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use seshat_core::{SessionError, SessionPayload, SessionRecord, SessionResult};

use crate::config::{DigestAlgorithm, SessionConfig};

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

const CIPHER_KEY_LEN: usize = 32;
const MAC_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Schemes
// ---------------------------------------------------------------------------

/// Identifies how an envelope body was protected.
///
/// The cipher half is fixed per build (AES-256-GCM or plaintext body); the
/// digest half is what rolls during algorithm changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchemeId {
    /// AES-256-GCM body, HMAC-SHA256 envelope MAC.
    AesGcmSha256,
    /// AES-256-GCM body, HMAC-SHA1 envelope MAC (legacy digest).
    AesGcmSha1,
    /// Plaintext body, HMAC-SHA256 envelope MAC.
    PlainSha256,
    /// Plaintext body, HMAC-SHA1 envelope MAC (legacy digest).
    PlainSha1,
}

impl SchemeId {
    fn for_config(encrypt: bool, digest: DigestAlgorithm) -> Self {
        match (encrypt, digest) {
            (true, DigestAlgorithm::HmacSha256) => Self::AesGcmSha256,
            (true, DigestAlgorithm::HmacSha1) => Self::AesGcmSha1,
            (false, DigestAlgorithm::HmacSha256) => Self::PlainSha256,
            (false, DigestAlgorithm::HmacSha1) => Self::PlainSha1,
        }
    }

    fn digest(self) -> DigestAlgorithm {
        match self {
            Self::AesGcmSha256 | Self::PlainSha256 => DigestAlgorithm::HmacSha256,
            Self::AesGcmSha1 | Self::PlainSha1 => DigestAlgorithm::HmacSha1,
        }
    }

    fn is_encrypted(self) -> bool {
        matches!(self, Self::AesGcmSha256 | Self::AesGcmSha1)
    }

    fn wire_tag(self) -> u8 {
        match self {
            Self::AesGcmSha256 => 1,
            Self::AesGcmSha1 => 2,
            Self::PlainSha256 => 3,
            Self::PlainSha1 => 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The at-rest/on-wire container. Serialized with MessagePack (named fields,
/// so the format is self-describing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope format version.
    pub version: u8,
    /// Protection scheme for the body and MAC.
    pub scheme: SchemeId,
    /// KDF salt, present only when key derivation was used.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[serde(with = "opt_bytes")]
    pub salt: Option<Vec<u8>>,
    /// AES-GCM nonce. Empty for plaintext-body schemes.
    #[serde(with = "serde_bytes")]
    pub nonce: Vec<u8>,
    /// Body bytes: ciphertext, or (possibly compressed) plaintext.
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
    /// HMAC over (version, scheme, nonce, compressed, ciphertext).
    #[serde(with = "serde_bytes")]
    pub mac: Vec<u8>,
    /// Whether the body must be inflated after decryption.
    pub compressed: bool,
}

mod opt_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => serde_bytes::serialize(bytes, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let opt: Option<serde_bytes::ByteBuf> = Option::deserialize(d)?;
        Ok(opt.map(serde_bytes::ByteBuf::into_vec))
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct KeySet {
    cipher_key: [u8; CIPHER_KEY_LEN],
    mac_key: [u8; MAC_KEY_LEN],
}

/// Seals and opens session records.
///
/// Construct once per store from a frozen config; the key set is derived at
/// construction time so the hot path never runs the KDF for its own salt.
pub struct SessionCodec {
    scheme: SchemeId,
    keys: KeySet,
    salt: Option<Vec<u8>>,
    secret: String,
    kdf_iterations: u32,
    digest_fallback: bool,
    compress: bool,
    compression_threshold: usize,
}

impl SessionCodec {
    /// Builds a codec from the config's crypto options.
    ///
    /// # Errors
    ///
    /// Returns `Encryption` when the secret is empty (unusable key material).
    pub fn new(config: &SessionConfig) -> SessionResult<Self> {
        if config.secret.is_empty() {
            return Err(SessionError::Encryption {
                reason: "empty secret".to_string(),
            });
        }
        let salt = if config.use_kdf {
            Some(config.kdf_salt.clone().unwrap_or_else(|| {
                let mut salt = vec![0u8; SALT_LEN];
                rand::rng().fill_bytes(&mut salt);
                salt
            }))
        } else {
            None
        };
        let keys = derive_keys(
            &config.secret,
            salt.as_deref(),
            config.use_kdf,
            config.kdf_iterations,
        );
        Ok(Self {
            scheme: SchemeId::for_config(config.encrypt_at_rest, config.digest_algorithm),
            keys,
            salt,
            secret: config.secret.clone(),
            kdf_iterations: config.kdf_iterations,
            digest_fallback: config.digest_fallback,
            compress: config.compress_data,
            compression_threshold: config.compression_threshold,
        })
    }

    /// Seals a record into envelope bytes.
    ///
    /// # Errors
    ///
    /// `Validation` when the record cannot be serialized, `Encryption` on
    /// cipher failure.
    pub fn seal<T: SessionPayload>(&self, record: &SessionRecord<T>) -> SessionResult<Vec<u8>> {
        let plaintext = serde_json::to_vec(record).map_err(|e| SessionError::Validation {
            reason: format!("record encode: {e}"),
        })?;
        let envelope = self.seal_bytes(&plaintext)?;
        rmp_serde::to_vec_named(&envelope).map_err(|e| SessionError::Encryption {
            reason: format!("envelope encode: {e}"),
        })
    }

    /// Opens envelope bytes back into a record.
    ///
    /// # Errors
    ///
    /// `Corruption` for anything wrong with the bytes: envelope parse, MAC
    /// mismatch, rejected scheme, decrypt failure, inflate failure, or
    /// record parse.
    pub fn open<T: SessionPayload>(&self, bytes: &[u8]) -> SessionResult<SessionRecord<T>> {
        let envelope: Envelope =
            rmp_serde::from_slice(bytes).map_err(|e| SessionError::Corruption {
                reason: format!("envelope decode: {e}"),
            })?;
        let plaintext = self.open_envelope(&envelope)?;
        serde_json::from_slice(&plaintext).map_err(|e| SessionError::Corruption {
            reason: format!("record decode: {e}"),
        })
    }

    fn seal_bytes(&self, plaintext: &[u8]) -> SessionResult<Envelope> {
        let (body, compressed) =
            if self.compress && plaintext.len() > self.compression_threshold {
                (deflate(plaintext)?, true)
            } else {
                (plaintext.to_vec(), false)
            };

        let (nonce, ciphertext) = if self.scheme.is_encrypted() {
            let mut nonce = vec![0u8; NONCE_LEN];
            rand::rng().fill_bytes(&mut nonce);
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.keys.cipher_key));
            let ciphertext = cipher
                .encrypt(Nonce::from_slice(&nonce), body.as_ref())
                .map_err(|_| SessionError::Encryption {
                    reason: "aes-gcm encrypt failed".to_string(),
                })?;
            (nonce, ciphertext)
        } else {
            (Vec::new(), body)
        };

        let mac = compute_mac(
            self.scheme.digest(),
            &self.keys.mac_key,
            self.scheme,
            &nonce,
            compressed,
            &ciphertext,
        );

        Ok(Envelope {
            version: ENVELOPE_VERSION,
            scheme: self.scheme,
            salt: self.salt.clone(),
            nonce,
            ciphertext,
            mac,
            compressed,
        })
    }

    fn open_envelope(&self, envelope: &Envelope) -> SessionResult<Vec<u8>> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(SessionError::Corruption {
                reason: format!("unsupported envelope version {}", envelope.version),
            });
        }
        if envelope.scheme.digest() != self.scheme.digest() && !self.digest_fallback {
            return Err(SessionError::Corruption {
                reason: "envelope digest scheme not accepted".to_string(),
            });
        }

        // An envelope written under a different salt (e.g. by a node with
        // per-codec generated salt) still opens: derive from its stored salt.
        let keys = if envelope.salt == self.salt {
            self.keys.clone()
        } else {
            derive_keys(
                &self.secret,
                envelope.salt.as_deref(),
                envelope.salt.is_some(),
                self.kdf_iterations,
            )
        };

        let expected = compute_mac(
            envelope.scheme.digest(),
            &keys.mac_key,
            envelope.scheme,
            &envelope.nonce,
            envelope.compressed,
            &envelope.ciphertext,
        );
        if !bool::from(expected.ct_eq(&envelope.mac)) {
            return Err(SessionError::Corruption {
                reason: "envelope mac mismatch".to_string(),
            });
        }

        let body = if envelope.scheme.is_encrypted() {
            if envelope.nonce.len() != NONCE_LEN {
                return Err(SessionError::Corruption {
                    reason: "bad nonce length".to_string(),
                });
            }
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&keys.cipher_key));
            cipher
                .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_ref())
                .map_err(|_| SessionError::Corruption {
                    reason: "aes-gcm decrypt failed".to_string(),
                })?
        } else {
            envelope.ciphertext.clone()
        };

        if envelope.compressed {
            inflate(&body)
        } else {
            Ok(body)
        }
    }
}

// ---------------------------------------------------------------------------
// Key derivation, MAC, compression
// ---------------------------------------------------------------------------

fn derive_keys(secret: &str, salt: Option<&[u8]>, use_kdf: bool, iterations: u32) -> KeySet {
    if use_kdf {
        let salt = salt.unwrap_or(&[]);
        let mut out = [0u8; CIPHER_KEY_LEN + MAC_KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, iterations, &mut out);
        let mut cipher_key = [0u8; CIPHER_KEY_LEN];
        let mut mac_key = [0u8; MAC_KEY_LEN];
        cipher_key.copy_from_slice(&out[..CIPHER_KEY_LEN]);
        mac_key.copy_from_slice(&out[CIPHER_KEY_LEN..]);
        KeySet {
            cipher_key,
            mac_key,
        }
    } else {
        // Direct mode: secret bytes padded/truncated to the key length.
        let mut cipher_key = [0u8; CIPHER_KEY_LEN];
        let bytes = secret.as_bytes();
        let len = bytes.len().min(CIPHER_KEY_LEN);
        cipher_key[..len].copy_from_slice(&bytes[..len]);
        KeySet {
            cipher_key,
            mac_key: cipher_key,
        }
    }
}

fn compute_mac(
    digest: DigestAlgorithm,
    mac_key: &[u8],
    scheme: SchemeId,
    nonce: &[u8],
    compressed: bool,
    ciphertext: &[u8],
) -> Vec<u8> {
    let header = [ENVELOPE_VERSION, scheme.wire_tag(), u8::from(compressed)];
    match digest {
        DigestAlgorithm::HmacSha256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(mac_key)
                .expect("hmac accepts any key length");
            mac.update(&header);
            mac.update(nonce);
            mac.update(ciphertext);
            mac.finalize().into_bytes().to_vec()
        }
        DigestAlgorithm::HmacSha1 => {
            let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(mac_key)
                .expect("hmac accepts any key length");
            mac.update(&header);
            mac.update(nonce);
            mac.update(ciphertext);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

fn deflate(plaintext: &[u8]) -> SessionResult<Vec<u8>> {
    let mut out = Vec::new();
    DeflateEncoder::new(plaintext, Compression::default())
        .read_to_end(&mut out)
        .map_err(|e| SessionError::Encryption {
            reason: format!("deflate: {e}"),
        })?;
    Ok(out)
}

fn inflate(body: &[u8]) -> SessionResult<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(body)
        .read_to_end(&mut out)
        .map_err(|e| SessionError::Corruption {
            reason: format!("inflate: {e}"),
        })?;
    Ok(out)
}
