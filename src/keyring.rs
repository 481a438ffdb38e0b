//! Authenticated framing for every datagram on the wire.
//!
//! All cluster traffic is sealed with AES-256-GCM under an ordered ring of
//! shared keys. The head key seals outgoing datagrams; every key in the ring
//! is a candidate when opening inbound ones. Trial decryption is what makes
//! zero-downtime rotation work: operators push a new head key to every node,
//! wait one dissemination period, then retire the tail.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::{AgentError, Result};

pub const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// Fixed per-datagram cost of the sealed envelope: `IV(16) || TAG(16)`.
pub(crate) const ENVELOPE_OVERHEAD: usize = IV_LEN + TAG_LEN;

// The wire format carries a 16-octet IV, not the usual 12.
type EnvelopeCipher = AesGcm<Aes256, U16>;

/// A single 32-octet cluster key. Wiped from memory on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| AgentError::BadKeyLength(bytes.len()))?;
        Ok(Self(bytes))
    }

    /// Generate a fresh random key from the OS entropy source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Key(..)")
    }
}

/// Ordered, immutable collection of cluster keys plus the cluster-wide AAD.
///
/// The AAD must be an out-of-band agreed value identical on every node;
/// deriving it from local process state would make the cluster undecryptable
/// to itself. Rotation never mutates a ring in place — [`Keyring::add`]
/// returns a new snapshot, which callers publish atomically (an `Arc` swap).
#[derive(Debug)]
pub struct Keyring {
    keys: Vec<Key>,
    aad: Vec<u8>,
}

impl Keyring {
    /// Build a ring from `keys`, newest (active) first.
    pub fn new(keys: Vec<Key>, aad: impl Into<Vec<u8>>) -> Result<Self> {
        if keys.is_empty() {
            return Err(AgentError::EmptyKeyring);
        }
        Ok(Self {
            keys,
            aad: aad.into(),
        })
    }

    /// A new ring with `key` prepended as the active encryption key.
    /// All prior keys remain valid for decryption.
    pub fn add(&self, key: Key) -> Keyring {
        let mut keys = Vec::with_capacity(self.keys.len() + 1);
        keys.push(key);
        keys.extend(self.keys.iter().cloned());
        Keyring {
            keys,
            aad: self.aad.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Seal `plaintext` under the head key with a fresh random IV.
    ///
    /// Output layout is exactly `IV(16) || TAG(16) || CIPHERTEXT`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut body = plaintext.to_vec();
        let cipher = EnvelopeCipher::new(GenericArray::from_slice(&self.keys[0].0));
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), &self.aad, &mut body)
            .map_err(|_| AgentError::FailedVerification)?;

        let mut datagram = Vec::with_capacity(ENVELOPE_OVERHEAD + body.len());
        datagram.extend_from_slice(&iv);
        datagram.extend_from_slice(&tag);
        datagram.extend_from_slice(&body);
        Ok(datagram)
    }

    /// Open a sealed datagram, trying each key in ring order.
    ///
    /// Anything shorter than the envelope overhead, or that no key
    /// authenticates, is [`AgentError::FailedVerification`].
    pub fn decrypt(&self, datagram: &[u8]) -> Result<Vec<u8>> {
        if datagram.len() < ENVELOPE_OVERHEAD {
            return Err(AgentError::FailedVerification);
        }
        let (iv, rest) = datagram.split_at(IV_LEN);
        let (tag, body) = rest.split_at(TAG_LEN);

        for key in &self.keys {
            let cipher = EnvelopeCipher::new(GenericArray::from_slice(&key.0));
            let mut plaintext = body.to_vec();
            if cipher
                .decrypt_in_place_detached(
                    GenericArray::from_slice(iv),
                    &self.aad,
                    &mut plaintext,
                    GenericArray::from_slice(tag),
                )
                .is_ok()
            {
                return Ok(plaintext);
            }
        }
        Err(AgentError::FailedVerification)
    }
}
