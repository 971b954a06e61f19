//! Payload encryption for the v3.3 local protocol.
//!
//! Every payload is AES-128 in ECB mode with PKCS#7 padding, keyed by the
//! per-device local key. Discovery broadcasts use a fixed key derived from
//! a shared salt instead; see [`discovery_key`].

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, block_padding::Pkcs7};
use md5::{Digest, Md5};
use secrecy::{ExposeSecret, SecretBox};

use crate::error::Error;

/// Length of a device key in bytes.
pub const KEY_LEN: usize = 16;

/// AES block size. Every ciphertext is a multiple of this.
pub const BLOCK_LEN: usize = 16;

const DISCOVERY_SALT: &[u8] = b"yGAdlopoPVldABfn";

static DISCOVERY_KEY: LazyLock<[u8; KEY_LEN]> =
    LazyLock::new(|| Md5::digest(DISCOVERY_SALT).into());

type Aes128EcbEnc = ecb::Encryptor<Aes128>;
type Aes128EcbDec = ecb::Decryptor<Aes128>;

// ── DeviceKey ────────────────────────────────────────────────────────

/// The 16-byte secret bound to one device.
///
/// Never printed: `Debug` is redacted and the bytes live in a
/// [`SecretBox`] that is zeroed on drop.
pub struct DeviceKey(SecretBox<[u8; KEY_LEN]>);

impl DeviceKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(SecretBox::new(Box::new(bytes)))
    }

    /// Parse the local key string handed out by the vendor cloud.
    ///
    /// The key is used as raw ASCII bytes, so it must be exactly 16 bytes long.
    pub fn from_local_key(local_key: &str) -> Result<Self, Error> {
        let bytes: [u8; KEY_LEN] = local_key.as_bytes().try_into().map_err(|_| {
            Error::InvalidKey {
                reason: format!("expected {KEY_LEN} bytes, got {}", local_key.len()),
            }
        })?;
        Ok(Self::new(bytes))
    }

    fn expose(&self) -> &[u8; KEY_LEN] {
        self.0.expose_secret()
    }
}

impl Clone for DeviceKey {
    fn clone(&self) -> Self {
        Self::new(*self.expose())
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceKey([REDACTED])")
    }
}

impl FromStr for DeviceKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_local_key(s)
    }
}

// ── Free functions ───────────────────────────────────────────────────

/// Encrypt `plaintext`, padding it to the next block boundary.
///
/// A plaintext that is already block-aligned gains a full padding block.
pub fn encrypt(key: &DeviceKey, plaintext: &[u8]) -> Vec<u8> {
    Aes128EcbEnc::new(GenericArray::from_slice(key.expose()))
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt `ciphertext` and strip its padding.
pub fn decrypt(key: &DeviceKey, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(Error::Crypto {
            reason: format!(
                "ciphertext length {} is not a positive multiple of {BLOCK_LEN}",
                ciphertext.len()
            ),
        });
    }

    Aes128EcbDec::new(GenericArray::from_slice(key.expose()))
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::Crypto {
            reason: "malformed padding (wrong key or corrupted payload)".into(),
        })
}

/// The key used for UDP discovery broadcasts: MD5 of a fixed salt.
///
/// Computed once per process.
pub fn discovery_key() -> [u8; KEY_LEN] {
    *DISCOVERY_KEY
}

// ── Cipher ───────────────────────────────────────────────────────────

/// A device key bound to the encrypt/decrypt operations.
///
/// Cheap to clone; each session and frame decoder holds its own copy.
#[derive(Debug, Clone)]
pub struct Cipher {
    key: DeviceKey,
}

impl Cipher {
    pub fn new(key: DeviceKey) -> Self {
        Self { key }
    }

    /// Cipher keyed with the discovery key.
    pub fn discovery() -> Self {
        Self::new(DeviceKey::new(discovery_key()))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        encrypt(&self.key, plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        decrypt(&self.key, ciphertext)
    }
}
