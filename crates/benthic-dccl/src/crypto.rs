//! # Body encryption
//!
//! Optional authenticated-operator encryption of the message body. The key
//! is `SHA-256(passphrase)`; the body bytes are run through AES-256-CFB with
//! the 6-byte wire header (zero-padded to the block size) as the IV, so two
//! messages with different headers never share a keystream. The header
//! itself stays in the clear: receivers must still dispatch on the DCCL id.
//!
//! There is no authentication tag: a wrong passphrase surfaces downstream
//! when the decoded body fails its own field-codec sanity checks.

use aes::Aes256;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use cfb_mode::{Decryptor, Encryptor};
use sha2::{Digest, Sha256};

use crate::header::HEADER_BYTES;

type Aes256CfbEnc = Encryptor<Aes256>;
type Aes256CfbDec = Decryptor<Aes256>;

const KEY_BYTES: usize = 32;
const IV_BYTES: usize = 16;

/// Passphrase-derived key material.
#[derive(Clone)]
pub struct CryptoState {
    key: [u8; KEY_BYTES],
}

impl CryptoState {
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; KEY_BYTES];
        key.copy_from_slice(&digest);
        CryptoState { key }
    }

    fn iv(header: &[u8]) -> [u8; IV_BYTES] {
        let mut iv = [0u8; IV_BYTES];
        let n = header.len().min(HEADER_BYTES);
        iv[..n].copy_from_slice(&header[..n]);
        iv
    }

    /// Encrypt `body` in place, keyed by the clear-text header.
    pub fn encrypt(&self, header: &[u8], body: &mut [u8]) {
        if body.is_empty() {
            return;
        }
        let iv = Self::iv(header);
        Aes256CfbEnc::new(&self.key.into(), &iv.into()).encrypt(body);
    }

    /// Decrypt `body` in place.
    pub fn decrypt(&self, header: &[u8], body: &mut [u8]) {
        if body.is_empty() {
            return;
        }
        let iv = Self::iv(header);
        Aes256CfbDec::new(&self.key.into(), &iv.into()).decrypt(body);
    }
}

impl std::fmt::Debug for CryptoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("CryptoState")
    }
}
