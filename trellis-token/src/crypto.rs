//! Primitives behind the token codec: HMAC selection, AES-CTR encryption,
//! random key material and the user-agent fingerprint.

use aes::{Aes128, Aes192, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use trellis_core::{ConfigError, TokenError};

/// AES block size, which is also the IV length.
pub const IV_LEN: usize = 16;

/// HMAC digest, chosen from the hash key length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Keys under 32 bytes use SHA-1, under 48 SHA-256, under 64 SHA-384,
    /// anything longer SHA-512.
    pub fn for_key_len(len: usize) -> Self {
        match len {
            0..=31 => Self::Sha1,
            32..=47 => Self::Sha256,
            48..=63 => Self::Sha384,
            _ => Self::Sha512,
        }
    }

    /// MAC length in bytes.
    pub fn output_size(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    pub(crate) fn sign(self, key: &[u8], body: &[u8]) -> Result<Vec<u8>, TokenError> {
        match self {
            Self::Sha1 => sign_with::<Hmac<Sha1>>(key, body),
            Self::Sha256 => sign_with::<Hmac<Sha256>>(key, body),
            Self::Sha384 => sign_with::<Hmac<Sha384>>(key, body),
            Self::Sha512 => sign_with::<Hmac<Sha512>>(key, body),
        }
    }

    /// Constant-time MAC check.
    pub(crate) fn verify(self, key: &[u8], body: &[u8], tag: &[u8]) -> bool {
        match self {
            Self::Sha1 => verify_with::<Hmac<Sha1>>(key, body, tag),
            Self::Sha256 => verify_with::<Hmac<Sha256>>(key, body, tag),
            Self::Sha384 => verify_with::<Hmac<Sha384>>(key, body, tag),
            Self::Sha512 => verify_with::<Hmac<Sha512>>(key, body, tag),
        }
    }
}

fn sign_with<M: Mac + KeyInit>(key: &[u8], body: &[u8]) -> Result<Vec<u8>, TokenError> {
    let mut mac = <M as KeyInit>::new_from_slice(key).map_err(|e| TokenError::Encode {
        reason: e.to_string(),
    })?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn verify_with<M: Mac + KeyInit>(key: &[u8], body: &[u8], tag: &[u8]) -> bool {
    match <M as KeyInit>::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(body);
            mac.verify_slice(tag).is_ok()
        }
        Err(_) => false,
    }
}

/// AES key for counter-mode payload encryption.
#[derive(Clone, PartialEq, Eq)]
pub struct BlockKey(Vec<u8>);

impl BlockKey {
    /// Accept a 16, 24 or 32 byte key (AES-128, AES-192, AES-256).
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] for any other length.
    pub fn new(key: &[u8]) -> Result<Self, ConfigError> {
        match key.len() {
            16 | 24 | 32 => Ok(Self(key.to_vec())),
            len => Err(ConfigError::InvalidValue {
                field: "block_key".to_string(),
                value: format!("{len} bytes"),
                reason: "AES keys must be 16, 24 or 32 bytes".to_string(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn apply_keystream(&self, iv: &[u8], buf: &mut [u8]) -> Result<(), TokenError> {
        match self.0.len() {
            16 => xor_with::<Ctr128BE<Aes128>>(&self.0, iv, buf),
            24 => xor_with::<Ctr128BE<Aes192>>(&self.0, iv, buf),
            32 => xor_with::<Ctr128BE<Aes256>>(&self.0, iv, buf),
            _ => Err(TokenError::DecryptFailed),
        }
    }

    /// Encrypt `plain` under a fresh random IV and return `IV || ciphertext`.
    pub(crate) fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>, TokenError> {
        let mut out = random_bytes(IV_LEN);
        out.extend_from_slice(plain);
        let (iv, body) = out.split_at_mut(IV_LEN);
        self.apply_keystream(iv, body).map_err(|_| TokenError::Encode {
            reason: "cipher rejected key or IV".to_string(),
        })?;
        Ok(out)
    }

    /// Reverse [`encrypt`](Self::encrypt). Input no longer than the IV fails.
    pub(crate) fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, TokenError> {
        if data.len() <= IV_LEN {
            return Err(TokenError::DecryptFailed);
        }
        let (iv, body) = data.split_at(IV_LEN);
        let mut plain = body.to_vec();
        self.apply_keystream(iv, &mut plain)?;
        Ok(plain)
    }
}

fn xor_with<C: KeyIvInit + StreamCipher>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), TokenError> {
    let mut cipher = C::new_from_slices(key, iv).map_err(|_| TokenError::DecryptFailed)?;
    cipher
        .try_apply_keystream(buf)
        .map_err(|_| TokenError::DecryptFailed)
}

impl std::fmt::Debug for BlockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockKey([REDACTED, AES-{}])", self.0.len() * 8)
    }
}

/// `len` bytes from the thread-local CSPRNG.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// 64-bit FNV-1 digest of a user-agent string as 16 lowercase hex chars.
///
/// FNV-1 (multiply, then xor) rather than FNV-1a, so fingerprints match
/// tokens minted by existing deployments.
pub fn agent_hash(user_agent: &str) -> String {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let hash = user_agent.bytes().fold(OFFSET_BASIS, |hash, byte| {
        hash.wrapping_mul(PRIME) ^ u64::from(byte)
    });
    hex::encode(hash.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_selection_by_key_length() {
        assert_eq!(HashAlgorithm::for_key_len(0), HashAlgorithm::Sha1);
        assert_eq!(HashAlgorithm::for_key_len(16), HashAlgorithm::Sha1);
        assert_eq!(HashAlgorithm::for_key_len(31), HashAlgorithm::Sha1);
        assert_eq!(HashAlgorithm::for_key_len(32), HashAlgorithm::Sha256);
        assert_eq!(HashAlgorithm::for_key_len(48), HashAlgorithm::Sha384);
        assert_eq!(HashAlgorithm::for_key_len(64), HashAlgorithm::Sha512);
        assert_eq!(HashAlgorithm::for_key_len(200), HashAlgorithm::Sha512);
    }

    #[test]
    fn test_sign_and_verify() {
        for key_len in [16, 32, 48, 64] {
            let key = vec![7u8; key_len];
            let algorithm = HashAlgorithm::for_key_len(key_len);
            let tag = algorithm.sign(&key, b"body").unwrap();
            assert_eq!(tag.len(), algorithm.output_size());
            assert!(algorithm.verify(&key, b"body", &tag));
            assert!(!algorithm.verify(&key, b"bodY", &tag));
            assert!(!algorithm.verify(&key, b"body", &tag[1..]));
        }
    }

    #[test]
    fn test_block_key_lengths() {
        for len in [16, 24, 32] {
            assert_eq!(BlockKey::new(&vec![1u8; len]).unwrap().len(), len);
        }
        for len in [0, 8, 17, 64] {
            assert!(matches!(
                BlockKey::new(&vec![1u8; len]),
                Err(ConfigError::InvalidValue { .. })
            ));
        }
    }

    #[test]
    fn test_encrypt_round_trip_uses_fresh_iv() {
        let key = BlockKey::new(b"0123456789abcdef0123456789abcdef").unwrap();
        let first = key.encrypt(b"payload").unwrap();
        let second = key.encrypt(b"payload").unwrap();
        assert_eq!(first.len(), IV_LEN + 7);
        assert_ne!(first, second);
        assert_eq!(key.decrypt(&first).unwrap(), b"payload");
        assert_eq!(key.decrypt(&second).unwrap(), b"payload");
    }

    #[test]
    fn test_decrypt_requires_more_than_iv() {
        let key = BlockKey::new(&[3u8; 16]).unwrap();
        assert_eq!(key.decrypt(&[0u8; IV_LEN]), Err(TokenError::DecryptFailed));
        assert_eq!(key.decrypt(&[]), Err(TokenError::DecryptFailed));
    }

    #[test]
    fn test_agent_hash_is_fnv1() {
        assert_eq!(agent_hash(""), "cbf29ce484222325");
        assert_eq!(agent_hash("agent"), "4a9517c57a44f02c");
        assert_eq!(agent_hash("agent").len(), 16);
        assert_ne!(agent_hash("Mozilla/5.0"), agent_hash("curl/8.0"));
    }

    #[test]
    fn test_block_key_debug_is_redacted() {
        let key = BlockKey::new(b"secret-secret-16").unwrap();
        let debug = format!("{key:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("AES-128"));
    }
}
