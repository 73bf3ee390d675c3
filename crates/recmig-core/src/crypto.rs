//! Password-based encryption for credentials and data files.
//!
//! Keys are derived with Argon2 and values sealed with AES-256-GCM. A
//! standalone value is encoded as `base64(salt || nonce || ciphertext)`;
//! a [`Cipher`] reuses one derived key and encodes `base64(nonce || ciphertext)`.

use crate::error::{Error, Result};
use crate::script::Credentials;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use base64::{engine::general_purpose, Engine as _};
use rand::Rng;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Salt used for data file keys, so every file of a run shares one key.
pub const FILE_KEY_SALT: &[u8] = b"recmig-data-files";

/// A derived key, reusable across many values.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cipher(..)")
    }
}

impl Cipher {
    /// Derive a key from a password and salt.
    pub fn derive(password: &str, salt: &[u8]) -> Result<Self> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(password.as_bytes(), salt, &mut key)
            .map_err(|e| Error::Crypto(format!("key derivation failed: {e}")))?;
        Ok(Self { key })
    }

    /// Derive the key used for data files.
    pub fn for_files(password: &str) -> Result<Self> {
        Self::derive(password, FILE_KEY_SALT)
    }

    /// Encrypt a value to `base64(nonce || ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let sealed = self.seal(plaintext)?;
        Ok(general_purpose::STANDARD.encode(sealed))
    }

    /// Decrypt a value produced by [`Cipher::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let bytes = decode(encoded)?;
        self.open(&bytes)
    }

    fn seal(&self, plaintext: &str) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce);
        let ciphertext = self
            .aead()?
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&self, bytes: &[u8]) -> Result<String> {
        if bytes.len() <= NONCE_LEN {
            return Err(Error::Crypto("encrypted value is truncated".to_string()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .aead()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Crypto("decryption failed: wrong password or corrupt value".to_string()))?;
        String::from_utf8(plaintext).map_err(|e| Error::Crypto(e.to_string()))
    }

    fn aead(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|e| Error::Crypto(e.to_string()))
    }
}

fn decode(encoded: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Crypto(format!("invalid base64: {e}")))
}

/// Encrypt a single value with a fresh salt.
pub fn encrypt_value(password: &str, plaintext: &str) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill(&mut salt);
    let sealed = Cipher::derive(password, &salt)?.seal(plaintext)?;
    let mut out = Vec::with_capacity(SALT_LEN + sealed.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&sealed);
    Ok(general_purpose::STANDARD.encode(out))
}

/// Decrypt a value produced by [`encrypt_value`].
pub fn decrypt_value(password: &str, encoded: &str) -> Result<String> {
    let bytes = decode(encoded)?;
    if bytes.len() <= SALT_LEN {
        return Err(Error::Crypto("encrypted value is truncated".to_string()));
    }
    let (salt, sealed) = bytes.split_at(SALT_LEN);
    Cipher::derive(password, salt)?.open(sealed)
}

/// Decrypt every credential value, or none of them.
///
/// If any set value fails to decrypt, the credentials are returned as given.
pub fn decrypt_credentials(credentials: &Credentials, password: &str) -> Credentials {
    let decrypt = |value: &Option<String>| -> Result<Option<String>> {
        value
            .as_deref()
            .map(|v| decrypt_value(password, v))
            .transpose()
    };
    let decrypted = (|| -> Result<Credentials> {
        Ok(Credentials {
            username: decrypt(&credentials.username)?,
            password: decrypt(&credentials.password)?,
            access_token: decrypt(&credentials.access_token)?,
            instance_url: decrypt(&credentials.instance_url)?,
        })
    })();
    match decrypted {
        Ok(creds) => creds,
        Err(e) => {
            tracing::debug!(error = %e, "credentials are not encrypted with this password, using them as given");
            credentials.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_roundtrip() {
        let sealed = encrypt_value("secret", "admin@example.com").unwrap();
        assert_ne!(sealed, "admin@example.com");
        assert_eq!(decrypt_value("secret", &sealed).unwrap(), "admin@example.com");
    }

    #[test]
    fn test_wrong_password() {
        let sealed = encrypt_value("secret", "value").unwrap();
        assert!(matches!(decrypt_value("other", &sealed), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_cipher_values_differ_per_call() {
        let cipher = Cipher::for_files("pw").unwrap();
        let a = cipher.encrypt("Acme").unwrap();
        let b = cipher.encrypt("Acme").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), "Acme");
    }

    #[test]
    fn test_credentials_all_or_nothing() {
        let credentials = Credentials {
            username: Some(encrypt_value("pw", "user").unwrap()),
            password: Some("plain-text".to_string()),
            ..Default::default()
        };
        assert_eq!(decrypt_credentials(&credentials, "pw"), credentials);

        let encrypted = Credentials {
            username: Some(encrypt_value("pw", "user").unwrap()),
            password: Some(encrypt_value("pw", "hunter2").unwrap()),
            ..Default::default()
        };
        let plain = decrypt_credentials(&encrypted, "pw");
        assert_eq!(plain.username.as_deref(), Some("user"));
        assert_eq!(plain.password.as_deref(), Some("hunter2"));
    }
}
