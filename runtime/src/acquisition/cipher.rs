//! RSA encryption of login credentials.
//!
//! The login form expects username and password each encrypted with the
//! site's RSA public key (PKCS#1 v1.5) and base64-encoded.

use crate::error::AcquireError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

/// The site's login key: base64 DER SubjectPublicKeyInfo, 1024-bit RSA.
pub const SITE_PUBLIC_KEY: &str = "MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQDWuY4Gff8FO3BAKetyvNgGrdZM9CMNoe45SzHMXxAPWw6E2idaEjqe5uJFjVx55JW\
+5LUSGO1H5MdTcgGEfh62ink/cNjRGJpR25iVDImJlLi2izNs9zrQukncnpj6NGjZu\
/2z7XXfJb4XBwlrmR823hpCumSD1WiMl1FMfbVorQIDAQAB";

#[derive(Debug, Clone)]
pub struct CredentialCipher {
    key: RsaPublicKey,
}

impl CredentialCipher {
    /// Load a base64 DER public key. Whitespace inside the key is ignored.
    pub fn new(public_key_b64: &str) -> Result<Self, AcquireError> {
        let compact: String = public_key_b64.split_whitespace().collect();
        let der = BASE64
            .decode(compact)
            .map_err(|e| AcquireError::Crypto(format!("public key is not base64: {e}")))?;
        let key = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| AcquireError::Crypto(format!("malformed public key: {e}")))?;
        Ok(Self { key })
    }

    /// Cipher with the site's embedded key.
    pub fn site_default() -> Result<Self, AcquireError> {
        Self::new(SITE_PUBLIC_KEY)
    }

    /// Encrypt `plaintext` and return it base64-encoded.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, AcquireError> {
        let mut rng = rand::thread_rng();
        let encrypted = self
            .key
            .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext.as_bytes())
            .map_err(|e| AcquireError::Crypto(e.to_string()))?;
        Ok(BASE64.encode(encrypted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_key_loads() {
        assert!(CredentialCipher::site_default().is_ok());
    }

    #[test]
    fn test_encrypt_produces_modulus_sized_base64() {
        let cipher = CredentialCipher::site_default().unwrap();
        let out = cipher.encrypt("13800000000").unwrap();
        let raw = BASE64.decode(&out).unwrap();
        assert_eq!(raw.len(), 128);
        assert!(!out.contains("13800000000"));
    }

    #[test]
    fn test_padding_is_randomized() {
        let cipher = CredentialCipher::site_default().unwrap();
        let a = cipher.encrypt("secret").unwrap();
        let b = cipher.encrypt("secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_key_is_crypto_error() {
        assert!(matches!(
            CredentialCipher::new("not base64 !!"),
            Err(AcquireError::Crypto(_))
        ));
        assert!(matches!(
            CredentialCipher::new("AAAA"),
            Err(AcquireError::Crypto(_))
        ));
    }

    #[test]
    fn test_oversized_plaintext_is_crypto_error() {
        let cipher = CredentialCipher::site_default().unwrap();
        let too_long = "x".repeat(200);
        assert!(matches!(
            cipher.encrypt(&too_long),
            Err(AcquireError::Crypto(_))
        ));
    }
}
