//! Request signing and key handling.
//!
//! The repository verifies requests with an RSA signature (PKCS#1 v1.5 over a
//! SHA-1 digest) computed over `appId + subject + timestamp`. This module owns
//! the app's key material and produces those detached signatures, plus the
//! optional public-key encryption used for confidential hints and the key pair
//! generation needed to register a new app.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use sha1::Sha1;
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use crate::error::{EduError, EduResult};

/// Validate an app id against the restricted charset `[A-Za-z0-9._-]+`.
pub fn validate_app_id(app_id: &str) -> EduResult<()> {
    let valid = !app_id.is_empty()
        && app_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(EduError::InvalidAppId {
            app_id: app_id.to_string(),
        })
    }
}

/// A generated RSA key pair, both halves PEM encoded.
///
/// Register the public key in the repository; keep the private key in your
/// application's own storage.
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// PKCS#8 PEM private key.
    pub private_key: String,

    /// SPKI PEM public key.
    pub public_key: String,
}

/// Generate a new 2048-bit RSA key pair for registering an app.
pub fn generate_key_pair() -> EduResult<KeyPair> {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, 2048).map_err(|e| EduError::Crypto {
        message: format!("key generation failed: {e}"),
    })?;
    let public = RsaPublicKey::from(&private);

    let private_key = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| EduError::Crypto {
            message: format!("failed to encode private key: {e}"),
        })?
        .to_string();
    let public_key = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| EduError::Crypto {
            message: format!("failed to encode public key: {e}"),
        })?;

    Ok(KeyPair {
        private_key,
        public_key,
    })
}

/// Verify a base64 signature over `message` under an SPKI PEM public key.
///
/// The repository does this server-side; the client only needs it to sanity
/// check freshly registered key material.
pub fn verify_signature(public_key_pem: &str, message: &[u8], signature_b64: &str) -> EduResult<()> {
    let public = RsaPublicKey::from_public_key_pem(public_key_pem).map_err(|e| EduError::Crypto {
        message: format!("failed to load public key: {e}"),
    })?;
    let raw = BASE64
        .decode(signature_b64)
        .map_err(|e| EduError::Crypto {
            message: format!("signature is not valid base64: {e}"),
        })?;
    let signature = Signature::try_from(raw.as_slice()).map_err(|e| EduError::Crypto {
        message: format!("malformed signature: {e}"),
    })?;
    VerifyingKey::<Sha1>::new(public)
        .verify(message, &signature)
        .map_err(|e| EduError::Crypto {
            message: format!("signature verification failed: {e}"),
        })
}

/// Holds the app's private key and the optional repository public key.
#[derive(Clone)]
pub struct AppSigner {
    signing_key: SigningKey<Sha1>,
    repository_key: Option<RsaPublicKey>,
}

impl std::fmt::Debug for AppSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppSigner")
            .field("repository_key", &self.repository_key.is_some())
            .finish_non_exhaustive()
    }
}

impl AppSigner {
    /// Load key material from PEM.
    ///
    /// Accepts PKCS#8 (`BEGIN PRIVATE KEY`) as well as the older PKCS#1
    /// (`BEGIN RSA PRIVATE KEY`) encoding. The repository public key is only
    /// required for [`AppSigner::encrypt`].
    pub fn from_pem(private_key_pem: &str, repository_public_key_pem: Option<&str>) -> EduResult<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
            .map_err(|e| EduError::Crypto {
                message: format!("failed to load private key: {e}"),
            })?;

        let repository_key = match repository_public_key_pem {
            Some(pem) => Some(RsaPublicKey::from_public_key_pem(pem).map_err(|e| {
                EduError::Crypto {
                    message: format!("failed to load repository public key: {e}"),
                }
            })?),
            None => None,
        };

        Ok(Self {
            signing_key: SigningKey::new(private),
            repository_key,
        })
    }

    /// Produce a detached base64 signature over `message`.
    pub fn sign(&self, message: &[u8]) -> EduResult<String> {
        let signature = self.signing_key.try_sign(message).map_err(|e| EduError::Crypto {
            message: format!("signing failed: {e}"),
        })?;
        Ok(BASE64.encode(signature.to_vec()))
    }

    /// Encrypt `message` with the repository's public key, base64 encoded.
    ///
    /// Used for payloads that must stay confidential in transit, e.g.
    /// encrypted user hints. Fails if no repository public key is configured.
    pub fn encrypt(&self, message: &[u8]) -> EduResult<String> {
        let key = self.repository_key.as_ref().ok_or_else(|| EduError::Config {
            message: "no repository public key configured".to_string(),
        })?;
        let mut rng = rand::thread_rng();
        let ciphertext = key
            .encrypt(&mut rng, Pkcs1v15Encrypt, message)
            .map_err(|e| EduError::Crypto {
                message: format!("encryption failed: {e}"),
            })?;
        Ok(BASE64.encode(ciphertext))
    }
}

/// Lazily generated key pair shared across tests; generation is expensive.
#[cfg(test)]
pub(crate) fn test_key_pair() -> &'static KeyPair {
    static PAIR: std::sync::OnceLock<KeyPair> = std::sync::OnceLock::new();
    PAIR.get_or_init(|| generate_key_pair().expect("key generation"))
}
