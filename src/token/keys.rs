//! RS256 signing key and its public JWKS form.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use rcgen::{KeyPair, PKCS_RSA_SHA256};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use x509_parser::prelude::FromDer;
use x509_parser::public_key::PublicKey;
use x509_parser::x509::SubjectPublicKeyInfo;

use crate::config::ScitokensConfig;
use crate::{Error, Result};

/// Private key used to sign tokens, with the public components consumers
/// need to verify them.
pub struct SigningKey {
    encoding: EncodingKey,
    key_id: String,
    modulus: String,
    exponent: String,
    ephemeral: bool,
}

impl SigningKey {
    /// Key configured in `scitokens.issuer_key`, or a fresh ephemeral key
    /// when the setting is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the key file cannot be read or is not an RSA key.
    pub fn from_config(config: &ScitokensConfig) -> Result<Self> {
        if config.issuer_key.is_empty() {
            warn!(
                "No scitokens.issuer_key configured, using an ephemeral RSA key; \
                 issued tokens stop verifying after a restart"
            );
            Self::generate(&config.key_id)
        } else {
            Self::load(&config.issuer_key, &config.key_id)
        }
    }

    /// Load a PEM RSA private key (PKCS#1 or PKCS#8).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or holds no RSA key.
    pub fn load(path: &str, key_id: &str) -> Result<Self> {
        let pem = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read issuer key '{path}': {e}")))?;
        let key = Self::from_pem(&pem, key_id, false)?;
        info!(path = %path, kid = %key_id, "Loaded token signing key");
        Ok(key)
    }

    /// Generate a 2048-bit RSA key that lives as long as the process.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signing`] if key generation fails.
    pub fn generate(key_id: &str) -> Result<Self> {
        let key_pair = KeyPair::generate_for(&PKCS_RSA_SHA256)
            .map_err(|e| Error::Signing(format!("RSA key generation failed: {e}")))?;
        Self::from_pem(&key_pair.serialize_pem(), key_id, true)
    }

    fn from_pem(pem: &str, key_id: &str, ephemeral: bool) -> Result<Self> {
        let encoding = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| Error::Signing(format!("Invalid RSA private key: {e}")))?;
        let key_pair =
            KeyPair::from_pem(pem).map_err(|e| Error::Signing(format!("Invalid private key: {e}")))?;
        let (modulus, exponent) = rsa_components(&key_pair.public_key_der())?;

        Ok(Self {
            encoding,
            key_id: key_id.to_string(),
            modulus,
            exponent,
            ephemeral,
        })
    }

    /// `kid` header value.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// `true` when the key was generated at startup.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Sign `claims` as a compact RS256 JWT.
    ///
    /// # Errors
    ///
    /// [`Error::Signing`] when encoding fails.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key_id.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding)
            .map_err(|e| Error::Signing(e.to_string()))
    }

    /// Public verification key.
    ///
    /// # Errors
    ///
    /// [`Error::Signing`] if the stored components are not valid base64url.
    pub fn decoding_key(&self) -> Result<DecodingKey> {
        DecodingKey::from_rsa_components(&self.modulus, &self.exponent)
            .map_err(|e| Error::Signing(e.to_string()))
    }

    /// Public key as a JWK set.
    #[must_use]
    pub fn jwks(&self) -> Value {
        json!({
            "keys": [{
                "kty": "RSA",
                "use": "sig",
                "alg": "RS256",
                "kid": self.key_id,
                "n": self.modulus,
                "e": self.exponent,
            }]
        })
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("ephemeral", &self.ephemeral)
            .finish_non_exhaustive()
    }
}

/// Base64url modulus and exponent of an RSA `SubjectPublicKeyInfo`.
fn rsa_components(spki_der: &[u8]) -> Result<(String, String)> {
    let (_, spki) = SubjectPublicKeyInfo::from_der(spki_der)
        .map_err(|e| Error::Signing(format!("Invalid public key: {e}")))?;
    match spki.parsed() {
        Ok(PublicKey::RSA(rsa)) => Ok((
            URL_SAFE_NO_PAD.encode(strip_leading_zeros(rsa.modulus)),
            URL_SAFE_NO_PAD.encode(strip_leading_zeros(rsa.exponent)),
        )),
        Ok(_) => Err(Error::Signing("issuer key is not an RSA key".to_string())),
        Err(e) => Err(Error::Signing(format!("Invalid public key: {e}"))),
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
