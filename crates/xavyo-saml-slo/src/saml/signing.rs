//! Signing credentials and RSA signature primitives
//!
//! Both signature paths (enveloped XML and detached query-string) end up
//! here for the raw RSA operation; everything above this layer is kept
//! separate in [`crate::services::xml_signature`].

use crate::error::{SloError, SloResult};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::{Signer, Verifier};
use openssl::x509::X509;
use std::fmt;
use std::str::FromStr;

/// RSA signature algorithms accepted from and produced for peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    RsaSha1,
    #[default]
    RsaSha256,
}

impl SignatureAlgorithm {
    pub const RSA_SHA1_URI: &'static str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
    pub const RSA_SHA256_URI: &'static str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
    pub const SHA1_DIGEST_URI: &'static str = "http://www.w3.org/2000/09/xmldsig#sha1";
    pub const SHA256_DIGEST_URI: &'static str = "http://www.w3.org/2001/04/xmlenc#sha256";

    /// `SignatureMethod` / `SigAlg` URI
    #[must_use]
    pub fn uri(self) -> &'static str {
        match self {
            Self::RsaSha1 => Self::RSA_SHA1_URI,
            Self::RsaSha256 => Self::RSA_SHA256_URI,
        }
    }

    /// `DigestMethod` URI paired with this algorithm
    #[must_use]
    pub fn digest_uri(self) -> &'static str {
        match self {
            Self::RsaSha1 => Self::SHA1_DIGEST_URI,
            Self::RsaSha256 => Self::SHA256_DIGEST_URI,
        }
    }

    #[must_use]
    pub fn message_digest(self) -> MessageDigest {
        match self {
            Self::RsaSha1 => MessageDigest::sha1(),
            Self::RsaSha256 => MessageDigest::sha256(),
        }
    }

    /// Resolve a `SignatureMethod` or `SigAlg` URI.
    pub fn from_uri(uri: &str) -> SloResult<Self> {
        match uri.trim() {
            Self::RSA_SHA1_URI => Ok(Self::RsaSha1),
            Self::RSA_SHA256_URI => Ok(Self::RsaSha256),
            other => Err(SloError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    /// Resolve a `DigestMethod` URI to its hash function.
    pub fn digest_from_uri(uri: &str) -> SloResult<MessageDigest> {
        match uri.trim() {
            Self::SHA1_DIGEST_URI => Ok(MessageDigest::sha1()),
            Self::SHA256_DIGEST_URI => Ok(MessageDigest::sha256()),
            other => Err(SloError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = SloError;

    /// Accepts short names (`rsa-sha1`, `rsa-sha256`) as well as full URIs.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rsa-sha1" | "sha1" => Ok(Self::RsaSha1),
            "rsa-sha256" | "sha256" => Ok(Self::RsaSha256),
            _ => Self::from_uri(s),
        }
    }
}

/// IdP signing certificate and private key
#[derive(Clone)]
pub struct SigningCredentials {
    certificate: X509,
    private_key: PKey<Private>,
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("subject", &self.certificate.subject_name())
            .finish_non_exhaustive()
    }
}

impl SigningCredentials {
    /// Load credentials from a PEM certificate and a PEM private key.
    pub fn from_pem(certificate_pem: &str, private_key_pem: &str) -> SloResult<Self> {
        let certificate = parse_certificate(certificate_pem)?;
        let private_key = PKey::private_key_from_pem(private_key_pem.as_bytes())
            .map_err(|e| SloError::PrivateKeyError(format!("Invalid private key: {e}")))?;

        let public_key = certificate
            .public_key()
            .map_err(|e| SloError::CertificateParseError(e.to_string()))?;
        if !public_key.public_eq(&private_key) {
            return Err(SloError::PrivateKeyError(
                "Private key does not match certificate".to_string(),
            ));
        }

        Ok(Self {
            certificate,
            private_key,
        })
    }

    #[must_use]
    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// PEM form of the signing certificate, for publishing to peers.
    pub fn certificate_pem(&self) -> SloResult<String> {
        let pem = self
            .certificate
            .to_pem()
            .map_err(|e| SloError::InternalError(format!("Certificate encoding failed: {e}")))?;
        String::from_utf8(pem).map_err(|e| SloError::InternalError(e.to_string()))
    }

    /// RSA PKCS#1 v1.5 signature over `data`.
    pub fn sign(&self, data: &[u8], algorithm: SignatureAlgorithm) -> SloResult<Vec<u8>> {
        let mut signer = Signer::new(algorithm.message_digest(), &self.private_key)
            .map_err(|e| SloError::PrivateKeyError(format!("Signer creation failed: {e}")))?;
        signer
            .update(data)
            .map_err(|e| SloError::PrivateKeyError(format!("Signer update failed: {e}")))?;
        signer
            .sign_to_vec()
            .map_err(|e| SloError::PrivateKeyError(format!("Signing failed: {e}")))
    }
}

/// Verify an RSA PKCS#1 v1.5 signature with the certificate's public key.
pub fn verify_with_certificate(
    certificate: &X509,
    data: &[u8],
    signature: &[u8],
    algorithm: SignatureAlgorithm,
) -> SloResult<()> {
    let public_key = certificate
        .public_key()
        .map_err(|e| SloError::SignatureInvalid(format!("Invalid certificate: {e}")))?;

    let mut verifier = Verifier::new(algorithm.message_digest(), &public_key)
        .map_err(|e| SloError::SignatureInvalid(format!("Verifier creation failed: {e}")))?;
    verifier
        .update(data)
        .map_err(|e| SloError::SignatureInvalid(format!("Signature update failed: {e}")))?;

    // OpenSSL reports some malformed signatures as errors rather than `false`.
    let valid = verifier.verify(signature).unwrap_or(false);
    if valid {
        Ok(())
    } else {
        Err(SloError::SignatureInvalid(
            "Signature verification failed: invalid signature".to_string(),
        ))
    }
}

/// Parse an X.509 certificate, with or without PEM armour.
pub fn parse_certificate(pem: &str) -> SloResult<X509> {
    let pem_data = if pem.contains("-----BEGIN CERTIFICATE-----") {
        pem.to_string()
    } else {
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----",
            pem.trim()
        )
    };

    X509::from_pem(pem_data.as_bytes())
        .map_err(|e| SloError::CertificateParseError(format!("Invalid certificate: {e}")))
}
