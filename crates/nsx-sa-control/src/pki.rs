//! Self-signed client certificates for principal identities.
//!
//! Each principal identity authenticates with its own leaf certificate.
//! The Manager trusts the certificate itself, so no CA is involved: the
//! certificate is self-signed, carries the normalized name as its CN and
//! the client-auth extended key usage.

use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair};
use thiserror::Error;
use x509_parser::prelude::*;

/// Errors from certificate handling.
#[derive(Debug, Error)]
pub enum PkiError {
    /// Key generation failed.
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate generation failed.
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// PEM or DER could not be parsed.
    #[error("certificate parsing error: {0}")]
    ParseError(String),
}

/// Result type for certificate operations.
pub type Result<T> = std::result::Result<T, PkiError>;

const SECONDS_PER_DAY: i64 = 86_400;

/// A PEM certificate with its private key.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// Generate a self-signed client certificate valid for `valid_days`.
///
/// # Errors
///
/// Returns an error if key or certificate generation fails.
pub fn generate(subject: &str, valid_days: u32) -> Result<CertificateBundle> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(subject.to_string()));
    params.distinguished_name = dn;
    params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];

    let now = ::time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + ::time::Duration::days(i64::from(valid_days));

    let key_pair = KeyPair::generate()
        .map_err(|e| PkiError::KeyGenerationFailed(format!("failed to generate key: {e}")))?;
    let cert = params.self_signed(&key_pair).map_err(|e| {
        PkiError::CertificateGenerationFailed(format!("failed to self-sign {subject}: {e}"))
    })?;

    Ok(CertificateBundle {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Decode the first PEM block into DER bytes.
///
/// # Errors
///
/// Returns an error if the input is not PEM.
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {e}")))?;
    Ok(pem_obj.contents().to_vec())
}

/// Validity information extracted from a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Start of validity, Unix seconds.
    pub not_before: i64,
    /// End of validity, Unix seconds.
    pub not_after: i64,
    /// Subject common name, if present.
    pub common_name: Option<String>,
}

impl CertificateInfo {
    /// Parse a PEM certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM or the certificate cannot be parsed.
    pub fn from_pem(pem_data: &str) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        Self::from_der(&der)
    }

    /// Parse a DER certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be parsed.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse certificate: {e}")))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        Ok(Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name,
        })
    }

    /// Seconds of validity left at `now`.
    #[must_use]
    pub const fn remaining_secs_at(&self, now: i64) -> i64 {
        self.not_after - now
    }

    /// Seconds of validity left.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        self.remaining_secs_at(chrono::Utc::now().timestamp())
    }

    /// Whether the certificate has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining_secs() <= 0
    }

    /// Whether less than `rotate_before_days` of validity remain.
    #[must_use]
    pub fn rotation_due(&self, rotate_before_days: u32) -> bool {
        self.remaining_secs() < i64::from(rotate_before_days) * SECONDS_PER_DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_certificate_carries_subject() {
        let bundle = generate("cl-ns1-name1", 365).unwrap();
        assert!(bundle.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(bundle.key_pem.contains("PRIVATE KEY"));

        let info = CertificateInfo::from_pem(&bundle.cert_pem).unwrap();
        assert_eq!(info.common_name.as_deref(), Some("cl-ns1-name1"));
        assert!(!info.is_expired());
    }

    #[test]
    fn rotation_due_against_threshold() {
        let bundle = generate("short", 10).unwrap();
        let info = CertificateInfo::from_pem(&bundle.cert_pem).unwrap();
        assert!(info.rotation_due(30));
        assert!(!info.rotation_due(5));
    }

    #[test]
    fn remaining_secs_at_fixed_time() {
        let info = CertificateInfo {
            not_before: 0,
            not_after: 1_000,
            common_name: None,
        };
        assert_eq!(info.remaining_secs_at(400), 600);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            CertificateInfo::from_pem("not a certificate"),
            Err(PkiError::ParseError(_))
        ));
    }

    #[test]
    fn debug_redacts_key() {
        let bundle = CertificateBundle {
            cert_pem: "C".into(),
            key_pem: "SECRET".into(),
        };
        assert!(!format!("{bundle:?}").contains("SECRET"));
    }
}
