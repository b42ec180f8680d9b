//! Decoded X.509 certificates.
//!
//! A [`Certificate`] owns its DER encoding together with the fields the chain
//! and trust checks need, extracted once at decode time.

use chrono::{DateTime, TimeZone, Utc};
use rsa::RsaPublicKey;
use spki::DecodePublicKey;
use x509_parser::parse_x509_certificate;

use super::extensions::CertificateExtensions;
use super::identity::Identity;
use super::key::verify_signature;
use super::KeyUsageFlags;
use crate::error::{CryptoCheck, Error, Result};
use crate::signatures::DigestAlgorithm;

const PEM_LABEL: &str = "CERTIFICATE";
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";

/// An X.509 v3 certificate with an RSA subject key.
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    tbs: Vec<u8>,
    signature: Vec<u8>,
    signature_algorithm: Option<DigestAlgorithm>,
    signature_algorithm_oid: String,
    subject: Identity,
    issuer: Identity,
    serial: Vec<u8>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    public_key: RsaPublicKey,
    extensions: CertificateExtensions,
}

impl Certificate {
    /// Decode a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (rest, cert) = parse_x509_certificate(der).map_err(|e| Error::CertificateDecode {
            reason: e.to_string(),
        })?;
        if !rest.is_empty() {
            return Err(Error::CertificateDecode {
                reason: format!("{} trailing bytes after certificate", rest.len()),
            });
        }

        let tbs = &cert.tbs_certificate;
        let key_algorithm = tbs.subject_pki.algorithm.algorithm.to_id_string();
        if key_algorithm != OID_RSA_ENCRYPTION {
            return Err(Error::UnsupportedAlgorithm { oid: key_algorithm });
        }
        let public_key =
            RsaPublicKey::from_public_key_der(tbs.subject_pki.raw).map_err(|e| {
                Error::CertificateDecode {
                    reason: format!("subject public key: {}", e),
                }
            })?;

        let signature_algorithm_oid = cert.signature_algorithm.algorithm.to_id_string();
        let validity = tbs.validity();

        Ok(Self {
            der: der.to_vec(),
            tbs: tbs.as_ref().to_vec(),
            signature: cert.signature_value.data.to_vec(),
            signature_algorithm: DigestAlgorithm::from_rsa_signature_oid(&signature_algorithm_oid),
            signature_algorithm_oid,
            subject: Identity::from_x509_name(tbs.subject())?,
            issuer: Identity::from_x509_name(tbs.issuer())?,
            serial: tbs.raw_serial().to_vec(),
            not_before: timestamp(validity.not_before.timestamp())?,
            not_after: timestamp(validity.not_after.timestamp())?,
            public_key,
            extensions: CertificateExtensions::from_tbs(tbs)?,
        })
    }

    /// Decode the first `CERTIFICATE` block of a PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let (label, der) = der::pem::decode_vec(pem.as_bytes()).map_err(der::Error::from)?;
        if label != PEM_LABEL {
            return Err(Error::CertificateDecode {
                reason: format!("unexpected PEM label '{}'", label),
            });
        }
        Self::from_der(&der)
    }

    /// Decode PEM or DER, whichever the bytes contain.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let start = bytes
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(bytes.len());
        if bytes[start..].starts_with(b"-----BEGIN") {
            let text = std::str::from_utf8(bytes).map_err(|e| Error::CertificateDecode {
                reason: e.to_string(),
            })?;
            Self::from_pem(text)
        } else {
            Self::from_der(bytes)
        }
    }

    /// Encode as PEM.
    pub fn to_pem(&self) -> Result<String> {
        let pem = der::pem::encode_string(PEM_LABEL, der::pem::LineEnding::LF, &self.der)
            .map_err(der::Error::from)?;
        Ok(pem)
    }

    /// DER encoding.
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// Subject name.
    pub fn subject(&self) -> &Identity {
        &self.subject
    }

    /// Issuer name.
    pub fn issuer(&self) -> &Identity {
        &self.issuer
    }

    /// Serial number content octets.
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// Serial number as uppercase hex.
    pub fn serial_hex(&self) -> String {
        self.serial.iter().map(|b| format!("{:02X}", b)).collect()
    }

    /// Start of the validity period.
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of the validity period.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Whether `at` lies within the validity period, bounds inclusive.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// Subject public key.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Parsed extensions.
    pub fn extensions(&self) -> &CertificateExtensions {
        &self.extensions
    }

    /// Whether basic constraints mark this certificate as a CA.
    pub fn is_ca(&self) -> bool {
        self.extensions
            .basic_constraints
            .map(|bc| bc.is_ca)
            .unwrap_or(false)
    }

    /// Path length constraint of a CA.
    pub fn path_length(&self) -> Option<u8> {
        self.extensions
            .basic_constraints
            .and_then(|bc| bc.path_length)
    }

    /// Key usage bits, if the extension is present.
    pub fn key_usage(&self) -> Option<KeyUsageFlags> {
        self.extensions.key_usage
    }

    /// Whether the certificate may sign other certificates.
    pub fn can_sign_certificates(&self) -> bool {
        self.is_ca()
            && self
                .key_usage()
                .map_or(true, |ku| ku.contains(KeyUsageFlags::KEY_CERT_SIGN))
    }

    /// Subject key identifier.
    pub fn subject_key_identifier(&self) -> Option<&[u8]> {
        self.extensions.subject_key_identifier.as_deref()
    }

    /// Authority key identifier.
    pub fn authority_key_identifier(&self) -> Option<&[u8]> {
        self.extensions.authority_key_identifier.as_deref()
    }

    /// Subject and issuer are the same name.
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    /// Whether `issuer` plausibly issued this certificate: names link and,
    /// when both identifiers are present, AKI equals the issuer's SKI.
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        if self.issuer != issuer.subject {
            return false;
        }
        match (self.authority_key_identifier(), issuer.subject_key_identifier()) {
            (Some(aki), Some(ski)) => aki == ski,
            _ => true,
        }
    }

    /// Verify this certificate's signature with `issuer_key`.
    pub fn verify_signed_by(&self, issuer_key: &RsaPublicKey) -> Result<()> {
        let Some(algorithm) = self.signature_algorithm else {
            return Err(Error::UnsupportedAlgorithm {
                oid: self.signature_algorithm_oid.clone(),
            });
        };
        if verify_signature(issuer_key, algorithm, &self.tbs, &self.signature) {
            Ok(())
        } else {
            Err(Error::CryptographicMismatch {
                check: CryptoCheck::CertificateSignature {
                    subject: self.subject.clone(),
                },
            })
        }
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| Error::CertificateDecode {
            reason: format!("validity time {} out of range", secs),
        })
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject.to_string())
            .field("issuer", &self.issuer.to_string())
            .field("serial", &self.serial_hex())
            .field("not_after", &self.not_after)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_der_rejects_garbage() {
        assert!(matches!(
            Certificate::from_der(&[0x30, 0x03, 0x02, 0x01, 0x00]),
            Err(Error::CertificateDecode { .. })
        ));
    }

    #[test]
    fn test_from_pem_rejects_wrong_label() {
        let pem = der::pem::encode_string("PUBLIC KEY", der::pem::LineEnding::LF, &[0x30, 0x00])
            .unwrap();
        assert!(matches!(
            Certificate::from_pem(&pem),
            Err(Error::CertificateDecode { .. })
        ));
    }

    #[test]
    fn test_from_pem_rejects_malformed_armor() {
        let pem = "-----BEGIN CERTIFICATE-----\n!!!!\n-----END CERTIFICATE-----\n";
        assert!(matches!(Certificate::from_pem(pem), Err(Error::Encoding(_))));
    }

    #[test]
    fn test_timestamp_conversion() {
        let t = timestamp(0).unwrap();
        assert_eq!(t.timestamp(), 0);
    }
}
