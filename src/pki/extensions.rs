//! X.509 v3 extensions used by the hierarchy.
//!
//! Only the extensions this crate issues and checks are modelled: basic
//! constraints, key usage, extended key usage and the two key identifiers.
//! Unknown non-critical extensions in parsed certificates are ignored; unknown
//! critical ones make the certificate undecodable.

use bitflags::bitflags;
use const_oid::ObjectIdentifier;
use der::asn1::{BitString, OctetString};
use der::Encode;
use x509_cert::ext::pkix::{
    AuthorityKeyIdentifier, BasicConstraints as PkixBasicConstraints,
    ExtendedKeyUsage as PkixExtendedKeyUsage, SubjectKeyIdentifier,
};
use x509_cert::ext::Extension;
use x509_parser::certificate::TbsCertificate;
use x509_parser::extensions::ParsedExtension;

use crate::error::{Error, Result};

const ID_CE_BASIC_CONSTRAINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");
const ID_CE_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.15");
const ID_CE_EXT_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.37");
const ID_CE_SUBJECT_KEY_IDENTIFIER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.14");
const ID_CE_AUTHORITY_KEY_IDENTIFIER: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.5.29.35");

/// Extended key usage purpose for S/MIME and document signing.
pub const ID_KP_EMAIL_PROTECTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.4");

bitflags! {
    /// Key usage bits. Bit `i` is RFC 5280 `KeyUsage` bit `i`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct KeyUsageFlags: u16 {
        /// digitalSignature (0)
        const DIGITAL_SIGNATURE = 1 << 0;
        /// contentCommitment / nonRepudiation (1)
        const CONTENT_COMMITMENT = 1 << 1;
        /// keyEncipherment (2)
        const KEY_ENCIPHERMENT = 1 << 2;
        /// dataEncipherment (3)
        const DATA_ENCIPHERMENT = 1 << 3;
        /// keyAgreement (4)
        const KEY_AGREEMENT = 1 << 4;
        /// keyCertSign (5)
        const KEY_CERT_SIGN = 1 << 5;
        /// cRLSign (6)
        const CRL_SIGN = 1 << 6;
        /// encipherOnly (7)
        const ENCIPHER_ONLY = 1 << 7;
        /// decipherOnly (8)
        const DECIPHER_ONLY = 1 << 8;
    }
}

const KEY_USAGE_LABELS: [(KeyUsageFlags, &str); 9] = [
    (KeyUsageFlags::DIGITAL_SIGNATURE, "digital_signature"),
    (KeyUsageFlags::CONTENT_COMMITMENT, "non_repudiation"),
    (KeyUsageFlags::KEY_ENCIPHERMENT, "key_encipherment"),
    (KeyUsageFlags::DATA_ENCIPHERMENT, "data_encipherment"),
    (KeyUsageFlags::KEY_AGREEMENT, "key_agreement"),
    (KeyUsageFlags::KEY_CERT_SIGN, "key_cert_sign"),
    (KeyUsageFlags::CRL_SIGN, "crl_sign"),
    (KeyUsageFlags::ENCIPHER_ONLY, "encipher_only"),
    (KeyUsageFlags::DECIPHER_ONLY, "decipher_only"),
];

impl KeyUsageFlags {
    /// Usage required of a document signer by default.
    pub fn document_signer() -> Self {
        Self::DIGITAL_SIGNATURE | Self::CONTENT_COMMITMENT
    }

    /// Usage of a certificate authority.
    pub fn certificate_authority() -> Self {
        Self::KEY_CERT_SIGN | Self::CRL_SIGN
    }

    /// Parse one snake_case bit name, as printed by [`KeyUsageFlags::labels`].
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        let label = match label.as_str() {
            "content_commitment" => "non_repudiation",
            other => other,
        };
        KEY_USAGE_LABELS
            .iter()
            .find(|(_, name)| *name == label)
            .map(|(flag, _)| *flag)
    }

    /// snake_case names of the set bits, lowest bit first.
    pub fn labels(&self) -> Vec<&'static str> {
        KEY_USAGE_LABELS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    /// DER `KeyUsage` BIT STRING with trailing zero bits removed.
    pub(crate) fn to_der_bit_string(self) -> Result<Vec<u8>> {
        let bits = self.bits();
        if bits == 0 {
            return Ok(BitString::new(0, Vec::new())?.to_der()?);
        }
        let highest = 15 - bits.leading_zeros() as usize;
        let mut bytes = vec![0u8; highest / 8 + 1];
        for i in 0..=highest {
            if bits & (1 << i) != 0 {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }
        let unused = (7 - highest % 8) as u8;
        Ok(BitString::new(unused, bytes)?.to_der()?)
    }
}

/// cA flag and optional path length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicConstraints {
    /// Certificate may issue certificates
    pub is_ca: bool,
    /// Maximum number of CA certificates that may follow this one
    pub path_length: Option<u8>,
}

impl BasicConstraints {
    /// CA with the given path length.
    pub fn ca(path_length: u8) -> Self {
        Self {
            is_ca: true,
            path_length: Some(path_length),
        }
    }

    /// End entity.
    pub fn end_entity() -> Self {
        Self {
            is_ca: false,
            path_length: None,
        }
    }
}

/// Extensions carried by a certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateExtensions {
    /// Basic constraints (critical)
    pub basic_constraints: Option<BasicConstraints>,
    /// Key usage (critical)
    pub key_usage: Option<KeyUsageFlags>,
    /// Extended key usage purposes
    pub extended_key_usage: Vec<ObjectIdentifier>,
    /// SHA-1 of the subject's PKCS#1 public key
    pub subject_key_identifier: Option<Vec<u8>>,
    /// Key identifier of the issuing key
    pub authority_key_identifier: Option<Vec<u8>>,
}

impl CertificateExtensions {
    /// Encode for a TBSCertificate.
    pub(crate) fn to_x509(&self) -> Result<Vec<Extension>> {
        let mut out = Vec::new();

        if let Some(bc) = self.basic_constraints {
            let value = PkixBasicConstraints {
                ca: bc.is_ca,
                path_len_constraint: bc.path_length,
            };
            out.push(extension(ID_CE_BASIC_CONSTRAINTS, true, value.to_der()?)?);
        }
        if let Some(usage) = self.key_usage {
            out.push(extension(ID_CE_KEY_USAGE, true, usage.to_der_bit_string()?)?);
        }
        if !self.extended_key_usage.is_empty() {
            let value = PkixExtendedKeyUsage(self.extended_key_usage.clone());
            out.push(extension(ID_CE_EXT_KEY_USAGE, false, value.to_der()?)?);
        }
        if let Some(ski) = &self.subject_key_identifier {
            let value = SubjectKeyIdentifier(OctetString::new(ski.clone())?);
            out.push(extension(ID_CE_SUBJECT_KEY_IDENTIFIER, false, value.to_der()?)?);
        }
        if let Some(aki) = &self.authority_key_identifier {
            let value = AuthorityKeyIdentifier {
                key_identifier: Some(OctetString::new(aki.clone())?),
                authority_cert_issuer: None,
                authority_cert_serial_number: None,
            };
            out.push(extension(ID_CE_AUTHORITY_KEY_IDENTIFIER, false, value.to_der()?)?);
        }

        Ok(out)
    }

    /// Read the modelled extensions from a parsed certificate.
    pub(crate) fn from_tbs(tbs: &TbsCertificate<'_>) -> Result<Self> {
        let mut ext = Self::default();
        for extension in tbs.extensions() {
            match extension.parsed_extension() {
                ParsedExtension::BasicConstraints(bc) => {
                    let path_length = bc
                        .path_len_constraint
                        .map(|len| u8::try_from(len).unwrap_or(u8::MAX));
                    ext.basic_constraints = Some(BasicConstraints {
                        is_ca: bc.ca,
                        path_length,
                    });
                },
                ParsedExtension::KeyUsage(ku) => {
                    ext.key_usage = Some(KeyUsageFlags::from_bits_truncate(ku.flags));
                },
                ParsedExtension::ExtendedKeyUsage(eku) => {
                    let mut purposes = Vec::new();
                    if eku.email_protection {
                        purposes.push(ID_KP_EMAIL_PROTECTION);
                    }
                    for oid in &eku.other {
                        if let Ok(oid) = ObjectIdentifier::new(&oid.to_id_string()) {
                            purposes.push(oid);
                        }
                    }
                    ext.extended_key_usage = purposes;
                },
                ParsedExtension::SubjectKeyIdentifier(id) => {
                    ext.subject_key_identifier = Some(id.0.to_vec());
                },
                ParsedExtension::AuthorityKeyIdentifier(aki) => {
                    ext.authority_key_identifier =
                        aki.key_identifier.as_ref().map(|id| id.0.to_vec());
                },
                ParsedExtension::UnsupportedExtension { .. } if extension.critical => {
                    return Err(Error::CertificateDecode {
                        reason: format!(
                            "unsupported critical extension {}",
                            extension.oid.to_id_string()
                        ),
                    });
                },
                ParsedExtension::ParseError { error } => {
                    if extension.critical {
                        return Err(Error::CertificateDecode {
                            reason: format!(
                                "critical extension {}: {}",
                                extension.oid.to_id_string(),
                                error
                            ),
                        });
                    }
                    log::warn!(
                        "Ignoring malformed extension {}: {}",
                        extension.oid.to_id_string(),
                        error
                    );
                },
                _ => {},
            }
        }
        Ok(ext)
    }
}

fn extension(extn_id: ObjectIdentifier, critical: bool, value: Vec<u8>) -> Result<Extension> {
    Ok(Extension {
        extn_id,
        critical,
        extn_value: OctetString::new(value)?,
    })
}
