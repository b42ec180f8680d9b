//! Certificate issuance.
//!
//! [`issue`] is the single code path for every role: it validates the subject,
//! generates the subject key, assembles the TBSCertificate with the role's
//! extensions and signs it with the issuer key (or the new key itself for a
//! self-signed certificate). [`CertificateAuthorityBuilder`] wraps it with the
//! three role-specific operations and the configured key sizes.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use const_oid::ObjectIdentifier;
use der::asn1::{Any, BitString, GeneralizedTime, UtcTime};
use der::{Decode, Encode, Tag};
use pkcs8::EncodePublicKey;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x509_cert::certificate::{Certificate as X509Certificate, TbsCertificate, Version};
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::{Time, Validity};

use super::certificate::Certificate;
use super::chain::{ChainBuildError, ChainLinkFailure};
use super::extensions::{BasicConstraints, CertificateExtensions, ID_KP_EMAIL_PROTECTION};
use super::identity::Identity;
use super::key::{key_identifier, KeyPair};
use super::KeyUsageFlags;
use crate::config::PkiConfig;
use crate::error::{Error, Result};
use crate::signatures::DigestAlgorithm;

const SERIAL_LEN: usize = 20;
const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

/// Position of a certificate in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Self-signed trust anchor
    Root,
    /// CA issued by the root
    Intermediate,
    /// End-entity document signer
    Leaf,
}

/// Issuer key pair and certificate.
#[derive(Debug, Clone, Copy)]
pub struct IssuerRef<'a> {
    /// Issuer private key
    pub key: &'a KeyPair,
    /// Issuer certificate
    pub certificate: &'a Certificate,
}

impl<'a> IssuerRef<'a> {
    /// Pair an issuer key with its certificate.
    pub fn new(key: &'a KeyPair, certificate: &'a Certificate) -> Self {
        Self { key, certificate }
    }
}

/// Who signs a new certificate.
#[derive(Debug, Clone, Copy)]
pub enum Issuance<'a> {
    /// The new key signs its own certificate
    SelfSigned,
    /// An existing CA signs it
    FromParent(IssuerRef<'a>),
}

/// Everything needed to issue one certificate.
#[derive(Debug, Clone)]
pub struct CertificateProfile<'a> {
    /// Subject name
    pub identity: Identity,
    /// Role in the hierarchy
    pub role: Role,
    /// Signer of the certificate
    pub issuance: Issuance<'a>,
    /// RSA modulus size in bits
    pub key_size: usize,
    /// Validity period in days
    pub validity_days: u32,
    /// Start of validity; now when unset
    pub not_before: Option<DateTime<Utc>>,
    /// Key usage replacing the role default
    pub key_usage: Option<KeyUsageFlags>,
    /// Path length replacing the role default (CA roles only)
    pub path_length: Option<u8>,
}

impl<'a> CertificateProfile<'a> {
    /// Profile with the default key size and validity for the role.
    pub fn new(identity: Identity, role: Role, issuance: Issuance<'a>) -> Self {
        let defaults = PkiConfig::default();
        let settings = defaults.settings_for(role, matches!(issuance, Issuance::SelfSigned));
        Self {
            identity,
            role,
            issuance,
            key_size: settings.key_size,
            validity_days: settings.validity_days,
            not_before: None,
            key_usage: None,
            path_length: None,
        }
    }

    /// Set the key size.
    pub fn with_key_size(mut self, bits: usize) -> Self {
        self.key_size = bits;
        self
    }

    /// Set the validity period.
    pub fn with_validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// Set the start of validity.
    pub fn with_not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }

    /// Override the key usage bits.
    pub fn with_key_usage(mut self, usage: KeyUsageFlags) -> Self {
        self.key_usage = Some(usage);
        self
    }

    /// Override the CA path length.
    pub fn with_path_length(mut self, path_length: u8) -> Self {
        self.path_length = Some(path_length);
        self
    }

    fn is_ca(&self) -> bool {
        matches!(self.role, Role::Root | Role::Intermediate)
    }

    fn default_key_usage(&self) -> KeyUsageFlags {
        match (self.role, self.issuance) {
            (Role::Root | Role::Intermediate, _) => KeyUsageFlags::certificate_authority(),
            (Role::Leaf, Issuance::SelfSigned) => {
                KeyUsageFlags::document_signer() | KeyUsageFlags::KEY_CERT_SIGN
            },
            (Role::Leaf, Issuance::FromParent(_)) => KeyUsageFlags::document_signer(),
        }
    }

    fn default_path_length(&self) -> u8 {
        match self.role {
            Role::Root => 1,
            _ => 0,
        }
    }

    fn extensions(
        &self,
        subject_key_id: Vec<u8>,
        issuer_key_id: Option<Vec<u8>>,
    ) -> CertificateExtensions {
        let basic_constraints = if self.is_ca() {
            BasicConstraints::ca(self.path_length.unwrap_or_else(|| self.default_path_length()))
        } else {
            BasicConstraints::end_entity()
        };
        let extended_key_usage = match self.role {
            Role::Leaf => vec![ID_KP_EMAIL_PROTECTION],
            _ => Vec::new(),
        };
        CertificateExtensions {
            basic_constraints: Some(basic_constraints),
            key_usage: Some(self.key_usage.unwrap_or_else(|| self.default_key_usage())),
            extended_key_usage,
            subject_key_identifier: Some(subject_key_id),
            authority_key_identifier: issuer_key_id,
        }
    }
}

/// Issue a certificate according to `profile`.
///
/// Nothing is generated unless the subject is valid and the issuance is
/// consistent with the role: roots are self-signed, intermediates need a
/// parent, and a parent must be a CA whose key matches its certificate and
/// whose path length leaves room for another CA when issuing one.
pub fn issue(profile: &CertificateProfile<'_>) -> Result<(KeyPair, Certificate)> {
    profile.identity.validate()?;
    check_issuance(profile)?;

    let key = KeyPair::generate(profile.key_size)?;
    let subject_key_id = key.key_identifier()?;

    let (issuer_name, issuer_key, issuer_key_id) = match profile.issuance {
        Issuance::SelfSigned => {
            // A self-signed leaf names its own key as authority; roots carry SKI only.
            let aki = match profile.role {
                Role::Leaf => Some(subject_key_id.clone()),
                _ => None,
            };
            (profile.identity.clone(), &key, aki)
        },
        Issuance::FromParent(parent) => {
            let parent_not_after = parent.certificate.not_after();
            let requested_end =
                not_before(profile) + Duration::days(i64::from(profile.validity_days));
            if requested_end > parent_not_after {
                log::warn!(
                    "Certificate for {} outlives its issuer {} ({} > {})",
                    profile.identity,
                    parent.certificate.subject(),
                    requested_end,
                    parent_not_after
                );
            }
            (
                parent.certificate.subject().clone(),
                parent.key,
                Some(key_identifier(parent.key.public_key())?),
            )
        },
    };

    let extensions = profile.extensions(subject_key_id, issuer_key_id);
    let start = not_before(profile);
    let end = start + Duration::days(i64::from(profile.validity_days));

    let signature_algorithm = AlgorithmIdentifierOwned {
        oid: SHA256_WITH_RSA,
        parameters: Some(Any::new(Tag::Null, Vec::<u8>::new())?),
    };
    let spki_der = key.public_key().to_public_key_der()?;

    let tbs_certificate = TbsCertificate {
        version: Version::V3,
        serial_number: random_serial()?,
        signature: signature_algorithm.clone(),
        issuer: issuer_name.to_x509_name()?,
        validity: Validity {
            not_before: x509_time(start)?,
            not_after: x509_time(end)?,
        },
        subject: profile.identity.to_x509_name()?,
        subject_public_key_info: SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes())?,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(extensions.to_x509()?),
    };

    let tbs_der = tbs_certificate.to_der()?;
    let signature = issuer_key.sign(DigestAlgorithm::Sha256, &tbs_der)?;
    let encoded = X509Certificate {
        tbs_certificate,
        signature_algorithm,
        signature: BitString::from_bytes(&signature)?,
    }
    .to_der()?;

    let certificate = Certificate::from_der(&encoded)?;
    log::info!(
        "Issued {:?} certificate for {} (serial {})",
        profile.role,
        certificate.subject(),
        certificate.serial_hex()
    );
    Ok((key, certificate))
}

fn check_issuance(profile: &CertificateProfile<'_>) -> Result<()> {
    match (profile.role, profile.issuance) {
        (Role::Root, Issuance::FromParent(_)) => Err(Error::RootNotSelfSigned),
        (Role::Intermediate, Issuance::SelfSigned) => Err(Error::IssuerKeyRequired {
            role: Role::Intermediate,
        }),
        (_, Issuance::SelfSigned) => Ok(()),
        (role, Issuance::FromParent(parent)) => {
            let issuer = parent.certificate;
            if !parent.key.matches(issuer.public_key()) {
                return Err(Error::IssuerKeyRequired { role });
            }
            let failure = if !issuer.can_sign_certificates() {
                Some(ChainLinkFailure::NotCertificateAuthority)
            } else if profile.is_ca() && issuer.path_length() == Some(0) {
                Some(ChainLinkFailure::PathLengthExceeded {
                    allowed: 0,
                    found: 1,
                })
            } else {
                None
            };
            match failure {
                Some(reason) => Err(Error::ChainBuild(ChainBuildError {
                    link: 0,
                    subject: issuer.subject().clone(),
                    reason,
                })),
                None => Ok(()),
            }
        },
    }
}

fn not_before(profile: &CertificateProfile<'_>) -> DateTime<Utc> {
    let start = profile.not_before.unwrap_or_else(Utc::now);
    // Certificate times carry whole seconds.
    Utc.timestamp_opt(start.timestamp(), 0).single().unwrap_or(start)
}

fn random_serial() -> Result<SerialNumber> {
    let mut bytes = [0u8; SERIAL_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] &= 0x7F;
    if bytes[0] == 0 {
        bytes[0] = 1;
    }
    Ok(SerialNumber::new(&bytes)?)
}

fn x509_time(at: DateTime<Utc>) -> Result<Time> {
    let since_epoch = std::time::Duration::from_secs(u64::try_from(at.timestamp()).map_err(|_| {
        Error::CertificateDecode {
            reason: format!("validity time {} precedes the epoch", at),
        }
    })?);
    if at.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(since_epoch)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(since_epoch)?))
    }
}

/// Issues root, intermediate and leaf certificates with configured key sizes.
#[derive(Debug, Clone, Default)]
pub struct CertificateAuthorityBuilder {
    config: PkiConfig,
}

impl CertificateAuthorityBuilder {
    /// Create a builder with the given configuration.
    pub fn new(config: PkiConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &PkiConfig {
        &self.config
    }

    /// Self-signed root CA with path length 1.
    pub fn build_root(
        &self,
        identity: Identity,
        key_size: usize,
        validity_days: u32,
    ) -> Result<(KeyPair, Certificate)> {
        let profile = CertificateProfile::new(identity, Role::Root, Issuance::SelfSigned)
            .with_key_size(key_size)
            .with_validity_days(validity_days);
        issue(&profile)
    }

    /// Intermediate CA with path length 0, signed by `issuer`.
    pub fn build_intermediate(
        &self,
        identity: Identity,
        issuer: Option<IssuerRef<'_>>,
        validity_days: u32,
    ) -> Result<(KeyPair, Certificate)> {
        let issuer = issuer.ok_or(Error::IssuerKeyRequired {
            role: Role::Intermediate,
        })?;
        let profile =
            CertificateProfile::new(identity, Role::Intermediate, Issuance::FromParent(issuer))
                .with_key_size(self.config.intermediate.key_size)
                .with_validity_days(validity_days);
        issue(&profile)
    }

    /// Document-signing leaf, chain-issued or self-signed.
    pub fn build_leaf(
        &self,
        identity: Identity,
        issuance: Issuance<'_>,
        validity_days: u32,
    ) -> Result<(KeyPair, Certificate)> {
        let key_size = match issuance {
            Issuance::SelfSigned => self.config.self_signed.key_size,
            Issuance::FromParent(_) => self.config.leaf.key_size,
        };
        let profile = CertificateProfile::new(identity, Role::Leaf, issuance)
            .with_key_size(key_size)
            .with_validity_days(validity_days);
        issue(&profile)
    }
}
