//! Digital signature types and data structures.
//!
//! This module defines the signing options, the signature record embedded in a
//! document, and the verdict produced by the trust validator.

use chrono::{DateTime, TimeZone, Utc};
use rsa::Pkcs1v15Sign;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::{CryptoCheck, Error, Result};
use crate::pki::{Certificate, ChainBuildError, Identity, KeyPair, KeyUsageFlags};

/// Digest algorithm used for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    /// SHA-256 (recommended)
    #[default]
    #[serde(rename = "SHA-256")]
    Sha256,
    /// SHA-384
    #[serde(rename = "SHA-384")]
    Sha384,
    /// SHA-512
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl DigestAlgorithm {
    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Parse a name as printed by [`DigestAlgorithm::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().replace('_', "-").as_str() {
            "SHA-256" | "SHA256" => Some(DigestAlgorithm::Sha256),
            "SHA-384" | "SHA384" => Some(DigestAlgorithm::Sha384),
            "SHA-512" | "SHA512" => Some(DigestAlgorithm::Sha512),
            _ => None,
        }
    }

    /// Dotted OID of `<digest>WithRSAEncryption`.
    pub fn rsa_signature_oid(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "1.2.840.113549.1.1.11",
            DigestAlgorithm::Sha384 => "1.2.840.113549.1.1.12",
            DigestAlgorithm::Sha512 => "1.2.840.113549.1.1.13",
        }
    }

    /// Inverse of [`DigestAlgorithm::rsa_signature_oid`].
    pub fn from_rsa_signature_oid(oid: &str) -> Option<Self> {
        [DigestAlgorithm::Sha256, DigestAlgorithm::Sha384, DigestAlgorithm::Sha512]
            .into_iter()
            .find(|alg| alg.rsa_signature_oid() == oid)
    }

    /// Compute the digest of `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// PKCS#1 v1.5 padding scheme for this digest.
    pub(crate) fn pkcs1v15(&self) -> Pkcs1v15Sign {
        match self {
            DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
            DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
            DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
        }
    }
}

/// Changes a signer allows after its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModificationPermission {
    /// No revision may follow the signature
    NoChanges,
    /// Signature fields may be added and filled
    FormFillingAndSigning,
    /// As above; annotations are treated the same way
    AnnotationsFormFillingAndSigning,
}

impl ModificationPermission {
    /// Numeric DocMDP level (1-3).
    pub fn level(&self) -> u8 {
        match self {
            ModificationPermission::NoChanges => 1,
            ModificationPermission::FormFillingAndSigning => 2,
            ModificationPermission::AnnotationsFormFillingAndSigning => 3,
        }
    }

    /// Parse a DocMDP level.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(ModificationPermission::NoChanges),
            2 => Some(ModificationPermission::FormFillingAndSigning),
            3 => Some(ModificationPermission::AnnotationsFormFillingAndSigning),
            _ => None,
        }
    }

    /// Whether a later revision of the given kind is allowed.
    pub fn permits(&self, revision: RevisionKind) -> bool {
        match self {
            ModificationPermission::NoChanges => false,
            ModificationPermission::FormFillingAndSigning
            | ModificationPermission::AnnotationsFormFillingAndSigning => {
                matches!(revision, RevisionKind::SignatureField | RevisionKind::Signature)
            },
        }
    }
}

/// Classification of an incremental revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionKind {
    /// Adds an empty signature field
    SignatureField,
    /// Fills a signature field
    Signature,
    /// Anything else appended to the file
    Other,
}

/// Trusted time evidence obtained for a signature value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampToken {
    /// Name of the issuing authority
    pub authority: String,
    /// Time asserted by the authority, unix seconds
    pub issued_at: i64,
    /// Opaque token bytes
    #[serde(with = "base64_bytes")]
    pub token: Vec<u8>,
}

/// What could be established about a signature's timestamp token.
///
/// The token is not covered by the signer's signature, so it only counts
/// when it is bound to the signature value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampCheck {
    /// No token
    #[default]
    Absent,
    /// Local-clock token over this signature value
    Bound,
    /// Local-clock token over some other signature value
    Unbound,
    /// Token from an authority this crate cannot check
    Unverified,
}

impl TimestampCheck {
    /// Short label for reports.
    pub fn label(&self) -> &'static str {
        match self {
            TimestampCheck::Absent => "none",
            TimestampCheck::Bound => "bound to signature",
            TimestampCheck::Unbound => "NOT bound to signature",
            TimestampCheck::Unverified => "present (unverified)",
        }
    }
}

/// Source of timestamp tokens. Failures never abort signing.
pub trait TimestampAuthority {
    /// Obtain a token over the given signature value.
    fn request_token(&self, signature: &[u8]) -> Result<TimestampToken>;
}

/// The attributes covered by the signer's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAttributes {
    /// Signature field this signature fills
    pub field_name: String,
    /// Digest algorithm used for the document and the attributes
    pub digest_algorithm: DigestAlgorithm,
    /// Digest of the byte range
    #[serde(with = "base64_bytes")]
    pub document_digest: Vec<u8>,
    /// Claimed signing time, unix seconds
    pub signing_time: i64,
    /// Changes permitted after this signature
    pub modification_permission: Option<ModificationPermission>,
}

impl SignedAttributes {
    /// Canonical bytes the signer signs.
    pub fn to_signed_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Signing time as a timestamp.
    pub fn signing_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.signing_time, 0).single()
    }
}

/// Signature value plus the certificates needed to validate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRecord {
    /// Signed attributes
    pub signed_attributes: SignedAttributes,
    /// DER of the signer certificate
    #[serde(with = "base64_bytes")]
    pub signer_certificate: Vec<u8>,
    /// DER of the issuing chain as presented by the signer
    #[serde(with = "base64_list")]
    pub embedded_chain: Vec<Vec<u8>>,
    /// RSA PKCS#1 v1.5 signature over the signed attributes
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
    /// Timestamp token, if one was obtained
    pub timestamp_token: Option<TimestampToken>,
}

impl SignatureRecord {
    /// Serialize for embedding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse embedded bytes; trailing zero padding is ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        Ok(serde_json::from_slice(&bytes[..end])?)
    }

    /// Decode the signer certificate.
    pub fn signer_certificate(&self) -> Result<Certificate> {
        Certificate::from_der(&self.signer_certificate)
    }

    /// Decode the embedded chain.
    pub fn embedded_chain(&self) -> Result<Vec<Certificate>> {
        self.embedded_chain
            .iter()
            .map(|der| Certificate::from_der(der))
            .collect()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod base64_list {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(items.len()))?;
        for item in items {
            seq.serialize_element(&STANDARD.encode(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(d)?
            .into_iter()
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Signing credentials: private key, its certificate and the issuing chain.
pub struct SigningCredentials {
    /// Signer's private key
    pub key: KeyPair,
    /// Signer's certificate
    pub certificate: Certificate,
    /// Issuing certificates, embedded as presented
    pub chain: Vec<Certificate>,
}

impl SigningCredentials {
    /// Pair a key with its certificate. Fails if they do not belong together.
    pub fn new(key: KeyPair, certificate: Certificate) -> Result<Self> {
        if !key.matches(certificate.public_key()) {
            return Err(Error::CertificateKeyMismatch {
                subject: certificate.subject().clone(),
            });
        }
        Ok(Self {
            key,
            certificate,
            chain: Vec::new(),
        })
    }

    /// Attach the issuing chain.
    pub fn with_chain(mut self, chain: Vec<Certificate>) -> Self {
        self.chain = chain;
        self
    }
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("certificate", &self.certificate.subject().to_string())
            .field("key", &"[REDACTED]")
            .field("chain", &format!("{} certificates", self.chain.len()))
            .finish()
    }
}

/// What to do when the requested signature field does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldPolicy {
    /// Fail with `SignatureFieldMissing`
    #[default]
    MustExist,
    /// Append a field revision first
    CreateIfMissing,
}

/// Options for signing a document.
#[derive(Debug, Clone)]
pub struct SignOptions {
    /// Signature field to fill
    pub field_name: String,
    /// Behaviour for a missing field
    pub field_policy: FieldPolicy,
    /// Digest algorithm to use
    pub digest_algorithm: DigestAlgorithm,
    /// Reason for signing
    pub reason: Option<String>,
    /// Location where the document was signed
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Name of the signer (if different from certificate CN)
    pub name: Option<String>,
    /// Changes permitted after this signature
    pub modification_permission: Option<ModificationPermission>,
    /// Reserved size of the encoded signature record in bytes
    pub estimated_size: usize,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            field_name: "Signature1".to_string(),
            field_policy: FieldPolicy::MustExist,
            digest_algorithm: DigestAlgorithm::Sha256,
            reason: None,
            location: None,
            contact_info: None,
            name: None,
            modification_permission: None,
            estimated_size: crate::config::DEFAULT_SIGNATURE_SIZE,
        }
    }
}

impl SignOptions {
    /// Set the signature field name.
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    /// Set the missing-field policy.
    pub fn with_field_policy(mut self, policy: FieldPolicy) -> Self {
        self.field_policy = policy;
        self
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.contact_info = Some(contact.into());
        self
    }

    /// Set the permitted modifications.
    pub fn with_modification_permission(mut self, permission: ModificationPermission) -> Self {
        self.modification_permission = Some(permission);
        self
    }

    /// Set the reserved record size in bytes.
    pub fn with_estimated_size(mut self, size: usize) -> Self {
        self.estimated_size = size;
        self
    }
}

/// Descriptive entries read from a signature dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureInfo {
    /// Name of the signer
    pub signer_name: Option<String>,
    /// Signing time as written in /M
    pub signing_time: Option<String>,
    /// Reason for signing
    pub reason: Option<String>,
    /// Signing location
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Signature sub-filter name
    pub sub_filter: Option<String>,
    /// Byte range of the signed data
    pub byte_range: Vec<i64>,
}

/// Overall outcome for one signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictStatus {
    /// All checks passed
    Valid,
    /// A check failed
    Invalid,
    /// Validity could not be established
    Indeterminate,
}

impl VerdictStatus {
    /// Check if the status indicates a valid signature.
    pub fn is_valid(&self) -> bool {
        matches!(self, VerdictStatus::Valid)
    }

    /// Uppercase label for reports.
    pub fn label(&self) -> &'static str {
        match self {
            VerdictStatus::Valid => "VALID",
            VerdictStatus::Invalid => "INVALID",
            VerdictStatus::Indeterminate => "INDETERMINATE",
        }
    }
}

/// Outcome of one group of checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckStatus {
    /// Not reached
    #[default]
    NotChecked,
    /// Passed
    Passed,
    /// Failed
    Failed,
}

/// How much of the file a signature's byte range covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coverage {
    /// Everything except the signature value
    Full,
    /// A prefix of the file; later revisions follow
    Partial,
    /// No usable byte range
    #[default]
    None,
}

/// Validation progress for one signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ValidationState {
    /// Nothing checked yet
    #[default]
    Unverified,
    /// A path to a trust anchor was found
    ChainBuilt,
    /// Document and certificate signatures verified
    CryptoChecked,
    /// Key usage, validity and chain constraints checked
    PolicyChecked,
    /// Coverage and modification rules applied
    Final,
}

/// First failure that decided a non-valid verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No path from the signer to a trust root
    NoPathToTrustAnchor,
    /// A document or certificate signature did not verify
    CryptographicMismatch {
        /// The check that failed
        check: CryptoCheck,
    },
    /// Signer key usage does not satisfy the constraints
    KeyUsageViolation {
        /// Required bits that are absent
        missing: KeyUsageFlags,
    },
    /// A chain certificate was not valid at the signing time
    CertificateNotValidAtSigningTime {
        /// Subject of the offending certificate
        subject: Identity,
    },
    /// CA flag, keyCertSign or path length violated
    ChainConstraintViolation {
        /// Offending link of the root-first path
        error: ChainBuildError,
    },
    /// The embedded record or dictionary could not be decoded
    MalformedSignature {
        /// Description of the problem
        detail: String,
    },
    /// The signature covers no usable byte range
    DocumentCoverageIndeterminate,
    /// Revisions after the signature exceed its modification permission
    ModificationNotPermitted,
}

impl FailureReason {
    /// Verdict status implied by this failure.
    pub fn status(&self) -> VerdictStatus {
        match self {
            FailureReason::NoPathToTrustAnchor | FailureReason::DocumentCoverageIndeterminate => {
                VerdictStatus::Indeterminate
            },
            _ => VerdictStatus::Invalid,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NoPathToTrustAnchor => write!(f, "no path to a trust anchor"),
            FailureReason::CryptographicMismatch { check } => {
                write!(f, "cryptographic mismatch: {}", check)
            },
            FailureReason::KeyUsageViolation { missing } => {
                write!(f, "key usage violation, missing {}", missing.labels().join(", "))
            },
            FailureReason::CertificateNotValidAtSigningTime { subject } => {
                write!(f, "{} not valid at signing time", subject)
            },
            FailureReason::ChainConstraintViolation { error } => {
                write!(f, "chain constraint violation: {}", error)
            },
            FailureReason::MalformedSignature { detail } => {
                write!(f, "malformed signature: {}", detail)
            },
            FailureReason::DocumentCoverageIndeterminate => {
                write!(f, "document coverage indeterminate")
            },
            FailureReason::ModificationNotPermitted => {
                write!(f, "document modified beyond permitted changes")
            },
        }
    }
}

/// How required key usage bits are matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyUsageMatch {
    /// Every required bit must be present
    #[default]
    MatchAll,
    /// At least one required bit must be present
    MatchAny,
}

/// Key usage the signer certificate must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUsageConstraints {
    /// Required bits
    pub required: KeyUsageFlags,
    /// Matching mode
    pub mode: KeyUsageMatch,
}

impl Default for KeyUsageConstraints {
    fn default() -> Self {
        Self {
            required: KeyUsageFlags::document_signer(),
            mode: KeyUsageMatch::MatchAll,
        }
    }
}

impl KeyUsageConstraints {
    /// Check a certificate's key usage. An absent extension is unrestricted.
    pub fn check(&self, usage: Option<KeyUsageFlags>) -> Result<()> {
        let Some(usage) = usage else {
            return Ok(());
        };
        let missing = self.required.difference(usage);
        let satisfied = match self.mode {
            KeyUsageMatch::MatchAll => missing.is_empty(),
            KeyUsageMatch::MatchAny => self.required.is_empty() || usage.intersects(self.required),
        };
        if satisfied {
            Ok(())
        } else {
            Err(Error::KeyUsageViolation {
                missing,
                mode: self.mode,
            })
        }
    }
}

/// Verdict for one embedded signature.
#[derive(Debug, Clone)]
pub struct VerificationVerdict {
    /// Position of the signature in the document
    pub index: usize,
    /// Signature field name
    pub field_name: String,
    /// Overall status
    pub status: VerdictStatus,
    /// First failure, if any
    pub reason: Option<FailureReason>,
    /// Last state reached
    pub state: ValidationState,
    /// Chain building outcome
    pub chain_status: CheckStatus,
    /// Signature verification outcome
    pub crypto_status: CheckStatus,
    /// Key usage outcome
    pub key_usage_status: CheckStatus,
    /// Validity-period outcome
    pub validity_status: CheckStatus,
    /// Byte range coverage
    pub coverage: Coverage,
    /// Revisions follow the signed range
    pub modified_after_signing: bool,
    /// Those revisions are within the signer's permission
    pub modification_permitted: bool,
    /// Subject of the signer certificate
    pub signer: Option<Identity>,
    /// Claimed signing time
    pub signing_time: Option<DateTime<Utc>>,
    /// Built chain, leaf first, ending at the trust anchor
    pub chain: Vec<Certificate>,
    /// Timestamp token carried by the signature
    pub timestamp_token: Option<TimestampToken>,
    /// Whether the token is bound to the signature value
    pub timestamp_check: TimestampCheck,
    /// Dictionary entries
    pub signature_info: SignatureInfo,
}

impl VerificationVerdict {
    pub(crate) fn new(index: usize, field_name: String, signature_info: SignatureInfo) -> Self {
        Self {
            index,
            field_name,
            status: VerdictStatus::Indeterminate,
            reason: None,
            state: ValidationState::Unverified,
            chain_status: CheckStatus::NotChecked,
            crypto_status: CheckStatus::NotChecked,
            key_usage_status: CheckStatus::NotChecked,
            validity_status: CheckStatus::NotChecked,
            coverage: Coverage::None,
            modified_after_signing: false,
            modification_permitted: false,
            signer: None,
            signing_time: None,
            chain: Vec::new(),
            timestamp_token: None,
            timestamp_check: TimestampCheck::Absent,
            signature_info,
        }
    }

    /// Whether a timestamp token is present, bound or not.
    pub fn timestamp_present(&self) -> bool {
        self.timestamp_token.is_some()
    }

    /// Whether the token is a local-clock token over this signature.
    pub fn timestamp_bound(&self) -> bool {
        self.timestamp_check == TimestampCheck::Bound
    }
}
