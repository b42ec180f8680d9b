//! Error types for certificate issuance, key handling, signing and validation.
//!
//! Every variant carries structured context (which certificate, which link,
//! which bits) so callers can render precise messages without parsing strings.
//! Validation failures of individual embedded signatures are not errors: they
//! are reported as [`crate::signatures::FailureReason`] inside a verdict.

use std::path::PathBuf;

use crate::pki::{AttributeKind, ChainBuildError, Identity, KeyUsageFlags, Role};
use crate::signatures::KeyUsageMatch;

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why an identity attribute was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityProblem {
    /// Required attribute is absent or blank
    Empty,
    /// Attribute is present but not encodable (e.g. a three-letter country)
    Malformed,
}

/// Which cryptographic comparison failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoCheck {
    /// The signed document digest no longer matches the signed byte range
    DocumentDigest,
    /// The signature over the signed attributes does not verify with the leaf key
    DocumentSignature,
    /// A certificate's signature does not verify with its issuer's key
    CertificateSignature {
        /// Subject of the certificate whose signature failed
        subject: Identity,
    },
}

impl std::fmt::Display for CryptoCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoCheck::DocumentDigest => write!(f, "document digest"),
            CryptoCheck::DocumentSignature => write!(f, "document signature"),
            CryptoCheck::CertificateSignature { subject } => {
                write!(f, "certificate signature of {}", subject)
            },
        }
    }
}

/// Error types that can occur while building, signing or validating.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required identity attribute is empty or malformed
    #[error("Invalid identity: {field} is {problem:?}")]
    IdentityInvalid {
        /// Offending attribute
        field: AttributeKind,
        /// What is wrong with it
        problem: IdentityProblem,
    },

    /// A chain-issued certificate was requested without a usable issuer key
    #[error("Issuer key pair required to issue a {role:?} certificate")]
    IssuerKeyRequired {
        /// Role of the certificate being issued
        role: Role,
    },

    /// Root certificates can only be self-signed
    #[error("A root certificate must be self-signed")]
    RootNotSelfSigned,

    /// Encryption was requested with an empty passphrase
    #[error("A non-empty passphrase is required to encrypt private keys")]
    PassphraseRequired,

    /// Wrong passphrase or corrupted encrypted key
    #[error("Private key decryption failed")]
    DecryptionFailed,

    /// Structural chain validation failed at a specific link
    #[error("Certificate chain rejected: {0}")]
    ChainBuild(#[from] ChainBuildError),

    /// The named signature field does not exist and must not be created
    #[error("Signature field '{field}' does not exist")]
    SignatureFieldMissing {
        /// Requested field name
        field: String,
    },

    /// The named signature field already carries a signature
    #[error("Signature field '{field}' is already signed")]
    SignatureFieldFilled {
        /// Requested field name
        field: String,
    },

    /// No path from a certificate to any trust anchor
    #[error("No path from {subject} to a trust anchor")]
    NoPathToTrustAnchor {
        /// Subject of the certificate the search started from
        subject: Identity,
    },

    /// A signature did not verify
    #[error("Cryptographic mismatch in {check}")]
    CryptographicMismatch {
        /// Which comparison failed
        check: CryptoCheck,
    },

    /// The signer's key usage does not satisfy the required set
    #[error("Key usage violation: missing {missing:?} under {mode:?}")]
    KeyUsageViolation {
        /// Required bits absent from the certificate
        missing: KeyUsageFlags,
        /// Matching mode that was applied
        mode: KeyUsageMatch,
    },

    /// No byte range could be resolved for a signature
    #[error("Document coverage could not be determined")]
    DocumentCoverageIndeterminate,

    /// The private key does not belong to the certificate it is paired with
    #[error("Private key does not match the certificate of {subject}")]
    CertificateKeyMismatch {
        /// Subject of the certificate
        subject: Identity,
    },

    /// Certificate could not be decoded
    #[error("Certificate decoding failed: {reason}")]
    CertificateDecode {
        /// Decoder message
        reason: String,
    },

    /// Private or public key could not be decoded
    #[error("Key decoding failed: {reason}")]
    KeyDecode {
        /// Decoder message
        reason: String,
    },

    /// Algorithm other than RSA with SHA-2
    #[error("Unsupported algorithm: {oid}")]
    UnsupportedAlgorithm {
        /// Dotted OID of the algorithm
        oid: String,
    },

    /// The encoded signature record does not fit into the reserved placeholder
    #[error("Signature ({needed} bytes) exceeds placeholder size ({available} bytes)")]
    SignatureTooLarge {
        /// Placeholder characters needed
        needed: usize,
        /// Placeholder characters reserved
        available: usize,
    },

    /// Signature index requested by the caller does not exist
    #[error("Signature index {index} is out of range ({count} signatures)")]
    SignatureIndexOutOfRange {
        /// Requested index
        index: usize,
        /// Number of embedded signatures
        count: usize,
    },

    /// The document container is structurally unusable
    #[error("Invalid document: {reason}")]
    InvalidDocument {
        /// What was wrong
        reason: String,
    },

    /// The timestamp collaborator failed
    #[error("Timestamp request failed: {reason}")]
    Timestamp {
        /// Collaborator message
        reason: String,
    },

    /// Some artifacts were committed before a later one failed
    #[error("Write of {failed:?} failed after committing {committed:?}: {source}")]
    PartialWrite {
        /// Files already in place
        committed: Vec<PathBuf>,
        /// File whose commit failed
        failed: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// DER/PEM encoding error
    #[error("Encoding error: {0}")]
    Encoding(#[from] der::Error),

    /// RSA primitive error
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    /// PKCS#8 error
    #[error("PKCS#8 error: {0}")]
    Pkcs8(#[from] pkcs8::Error),

    /// SubjectPublicKeyInfo error
    #[error("SPKI error: {0}")]
    Spki(#[from] spki::Error),

    /// PKCS#1 error
    #[error("PKCS#1 error: {0}")]
    Pkcs1(#[from] pkcs1::Error),

    /// Signature record (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file error
    #[error("Invalid configuration: {reason}")]
    Config {
        /// What was wrong
        reason: String,
    },
}
