//! Document signatures.
//!
//! This module creates signature records with a leaf key and its chain, and
//! validates embedded signatures against verifier-supplied trust anchors.
//!
//! ## Features
//!
//! - **Signature Creation**: [`SignatureEngine`] fills a named signature field
//!   in an incremental revision
//! - **Signature Verification**: [`TrustValidator`] rebuilds each signer's
//!   chain, checks signatures, key usage, validity and document coverage
//! - **ByteRange Calculation**: fixed-width byte ranges around the reserved
//!   `/Contents` placeholder
//!
//! ## Example
//!
//! ```ignore
//! use pdf_sigchain::document::IncrementalDocument;
//! use pdf_sigchain::signatures::{
//!     SignOptions, SignatureEngine, SigningCredentials, TrustValidator, ValidationContext,
//! };
//!
//! let mut doc = IncrementalDocument::open("document.pdf")?;
//! let credentials = SigningCredentials::new(leaf_key, leaf_cert)?.with_chain(vec![intermediate]);
//! SignatureEngine::new(credentials, SignOptions::default()).sign(&mut doc)?;
//!
//! let validator = TrustValidator::new(ValidationContext::new(vec![root]));
//! for verdict in validator.validate_document(&doc) {
//!     println!("{}: {}", verdict.field_name, verdict.status.label());
//! }
//! ```

mod byterange;
mod signer;
mod timestamp;
mod types;
mod verifier;

pub use byterange::{ByteRange, ByteRangeCalculator};
pub(crate) use byterange::hex_to_bytes;
pub use signer::{SignatureEngine, SigningOutcome, SUB_FILTER};
pub use timestamp::{check_token, LocalClockAuthority, LOCAL_CLOCK_AUTHORITY};
pub use types::{
    CheckStatus, Coverage, DigestAlgorithm, FailureReason, FieldPolicy, KeyUsageConstraints,
    KeyUsageMatch, ModificationPermission, RevisionKind, SignOptions, SignatureInfo,
    SignatureRecord, SignedAttributes, SigningCredentials, TimestampAuthority, TimestampCheck,
    TimestampToken, ValidationState, VerdictStatus, VerificationVerdict,
};
pub use verifier::{TrustValidator, ValidationContext, MAX_CHAIN_HINTS, MAX_PATH_DEPTH};
