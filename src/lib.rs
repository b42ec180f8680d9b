// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::too_many_arguments)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::result_large_err)]

//! # pdf_sigchain
//!
//! Private PKI hierarchies and chain-of-trust signatures for documents.
//!
//! ## Core Features
//!
//! ### Certificates
//! - **Hierarchy Generation**: root CA, intermediate CA and document-signing leaf,
//!   or a single self-signed signing certificate
//! - **Role Policy**: basic constraints, key usage and validity fixed per role
//! - **Chain Assembly**: linkage, signatures, path length and validity checked atomically
//! - **Key Storage**: PKCS#8 PEM, optionally PBES2-encrypted with a passphrase
//!
//! ### Signatures
//! - **Signing**: fills a named signature field in an incremental revision,
//!   embedding the signer certificate and presented chain
//! - **Validation**: per-signature state machine rebuilding the chain to
//!   verifier-supplied trust anchors, with key usage, validity and coverage checks
//! - **DocMDP**: signer-declared permission for later revisions
//!
//! ## Quick Start
//!
//! ```ignore
//! use pdf_sigchain::commands::{generate_chain, verify_document, VerifyRequest};
//! use pdf_sigchain::config::PkiConfig;
//! use pdf_sigchain::pki::KeyProtection;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let protection = KeyProtection::passphrase("correct horse")?;
//! generate_chain("out".as_ref(), "Acme", &PkiConfig::default(), &protection)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of:
//!
//! * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or
//!   <http://www.apache.org/licenses/LICENSE-2.0>)
//! * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Error handling
pub mod error;

// Configuration
pub mod config;

// Keys, certificates and chains
pub mod pki;

// Signable documents
pub mod document;

// Signing and validation
pub mod signatures;

// Files and commands
pub mod commands;
pub mod storage;

pub use config::PkiConfig;
pub use document::{IncrementalDocument, SignableDocument};
pub use error::{Error, Result};
pub use pki::{
    Certificate, CertificateAuthorityBuilder, CertificateChain, Identity, KeyPair, KeyProtection,
};
pub use signatures::{
    SignOptions, SignatureEngine, SigningCredentials, TrustValidator, ValidationContext,
    VerificationVerdict,
};

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
