//! Command surface shared by the binary and library callers.
//!
//! Each command takes explicit arguments; nothing is kept between calls.

use std::path::{Path, PathBuf};

use crate::config::PkiConfig;
use crate::document::{IncrementalDocument, SignableDocument};
use crate::error::{Error, Result};
use crate::pki::{CertificateAuthorityBuilder, Identity, Issuance, IssuerRef, KeyProtection};
use crate::signatures::{
    KeyUsageConstraints, LocalClockAuthority, SignOptions, SignatureEngine, SigningCredentials,
    SigningOutcome, TrustValidator, ValidationContext, VerificationVerdict,
};
use crate::storage::{self, Artifact};

/// File names written by [`generate_chain`].
pub mod chain_files {
    /// Root certificate
    pub const ROOT_CERT: &str = "root_ca.pem";
    /// Root private key
    pub const ROOT_KEY: &str = "root_ca_key.pem";
    /// Intermediate certificate
    pub const INTERMEDIATE_CERT: &str = "intermediate_ca.pem";
    /// Intermediate private key
    pub const INTERMEDIATE_KEY: &str = "intermediate_ca_key.pem";
    /// Signer certificate
    pub const SIGNER_CERT: &str = "signer_cert.pem";
    /// Signer private key
    pub const SIGNER_KEY: &str = "signer_key.pem";
}

/// File names written by [`generate_self_signed`].
pub mod self_signed_files {
    /// Certificate
    pub const CERT: &str = "certificate.pem";
    /// Private key
    pub const KEY: &str = "private_key.pem";
    /// SubjectPublicKeyInfo public key
    pub const PUBLIC_KEY: &str = "public_key.pem";
}

/// Common name of the default signer.
pub const DEFAULT_SIGNER_NAME: &str = "PDF Signer";
/// Email of the default signer.
pub const DEFAULT_SIGNER_EMAIL: &str = "signer@example.com";
/// Country of the generated identities.
pub const DEFAULT_COUNTRY: &str = "US";

/// Identities of a generated hierarchy for organization `org`.
pub fn default_chain_identities(org: &str) -> [Identity; 3] {
    [
        Identity::new(format!("{} Root CA", org), org).with_country(DEFAULT_COUNTRY),
        Identity::new(format!("{} Intermediate CA", org), org).with_country(DEFAULT_COUNTRY),
        Identity::new(DEFAULT_SIGNER_NAME, org)
            .with_email(DEFAULT_SIGNER_EMAIL)
            .with_country(DEFAULT_COUNTRY),
    ]
}

fn with_iterations(protection: &KeyProtection, config: &PkiConfig) -> KeyProtection {
    protection.clone().with_iterations(config.kdf_iterations)
}

/// Generate root, intermediate and signer certificates with their keys.
pub fn generate_chain(
    dir: &Path,
    org: &str,
    config: &PkiConfig,
    protection: &KeyProtection,
) -> Result<Vec<PathBuf>> {
    let [root_id, int_id, leaf_id] = default_chain_identities(org);
    for identity in [&root_id, &int_id, &leaf_id] {
        identity.validate()?;
    }
    let protection = with_iterations(protection, config);
    let builder = CertificateAuthorityBuilder::new(config.clone());

    let (root_key, root) =
        builder.build_root(root_id, config.root.key_size, config.root.validity_days)?;
    let (int_key, intermediate) = builder.build_intermediate(
        int_id,
        Some(IssuerRef::new(&root_key, &root)),
        config.intermediate.validity_days,
    )?;
    let (leaf_key, leaf) = builder.build_leaf(
        leaf_id,
        Issuance::FromParent(IssuerRef::new(&int_key, &intermediate)),
        config.leaf.validity_days,
    )?;

    let paths = storage::commit_artifacts(
        dir,
        vec![
            Artifact::public(chain_files::ROOT_CERT, root.to_pem()?),
            Artifact::secret(chain_files::ROOT_KEY, root_key.export(&protection)?.as_bytes()),
            Artifact::public(chain_files::INTERMEDIATE_CERT, intermediate.to_pem()?),
            Artifact::secret(
                chain_files::INTERMEDIATE_KEY,
                int_key.export(&protection)?.as_bytes(),
            ),
            Artifact::public(chain_files::SIGNER_CERT, leaf.to_pem()?),
            Artifact::secret(chain_files::SIGNER_KEY, leaf_key.export(&protection)?.as_bytes()),
        ],
    )?;
    log::info!("Generated certificate chain for '{}' in {}", org, dir.display());
    Ok(paths)
}

/// Generate a self-signed signing certificate with its key.
pub fn generate_self_signed(
    dir: &Path,
    identity: Identity,
    config: &PkiConfig,
    protection: &KeyProtection,
) -> Result<Vec<PathBuf>> {
    identity.validate()?;
    let protection = with_iterations(protection, config);
    let builder = CertificateAuthorityBuilder::new(config.clone());
    let (key, cert) =
        builder.build_leaf(identity, Issuance::SelfSigned, config.self_signed.validity_days)?;

    let paths = storage::commit_artifacts(
        dir,
        vec![
            Artifact::public(self_signed_files::CERT, cert.to_pem()?),
            Artifact::secret(self_signed_files::KEY, key.export(&protection)?.as_bytes()),
            Artifact::public(self_signed_files::PUBLIC_KEY, key.export_public()?),
        ],
    )?;
    log::info!("Generated self-signed certificate for {}", cert.subject());
    Ok(paths)
}

/// Inputs of [`sign_document`].
#[derive(Debug, Clone)]
pub struct SignRequest {
    /// Document to sign
    pub document: PathBuf,
    /// Where to write the signed document
    pub output: PathBuf,
    /// Signer private key
    pub key: PathBuf,
    /// Passphrase of an encrypted key
    pub passphrase: Option<String>,
    /// Signer certificate
    pub certificate: PathBuf,
    /// Issuing certificates to embed
    pub chain: Vec<PathBuf>,
    /// Signing options
    pub options: SignOptions,
    /// Attach a local-clock timestamp token
    pub timestamp: bool,
}

/// Sign a document file and write the result.
pub fn sign_document(request: &SignRequest) -> Result<SigningOutcome> {
    let key = storage::read_key(&request.key, request.passphrase.as_deref())?;
    let certificate = storage::read_certificate(&request.certificate)?;
    let chain = storage::read_certificates(&request.chain)?;
    let credentials = SigningCredentials::new(key, certificate)?.with_chain(chain);

    let mut engine = SignatureEngine::new(credentials, request.options.clone());
    if request.timestamp {
        engine = engine.with_timestamp_authority(Box::new(LocalClockAuthority));
    }

    let mut document = IncrementalDocument::open(&request.document)?;
    let outcome = engine.sign(&mut document)?;
    document.save(&request.output)?;
    log::info!("Wrote signed document to {}", request.output.display());
    Ok(outcome)
}

/// Inputs of [`verify_document`].
#[derive(Debug, Clone, Default)]
pub struct VerifyRequest {
    /// Document to verify
    pub document: PathBuf,
    /// Trust anchor certificates
    pub trust_roots: Vec<PathBuf>,
    /// Intermediate certificates
    pub other_certs: Vec<PathBuf>,
    /// Verify only this signature
    pub signature_index: Option<usize>,
    /// Required signer key usage
    pub key_usage: KeyUsageConstraints,
}

/// Verdicts of [`verify_document`].
#[derive(Debug, Clone)]
pub struct VerificationReport {
    /// One verdict per requested signature
    pub verdicts: Vec<VerificationVerdict>,
    /// Intermediate files that could not be read
    pub skipped_certificates: Vec<PathBuf>,
}

impl VerificationReport {
    /// At least one signature was checked and every verdict is valid.
    pub fn all_valid(&self) -> bool {
        !self.verdicts.is_empty() && self.verdicts.iter().all(|v| v.status.is_valid())
    }
}

/// Verify the signatures of a document file.
pub fn verify_document(request: &VerifyRequest) -> Result<VerificationReport> {
    let trust_roots = storage::read_certificates(&request.trust_roots)?;

    let mut other_certs = Vec::new();
    let mut skipped_certificates = Vec::new();
    for path in &request.other_certs {
        match storage::read_certificate(path) {
            Ok(cert) => other_certs.push(cert),
            Err(e) => {
                log::warn!("Skipping certificate {}: {}", path.display(), e);
                skipped_certificates.push(path.clone());
            },
        }
    }

    let document = IncrementalDocument::open(&request.document)?;
    let context = ValidationContext::new(trust_roots).with_other_certs(other_certs);
    let validator = TrustValidator::new(context).with_key_usage(request.key_usage);

    let signatures = document.embedded_signatures();
    let verdicts = match request.signature_index {
        Some(index) => {
            let signature = signatures.get(index).ok_or(Error::SignatureIndexOutOfRange {
                index,
                count: signatures.len(),
            })?;
            vec![validator.validate_signature(&document, signature)]
        },
        None => signatures
            .iter()
            .map(|sig| validator.validate_signature(&document, sig))
            .collect(),
    };

    Ok(VerificationReport {
        verdicts,
        skipped_certificates,
    })
}
