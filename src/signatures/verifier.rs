//! Signature verification.
//!
//! Each embedded signature is taken through
//! `Unverified -> ChainBuilt -> CryptoChecked -> PolicyChecked -> Final`.
//! The first failing stage decides the verdict; a failure on one signature
//! never stops the others from being evaluated.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::timestamp::check_token;
use super::types::{
    CheckStatus, Coverage, FailureReason, KeyUsageConstraints, SignatureRecord, ValidationState,
    VerdictStatus, VerificationVerdict,
};
use crate::document::{EmbeddedSignature, SignableDocument};
use crate::error::{CryptoCheck, Error, Result};
use crate::pki::{check_constraints, check_validity, verify_signature, Certificate};

/// Longest path searched from a signer to a trust anchor.
pub const MAX_PATH_DEPTH: usize = 8;

/// Embedded chain certificates considered per signature.
pub const MAX_CHAIN_HINTS: usize = 16;

/// Certificates supplied by the verifying party.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    /// Trust anchors
    pub trust_roots: Vec<Certificate>,
    /// Intermediate pool
    pub other_certs: Vec<Certificate>,
}

impl ValidationContext {
    /// Context trusting `trust_roots`.
    pub fn new(trust_roots: Vec<Certificate>) -> Self {
        Self {
            trust_roots,
            other_certs: Vec::new(),
        }
    }

    /// Add intermediates to the pool.
    pub fn with_other_certs(mut self, certs: Vec<Certificate>) -> Self {
        self.other_certs.extend(certs);
        self
    }

    /// Add a trust anchor.
    pub fn add_trust_root(&mut self, cert: Certificate) {
        self.trust_roots.push(cert);
    }

    /// Whether `cert` is one of the trust anchors.
    pub fn is_trust_root(&self, cert: &Certificate) -> bool {
        self.trust_roots.iter().any(|root| root == cert)
    }
}

/// Validates embedded signatures against a [`ValidationContext`].
#[derive(Debug, Clone)]
pub struct TrustValidator {
    context: ValidationContext,
    key_usage: KeyUsageConstraints,
}

impl TrustValidator {
    /// Validator with the default key usage constraints.
    pub fn new(context: ValidationContext) -> Self {
        Self {
            context,
            key_usage: KeyUsageConstraints::default(),
        }
    }

    /// Replace the key usage constraints.
    pub fn with_key_usage(mut self, constraints: KeyUsageConstraints) -> Self {
        self.key_usage = constraints;
        self
    }

    /// Get the validation context.
    pub fn context(&self) -> &ValidationContext {
        &self.context
    }

    /// Validate every embedded signature, in document order.
    pub fn validate_document<D: SignableDocument + ?Sized>(
        &self,
        document: &D,
    ) -> Vec<VerificationVerdict> {
        document
            .embedded_signatures()
            .iter()
            .map(|sig| self.validate_signature(document, sig))
            .collect()
    }

    /// Find a path from `signer` to a trust anchor, leaf first.
    ///
    /// Candidates are the `hints` (the chain embedded by the signer, at most
    /// [`MAX_CHAIN_HINTS`] of them) and the context's intermediate pool. Only
    /// the context decides what is trusted. Each candidate is expanded at most
    /// once per search.
    pub fn build_path(
        &self,
        signer: &Certificate,
        hints: &[Certificate],
    ) -> Result<Vec<Certificate>> {
        if hints.len() > MAX_CHAIN_HINTS {
            log::warn!(
                "Ignoring {} embedded chain certificates beyond the first {}",
                hints.len() - MAX_CHAIN_HINTS,
                MAX_CHAIN_HINTS
            );
        }
        let pool: Vec<&Certificate> = hints
            .iter()
            .take(MAX_CHAIN_HINTS)
            .chain(&self.context.other_certs)
            .collect();
        let mut path = vec![signer];
        let mut expanded = HashSet::new();
        if self.extend_path(&mut path, &pool, &mut expanded) {
            Ok(path.into_iter().cloned().collect())
        } else {
            Err(Error::NoPathToTrustAnchor {
                subject: signer.subject().clone(),
            })
        }
    }

    fn extend_path<'a>(
        &'a self,
        path: &mut Vec<&'a Certificate>,
        pool: &[&'a Certificate],
        expanded: &mut HashSet<&'a [u8]>,
    ) -> bool {
        let Some(&current) = path.last() else {
            return false;
        };
        if self.context.is_trust_root(current) {
            return true;
        }
        if let Some(root) = self
            .context
            .trust_roots
            .iter()
            .find(|root| current.is_issued_by(root) && !path.contains(root))
        {
            path.push(root);
            return true;
        }
        if path.len() >= MAX_PATH_DEPTH {
            return false;
        }
        for &candidate in pool {
            if expanded.contains(candidate.as_der()) || path.contains(&candidate) {
                continue;
            }
            if current.is_issued_by(candidate) {
                expanded.insert(candidate.as_der());
                path.push(candidate);
                if self.extend_path(path, pool, expanded) {
                    return true;
                }
                path.pop();
            }
        }
        false
    }

    /// Validate one embedded signature.
    pub fn validate_signature<D: SignableDocument + ?Sized>(
        &self,
        document: &D,
        signature: &EmbeddedSignature,
    ) -> VerificationVerdict {
        let mut verdict = VerificationVerdict::new(
            signature.index,
            signature.field_name.clone(),
            signature.info.clone(),
        );
        if let Err(reason) = self.run(document, signature, &mut verdict) {
            log::info!(
                "Signature {} ('{}'): {} ({})",
                verdict.index,
                verdict.field_name,
                reason.status().label(),
                reason
            );
            verdict.status = reason.status();
            verdict.reason = Some(reason);
        } else {
            log::info!("Signature {} ('{}'): VALID", verdict.index, verdict.field_name);
            verdict.status = VerdictStatus::Valid;
        }
        verdict.state = ValidationState::Final;
        verdict
    }

    fn run<D: SignableDocument + ?Sized>(
        &self,
        document: &D,
        signature: &EmbeddedSignature,
        verdict: &mut VerificationVerdict,
    ) -> std::result::Result<(), FailureReason> {
        let record = decode_record(signature)?;
        let signer = record.signer_certificate().map_err(malformed)?;
        let hints = record.embedded_chain().map_err(malformed)?;
        let signing_time = record
            .signed_attributes
            .signing_time()
            .ok_or_else(|| FailureReason::MalformedSignature {
                detail: "signing time out of range".to_string(),
            })?;
        verdict.signer = Some(signer.subject().clone());
        verdict.signing_time = Some(signing_time);
        verdict.timestamp_token = record.timestamp_token.clone();
        verdict.timestamp_check = check_token(record.timestamp_token.as_ref(), &record.signature);

        // Unverified -> ChainBuilt
        let path = match self.build_path(&signer, &hints) {
            Ok(path) => path,
            Err(e) => {
                log::debug!("{}", e);
                verdict.chain_status = CheckStatus::Failed;
                return Err(FailureReason::NoPathToTrustAnchor);
            },
        };
        verdict.chain_status = CheckStatus::Passed;
        verdict.chain = path.clone();
        verdict.state = ValidationState::ChainBuilt;

        // ChainBuilt -> CryptoChecked
        let Some(byte_range) = signature.byte_range else {
            return Err(FailureReason::DocumentCoverageIndeterminate);
        };
        let data = document.as_bytes();
        let coverage = byte_range.coverage(data.len(), signature.contents_span);
        verdict.coverage = coverage;
        if coverage == Coverage::None {
            return Err(FailureReason::DocumentCoverageIndeterminate);
        }
        if let Err(check) = self.check_crypto(document, &record, &path, signature) {
            verdict.crypto_status = CheckStatus::Failed;
            return Err(FailureReason::CryptographicMismatch { check });
        }
        verdict.crypto_status = CheckStatus::Passed;
        verdict.state = ValidationState::CryptoChecked;

        // CryptoChecked -> PolicyChecked
        let root_first: Vec<Certificate> = path.iter().rev().cloned().collect();
        check_constraints(&root_first)
            .map_err(|error| FailureReason::ChainConstraintViolation { error })?;
        if let Err(e) = self.key_usage.check(signer.key_usage()) {
            verdict.key_usage_status = CheckStatus::Failed;
            let missing = match e {
                Error::KeyUsageViolation { missing, .. } => missing,
                _ => self.key_usage.required,
            };
            return Err(FailureReason::KeyUsageViolation { missing });
        }
        verdict.key_usage_status = CheckStatus::Passed;
        check_validity_at(&root_first, signing_time).inspect_err(|_| {
            verdict.validity_status = CheckStatus::Failed;
        })?;
        verdict.validity_status = CheckStatus::Passed;
        verdict.state = ValidationState::PolicyChecked;

        // PolicyChecked -> Final
        if coverage == Coverage::Partial {
            verdict.modified_after_signing = true;
            let revisions = document.revisions_after(byte_range.signed_end());
            verdict.modification_permitted = match record.signed_attributes.modification_permission
            {
                Some(permission) => revisions.iter().all(|r| permission.permits(*r)),
                None => false,
            };
            if !verdict.modification_permitted {
                return Err(FailureReason::ModificationNotPermitted);
            }
        }
        Ok(())
    }

    fn check_crypto<D: SignableDocument + ?Sized>(
        &self,
        document: &D,
        record: &SignatureRecord,
        path: &[Certificate],
        signature: &EmbeddedSignature,
    ) -> std::result::Result<(), CryptoCheck> {
        let attrs = &record.signed_attributes;
        let signed = attrs
            .to_signed_bytes()
            .map_err(|_| CryptoCheck::DocumentSignature)?;
        if !verify_signature(
            path[0].public_key(),
            attrs.digest_algorithm,
            &signed,
            &record.signature,
        ) {
            return Err(CryptoCheck::DocumentSignature);
        }

        let digest = signature
            .byte_range
            .ok_or(CryptoCheck::DocumentDigest)
            .and_then(|range| {
                document
                    .digest(&range, attrs.digest_algorithm)
                    .map_err(|_| CryptoCheck::DocumentDigest)
            })?;
        if digest != attrs.document_digest {
            return Err(CryptoCheck::DocumentDigest);
        }

        for (i, cert) in path.iter().enumerate() {
            let issuer = path.get(i + 1).unwrap_or(cert);
            if cert.verify_signed_by(issuer.public_key()).is_err() {
                return Err(CryptoCheck::CertificateSignature {
                    subject: cert.subject().clone(),
                });
            }
        }
        Ok(())
    }
}

fn decode_record(
    signature: &EmbeddedSignature,
) -> std::result::Result<SignatureRecord, FailureReason> {
    let contents = signature
        .contents
        .as_deref()
        .ok_or_else(|| FailureReason::MalformedSignature {
            detail: "missing /Contents".to_string(),
        })?;
    let record = SignatureRecord::decode(contents).map_err(malformed)?;
    if record.signed_attributes.field_name != signature.field_name {
        return Err(FailureReason::MalformedSignature {
            detail: format!(
                "record signs field '{}' but is stored in '{}'",
                record.signed_attributes.field_name, signature.field_name
            ),
        });
    }
    Ok(record)
}

fn check_validity_at(
    root_first: &[Certificate],
    at: DateTime<Utc>,
) -> std::result::Result<(), FailureReason> {
    check_validity(root_first, at).map_err(|e| FailureReason::CertificateNotValidAtSigningTime {
        subject: e.subject.clone(),
    })
}

fn malformed(e: Error) -> FailureReason {
    FailureReason::MalformedSignature {
        detail: e.to_string(),
    }
}
