//! Ordered certificate chains.
//!
//! A chain is stored root first. Assembly runs four passes over the whole
//! list (name and key-identifier linkage, signatures, CA constraints, then
//! validity at the requested instant) and either yields a complete chain or
//! reports the first failing link; there is no partially built chain.

use chrono::{DateTime, Utc};

use super::certificate::Certificate;
use super::identity::Identity;
use crate::error::{Error, Result};

/// Why a link was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainLinkFailure {
    /// No certificates were supplied
    #[error("chain is empty")]
    Empty,
    /// Issuer name differs from the previous certificate's subject
    #[error("issuer does not match the subject of the preceding certificate")]
    IssuerMismatch,
    /// Authority key identifier differs from the issuer's subject key identifier
    #[error("authority key identifier does not match the issuer key")]
    KeyIdentifierMismatch,
    /// Signature does not verify with the issuer's public key
    #[error("signature does not verify with the issuer key")]
    SignatureInvalid,
    /// First certificate is not self-issued and self-signed
    #[error("root is not self-signed")]
    RootNotSelfSigned,
    /// Issuer lacks the CA flag or keyCertSign
    #[error("issuer is not a certificate authority")]
    NotCertificateAuthority,
    /// More CA certificates follow than the path length allows
    #[error("path length {allowed} exceeded by {found} subordinate CAs")]
    PathLengthExceeded {
        /// Path length constraint of the certificate
        allowed: u8,
        /// CA certificates below it
        found: usize,
    },
    /// A subordinate CA does not have a smaller path length than its issuer
    #[error("path length {child} does not decrease below issuer's {parent}")]
    PathLengthNotDecreasing {
        /// Issuer path length
        parent: u8,
        /// Subordinate path length
        child: u8,
    },
    /// Certificate is outside its validity period
    #[error("not valid at {at} (valid {not_before} to {not_after})")]
    NotValidAt {
        /// Instant checked
        at: DateTime<Utc>,
        /// Start of validity
        not_before: DateTime<Utc>,
        /// End of validity
        not_after: DateTime<Utc>,
    },
}

/// A rejected chain: which link failed and why.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("link {link} ({subject}): {reason}")]
pub struct ChainBuildError {
    /// Root-first index of the offending certificate
    pub link: usize,
    /// Its subject
    pub subject: Identity,
    /// What failed
    pub reason: ChainLinkFailure,
}

impl ChainBuildError {
    fn at(certs: &[Certificate], link: usize, reason: ChainLinkFailure) -> Self {
        Self {
            link,
            subject: certs[link].subject().clone(),
            reason,
        }
    }
}

/// A validated, root-first chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    certificates: Vec<Certificate>,
}

impl CertificateChain {
    /// Validate and assemble a root-first list of certificates.
    pub fn assemble(certificates: Vec<Certificate>, at: DateTime<Utc>) -> Result<Self> {
        if certificates.is_empty() {
            return Err(Error::ChainBuild(ChainBuildError {
                link: 0,
                subject: Identity::from_attributes(Vec::new()),
                reason: ChainLinkFailure::Empty,
            }));
        }
        check_linkage(&certificates)?;
        check_signatures(&certificates)?;
        check_constraints(&certificates)?;
        check_validity(&certificates, at)?;
        log::debug!(
            "Assembled chain of {} certificates ending at {}",
            certificates.len(),
            certificates[certificates.len() - 1].subject()
        );
        Ok(Self { certificates })
    }

    /// Assemble, checking validity at the current time.
    pub fn assemble_now(certificates: Vec<Certificate>) -> Result<Self> {
        Self::assemble(certificates, Utc::now())
    }

    /// Trust anchor.
    pub fn root(&self) -> &Certificate {
        &self.certificates[0]
    }

    /// End-entity certificate.
    pub fn leaf(&self) -> &Certificate {
        &self.certificates[self.certificates.len() - 1]
    }

    /// Certificates strictly between root and leaf.
    pub fn intermediates(&self) -> &[Certificate] {
        match self.certificates.len() {
            0..=2 => &[],
            n => &self.certificates[1..n - 1],
        }
    }

    /// All certificates, root first.
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// Number of certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Always false; an assembled chain has at least one certificate.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Issuing certificates leaf-side first, as embedded next to a signature.
    pub fn issuers_leaf_first(&self) -> Vec<Certificate> {
        let n = self.certificates.len();
        self.certificates[..n - 1].iter().rev().cloned().collect()
    }
}

fn check_linkage(certs: &[Certificate]) -> std::result::Result<(), ChainBuildError> {
    if !certs[0].is_self_issued() {
        return Err(ChainBuildError::at(certs, 0, ChainLinkFailure::RootNotSelfSigned));
    }
    for (i, pair) in certs.windows(2).enumerate() {
        let (issuer, subject) = (&pair[0], &pair[1]);
        if subject.issuer() != issuer.subject() {
            return Err(ChainBuildError::at(certs, i + 1, ChainLinkFailure::IssuerMismatch));
        }
        if !subject.is_issued_by(issuer) {
            return Err(ChainBuildError::at(
                certs,
                i + 1,
                ChainLinkFailure::KeyIdentifierMismatch,
            ));
        }
    }
    Ok(())
}

fn check_signatures(certs: &[Certificate]) -> std::result::Result<(), ChainBuildError> {
    if certs[0].verify_signed_by(certs[0].public_key()).is_err() {
        return Err(ChainBuildError::at(certs, 0, ChainLinkFailure::RootNotSelfSigned));
    }
    for (i, pair) in certs.windows(2).enumerate() {
        if pair[1].verify_signed_by(pair[0].public_key()).is_err() {
            return Err(ChainBuildError::at(certs, i + 1, ChainLinkFailure::SignatureInvalid));
        }
    }
    Ok(())
}

/// CA flag, keyCertSign and path length over a root-first chain.
pub(crate) fn check_constraints(certs: &[Certificate]) -> std::result::Result<(), ChainBuildError> {
    let n = certs.len();
    for i in 0..n.saturating_sub(1) {
        let cert = &certs[i];
        if !cert.can_sign_certificates() {
            return Err(ChainBuildError::at(certs, i, ChainLinkFailure::NotCertificateAuthority));
        }
        // CAs between this certificate and the leaf.
        let subordinate_cas = n - 2 - i;
        if let Some(allowed) = cert.path_length() {
            if subordinate_cas > usize::from(allowed) {
                return Err(ChainBuildError::at(
                    certs,
                    i,
                    ChainLinkFailure::PathLengthExceeded {
                        allowed,
                        found: subordinate_cas,
                    },
                ));
            }
        }
        if i > 0 {
            if let (Some(parent), Some(child)) = (certs[i - 1].path_length(), cert.path_length()) {
                if child >= parent {
                    return Err(ChainBuildError::at(
                        certs,
                        i,
                        ChainLinkFailure::PathLengthNotDecreasing { parent, child },
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Every certificate valid at `at`.
pub(crate) fn check_validity(
    certs: &[Certificate],
    at: DateTime<Utc>,
) -> std::result::Result<(), ChainBuildError> {
    match certs.iter().position(|c| !c.is_valid_at(at)) {
        Some(i) => Err(ChainBuildError::at(
            certs,
            i,
            ChainLinkFailure::NotValidAt {
                at,
                not_before: certs[i].not_before(),
                not_after: certs[i].not_after(),
            },
        )),
        None => Ok(()),
    }
}
