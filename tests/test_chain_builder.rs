//! Integration tests for certificate hierarchies.
//!
//! Tests issuance and chain assembly including:
//! - Three-tier root / intermediate / leaf hierarchies
//! - Self-signed signing certificates
//! - Path length enforcement by the builder and by chain assembly
//! - PEM round trips of issued certificates

use chrono::{Duration, Utc};
use pdf_sigchain::error::IdentityProblem;
use pdf_sigchain::pki::{
    issue, AttributeKind, Certificate, CertificateAuthorityBuilder, CertificateChain,
    CertificateProfile, ChainLinkFailure, Identity, Issuance, IssuerRef, KeyPair, KeyUsageFlags,
    Role, ID_KP_EMAIL_PROTECTION,
};
use pdf_sigchain::{Error, PkiConfig};

const TEST_BITS: usize = 1024;

fn builder() -> CertificateAuthorityBuilder {
    CertificateAuthorityBuilder::new(PkiConfig::new().with_key_size(TEST_BITS))
}

struct Hierarchy {
    root: (KeyPair, Certificate),
    intermediate: (KeyPair, Certificate),
    leaf: (KeyPair, Certificate),
}

fn hierarchy() -> Hierarchy {
    let b = builder();
    let root = b
        .build_root(Identity::new("Acme Root CA", "Acme").with_country("US"), TEST_BITS, 3650)
        .unwrap();
    let intermediate = b
        .build_intermediate(
            Identity::new("Acme Intermediate CA", "Acme").with_country("US"),
            Some(IssuerRef::new(&root.0, &root.1)),
            1825,
        )
        .unwrap();
    let leaf = b
        .build_leaf(
            Identity::new("PDF Signer", "Acme")
                .with_email("signer@example.com")
                .with_country("US"),
            Issuance::FromParent(IssuerRef::new(&intermediate.0, &intermediate.1)),
            365,
        )
        .unwrap();
    Hierarchy {
        root,
        intermediate,
        leaf,
    }
}

mod hierarchy_tests {
    use super::*;

    #[test]
    fn test_three_tier_names_link() {
        let h = hierarchy();
        let (root, int, leaf) = (&h.root.1, &h.intermediate.1, &h.leaf.1);
        assert_eq!(leaf.issuer(), int.subject());
        assert_eq!(int.issuer(), root.subject());
        assert_eq!(root.issuer(), root.subject());
    }

    #[test]
    fn test_three_tier_constraints() {
        let h = hierarchy();
        assert_eq!(h.root.1.path_length(), Some(1));
        assert_eq!(h.intermediate.1.path_length(), Some(0));
        assert!(!h.leaf.1.is_ca());

        assert_eq!(h.root.1.key_usage(), Some(KeyUsageFlags::certificate_authority()));
        assert!(!h
            .root
            .1
            .key_usage()
            .unwrap()
            .contains(KeyUsageFlags::DIGITAL_SIGNATURE));
        assert_eq!(h.leaf.1.key_usage(), Some(KeyUsageFlags::document_signer()));
        assert!(h
            .leaf
            .1
            .extensions()
            .extended_key_usage
            .contains(&ID_KP_EMAIL_PROTECTION));
    }

    #[test]
    fn test_key_identifiers_link() {
        let h = hierarchy();
        assert_eq!(
            h.intermediate.1.authority_key_identifier(),
            h.root.1.subject_key_identifier()
        );
        assert_eq!(
            h.leaf.1.authority_key_identifier(),
            h.intermediate.1.subject_key_identifier()
        );
        assert!(h.root.1.authority_key_identifier().is_none());
    }

    #[test]
    fn test_validity_windows_follow_role() {
        let h = hierarchy();
        let days = |c: &Certificate| (c.not_after() - c.not_before()).num_days();
        assert_eq!(days(&h.root.1), 3650);
        assert_eq!(days(&h.intermediate.1), 1825);
        assert_eq!(days(&h.leaf.1), 365);
    }

    #[test]
    fn test_serials_differ() {
        let h = hierarchy();
        assert_ne!(h.root.1.serial(), h.intermediate.1.serial());
        assert_ne!(h.intermediate.1.serial(), h.leaf.1.serial());
        assert!(h.leaf.1.serial().len() <= 20);
    }

    #[test]
    fn test_assemble_three_tier() {
        let h = hierarchy();
        let chain = CertificateChain::assemble_now(vec![
            h.root.1.clone(),
            h.intermediate.1.clone(),
            h.leaf.1.clone(),
        ])
        .unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.root(), &h.root.1);
        assert_eq!(chain.leaf(), &h.leaf.1);
        assert_eq!(chain.intermediates(), &[h.intermediate.1.clone()]);
        assert_eq!(
            chain.issuers_leaf_first(),
            vec![h.intermediate.1.clone(), h.root.1.clone()]
        );
    }

    #[test]
    fn test_assemble_out_of_order() {
        let h = hierarchy();
        let err = CertificateChain::assemble_now(vec![
            h.root.1.clone(),
            h.leaf.1.clone(),
            h.intermediate.1.clone(),
        ])
        .unwrap_err();
        match err {
            Error::ChainBuild(e) => {
                assert_eq!(e.link, 1);
                assert_eq!(e.reason, ChainLinkFailure::IssuerMismatch);
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_assemble_outside_validity() {
        let h = hierarchy();
        let err = CertificateChain::assemble(
            vec![h.root.1.clone(), h.intermediate.1.clone(), h.leaf.1.clone()],
            Utc::now() + Duration::days(400),
        )
        .unwrap_err();
        match err {
            Error::ChainBuild(e) => {
                assert_eq!(e.link, 2);
                assert!(matches!(e.reason, ChainLinkFailure::NotValidAt { .. }));
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

mod path_length_tests {
    use super::*;

    #[test]
    fn test_fourth_ca_level_rejected_by_builder() {
        let h = hierarchy();
        let profile = CertificateProfile::new(
            Identity::new("Rogue Sub CA", "Acme"),
            Role::Intermediate,
            Issuance::FromParent(IssuerRef::new(&h.intermediate.0, &h.intermediate.1)),
        )
        .with_key_size(TEST_BITS);
        match issue(&profile) {
            Err(Error::ChainBuild(e)) => {
                assert_eq!(&e.subject, h.intermediate.1.subject());
                assert!(matches!(
                    e.reason,
                    ChainLinkFailure::PathLengthExceeded { allowed: 0, .. }
                ));
            },
            other => panic!("unexpected result: {:?}", other.map(|(_, c)| c)),
        }
    }

    #[test]
    fn test_fourth_ca_level_rejected_by_assembly() {
        let root = issue(
            &CertificateProfile::new(
                Identity::new("Root", "Acme"),
                Role::Root,
                Issuance::SelfSigned,
            )
            .with_key_size(TEST_BITS),
        )
        .unwrap();
        // Overriding the path length lets the builder issue a second CA level.
        let int_a = issue(
            &CertificateProfile::new(
                Identity::new("Intermediate A", "Acme"),
                Role::Intermediate,
                Issuance::FromParent(IssuerRef::new(&root.0, &root.1)),
            )
            .with_key_size(TEST_BITS)
            .with_path_length(1),
        )
        .unwrap();
        let int_b = issue(
            &CertificateProfile::new(
                Identity::new("Intermediate B", "Acme"),
                Role::Intermediate,
                Issuance::FromParent(IssuerRef::new(&int_a.0, &int_a.1)),
            )
            .with_key_size(TEST_BITS),
        )
        .unwrap();
        let leaf = issue(
            &CertificateProfile::new(
                Identity::new("Leaf", "Acme"),
                Role::Leaf,
                Issuance::FromParent(IssuerRef::new(&int_b.0, &int_b.1)),
            )
            .with_key_size(TEST_BITS),
        )
        .unwrap();

        let err =
            CertificateChain::assemble_now(vec![root.1, int_a.1, int_b.1, leaf.1]).unwrap_err();
        match err {
            Error::ChainBuild(e) => {
                assert_eq!(e.link, 0);
                assert_eq!(
                    e.reason,
                    ChainLinkFailure::PathLengthExceeded {
                        allowed: 1,
                        found: 2
                    }
                );
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_leaf_cannot_issue() {
        let h = hierarchy();
        let profile = CertificateProfile::new(
            Identity::new("Child", "Acme"),
            Role::Leaf,
            Issuance::FromParent(IssuerRef::new(&h.leaf.0, &h.leaf.1)),
        )
        .with_key_size(TEST_BITS);
        match issue(&profile) {
            Err(Error::ChainBuild(e)) => {
                assert_eq!(e.reason, ChainLinkFailure::NotCertificateAuthority)
            },
            other => panic!("unexpected result: {:?}", other.map(|(_, c)| c)),
        }
    }
}

mod self_signed_tests {
    use super::*;

    #[test]
    fn test_self_signed_leaf() {
        let (key, cert) = builder()
            .build_leaf(Identity::new("Jane Doe", "Acme"), Issuance::SelfSigned, 365)
            .unwrap();
        assert!(key.matches(cert.public_key()));
        assert!(cert.is_self_issued());
        assert!(!cert.is_ca());
        assert_eq!(cert.authority_key_identifier(), cert.subject_key_identifier());
        assert!(cert
            .key_usage()
            .unwrap()
            .contains(KeyUsageFlags::document_signer() | KeyUsageFlags::KEY_CERT_SIGN));
        let chain = CertificateChain::assemble_now(vec![cert.clone()]).unwrap();
        assert_eq!(chain.root(), chain.leaf());
    }
}

mod failure_tests {
    use super::*;

    #[test]
    fn test_empty_common_name() {
        let err = builder()
            .build_root(Identity::new("  ", "Acme"), TEST_BITS, 30)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::IdentityInvalid {
                field: AttributeKind::CommonName,
                problem: IdentityProblem::Empty
            }
        ));
    }

    #[test]
    fn test_intermediate_requires_issuer() {
        let err = builder()
            .build_intermediate(Identity::new("Int", "Acme"), None, 30)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::IssuerKeyRequired {
                role: Role::Intermediate
            }
        ));
    }

    #[test]
    fn test_mismatched_issuer_key() {
        let h = hierarchy();
        let err = builder()
            .build_leaf(
                Identity::new("Leaf", "Acme"),
                Issuance::FromParent(IssuerRef::new(&h.root.0, &h.intermediate.1)),
                30,
            )
            .unwrap_err();
        assert!(matches!(err, Error::IssuerKeyRequired { role: Role::Leaf }));
    }
}

mod round_trip_tests {
    use super::*;

    #[test]
    fn test_pem_round_trip_fields() {
        let h = hierarchy();
        for cert in [&h.root.1, &h.intermediate.1, &h.leaf.1] {
            let pem = cert.to_pem().unwrap();
            let parsed = Certificate::from_pem(&pem).unwrap();
            assert_eq!(parsed.as_der(), cert.as_der());
            assert_eq!(parsed.subject().attributes(), cert.subject().attributes());
            assert_eq!(parsed.issuer().attributes(), cert.issuer().attributes());
            assert_eq!(parsed.serial(), cert.serial());
            assert_eq!(parsed.not_before(), cert.not_before());
            assert_eq!(parsed.not_after(), cert.not_after());
        }
    }

    #[test]
    fn test_identity_attribute_order_preserved() {
        let h = hierarchy();
        let kinds: Vec<AttributeKind> = h
            .leaf
            .1
            .subject()
            .attributes()
            .iter()
            .map(|a| a.kind.clone())
            .collect();
        assert_eq!(
            kinds,
            vec![
                AttributeKind::CommonName,
                AttributeKind::Organization,
                AttributeKind::Email,
                AttributeKind::Country
            ]
        );
    }
}
