//! Private PKI: identities, keys, certificate issuance and chain assembly.
//!
//! ## Hierarchy
//!
//! ```text
//! Root CA (self-signed, pathLen 1, keyCertSign | cRLSign)
//!   └── Intermediate CA (pathLen 0, keyCertSign | cRLSign)
//!         └── Leaf (end entity, digitalSignature | nonRepudiation, emailProtection)
//! ```
//!
//! A self-signed leaf (digitalSignature | nonRepudiation | keyCertSign,
//! AKI = SKI) is the degenerate one-certificate hierarchy.
//!
//! ## Example
//!
//! ```ignore
//! use pdf_sigchain::pki::{CertificateAuthorityBuilder, Identity, Issuance, IssuerRef};
//!
//! let builder = CertificateAuthorityBuilder::default();
//! let (root_key, root) = builder.build_root(Identity::new("Acme Root CA", "Acme"), 4096, 3650)?;
//! let (int_key, int) = builder.build_intermediate(
//!     Identity::new("Acme Intermediate CA", "Acme"),
//!     Some(IssuerRef::new(&root_key, &root)),
//!     1825,
//! )?;
//! let (leaf_key, leaf) = builder.build_leaf(
//!     Identity::new("PDF Signer", "Acme"),
//!     Issuance::FromParent(IssuerRef::new(&int_key, &int)),
//!     365,
//! )?;
//! ```

mod builder;
mod certificate;
mod chain;
mod extensions;
mod identity;
mod key;

pub use builder::{
    issue, CertificateAuthorityBuilder, CertificateProfile, Issuance, IssuerRef, Role,
};
pub use certificate::Certificate;
pub use chain::{CertificateChain, ChainBuildError, ChainLinkFailure};
pub(crate) use chain::{check_constraints, check_validity};
pub use extensions::{
    BasicConstraints, CertificateExtensions, KeyUsageFlags, ID_KP_EMAIL_PROTECTION,
};
pub use identity::{AttributeKind, Identity, NameAttribute};
pub use key::{
    key_identifier, verify_signature, KeyPair, KeyProtection, DEFAULT_KDF_ITERATIONS, MIN_KEY_SIZE,
};
