//! Distinguished names.
//!
//! An [`Identity`] keeps its attributes in insertion order so that the encoded
//! subject of a certificate is reproducible, but two identities compare equal
//! whenever they carry the same attribute set, regardless of order. Chain
//! linkage uses that semantic comparison, never byte equality of the encoding.

use std::fmt;
use std::hash::{Hash, Hasher};

use der::asn1::{Any, SetOfVec};
use der::Tag;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};
use x509_parser::x509::X509Name;

use crate::error::{Error, IdentityProblem, Result};

const OID_COMMON_NAME: &str = "2.5.4.3";
const OID_ORGANIZATION: &str = "2.5.4.10";
const OID_COUNTRY: &str = "2.5.4.6";
const OID_EMAIL: &str = "1.2.840.113549.1.9.1";

/// Kind of a name attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeKind {
    /// CN
    CommonName,
    /// O
    Organization,
    /// C, two letters
    Country,
    /// emailAddress (PKCS#9)
    Email,
    /// Any other attribute found in a parsed certificate, by dotted OID
    Other(String),
}

impl AttributeKind {
    fn oid_str(&self) -> &str {
        match self {
            AttributeKind::CommonName => OID_COMMON_NAME,
            AttributeKind::Organization => OID_ORGANIZATION,
            AttributeKind::Country => OID_COUNTRY,
            AttributeKind::Email => OID_EMAIL,
            AttributeKind::Other(oid) => oid,
        }
    }

    fn from_oid_str(oid: &str) -> Self {
        match oid {
            OID_COMMON_NAME => AttributeKind::CommonName,
            OID_ORGANIZATION => AttributeKind::Organization,
            OID_COUNTRY => AttributeKind::Country,
            OID_EMAIL => AttributeKind::Email,
            other => AttributeKind::Other(other.to_string()),
        }
    }

    /// String type used when encoding values of this kind.
    fn value_tag(&self) -> Tag {
        match self {
            AttributeKind::Country => Tag::PrintableString,
            AttributeKind::Email => Tag::Ia5String,
            _ => Tag::Utf8String,
        }
    }

    /// Conventional short name used in textual DNs.
    pub fn short_name(&self) -> &str {
        match self {
            AttributeKind::CommonName => "CN",
            AttributeKind::Organization => "O",
            AttributeKind::Country => "C",
            AttributeKind::Email => "emailAddress",
            AttributeKind::Other(oid) => oid,
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeKind::CommonName => write!(f, "CommonName"),
            AttributeKind::Organization => write!(f, "Organization"),
            AttributeKind::Country => write!(f, "Country"),
            AttributeKind::Email => write!(f, "Email"),
            AttributeKind::Other(oid) => write!(f, "{}", oid),
        }
    }
}

/// One attribute of a distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameAttribute {
    /// Attribute kind
    pub kind: AttributeKind,
    /// Attribute value
    pub value: String,
}

/// Ordered distinguished name with order-insensitive equality.
#[derive(Debug, Clone, Eq)]
pub struct Identity {
    attributes: Vec<NameAttribute>,
}

impl Identity {
    /// Create an identity with the two required attributes.
    pub fn new(common_name: impl Into<String>, organization: impl Into<String>) -> Self {
        Self {
            attributes: vec![
                NameAttribute {
                    kind: AttributeKind::CommonName,
                    value: common_name.into(),
                },
                NameAttribute {
                    kind: AttributeKind::Organization,
                    value: organization.into(),
                },
            ],
        }
    }

    /// Build an identity from explicit attributes, keeping their order.
    pub fn from_attributes(attributes: Vec<NameAttribute>) -> Self {
        Self { attributes }
    }

    /// Append an email address attribute.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.set(AttributeKind::Email, email.into());
        self
    }

    /// Append a country attribute.
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.set(AttributeKind::Country, country.into());
        self
    }

    fn set(&mut self, kind: AttributeKind, value: String) {
        match self.attributes.iter_mut().find(|a| a.kind == kind) {
            Some(existing) => existing.value = value,
            None => self.attributes.push(NameAttribute { kind, value }),
        }
    }

    fn get(&self, kind: &AttributeKind) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| &a.kind == kind)
            .map(|a| a.value.as_str())
    }

    /// Attributes in encoding order.
    pub fn attributes(&self) -> &[NameAttribute] {
        &self.attributes
    }

    /// Common name, if present.
    pub fn common_name(&self) -> Option<&str> {
        self.get(&AttributeKind::CommonName)
    }

    /// Organization, if present.
    pub fn organization(&self) -> Option<&str> {
        self.get(&AttributeKind::Organization)
    }

    /// Country, if present.
    pub fn country(&self) -> Option<&str> {
        self.get(&AttributeKind::Country)
    }

    /// Email address, if present.
    pub fn email(&self) -> Option<&str> {
        self.get(&AttributeKind::Email)
    }

    /// Check the attributes required for issuing a certificate.
    ///
    /// Common name and organization must be non-blank; a country must be two
    /// ASCII letters; an email must be ASCII with a single `@` separating two
    /// non-empty parts.
    pub fn validate(&self) -> Result<()> {
        for required in [AttributeKind::CommonName, AttributeKind::Organization] {
            match self.get(&required) {
                Some(v) if !v.trim().is_empty() => {},
                _ => {
                    return Err(Error::IdentityInvalid {
                        field: required,
                        problem: IdentityProblem::Empty,
                    })
                },
            }
        }

        for attr in &self.attributes {
            let problem = match attr.kind {
                _ if attr.value.trim().is_empty() => Some(IdentityProblem::Empty),
                AttributeKind::Country
                    if attr.value.len() != 2
                        || !attr.value.bytes().all(|b| b.is_ascii_alphabetic()) =>
                {
                    Some(IdentityProblem::Malformed)
                },
                AttributeKind::Email if !is_plausible_email(&attr.value) => {
                    Some(IdentityProblem::Malformed)
                },
                _ => None,
            };
            if let Some(problem) = problem {
                return Err(Error::IdentityInvalid {
                    field: attr.kind.clone(),
                    problem,
                });
            }
        }
        Ok(())
    }

    /// Encode as an X.509 name, one attribute per RDN, in insertion order.
    pub(crate) fn to_x509_name(&self) -> Result<Name> {
        let mut rdns = Vec::with_capacity(self.attributes.len());
        for attr in &self.attributes {
            let oid = const_oid::ObjectIdentifier::new(attr.kind.oid_str()).map_err(|e| {
                Error::CertificateDecode {
                    reason: format!("attribute OID {}: {}", attr.kind.oid_str(), e),
                }
            })?;
            let value = Any::new(attr.kind.value_tag(), attr.value.as_bytes())?;

            let mut set = SetOfVec::new();
            set.insert(AttributeTypeAndValue { oid, value })?;
            rdns.push(RelativeDistinguishedName::from(set));
        }
        Ok(RdnSequence(rdns))
    }

    /// Decode from a parsed certificate name.
    pub(crate) fn from_x509_name(name: &X509Name<'_>) -> Result<Self> {
        let mut attributes = Vec::new();
        for attr in name.iter_attributes() {
            let kind = AttributeKind::from_oid_str(&attr.attr_type().to_id_string());
            let value = attr.as_str().map_err(|e| Error::CertificateDecode {
                reason: format!("name attribute {}: {}", kind, e),
            })?;
            attributes.push(NameAttribute {
                kind,
                value: value.to_string(),
            });
        }
        Ok(Self { attributes })
    }

    fn sorted(&self) -> Vec<&NameAttribute> {
        let mut sorted: Vec<&NameAttribute> = self.attributes.iter().collect();
        sorted.sort();
        sorted
    }
}

fn is_plausible_email(value: &str) -> bool {
    if !value.is_ascii() || value.chars().any(char::is_whitespace) {
        return false;
    }
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.attributes.len() == other.attributes.len() && self.sorted() == other.sorted()
    }
}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sorted().hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attr) in self.attributes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", attr.kind.short_name(), attr.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::Encode;
    use proptest::prelude::*;
    use x509_parser::prelude::FromDer;

    #[test]
    fn test_required_attributes() {
        let id = Identity::new("Example Root CA", "Example");
        assert!(id.validate().is_ok());
        assert_eq!(id.common_name(), Some("Example Root CA"));
        assert_eq!(id.organization(), Some("Example"));
        assert_eq!(id.country(), None);
    }

    #[test]
    fn test_empty_common_name_rejected() {
        let err = Identity::new("  ", "Example").validate().unwrap_err();
        assert!(matches!(
            err,
            Error::IdentityInvalid {
                field: AttributeKind::CommonName,
                problem: IdentityProblem::Empty
            }
        ));
    }

    #[test]
    fn test_missing_organization_rejected() {
        let id = Identity::from_attributes(vec![NameAttribute {
            kind: AttributeKind::CommonName,
            value: "Signer".to_string(),
        }]);
        let err = id.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::IdentityInvalid {
                field: AttributeKind::Organization,
                ..
            }
        ));
    }

    #[test]
    fn test_country_must_be_two_letters() {
        let err = Identity::new("Signer", "Example")
            .with_country("USA")
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::IdentityInvalid {
                field: AttributeKind::Country,
                problem: IdentityProblem::Malformed
            }
        ));
        assert!(Identity::new("Signer", "Example").with_country("US").validate().is_ok());
    }

    #[test]
    fn test_email_validation() {
        for bad in ["nobody", "a@", "@b", "a@b@c", "é@example.com", "a b@c"] {
            let id = Identity::new("Signer", "Example").with_email(bad);
            assert!(id.validate().is_err(), "accepted {}", bad);
        }
        let id = Identity::new("Signer", "Example").with_email("signer@example.com");
        assert!(id.validate().is_ok());
    }

    #[test]
    fn test_with_email_replaces_existing() {
        let id = Identity::new("Signer", "Example")
            .with_email("a@example.com")
            .with_email("b@example.com");
        assert_eq!(id.attributes().len(), 3);
        assert_eq!(id.email(), Some("b@example.com"));
    }

    #[test]
    fn test_order_insensitive_equality() {
        let a = Identity::new("Signer", "Example").with_country("US");
        let b = Identity::from_attributes(vec![
            NameAttribute {
                kind: AttributeKind::Country,
                value: "US".to_string(),
            },
            NameAttribute {
                kind: AttributeKind::Organization,
                value: "Example".to_string(),
            },
            NameAttribute {
                kind: AttributeKind::CommonName,
                value: "Signer".to_string(),
            },
        ]);
        assert_eq!(a, b);
        assert_ne!(a, Identity::new("Signer", "Example"));
    }

    #[test]
    fn test_display() {
        let id = Identity::new("Signer", "Example")
            .with_email("signer@example.com")
            .with_country("US");
        assert_eq!(id.to_string(), "CN=Signer, O=Example, emailAddress=signer@example.com, C=US");
    }

    #[test]
    fn test_x509_name_round_trip_keeps_order() {
        let id = Identity::new("Signer", "Example")
            .with_email("signer@example.com")
            .with_country("US");
        let der = id.to_x509_name().unwrap().to_der().unwrap();
        let (_, parsed) = x509_parser::x509::X509Name::from_der(&der).unwrap();
        let decoded = Identity::from_x509_name(&parsed).unwrap();
        assert_eq!(decoded.attributes(), id.attributes());
    }

    proptest! {
        #[test]
        fn prop_equality_ignores_order(rotation in 0usize..4) {
            let id = Identity::new("Signer", "Example")
                .with_email("signer@example.com")
                .with_country("US");
            let mut attrs = id.attributes().to_vec();
            attrs.rotate_left(rotation);
            prop_assert_eq!(Identity::from_attributes(attrs), id);
        }
    }
}
