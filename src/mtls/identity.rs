//! Certificate identity resolution.
//!
//! Maps the verified peer certificates of a connection to one directory
//! record. Certificates carrying critical extensions we cannot interpret
//! (grid proxies) are passed over, so subject and issuer always come from
//! the end-entity certificate. For every other certificate, in presented
//! order, the subject is split
//! into `KEY=value` components (RFC 4514 order, most specific first).
//! Components naming a root or grid authority are ignored; the rest lose a
//! `CN=` prefix and are looked up in the directory index. The first hit wins.
//! There is no scoring: when several subjects could match, presentation
//! order decides.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use rustls::pki_types::CertificateDer;
use serde::Serialize;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::objects::{oid_registry, oid2abbrev};
use x509_parser::prelude::FromDer;
use x509_parser::x509::X509Name;

use super::verifier::unhandled_critical_extensions;
use crate::directory::DirectoryCache;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Resolved identity
// ─────────────────────────────────────────────────────────────────────────────

/// Identity of a request, assembled from the matching certificate and the
/// directory record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedIdentity {
    /// First component of the certificate issuer, e.g. `CN=Test Grid CA`
    pub issuer: String,
    /// First component of the certificate subject
    pub subject: String,
    /// Directory display name
    pub name: String,
    /// Directory login handle
    pub login: String,
    /// Directory person ID
    pub id: i64,
    /// Certificate expiry (Unix seconds)
    pub expires: i64,
    /// E-mail addresses from the certificate SAN
    pub emails: Vec<String>,
    /// Directory roles
    pub roles: BTreeMap<String, Vec<String>>,
    /// Directory primary DN
    pub dn: String,
    /// Resolution time (Unix seconds)
    pub auth_time: i64,
}

/// Resolve `peer_certs` against the directory.
///
/// # Errors
///
/// [`Error::NoCredentials`] when no certificate was presented,
/// [`Error::IdentityNotFound`] when no subject component matches.
pub fn resolve(peer_certs: &[CertificateDer<'_>], cache: &DirectoryCache) -> Result<ResolvedIdentity> {
    if peer_certs.is_empty() {
        return Err(Error::NoCredentials);
    }

    let mut tried: Vec<String> = Vec::new();
    for der in peer_certs {
        let Ok((_, cert)) = X509Certificate::from_der(der.as_ref()) else {
            continue;
        };
        if !unhandled_critical_extensions(&cert).is_empty() {
            continue;
        }
        let components = name_components(cert.subject());
        for component in components.iter().filter(|c| !is_authority_component(c)) {
            let token = component.strip_prefix("CN=").unwrap_or(component);
            if let Some(record) = cache.lookup(token) {
                return Ok(ResolvedIdentity {
                    issuer: first_component(cert.issuer()),
                    subject: components.first().cloned().unwrap_or_default(),
                    name: record.name.clone(),
                    login: record.login.clone(),
                    id: record.id,
                    expires: cert.validity().not_after.timestamp(),
                    emails: emails(&cert),
                    roles: record.roles.clone(),
                    dn: record.dn.clone(),
                    auth_time: unix_now(),
                });
            }
            tried.push(token.to_string());
        }
    }

    Err(Error::IdentityNotFound(tried.join(", ")))
}

/// `true` for components naming an organisational root or grid authority
/// rather than a person.
#[must_use]
pub fn is_authority_component(component: &str) -> bool {
    (component.contains("ROOT") && component.contains("CERN")) || component.contains("Grid")
}

/// Components of `name` as `KEY=value` strings, most specific first.
#[must_use]
pub fn name_components(name: &X509Name<'_>) -> Vec<String> {
    let registry = oid_registry();
    let mut components: Vec<String> = name
        .iter_rdn()
        .flat_map(|rdn| rdn.iter())
        .map(|attr| {
            let key = oid2abbrev(attr.attr_type(), registry)
                .map_or_else(|_| attr.attr_type().to_id_string(), |abbrev| abbrev.to_string());
            let value = attr
                .as_str()
                .map_or_else(|_| hex_value(attr.attr_value().as_bytes()), str::to_string);
            format!("{key}={value}")
        })
        .collect();
    components.reverse();
    components
}

fn first_component(name: &X509Name<'_>) -> String {
    name_components(name).into_iter().next().unwrap_or_default()
}

fn emails(cert: &X509Certificate<'_>) -> Vec<String> {
    let mut emails = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::RFC822Name(email) = name {
                emails.push((*email).to_string());
            }
        }
    }
    emails
}

fn hex_value(data: &[u8]) -> String {
    let mut out = String::with_capacity(1 + data.len() * 2);
    out.push('#');
    for byte in data {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use rcgen::{
        BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType,
        Ia5String, IsCa, KeyPair, SanType,
    };

    use super::*;
    use crate::directory::{KeyMode, parse_directory};

    // ── helpers ──────────────────────────────────────────────────────────────

    fn make_cert_der(org: &str, cn: &str, emails: &[&str]) -> CertificateDer<'static> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, org);
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        params.subject_alt_names = emails
            .iter()
            .map(|e| SanType::Rfc822Name(Ia5String::try_from(*e).unwrap()))
            .collect();
        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().der().clone()
    }

    fn cache_with(payload: &str) -> DirectoryCache {
        cache_keyed(payload, KeyMode::Natural)
    }

    fn cache_keyed(payload: &str, mode: KeyMode) -> DirectoryCache {
        let cache = DirectoryCache::new(None, None, mode);
        cache.replace(parse_directory(payload.as_bytes(), "test", mode).unwrap(), "test");
        cache
    }

    /// `[proxy, eec]` where the EEC is issued by `CN=Example User CA` and the
    /// proxy, issued by the EEC, carries a critical proxyCertInfo extension.
    fn proxy_chain(eec_cn: &str, proxy_cn: &str) -> Vec<CertificateDer<'static>> {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::default();
        let mut ca_dn = DistinguishedName::new();
        ca_dn.push(DnType::CommonName, "Example User CA");
        ca_params.distinguished_name = ca_dn;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let eec_key = KeyPair::generate().unwrap();
        let mut eec_params = CertificateParams::default();
        let mut eec_dn = DistinguishedName::new();
        eec_dn.push(DnType::CommonName, eec_cn);
        eec_params.distinguished_name = eec_dn;
        let eec = eec_params.signed_by(&eec_key, &ca, &ca_key).unwrap();

        let proxy_key = KeyPair::generate().unwrap();
        let mut proxy_params = CertificateParams::default();
        let mut proxy_dn = DistinguishedName::new();
        proxy_dn.push(DnType::CommonName, proxy_cn);
        proxy_params.distinguished_name = proxy_dn;
        let mut proxy_info =
            CustomExtension::from_oid_content(&[1, 3, 6, 1, 5, 5, 7, 1, 14], vec![0x30, 0x00]);
        proxy_info.set_criticality(true);
        proxy_params.custom_extensions = vec![proxy_info];
        let proxy = proxy_params.signed_by(&proxy_key, &eec, &eec_key).unwrap();

        vec![proxy.der().clone(), eec.der().clone()]
    }

    const DIRECTORY: &str = r#"[
        {"DN": "/DC=org/DC=example/OU=Users/CN=alice/CN=123/CN=Alice Example",
         "DNs": ["/DC=org/DC=example/OU=Users/CN=alice/CN=123/CN=Alice Example"],
         "ID": 123, "LOGIN": "alice", "NAME": "Alice Example",
         "ROLES": {"admin": ["group:ops"]}},
        {"DN": "/O=Grid/CN=Grid Robot", "DNs": ["/O=Grid/CN=Grid Robot"],
         "ID": 9, "LOGIN": "robot", "NAME": "Grid Robot", "ROLES": {}}
    ]"#;

    // ── tests ────────────────────────────────────────────────────────────────

    #[test]
    fn components_are_most_specific_first() {
        let der = make_cert_der("Example Org", "Alice Example", &[]);
        let (_, cert) = X509Certificate::from_der(der.as_ref()).unwrap();
        assert_eq!(
            name_components(cert.subject()),
            vec!["CN=Alice Example".to_string(), "O=Example Org".to_string()]
        );
    }

    #[test]
    fn authority_components_are_recognised() {
        assert!(is_authority_component("CN=CERN Grid Certification Authority"));
        assert!(is_authority_component("CN=CERN ROOT CA 2"));
        assert!(!is_authority_component("CN=CERN Users"));
        assert!(!is_authority_component("CN=Alice Example"));
    }

    #[test]
    fn resolves_cn_to_directory_record() {
        // GIVEN: a certificate whose CN is a directory token
        let cache = cache_with(DIRECTORY);
        let der = make_cert_der("Example Org", "Alice Example", &["alice@example.org"]);

        // WHEN
        let identity = resolve(&[der], &cache).unwrap();

        // THEN: record fields and certificate fields are combined
        assert_eq!(identity.login, "alice");
        assert_eq!(identity.id, 123);
        assert_eq!(identity.subject, "CN=Alice Example");
        assert_eq!(identity.issuer, "CN=Alice Example");
        assert_eq!(identity.emails, vec!["alice@example.org".to_string()]);
        assert_eq!(identity.roles["admin"], vec!["group:ops".to_string()]);
        assert!(identity.expires > 0);
    }

    #[test]
    fn grid_components_are_never_looked_up() {
        // GIVEN: a directory entry whose token contains "Grid"
        let cache = cache_with(DIRECTORY);
        let der = make_cert_der("Example Org", "Grid Robot", &[]);

        // THEN: the authority filter wins over the directory match
        assert!(matches!(resolve(&[der], &cache), Err(Error::IdentityNotFound(_))));
    }

    #[test]
    fn first_matching_certificate_wins() {
        let cache = cache_with(DIRECTORY);
        let unknown = make_cert_der("Example Org", "Somebody Else", &[]);
        let alice = make_cert_der("Example Org", "alice", &[]);

        let identity = resolve(&[unknown, alice], &cache).unwrap();
        assert_eq!(identity.login, "alice");
        assert_eq!(identity.subject, "CN=alice");
    }

    #[test]
    fn no_certificates_is_no_credentials() {
        let cache = cache_with(DIRECTORY);
        assert!(matches!(resolve(&[], &cache), Err(Error::NoCredentials)));
    }

    #[test]
    fn unknown_subject_is_identity_not_found() {
        let cache = cache_with(DIRECTORY);
        let der = make_cert_der("Example Org", "Mallory", &[]);
        let err = resolve(&[der], &cache).unwrap_err();
        assert!(matches!(err, Error::IdentityNotFound(ref tried) if tried.contains("Mallory")));
    }

    #[test]
    fn proxy_certificates_are_passed_over() {
        // GIVEN: a proxy whose own CN would match a directory token
        let cache = cache_with(DIRECTORY);
        let chain = proxy_chain("Alice Example", "alice");

        // WHEN
        let identity = resolve(&chain, &cache).unwrap();

        // THEN: subject and issuer come from the end-entity certificate
        assert_eq!(identity.subject, "CN=Alice Example");
        assert_eq!(identity.issuer, "CN=Example User CA");
        assert_eq!(identity.id, 123);
    }

    #[test]
    fn id_mode_resolves_numeric_cn() {
        // GIVEN: a directory keyed by person ID and a certificate `CN=<ID>`
        let cache = cache_keyed(DIRECTORY, KeyMode::Id);
        let der = make_cert_der("Example Org", "123", &[]);

        // WHEN
        let identity = resolve(&[der], &cache).unwrap();

        // THEN
        assert_eq!(identity.login, "alice");
        assert_eq!(identity.dn, "/DC=org/DC=example/OU=Users/CN=alice/CN=123/CN=Alice Example");
    }

    #[test]
    fn id_mode_ignores_name_tokens() {
        let cache = cache_keyed(DIRECTORY, KeyMode::Id);
        let der = make_cert_der("Example Org", "Alice Example", &[]);
        assert!(matches!(resolve(&[der], &cache), Err(Error::IdentityNotFound(_))));
    }

    #[test]
    fn unparsable_certificates_are_skipped() {
        let cache = cache_with(DIRECTORY);
        let garbage = CertificateDer::from(vec![0x30, 0x00]);
        let alice = make_cert_der("Example Org", "Alice Example", &[]);
        assert_eq!(resolve(&[garbage, alice], &cache).unwrap().id, 123);
    }
}
