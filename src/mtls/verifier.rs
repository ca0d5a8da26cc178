//! Client certificate chain verification.
//!
//! Grid clients routinely present proxy certificates whose proxy-info
//! extension is marked critical. A stock webpki verifier rejects those, so
//! the chain is filtered first:
//!
//! 1. every certificate must parse and be inside its validity window,
//! 2. certificates carrying a critical extension we do not understand are
//!    dropped from the chain,
//! 3. a dropped certificate must be signed by the certificate that follows
//!    it, so a proxy is tied to the identity it delegates,
//! 4. the first surviving certificate is verified as the end entity against
//!    the trusted roots, the remaining survivors serve as intermediates.
//!
//! [`ChainVerifier`] wires [`verify_chain`] into the rustls handshake. When
//! the client signs with a proxy key, the handshake signature is checked
//! against the proxy's public key directly since webpki refuses to parse
//! the proxy as an end entity.

use std::sync::Arc;

use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{
    CertificateDer, SignatureVerificationAlgorithm, SubjectPublicKeyInfoDer, UnixTime,
};
use rustls::server::WebPkiClientVerifier;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{
    CertificateError, DigitallySignedStruct, DistinguishedName, PeerMisbehaved, RootCertStore,
    SignatureScheme,
};
use tracing::{debug, warn};
use x509_parser::asn1_rs::Any;
use x509_parser::extensions::ParsedExtension;
use x509_parser::prelude::{FromDer, X509Certificate};
use x509_parser::x509::SubjectPublicKeyInfo;

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Trusted roots
// ─────────────────────────────────────────────────────────────────────────────

/// CA roots accepted for client certificates, with the webpki verifier
/// built over them.
#[derive(Debug, Clone)]
pub struct TrustedRoots {
    inner: Arc<dyn ClientCertVerifier>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl TrustedRoots {
    /// Build from a root store and crypto provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is empty or the verifier cannot be built.
    pub fn new(roots: RootCertStore, provider: Arc<CryptoProvider>) -> Result<Self> {
        let algorithms = provider.signature_verification_algorithms;
        let inner = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build client verifier: {e}")))?;
        Ok(Self { inner, algorithms })
    }

    /// Build from DER-encoded CA certificates using the default provider.
    ///
    /// # Errors
    ///
    /// Returns an error if none of the certificates can be used as a root.
    pub fn from_ders(certs: impl IntoIterator<Item = CertificateDer<'static>>) -> Result<Self> {
        let mut store = RootCertStore::empty();
        let (added, _ignored) = store.add_parsable_certificates(certs);
        if added == 0 {
            return Err(Error::Config("No usable CA certificates".to_string()));
        }
        Self::new(store, Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
    }

    fn verify(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<()> {
        self.inner
            .verify_client_cert(end_entity, intermediates, now)
            .map(|_| ())
            .map_err(|e| Error::HandshakeRejected(format!("chain verification failed: {e}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chain verification
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a successful [`verify_chain`].
#[derive(Debug, Clone)]
pub struct VerifiedChain {
    /// Certificates kept after filtering, in presented order. The first one
    /// was verified as the end entity.
    pub certificates: Vec<CertificateDer<'static>>,
    /// Number of certificates dropped for unhandled critical extensions.
    pub skipped: usize,
}

/// Verify a presented client chain against `roots` at time `now`.
///
/// # Errors
///
/// Returns [`Error::HandshakeRejected`] when the chain is empty, a
/// certificate fails to parse or is outside its validity window, a dropped
/// certificate is not signed by its successor, or the surviving chain does
/// not lead to a trusted root with client-auth usage.
pub fn verify_chain(
    raw_chain: &[CertificateDer<'_>],
    roots: &TrustedRoots,
    now: UnixTime,
) -> Result<VerifiedChain> {
    if raw_chain.is_empty() {
        return Err(Error::HandshakeRejected("no client certificate presented".to_string()));
    }

    let now_secs = i64::try_from(now.as_secs()).unwrap_or(i64::MAX);
    let parsed = raw_chain
        .iter()
        .enumerate()
        .map(|(position, der)| {
            X509Certificate::from_der(der.as_ref())
                .map(|(_, cert)| cert)
                .map_err(|e| {
                    Error::HandshakeRejected(format!("unable to parse certificate {position}: {e}"))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut kept: Vec<CertificateDer<'static>> = Vec::with_capacity(raw_chain.len());
    let mut skipped = 0;

    for (position, (der, cert)) in raw_chain.iter().zip(&parsed).enumerate() {
        check_validity(cert, now_secs)?;

        let unhandled = unhandled_critical_extensions(cert);
        if unhandled.is_empty() {
            kept.push(der.clone().into_owned());
            continue;
        }

        let Some(issuer) = parsed.get(position + 1) else {
            return Err(Error::HandshakeRejected(format!(
                "certificate '{}' has unhandled critical extensions and no issuer in the chain",
                cert.subject()
            )));
        };
        verify_issued_by(der, cert, issuer, &roots.algorithms)?;
        debug!(
            position,
            subject = %cert.subject(),
            extensions = ?unhandled,
            "Skipping certificate with unhandled critical extensions"
        );
        skipped += 1;
    }

    let Some((end_entity, intermediates)) = kept.split_first() else {
        return Err(Error::HandshakeRejected(
            "every presented certificate carries unhandled critical extensions".to_string(),
        ));
    };
    roots.verify(end_entity, intermediates, now)?;

    Ok(VerifiedChain {
        certificates: kept,
        skipped,
    })
}

fn check_validity(cert: &X509Certificate<'_>, now_secs: i64) -> Result<()> {
    let validity = cert.validity();
    if validity.not_before.timestamp() > now_secs {
        return Err(Error::HandshakeRejected(format!(
            "certificate '{}' is not valid before {}",
            cert.subject(),
            validity.not_before
        )));
    }
    if validity.not_after.timestamp() < now_secs {
        return Err(Error::HandshakeRejected(format!(
            "certificate '{}' expired at {}",
            cert.subject(),
            validity.not_after
        )));
    }
    Ok(())
}

/// Check that `cert` carries a valid signature by `issuer`'s key.
fn verify_issued_by(
    der: &CertificateDer<'_>,
    cert: &X509Certificate<'_>,
    issuer: &X509Certificate<'_>,
    algorithms: &WebPkiSupportedAlgorithms,
) -> Result<()> {
    let signature_alg = algorithm_id(der.as_ref(), 1).ok_or_else(|| {
        Error::HandshakeRejected(format!(
            "certificate '{}' has a malformed signature algorithm",
            cert.subject()
        ))
    })?;
    verify_with_key(
        algorithms.all,
        issuer.public_key(),
        Some(signature_alg),
        cert.tbs_certificate.as_ref(),
        &cert.signature_value.data,
    )
    .map_err(|_| {
        Error::HandshakeRejected(format!(
            "certificate '{}' is not signed by '{}'",
            cert.subject(),
            issuer.subject()
        ))
    })
}

/// Verify `signature` over `message` with the public key in `key`, trying
/// every candidate algorithm that matches the key type and, when given, the
/// signature algorithm identifier.
fn verify_with_key(
    candidates: &[&dyn SignatureVerificationAlgorithm],
    key: &SubjectPublicKeyInfo<'_>,
    signature_alg: Option<&[u8]>,
    message: &[u8],
    signature: &[u8],
) -> std::result::Result<(), CertificateError> {
    let key_alg = algorithm_id(key.raw, 0).ok_or(CertificateError::BadEncoding)?;
    let key_bits = &key.subject_public_key.data;

    let verified = candidates
        .iter()
        .filter(|alg| alg.public_key_alg_id().as_ref() == key_alg)
        .filter(|alg| signature_alg.is_none_or(|id| alg.signature_alg_id().as_ref() == id))
        .any(|alg| alg.verify_signature(key_bits, message, signature).is_ok());

    if verified {
        Ok(())
    } else {
        Err(CertificateError::BadSignature)
    }
}

/// Contents of the AlgorithmIdentifier found as element `index` of the DER
/// SEQUENCE `der` (0 for a SubjectPublicKeyInfo, 1 for a Certificate).
fn algorithm_id(der: &[u8], index: usize) -> Option<&[u8]> {
    let (_, outer) = Any::from_der(der).ok()?;
    let mut rest = outer.data;
    for _ in 0..index {
        rest = Any::from_der(rest).ok()?.0;
    }
    Any::from_der(rest).ok().map(|(_, alg)| alg.data)
}

/// Parse `cert` if it is one webpki cannot take as an end entity.
fn parse_proxy<'a>(cert: &'a CertificateDer<'_>) -> Option<X509Certificate<'a>> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref()).ok()?;
    (!unhandled_critical_extensions(&parsed).is_empty()).then_some(parsed)
}

/// OIDs of critical extensions the parser could not interpret.
pub(crate) fn unhandled_critical_extensions(cert: &X509Certificate<'_>) -> Vec<String> {
    cert.extensions()
        .iter()
        .filter(|ext| {
            ext.critical
                && matches!(
                    ext.parsed_extension(),
                    ParsedExtension::UnsupportedExtension { .. } | ParsedExtension::ParseError { .. }
                )
        })
        .map(|ext| ext.oid.to_id_string())
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// rustls integration
// ─────────────────────────────────────────────────────────────────────────────

/// rustls client certificate verifier backed by [`verify_chain`].
///
/// Handshake signatures are checked by the inner webpki verifier, except for
/// proxy leaves which are checked against their own public key.
#[derive(Debug)]
pub struct ChainVerifier {
    roots: TrustedRoots,
    mandatory: bool,
}

impl ChainVerifier {
    /// Create a verifier. With `mandatory == false` clients may connect
    /// without a certificate.
    #[must_use]
    pub fn new(roots: TrustedRoots, mandatory: bool) -> Self {
        Self { roots, mandatory }
    }
}

impl ClientCertVerifier for ChainVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        self.mandatory
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.roots.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        let mut chain = Vec::with_capacity(intermediates.len() + 1);
        chain.push(end_entity.clone());
        chain.extend(intermediates.iter().cloned());

        match verify_chain(&chain, &self.roots, now) {
            Ok(verified) => {
                debug!(
                    presented = chain.len(),
                    skipped = verified.skipped,
                    "Client certificate chain verified"
                );
                Ok(ClientCertVerified::assertion())
            }
            Err(e) => {
                warn!(error = %e, "Rejected client certificate chain");
                Err(e.into())
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        let Some(proxy) = parse_proxy(cert) else {
            return self.roots.inner.verify_tls12_signature(message, cert, dss);
        };
        let candidates = self
            .roots
            .algorithms
            .mapping
            .iter()
            .find(|(scheme, _)| *scheme == dss.scheme)
            .map(|(_, algs)| *algs)
            .ok_or(PeerMisbehaved::SignedHandshakeWithUnadvertisedSigScheme)?;

        verify_with_key(candidates, proxy.public_key(), None, message, dss.signature())
            .map(|()| HandshakeSignatureValid::assertion())
            .map_err(rustls::Error::InvalidCertificate)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        let Some(proxy) = parse_proxy(cert) else {
            return self.roots.inner.verify_tls13_signature(message, cert, dss);
        };
        let spki = SubjectPublicKeyInfoDer::from(proxy.public_key().raw);
        rustls::crypto::verify_tls13_signature_with_raw_key(
            message,
            &spki,
            dss,
            &self.roots.algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.roots.inner.supported_verify_schemes()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rcgen::{
        BasicConstraints, CertificateParams, CustomExtension, DnType, ExtendedKeyUsagePurpose,
        IsCa, KeyPair,
    };
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use rustls::sign::{Signer, SigningKey};

    use super::*;

    struct TestCa {
        cert: rcgen::Certificate,
        key: KeyPair,
    }

    impl TestCa {
        fn new(cn: &str) -> Self {
            let key = KeyPair::generate().unwrap();
            let mut params = CertificateParams::default();
            params.distinguished_name.push(DnType::CommonName, cn);
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.not_before = rcgen::date_time_ymd(2020, 1, 1);
            params.not_after = rcgen::date_time_ymd(2040, 1, 1);
            let cert = params.self_signed(&key).unwrap();
            Self { cert, key }
        }

        fn roots(&self) -> TrustedRoots {
            TrustedRoots::from_ders([self.cert.der().clone()]).unwrap()
        }

        fn issue(&self, cn: &str, critical_ext: bool) -> CertificateDer<'static> {
            leaf_params(cn, critical_ext)
                .signed_by(&KeyPair::generate().unwrap(), &self.cert, &self.key)
                .unwrap()
                .der()
                .clone()
        }

        fn issue_with_key(&self, cn: &str) -> (rcgen::Certificate, KeyPair) {
            let key = KeyPair::generate().unwrap();
            let cert = leaf_params(cn, false)
                .signed_by(&key, &self.cert, &self.key)
                .unwrap();
            (cert, key)
        }
    }

    fn leaf_params(cn: &str, critical_ext: bool) -> CertificateParams {
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.not_before = rcgen::date_time_ymd(2024, 1, 1);
        params.not_after = rcgen::date_time_ymd(2030, 1, 1);
        if critical_ext {
            // proxyCertInfo (RFC 3820)
            let mut ext =
                CustomExtension::from_oid_content(&[1, 3, 6, 1, 5, 5, 7, 1, 14], vec![0x30, 0x00]);
            ext.set_criticality(true);
            params.custom_extensions = vec![ext];
        }
        params
    }

    /// Proxy certificate delegated by `eec`, with its own key.
    fn proxy_of(
        eec: &rcgen::Certificate,
        eec_key: &KeyPair,
        cn: &str,
    ) -> (CertificateDer<'static>, KeyPair) {
        let key = KeyPair::generate().unwrap();
        let cert = leaf_params(cn, true).signed_by(&key, eec, eec_key).unwrap();
        (cert.der().clone(), key)
    }

    fn sign(key: &KeyPair, message: &[u8]) -> Vec<u8> {
        let der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
        rustls::crypto::aws_lc_rs::sign::any_supported_type(&der)
            .unwrap()
            .choose_scheme(&[SignatureScheme::ECDSA_NISTP256_SHA256])
            .unwrap()
            .sign(message)
            .unwrap()
    }

    fn ecdsa_p256_candidates() -> &'static [&'static dyn SignatureVerificationAlgorithm] {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .mapping
            .iter()
            .find(|(scheme, _)| *scheme == SignatureScheme::ECDSA_NISTP256_SHA256)
            .map(|(_, algs)| *algs)
            .unwrap()
    }

    fn at(secs: u64) -> UnixTime {
        UnixTime::since_unix_epoch(Duration::from_secs(secs))
    }

    // 2025-06-01T00:00:00Z
    const IN_WINDOW: u64 = 1_748_736_000;
    // 2031-01-01T00:00:00Z
    const AFTER_EXPIRY: u64 = 1_924_992_000;
    // 2023-01-01T00:00:00Z
    const BEFORE_START: u64 = 1_672_531_200;

    #[test]
    fn accepts_leaf_signed_by_trusted_root() {
        // GIVEN: a leaf issued by the trusted CA
        let ca = TestCa::new("Test Grid CA");
        let leaf = ca.issue("Alice Example", false);

        // WHEN: verifying inside the validity window
        let verified = verify_chain(&[leaf], &ca.roots(), at(IN_WINDOW)).unwrap();

        // THEN: the chain is accepted with nothing skipped
        assert_eq!(verified.certificates.len(), 1);
        assert_eq!(verified.skipped, 0);
    }

    #[test]
    fn rejects_expired_leaf() {
        let ca = TestCa::new("Test Grid CA");
        let leaf = ca.issue("Alice Example", false);

        let err = verify_chain(&[leaf], &ca.roots(), at(AFTER_EXPIRY)).unwrap_err();
        assert!(matches!(err, Error::HandshakeRejected(ref m) if m.contains("expired")));
    }

    #[test]
    fn rejects_not_yet_valid_leaf() {
        let ca = TestCa::new("Test Grid CA");
        let leaf = ca.issue("Alice Example", false);

        let err = verify_chain(&[leaf], &ca.roots(), at(BEFORE_START)).unwrap_err();
        assert!(matches!(err, Error::HandshakeRejected(ref m) if m.contains("not valid before")));
    }

    #[test]
    fn rejects_leaf_from_untrusted_ca() {
        // GIVEN: a leaf from a CA the gateway does not trust
        let trusted = TestCa::new("Test Grid CA");
        let rogue = TestCa::new("Rogue CA");
        let leaf = rogue.issue("Mallory", false);

        // WHEN / THEN
        let err = verify_chain(&[leaf], &trusted.roots(), at(IN_WINDOW)).unwrap_err();
        assert!(matches!(err, Error::HandshakeRejected(_)));
    }

    #[test]
    fn rejects_unparseable_certificate() {
        let ca = TestCa::new("Test Grid CA");
        let garbage = CertificateDer::from(vec![0x30, 0x03, 0x02, 0x01, 0x00]);

        let err = verify_chain(&[garbage], &ca.roots(), at(IN_WINDOW)).unwrap_err();
        assert!(matches!(err, Error::HandshakeRejected(ref m) if m.contains("parse")));
    }

    #[test]
    fn rejects_empty_chain() {
        let ca = TestCa::new("Test Grid CA");
        assert!(verify_chain(&[], &ca.roots(), at(IN_WINDOW)).is_err());
    }

    #[test]
    fn skips_proxy_with_critical_extension_and_verifies_next() {
        // GIVEN: a proxy signed by the end-entity certificate that follows it
        let ca = TestCa::new("Test Grid CA");
        let (eec, eec_key) = ca.issue_with_key("Alice Example");
        let (proxy, _) = proxy_of(&eec, &eec_key, "Alice Example proxy");

        // WHEN
        let verified =
            verify_chain(&[proxy, eec.der().clone()], &ca.roots(), at(IN_WINDOW)).unwrap();

        // THEN: the proxy is dropped and the end-entity cert carries the chain
        assert_eq!(verified.skipped, 1);
        assert_eq!(verified.certificates.len(), 1);
        assert_eq!(&verified.certificates[0], eec.der());
    }

    #[test]
    fn accepts_nested_proxies() {
        // GIVEN: EEC -> proxy -> proxy of the proxy
        let ca = TestCa::new("Test Grid CA");
        let (eec, eec_key) = ca.issue_with_key("Alice Example");
        let outer_key = KeyPair::generate().unwrap();
        let outer = leaf_params("Alice Example proxy", true)
            .signed_by(&outer_key, &eec, &eec_key)
            .unwrap();
        let (inner, _) = proxy_of(&outer, &outer_key, "Alice Example proxy proxy");

        // WHEN
        let verified = verify_chain(
            &[inner, outer.der().clone(), eec.der().clone()],
            &ca.roots(),
            at(IN_WINDOW),
        )
        .unwrap();

        // THEN: both proxies are skipped, each signed by its successor
        assert_eq!(verified.skipped, 2);
        assert_eq!(verified.certificates.len(), 1);
    }

    #[test]
    fn rejects_proxy_not_signed_by_next_certificate() {
        // GIVEN: a certificate with a critical extension that the CA signed,
        // placed in front of an unrelated end-entity certificate
        let ca = TestCa::new("Test Grid CA");
        let forged = ca.issue("Alice Example proxy", true);
        let eec = ca.issue("Alice Example", false);

        // WHEN / THEN: it does not chain to the end entity, so it is refused
        let err = verify_chain(&[forged, eec], &ca.roots(), at(IN_WINDOW)).unwrap_err();
        assert!(matches!(err, Error::HandshakeRejected(ref m) if m.contains("not signed by")));
    }

    #[test]
    fn proxy_key_verifies_handshake_signature() {
        // GIVEN: a proxy and a message signed with the proxy key
        let ca = TestCa::new("Test Grid CA");
        let (eec, eec_key) = ca.issue_with_key("Alice Example");
        let (proxy, proxy_key) = proxy_of(&eec, &eec_key, "Alice Example proxy");
        let message = b"handshake transcript";
        let signature = sign(&proxy_key, message);

        // WHEN: the certificate is recognised as a proxy
        let parsed = parse_proxy(&proxy).expect("proxy has a critical extension");

        // THEN: its own key verifies the signature, the EEC key does not
        let candidates = ecdsa_p256_candidates();
        assert!(verify_with_key(candidates, parsed.public_key(), None, message, &signature).is_ok());
        assert!(
            verify_with_key(candidates, parsed.public_key(), None, b"tampered", &signature)
                .is_err()
        );
        let (_, eec_parsed) = X509Certificate::from_der(eec.der().as_ref()).unwrap();
        assert!(
            verify_with_key(candidates, eec_parsed.public_key(), None, message, &signature)
                .is_err()
        );
    }

    #[test]
    fn plain_leaf_is_not_treated_as_proxy() {
        let ca = TestCa::new("Test Grid CA");
        assert!(parse_proxy(&ca.issue("Alice Example", false)).is_none());
    }

    #[test]
    fn rejects_when_every_certificate_is_skipped() {
        let ca = TestCa::new("Test Grid CA");
        let proxy = ca.issue("Alice Example proxy", true);

        let err = verify_chain(&[proxy], &ca.roots(), at(IN_WINDOW)).unwrap_err();
        assert!(matches!(err, Error::HandshakeRejected(ref m) if m.contains("critical")));
    }

    #[test]
    fn skipped_certificate_still_needs_valid_window() {
        // GIVEN: a proxy that expired while its end-entity cert is still valid
        let ca = TestCa::new("Test Grid CA");
        let (eec, eec_key) = ca.issue_with_key("Alice Example");
        let mut params = leaf_params("Alice Example proxy", true);
        params.not_after = rcgen::date_time_ymd(2025, 1, 1);
        let proxy = params
            .signed_by(&KeyPair::generate().unwrap(), &eec, &eec_key)
            .unwrap();

        // WHEN
        let err = verify_chain(
            &[proxy.der().clone(), eec.der().clone()],
            &ca.roots(),
            at(IN_WINDOW),
        )
        .unwrap_err();

        // THEN: the validity check applies to every presented certificate
        assert!(matches!(err, Error::HandshakeRejected(ref m) if m.contains("expired")));
    }

    #[test]
    fn chain_verifier_maps_rejection_to_rustls_error() {
        let trusted = TestCa::new("Test Grid CA");
        let rogue = TestCa::new("Rogue CA");
        let leaf = rogue.issue("Mallory", false);
        let verifier = ChainVerifier::new(trusted.roots(), true);

        assert!(verifier.client_auth_mandatory());
        assert!(verifier.verify_client_cert(&leaf, &[], at(IN_WINDOW)).is_err());
    }

    #[test]
    fn chain_verifier_accepts_trusted_leaf() {
        let ca = TestCa::new("Test Grid CA");
        let leaf = ca.issue("Alice Example", false);
        let verifier = ChainVerifier::new(ca.roots(), false);

        assert!(!verifier.client_auth_mandatory());
        assert!(verifier.verify_client_cert(&leaf, &[], at(IN_WINDOW)).is_ok());
    }
}
