//! Certificate material handling for the trust gateway.

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use x509_parser::parse_x509_certificate;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::{GeneralName, ParsedExtension};

use crate::error::{AgentResult, TrustError};
use crate::trust::cache::CertKey;

/// Read a certificate file, accepting PEM or raw DER, and return the DER.
pub fn load_certificate(path: &str) -> AgentResult<Vec<u8>> {
    let data = std::fs::read(path)?;
    if data.starts_with(b"-----BEGIN") {
        let (_, pem) = parse_x509_pem(&data)
            .map_err(|e| TrustError::CertificateParse(format!("{}: {}", path, e)))?;
        return Ok(pem.contents);
    }
    Ok(data)
}

/// RSA modulus and public exponent, big-endian without leading zeros.
/// This is the canonical form both sides are normalized into before the
/// byte comparison, independent of SSH wire or PKCS#1 framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaKeyMaterial {
    pub modulus: Vec<u8>,
    pub exponent: Vec<u8>,
}

/// Extract the RSA public key embedded in a certificate.
pub fn rsa_key_of_certificate(cert_der: &[u8]) -> AgentResult<RsaKeyMaterial> {
    let (_, cert) = parse_x509_certificate(cert_der)
        .map_err(|e| TrustError::CertificateParse(e.to_string()))?;

    let spki_bits = &cert.public_key().subject_public_key.data;
    let key = RsaPublicKey::from_pkcs1_der(spki_bits)
        .map_err(|e| TrustError::CertificateParse(format!("not an RSA key: {}", e)))?;

    Ok(RsaKeyMaterial {
        modulus: key.n().to_bytes_be(),
        exponent: key.e().to_bytes_be(),
    })
}

/// Cache key (serial + content fingerprint) for a certificate.
pub fn cert_cache_key(cert_der: &[u8]) -> AgentResult<CertKey> {
    let (_, cert) = parse_x509_certificate(cert_der)
        .map_err(|e| TrustError::CertificateParse(e.to_string()))?;
    Ok(CertKey::new(cert.raw_serial(), cert_der))
}

/// OCSP responder URL from the certificate's Authority Information Access
/// extension, if present.
pub fn ocsp_responder_url(cert_der: &[u8]) -> AgentResult<Option<String>> {
    let (_, cert) = parse_x509_certificate(cert_der)
        .map_err(|e| TrustError::CertificateParse(e.to_string()))?;

    for ext in cert.extensions() {
        if let ParsedExtension::AuthorityInfoAccess(aia) = ext.parsed_extension() {
            for desc in &aia.accessdescs {
                if desc.access_method == x509_parser::oid_registry::OID_PKIX_ACCESS_DESCRIPTOR_OCSP
                {
                    if let GeneralName::URI(uri) = &desc.access_location {
                        return Ok(Some((*uri).to_string()));
                    }
                }
            }
        }
    }
    Ok(None)
}
