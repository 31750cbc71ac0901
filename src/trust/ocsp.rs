//! OCSP status requests against the issuing CA (RFC 6960).
//!
//! Request encoding and response decoding are done directly over DER: the
//! request is four nested SEQUENCEs around a CertID, and the only field the
//! gateway needs back is the first SingleResponse's certStatus tag. Every
//! non-`good` outcome, including transport failure, maps to "not trusted".

use std::time::Duration;

use asn1_rs::{Any, Class, Enumerated, FromDer, OctetString, Oid, Sequence, Tag};
use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tracing::{debug, warn};
use x509_parser::parse_x509_certificate;

use crate::error::{AgentResult, TrustError};
use crate::trust::certs;

/// Outcome of one live status request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspStatus {
    Good,
    Revoked,
    Unknown,
    RequestFailed,
}

impl OcspStatus {
    /// Fail-closed mapping: only a definitive `good` authorizes.
    pub fn is_trusted(self) -> bool {
        matches!(self, OcspStatus::Good)
    }
}

/// Live revocation lookup, injectable so gateway tests can count calls.
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn fetch(&self, cert_der: &[u8], issuer_der: &[u8]) -> OcspStatus;
}

pub struct OcspClient {
    http: reqwest::Client,
    url_override: Option<String>,
}

impl OcspClient {
    pub fn new(url_override: Option<String>, timeout_secs: u64) -> AgentResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TrustError::OcspRequest(e.to_string()))?;
        Ok(Self { http, url_override })
    }
}

#[async_trait]
impl StatusFetcher for OcspClient {
    async fn fetch(&self, cert_der: &[u8], issuer_der: &[u8]) -> OcspStatus {
        let url = match &self.url_override {
            Some(url) => url.clone(),
            None => match certs::ocsp_responder_url(cert_der) {
                Ok(Some(url)) => url,
                Ok(None) => {
                    warn!("certificate carries no OCSP responder URL");
                    return OcspStatus::RequestFailed;
                }
                Err(e) => {
                    warn!("failed to read responder URL: {}", e);
                    return OcspStatus::RequestFailed;
                }
            },
        };

        let request = match build_request(cert_der, issuer_der) {
            Ok(body) => body,
            Err(e) => {
                warn!("failed to build OCSP request: {}", e);
                return OcspStatus::RequestFailed;
            }
        };

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/ocsp-request")
            .body(request)
            .send()
            .await;

        let body = match response {
            Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("OCSP response read failed: {}", e);
                    return OcspStatus::RequestFailed;
                }
            },
            Ok(resp) => {
                warn!("OCSP responder returned HTTP {}", resp.status());
                return OcspStatus::RequestFailed;
            }
            Err(e) => {
                warn!("OCSP request to {} failed: {}", url, e);
                return OcspStatus::RequestFailed;
            }
        };

        match parse_response(&body) {
            Ok(status) => {
                debug!("OCSP responder verdict: {:?}", status);
                status
            }
            Err(e) => {
                warn!("OCSP response parse failed: {}", e);
                OcspStatus::RequestFailed
            }
        }
    }
}

// DER primitives. Lengths stay well under 64 KiB for OCSP material.

fn der_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len <= 0xff {
        vec![0x81, len as u8]
    } else {
        vec![0x82, (len >> 8) as u8, (len & 0xff) as u8]
    }
}

fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(der_len(content.len()));
    out.extend_from_slice(content);
    out
}

fn der_sequence(children: &[Vec<u8>]) -> Vec<u8> {
    let content: Vec<u8> = children.iter().flatten().copied().collect();
    der_tlv(0x30, &content)
}

/// SHA-1 AlgorithmIdentifier: OID 1.3.14.3.2.26 with a NULL parameter.
fn sha1_algorithm_identifier() -> Vec<u8> {
    der_sequence(&[
        der_tlv(0x06, &[0x2b, 0x0e, 0x03, 0x02, 0x1a]),
        der_tlv(0x05, &[]),
    ])
}

/// OCSPRequest ::= SEQUENCE { tbsRequest TBSRequest }
/// TBSRequest  ::= SEQUENCE { requestList SEQUENCE OF Request }
/// Request     ::= SEQUENCE { reqCert CertID }
/// CertID      ::= SEQUENCE { hashAlgorithm, issuerNameHash, issuerKeyHash, serialNumber }
pub fn build_request(cert_der: &[u8], issuer_der: &[u8]) -> AgentResult<Vec<u8>> {
    let (_, cert) = parse_x509_certificate(cert_der)
        .map_err(|e| TrustError::CertificateParse(e.to_string()))?;
    let (_, issuer) = parse_x509_certificate(issuer_der)
        .map_err(|e| TrustError::CertificateParse(e.to_string()))?;

    let name_hash = Sha1::digest(cert.tbs_certificate.issuer.as_raw());
    let key_hash = Sha1::digest(&issuer.public_key().subject_public_key.data);

    let cert_id = der_sequence(&[
        sha1_algorithm_identifier(),
        der_tlv(0x04, &name_hash),
        der_tlv(0x04, &key_hash),
        der_tlv(0x02, cert.raw_serial()),
    ]);

    let request = der_sequence(&[cert_id]);
    let request_list = der_sequence(&[request]);
    let tbs_request = der_sequence(&[request_list]);
    Ok(der_sequence(&[tbs_request]))
}

/// Walk the response down to the first SingleResponse's certStatus tag.
pub fn parse_response(der: &[u8]) -> Result<OcspStatus, TrustError> {
    let malformed = |what: &str| TrustError::OcspResponse(what.to_string());

    let (_, outer) = Sequence::from_der(der).map_err(|_| malformed("outer sequence"))?;
    let (rem, status) =
        Enumerated::from_der(&outer.content).map_err(|_| malformed("responseStatus"))?;
    if status.0 != 0 {
        // Responder-level error (malformedRequest, tryLater, ...): no verdict.
        return Ok(OcspStatus::RequestFailed);
    }

    let (_, response_bytes) = Any::from_der(rem).map_err(|_| malformed("responseBytes"))?;
    if response_bytes.class() != Class::ContextSpecific || response_bytes.tag() != Tag(0) {
        return Err(malformed("responseBytes tag"));
    }

    let (_, rb) =
        Sequence::from_der(response_bytes.data).map_err(|_| malformed("responseBytes body"))?;
    let (after_oid, _response_type) =
        Oid::from_der(&rb.content).map_err(|_| malformed("responseType"))?;
    let (_, basic_octets) =
        OctetString::from_der(after_oid).map_err(|_| malformed("response octets"))?;

    let (_, basic) =
        Sequence::from_der(basic_octets.as_ref()).map_err(|_| malformed("basic response"))?;
    let (_, tbs) = Sequence::from_der(&basic.content).map_err(|_| malformed("tbsResponseData"))?;

    // tbsResponseData: optional [0] version, responderID choice, producedAt,
    // then `responses` — the first plain SEQUENCE element.
    let mut cursor: &[u8] = &tbs.content;
    loop {
        if cursor.is_empty() {
            return Err(malformed("no responses list"));
        }
        let (rest, element) = Any::from_der(cursor).map_err(|_| malformed("tbs element"))?;
        if element.class() == Class::Universal && element.tag() == Tag::Sequence {
            let (_, single) =
                Sequence::from_der(element.data).map_err(|_| malformed("SingleResponse"))?;
            let (after_cert_id, _cert_id) =
                Any::from_der(&single.content).map_err(|_| malformed("CertID"))?;
            let (_, cert_status) =
                Any::from_der(after_cert_id).map_err(|_| malformed("certStatus"))?;
            if cert_status.class() != Class::ContextSpecific {
                return Err(malformed("certStatus class"));
            }
            return Ok(match cert_status.tag() {
                Tag(0) => OcspStatus::Good,
                Tag(1) => OcspStatus::Revoked,
                _ => OcspStatus::Unknown,
            });
        }
        cursor = rest;
    }
}
