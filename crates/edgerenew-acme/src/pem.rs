//! Fetched-bundle handling: fullchain splitting and leaf introspection

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};

use crate::AcmeError;

/// A fetched bundle split into the end-entity certificate and the rest of
/// the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitChain {
    pub leaf_pem: String,
    pub chain_pem: String,
}

/// Split a fetched PEM bundle into leaf and chain.
///
/// Each certificate block is decoded and re-serialized individually, which
/// normalizes away line-ending and whitespace inconsistencies the CA may
/// emit. Bundles with fewer than two certificate blocks are rejected: a
/// bundle without intermediates means the fetch was truncated.
pub fn split_fullchain(fullchain_pem: &str) -> Result<SplitChain, AcmeError> {
    let mut reader = std::io::Cursor::new(fullchain_pem.as_bytes());
    let blocks: Vec<Vec<u8>> = rustls_pemfile::certs(&mut reader)
        .map(|r| r.map(|der| der.as_ref().to_vec()))
        .collect::<Result<_, _>>()
        .map_err(|e| AcmeError::MalformedBundle(format!("unreadable bundle: {e}")))?;

    if blocks.len() < 2 {
        return Err(AcmeError::MalformedBundle(format!(
            "fewer than 2 certificates in chain (got {})",
            blocks.len()
        )));
    }

    let mut normalized = blocks.iter().map(|der| der_to_pem(der));
    let leaf_pem = normalized.next().unwrap_or_default();
    let chain_pem: String = normalized.collect();

    Ok(SplitChain { leaf_pem, chain_pem })
}

/// Serialize one DER certificate as PEM with canonical 64-column wrapping.
fn der_to_pem(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = String::with_capacity(encoded.len() + 64);
    pem.push_str("-----BEGIN CERTIFICATE-----\n");
    for chunk in encoded.as_bytes().chunks(64) {
        // chunks of valid base64 are always utf-8
        pem.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

/// Parse the not-after timestamp out of a leaf certificate.
pub fn leaf_not_after(leaf_pem: &str) -> Result<DateTime<Utc>, AcmeError> {
    use x509_parser::prelude::*;

    let (_, pem) = x509_parser::pem::parse_x509_pem(leaf_pem.as_bytes())
        .map_err(|e| AcmeError::MalformedBundle(format!("failed to parse PEM: {e}")))?;

    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|e| AcmeError::MalformedBundle(format!("failed to parse certificate: {e}")))?;

    let timestamp = cert.validity().not_after.timestamp();

    DateTime::from_timestamp(timestamp, 0).ok_or(AcmeError::MissingNotAfter)
}
