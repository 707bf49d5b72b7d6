//! Key and CSR generation for certificate orders

use rcgen::{CertificateParams, KeyPair};

use crate::AcmeError;

/// A generated private key and the CSR signed with it, both PEM.
#[derive(Debug, Clone)]
pub struct KeyAndCsr {
    pub private_key_pem: String,
    pub csr_pem: String,
}

/// Generate a fresh key pair and a CSR covering the full domain list.
pub fn generate_key_and_csr(domains: &[String]) -> Result<KeyAndCsr, AcmeError> {
    if domains.is_empty() {
        return Err(AcmeError::Csr("no domains to cover".to_string()));
    }

    let key_pair = KeyPair::generate().map_err(|e| AcmeError::Csr(e.to_string()))?;

    let params = CertificateParams::new(domains.to_vec())
        .map_err(|e| AcmeError::Csr(format!("invalid subject alt names: {e}")))?;

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| AcmeError::Csr(format!("failed to serialize request: {e}")))?;

    let csr_pem = csr
        .pem()
        .map_err(|e| AcmeError::Csr(format!("failed to encode request: {e}")))?;

    Ok(KeyAndCsr {
        private_key_pem: key_pair.serialize_pem(),
        csr_pem,
    })
}

/// Recover the DER bytes of a persisted CSR.
pub fn csr_der_from_pem(csr_pem: &str) -> Result<Vec<u8>, AcmeError> {
    let mut reader = std::io::Cursor::new(csr_pem.as_bytes());
    for item in rustls_pemfile::read_all(&mut reader) {
        match item {
            Ok(rustls_pemfile::Item::Csr(der)) => return Ok(der.as_ref().to_vec()),
            Ok(_) => continue,
            Err(e) => return Err(AcmeError::Csr(format!("unreadable CSR pem: {e}"))),
        }
    }
    Err(AcmeError::Csr("no certificate request block found".to_string()))
}
