//! S/MIME signing of outgoing messages with the host certificate.
//!
//! Messages are signed as detached PKCS#7 in text mode. OpenSSL picks the key's
//! default digest, which is SHA-256 for RSA and EC keys.

use apel_publisher_core::contract::MessageSigner;
use apel_publisher_core::error::CollaboratorError;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::X509;
use std::fs;
use std::path::Path;

pub struct SmimeSigner {
    cert: X509,
    key: PKey<Private>,
}

impl SmimeSigner {
    pub fn new(cert: X509, key: PKey<Private>) -> Self {
        Self { cert, key }
    }

    /// Loads a PEM certificate and an unencrypted PEM private key.
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self, CollaboratorError> {
        let cert_pem = fs::read(cert_path)
            .map_err(|e| format!("cannot read client certificate {}: {e}", cert_path.display()))?;
        let key_pem = fs::read(key_path)
            .map_err(|e| format!("cannot read client key {}: {e}", key_path.display()))?;
        let cert = X509::from_pem(&cert_pem)?;
        let key = PKey::private_key_from_pem(&key_pem)?;
        tracing::info!(cert = %cert_path.display(), "Loaded signing certificate");
        Ok(Self::new(cert, key))
    }
}

impl MessageSigner for SmimeSigner {
    fn sign(&self, message: &str) -> Result<Vec<u8>, CollaboratorError> {
        let flags = Pkcs7Flags::DETACHED | Pkcs7Flags::TEXT;
        let extra_certs = Stack::new()?;
        let pkcs7 = Pkcs7::sign(&self.cert, &self.key, &extra_certs, message.as_bytes(), flags)?;
        Ok(pkcs7.to_smime(message.as_bytes(), flags)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::hash::MessageDigest;
    use openssl::rsa::Rsa;
    use openssl::x509::{X509Builder, X509NameBuilder};

    fn self_signed() -> (X509, PKey<Private>) {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "ce.example.org").unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(1).unwrap())
            .unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        (builder.build(), key)
    }

    #[test]
    fn produces_detached_smime_carrying_the_message() {
        let (cert, key) = self_signed();
        let signer = SmimeSigner::new(cert, key);
        let message = "APEL-sync-message: v0.1\nSite: site-A\n%%\n";

        let signed = signer.sign(message).unwrap();
        let text = String::from_utf8(signed.clone()).unwrap();
        assert!(text.contains("multipart/signed"), "got:\n{text}");
        assert!(text.contains("sha-256") || text.contains("sha256"), "got:\n{text}");

        let (_, content) = Pkcs7::from_smime(&signed).unwrap();
        let content = String::from_utf8(content.expect("detached content")).unwrap();
        assert!(content.contains("Site: site-A"));
    }

    #[test]
    fn missing_certificate_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = SmimeSigner::from_files(&dir.path().join("cert.pem"), &dir.path().join("key.pem"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("client certificate"));
    }
}
