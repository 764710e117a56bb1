/// Responder key material
///
/// Loads the CA certificate, the OCSP signing certificate and its RSA key
/// from PEM files and checks that they belong together.
use crate::error::{ResponderError, ResponderResult};
use crate::ocsp::asn1::{ID_CE_EXT_KEY_USAGE, ID_KP_OCSP_SIGNING};
use crate::ocsp::request::serial_to_u64;
use chrono::{DateTime, Utc};
use der::{Decode, DecodePem, Encode};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::path::Path;
use tracing::info;
use x509_cert::ext::pkix::ExtendedKeyUsage;
use x509_cert::Certificate;

/// CA certificate, signer certificate and signer key. Immutable once loaded.
#[derive(Clone)]
pub struct ResponderIdentity {
    pub ca_cert: Certificate,
    pub signer_cert: Certificate,
    pub signing_key: RsaPrivateKey,
}

impl std::fmt::Debug for ResponderIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderIdentity")
            .field("ca", &self.ca_cert.tbs_certificate.subject.to_string())
            .field("signer", &self.signer_cert.tbs_certificate.subject.to_string())
            .finish_non_exhaustive()
    }
}

impl ResponderIdentity {
    /// Read all three files and validate them
    pub fn load(ca_path: &Path, cert_path: &Path, key_path: &Path) -> ResponderResult<Self> {
        info!("... reading CA certificate");
        let ca_cert = read_certificate(ca_path)?;

        info!("... reading OCSP signing certificate");
        let signer_cert = read_certificate(cert_path)?;

        info!("... reading OCSP private key");
        let signing_key = read_private_key(key_path)?;

        Self::new(ca_cert, signer_cert, signing_key)
    }

    pub fn new(
        ca_cert: Certificate,
        signer_cert: Certificate,
        signing_key: RsaPrivateKey,
    ) -> ResponderResult<Self> {
        let identity = Self {
            ca_cert,
            signer_cert,
            signing_key,
        };
        identity.validate()?;
        Ok(identity)
    }

    fn validate(&self) -> ResponderResult<()> {
        if self.signer_cert.tbs_certificate.issuer.to_der()?
            != self.ca_cert.tbs_certificate.subject.to_der()?
        {
            return Err(ResponderError::Identity(format!(
                "OCSP certificate issuer {} does not match CA subject {}",
                self.signer_cert.tbs_certificate.issuer, self.ca_cert.tbs_certificate.subject
            )));
        }

        let certified_key = RsaPublicKey::from_pkcs1_der(
            self.signer_cert
                .tbs_certificate
                .subject_public_key_info
                .subject_public_key
                .raw_bytes(),
        )
        .map_err(|e| ResponderError::Identity(format!("OCSP certificate key is not RSA: {}", e)))?;

        if certified_key != self.signing_key.to_public_key() {
            return Err(ResponderError::Identity(
                "OCSP private key does not match the OCSP certificate".to_string(),
            ));
        }

        if !has_ocsp_signing_usage(&self.signer_cert)? {
            return Err(ResponderError::Identity(
                "OCSP certificate lacks the OCSPSigning extended key usage".to_string(),
            ));
        }

        Ok(())
    }
}

fn has_ocsp_signing_usage(cert: &Certificate) -> ResponderResult<bool> {
    let extensions = match &cert.tbs_certificate.extensions {
        Some(extensions) => extensions,
        None => return Ok(false),
    };

    for ext in extensions.iter().filter(|ext| ext.extn_id == ID_CE_EXT_KEY_USAGE) {
        let usage = ExtendedKeyUsage::from_der(ext.extn_value.as_bytes())?;
        if usage.0.contains(&ID_KP_OCSP_SIGNING) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Read a PEM certificate
pub fn read_certificate(path: &Path) -> ResponderResult<Certificate> {
    let pem = std::fs::read_to_string(path).map_err(|e| {
        ResponderError::Identity(format!("could not read certificate {}: {}", path.display(), e))
    })?;
    Certificate::from_pem(pem.as_bytes()).map_err(|e| {
        ResponderError::Identity(format!("could not parse certificate {}: {}", path.display(), e))
    })
}

/// Read a PEM RSA key in PKCS#1 (`RSA PRIVATE KEY`) or PKCS#8 (`PRIVATE KEY`) form
pub fn read_private_key(path: &Path) -> ResponderResult<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path).map_err(|e| {
        ResponderError::Identity(format!("could not read private key {}: {}", path.display(), e))
    })?;

    RsaPrivateKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
        .map_err(|e| {
            ResponderError::Identity(format!(
                "could not parse private key {}: {}",
                path.display(),
                e
            ))
        })
}

/// Serial number as a store key
pub fn certificate_serial(cert: &Certificate) -> ResponderResult<u64> {
    serial_to_u64(&cert.tbs_certificate.serial_number).ok_or_else(|| {
        ResponderError::Identity(format!(
            "serial number {} does not fit in 64 bits",
            certificate_serial_hex(cert)
        ))
    })
}

/// Serial number in lowercase hex, without the DER sign byte
pub fn certificate_serial_hex(cert: &Certificate) -> String {
    let bytes = cert.tbs_certificate.serial_number.as_bytes();
    match bytes {
        [0, rest @ ..] if !rest.is_empty() => hex::encode(rest),
        _ => hex::encode(bytes),
    }
}

pub fn certificate_expiry(cert: &Certificate) -> ResponderResult<DateTime<Utc>> {
    let not_after = cert.tbs_certificate.validity.not_after.to_unix_duration();
    i64::try_from(not_after.as_secs())
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| ResponderError::Identity("certificate expiry out of range".to_string()))
}
