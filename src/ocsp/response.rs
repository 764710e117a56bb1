/// BasicOCSPResponse assembly and signing
use super::asn1::{
    BasicOcspResponse, CertId, CertStatus, OcspResponse, OcspResponseStatus, ResponderId,
    ResponseBytes, ResponseData, RevokedInfo, SingleResponse, Version, ID_PKIX_OCSP_BASIC,
    ID_PKIX_OCSP_NONCE, SHA256_WITH_RSA_ENCRYPTION,
};
use super::request::Nonce;
use crate::error::{ResponderError, ResponderResult};
use crate::store::CertificateStatus;
use chrono::{DateTime, Duration, Utc};
use der::asn1::{Any, BitString, GeneralizedTime, Null, OctetString};
use der::{Decode, Encode};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use spki::AlgorithmIdentifierOwned;
use x509_cert::Certificate;

/// Signs responses with the responder key and attaches the signer certificate
pub struct ResponseSigner {
    signing_key: SigningKey<Sha256>,
    signer_cert: Certificate,
    responder_key_hash: Vec<u8>,
    next_update: Option<Duration>,
}

impl ResponseSigner {
    pub fn new(
        private_key: RsaPrivateKey,
        signer_cert: Certificate,
        next_update: Option<Duration>,
    ) -> Self {
        let responder_key_hash = responder_key_hash(&signer_cert);
        Self {
            signing_key: SigningKey::<Sha256>::new(private_key),
            signer_cert,
            responder_key_hash,
            next_update,
        }
    }

    pub fn signer_certificate(&self) -> &Certificate {
        &self.signer_cert
    }

    /// Build and sign a successful `OCSPResponse` with one entry per CertID
    pub fn sign_response(
        &self,
        entries: Vec<(CertId, CertificateStatus)>,
        nonce: Option<&Nonce>,
        now: DateTime<Utc>,
    ) -> ResponderResult<Vec<u8>> {
        let produced_at = generalized_time(now)?;
        let next_update = match self.next_update {
            Some(window) => Some(generalized_time(now + window)?),
            None => None,
        };

        let responses = entries
            .into_iter()
            .map(|(cert_id, status)| -> ResponderResult<SingleResponse> {
                Ok(SingleResponse {
                    cert_id,
                    cert_status: cert_status(&status)?,
                    this_update: produced_at,
                    next_update,
                    single_extensions: None,
                })
            })
            .collect::<ResponderResult<Vec<_>>>()?;

        let response_extensions = match nonce {
            Some(nonce) => Some(vec![nonce.to_extension()?]),
            None => None,
        };

        let tbs_response_data = ResponseData {
            version: Version::V1,
            responder_id: ResponderId::ByKey(OctetString::new(self.responder_key_hash.clone())?),
            produced_at,
            responses,
            response_extensions,
        };

        let tbs = tbs_response_data.to_der()?;
        let signature = self
            .signing_key
            .try_sign(&tbs)
            .map_err(|e| ResponderError::SigningFailure(e.to_string()))?;

        let basic = BasicOcspResponse {
            tbs_response_data,
            signature_algorithm: AlgorithmIdentifierOwned {
                oid: SHA256_WITH_RSA_ENCRYPTION,
                parameters: Some(Any::null()),
            },
            signature: BitString::from_bytes(&signature.to_vec())?,
            certs: Some(vec![self.signer_cert.clone()]),
        };

        let response = OcspResponse {
            response_status: OcspResponseStatus::Successful,
            response_bytes: Some(ResponseBytes {
                response_type: ID_PKIX_OCSP_BASIC,
                response: OctetString::new(basic.to_der()?)?,
            }),
        };

        Ok(response.to_der()?)
    }
}

/// Unsigned `OCSPResponse` carrying only an error status
pub fn error_response(status: OcspResponseStatus) -> Vec<u8> {
    OcspResponse {
        response_status: status,
        response_bytes: None,
    }
    .to_der()
    .unwrap_or_else(|_| vec![0x30, 0x03, 0x0a, 0x01, status as u8])
}

/// SHA-1 of the signer's subjectPublicKey bits (`KeyHash`)
pub fn responder_key_hash(signer_cert: &Certificate) -> Vec<u8> {
    Sha1::digest(
        signer_cert
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes(),
    )
    .to_vec()
}

fn cert_status(status: &CertificateStatus) -> ResponderResult<CertStatus> {
    Ok(match status {
        CertificateStatus::Good => CertStatus::Good(Null),
        CertificateStatus::Revoked { reason, revoked_at } => CertStatus::Revoked(RevokedInfo {
            revocation_time: generalized_time(*revoked_at)?,
            revocation_reason: Some(*reason),
        }),
        CertificateStatus::Unknown => CertStatus::Unknown(Null),
    })
}

fn generalized_time(at: DateTime<Utc>) -> ResponderResult<GeneralizedTime> {
    let secs = u64::try_from(at.timestamp())
        .map_err(|_| ResponderError::Internal(format!("Timestamp before epoch: {}", at)))?;
    Ok(GeneralizedTime::from_unix_duration(
        std::time::Duration::from_secs(secs),
    )?)
}

fn chrono_time(time: &GeneralizedTime) -> ResponderResult<DateTime<Utc>> {
    let secs = time.to_unix_duration().as_secs();
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| ResponderError::Internal(format!("Timestamp out of range: {}", secs)))
}

/// Client-side view of an encoded `OCSPResponse`
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub status: OcspResponseStatus,
    pub basic: Option<BasicOcspResponse>,
}

impl ParsedResponse {
    pub fn from_der(bytes: &[u8]) -> ResponderResult<Self> {
        let response = OcspResponse::from_der(bytes)?;
        let basic = match response.response_bytes {
            Some(bytes) if bytes.response_type == ID_PKIX_OCSP_BASIC => {
                Some(BasicOcspResponse::from_der(bytes.response.as_bytes())?)
            }
            Some(bytes) => {
                return Err(ResponderError::Internal(format!(
                    "Unexpected response type {}",
                    bytes.response_type
                )))
            }
            None => None,
        };

        Ok(Self {
            status: response.response_status,
            basic,
        })
    }

    fn basic(&self) -> ResponderResult<&BasicOcspResponse> {
        self.basic
            .as_ref()
            .ok_or_else(|| ResponderError::Internal(format!("No response body ({})", self.status.as_str())))
    }

    /// CertID and status of every SingleResponse, in order
    pub fn statuses(&self) -> ResponderResult<Vec<(CertId, CertificateStatus)>> {
        self.basic()?
            .tbs_response_data
            .responses
            .iter()
            .map(|single| -> ResponderResult<(CertId, CertificateStatus)> {
                let status = match &single.cert_status {
                    CertStatus::Good(_) => CertificateStatus::Good,
                    CertStatus::Revoked(info) => CertificateStatus::Revoked {
                        reason: info
                            .revocation_reason
                            .unwrap_or(crate::store::RevocationReason::Unspecified),
                        revoked_at: chrono_time(&info.revocation_time)?,
                    },
                    CertStatus::Unknown(_) => CertificateStatus::Unknown,
                };
                Ok((single.cert_id.clone(), status))
            })
            .collect()
    }

    pub fn produced_at(&self) -> ResponderResult<DateTime<Utc>> {
        chrono_time(&self.basic()?.tbs_response_data.produced_at)
    }

    pub fn nonce(&self) -> ResponderResult<Option<Nonce>> {
        Ok(self
            .basic()?
            .tbs_response_data
            .response_extensions
            .as_ref()
            .and_then(|extensions| {
                extensions
                    .iter()
                    .find(|ext| ext.extn_id == ID_PKIX_OCSP_NONCE)
                    .map(|ext| Nonce::from_raw(ext.extn_value.as_bytes().to_vec()))
            }))
    }

    /// Check the response signature against `signer`'s RSA public key
    pub fn verify_signature(&self, signer: &Certificate) -> ResponderResult<()> {
        let basic = self.basic()?;
        if basic.signature_algorithm.oid != SHA256_WITH_RSA_ENCRYPTION {
            return Err(ResponderError::SigningFailure(format!(
                "Unexpected signature algorithm {}",
                basic.signature_algorithm.oid
            )));
        }

        let public_key = RsaPublicKey::from_pkcs1_der(
            signer
                .tbs_certificate
                .subject_public_key_info
                .subject_public_key
                .raw_bytes(),
        )
        .map_err(|e| ResponderError::Identity(format!("Signer key is not RSA: {}", e)))?;

        let signature = Signature::try_from(basic.signature.raw_bytes())
            .map_err(|e| ResponderError::SigningFailure(e.to_string()))?;

        VerifyingKey::<Sha256>::new(public_key)
            .verify(&basic.tbs_response_data.to_der()?, &signature)
            .map_err(|e| ResponderError::SigningFailure(format!("Bad response signature: {}", e)))
    }
}
