/// OCSP request decoding and encoding
use super::asn1::{
    CertId, OcspRequest, Request, TbsRequest, Version, ID_PKIX_OCSP_NONCE, ID_SHA1, ID_SHA256,
    ID_SHA384, ID_SHA512,
};
use super::resolver::IssuerIdentity;
use crate::error::{ResponderError, ResponderResult};
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Encode};
use sha2::Digest;
use x509_cert::ext::Extension;
use x509_cert::serial_number::SerialNumber;
use x509_cert::Certificate;

/// Hash algorithms accepted in a CertID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn from_oid(oid: &ObjectIdentifier) -> ResponderResult<Self> {
        [
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ]
        .into_iter()
        .find(|alg| alg.oid() == *oid)
        .ok_or_else(|| ResponderError::UnsupportedHashAlgorithm(oid.to_string()))
    }

    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            HashAlgorithm::Sha1 => ID_SHA1,
            HashAlgorithm::Sha256 => ID_SHA256,
            HashAlgorithm::Sha384 => ID_SHA384,
            HashAlgorithm::Sha512 => ID_SHA512,
        }
    }

    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha1 => sha1::Sha1::digest(data).to_vec(),
            HashAlgorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => sha2::Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }
}

/// Request nonce, kept as the raw `extnValue` bytes so it can be echoed verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce(Vec<u8>);

impl Nonce {
    pub fn from_raw(extn_value: Vec<u8>) -> Self {
        Self(extn_value)
    }

    /// Wrap client nonce bytes in an OCTET STRING (RFC 8954 layout)
    pub fn from_value(value: &[u8]) -> ResponderResult<Self> {
        let wrapped = OctetString::new(value.to_vec())?.to_der()?;
        Ok(Self(wrapped))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn to_extension(&self) -> ResponderResult<Extension> {
        Ok(Extension {
            extn_id: ID_PKIX_OCSP_NONCE,
            critical: false,
            extn_value: OctetString::new(self.0.clone())?,
        })
    }
}

/// One CertID from a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcspQuery {
    pub cert_id: CertId,
    pub hash_algorithm: HashAlgorithm,
}

impl OcspQuery {
    pub fn issuer_name_hash(&self) -> &[u8] {
        self.cert_id.issuer_name_hash.as_bytes()
    }

    pub fn issuer_key_hash(&self) -> &[u8] {
        self.cert_id.issuer_key_hash.as_bytes()
    }

    /// `None` when the serial is negative or does not fit in 64 bits
    pub fn serial_u64(&self) -> Option<u64> {
        serial_to_u64(&self.cert_id.serial_number)
    }
}

/// Decoded request: queries in wire order plus the request-level nonce
#[derive(Debug, Clone)]
pub struct DecodedRequest {
    pub queries: Vec<OcspQuery>,
    pub nonce: Option<Nonce>,
}

/// Decode a DER `OCSPRequest`. A request signature is parsed but not checked.
pub fn decode_request(bytes: &[u8]) -> ResponderResult<DecodedRequest> {
    let request = OcspRequest::from_der(bytes)
        .map_err(|e| ResponderError::MalformedRequest(e.to_string()))?;
    let tbs = request.tbs_request;

    if tbs.request_list.is_empty() {
        return Err(ResponderError::MalformedRequest(
            "request list is empty".to_string(),
        ));
    }

    let mut queries = Vec::with_capacity(tbs.request_list.len());
    for entry in tbs.request_list {
        let cert_id = entry.req_cert;
        let hash_algorithm = HashAlgorithm::from_oid(&cert_id.hash_algorithm.oid)?;

        let expected = hash_algorithm.output_len();
        if cert_id.issuer_name_hash.as_bytes().len() != expected
            || cert_id.issuer_key_hash.as_bytes().len() != expected
        {
            return Err(ResponderError::MalformedRequest(format!(
                "issuer hash length does not match {:?}",
                hash_algorithm
            )));
        }

        queries.push(OcspQuery {
            cert_id,
            hash_algorithm,
        });
    }

    let nonce = tbs.request_extensions.as_ref().and_then(|extensions| {
        extensions
            .iter()
            .find(|ext| ext.extn_id == ID_PKIX_OCSP_NONCE)
            .map(|ext| Nonce::from_raw(ext.extn_value.as_bytes().to_vec()))
    });

    Ok(DecodedRequest { queries, nonce })
}

/// Builds unsigned OCSP requests against one issuer
pub struct OcspRequestBuilder {
    issuer: IssuerIdentity,
    hash_algorithm: HashAlgorithm,
    requests: Vec<Request>,
    nonce: Option<Nonce>,
}

impl OcspRequestBuilder {
    pub fn new(issuer: &Certificate, hash_algorithm: HashAlgorithm) -> ResponderResult<Self> {
        Ok(Self {
            issuer: IssuerIdentity::from_certificate(issuer)?,
            hash_algorithm,
            requests: Vec::new(),
            nonce: None,
        })
    }

    pub fn add_serial(self, serial: u64) -> ResponderResult<Self> {
        let cert_id = self.issuer.cert_id(self.hash_algorithm, serial)?;
        Ok(self.add_cert_id(cert_id))
    }

    pub fn add_cert_id(mut self, cert_id: CertId) -> Self {
        self.requests.push(Request {
            req_cert: cert_id,
            single_request_extensions: None,
        });
        self
    }

    pub fn with_nonce(mut self, nonce: Nonce) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn build(self) -> ResponderResult<OcspRequest> {
        let request_extensions = match self.nonce {
            Some(nonce) => Some(vec![nonce.to_extension()?]),
            None => None,
        };

        Ok(OcspRequest {
            tbs_request: TbsRequest {
                version: Version::V1,
                requestor_name: None,
                request_list: self.requests,
                request_extensions,
            },
            optional_signature: None,
        })
    }

    pub fn to_der(self) -> ResponderResult<Vec<u8>> {
        Ok(self.build()?.to_der()?)
    }
}

/// Interpret a certificate serial number as an unsigned 64-bit value
pub fn serial_to_u64(serial: &SerialNumber) -> Option<u64> {
    let bytes = serial.as_bytes();
    match bytes.first() {
        None => return None,
        Some(b) if b & 0x80 != 0 => return None,
        _ => {}
    }

    let significant: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
    if significant.len() > 8 {
        return None;
    }

    Some(significant.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Minimal positive DER INTEGER encoding of a 64-bit serial
pub fn serial_from_u64(serial: u64) -> ResponderResult<SerialNumber> {
    let mut bytes: Vec<u8> = serial
        .to_be_bytes()
        .iter()
        .copied()
        .skip_while(|b| *b == 0)
        .collect();

    if bytes.first().map_or(true, |b| b & 0x80 != 0) {
        bytes.insert(0, 0);
    }

    Ok(SerialNumber::new(&bytes)?)
}
