/// OCSP protocol core
///
/// Request bytes flow through `request::decode_request`, the
/// `resolver::StatusResolver` and the `response::ResponseSigner`. Any failure
/// along the way becomes an unsigned error response.

pub mod asn1;
pub mod request;
pub mod resolver;
pub mod response;

use crate::error::{ResponderError, ResponderResult};
use crate::metrics;
use asn1::OcspResponseStatus;
use chrono::Utc;
use resolver::StatusResolver;
use response::{error_response, ResponseSigner};
use std::time::Instant;
use tracing::{debug, error, warn};

/// Decodes, resolves and signs OCSP requests
pub struct OcspResponder {
    resolver: StatusResolver,
    signer: ResponseSigner,
}

impl OcspResponder {
    pub fn new(resolver: StatusResolver, signer: ResponseSigner) -> Self {
        Self { resolver, signer }
    }

    /// Answer one request. Always returns a DER `OCSPResponse`.
    pub async fn respond(&self, body: &[u8], method: &str) -> Vec<u8> {
        let started = Instant::now();
        let _active = metrics::track_active_request();

        let (bytes, status) = match self.try_respond(body).await {
            Ok(bytes) => (bytes, OcspResponseStatus::Successful),
            Err(e) => {
                let status = e.ocsp_status();
                match &e {
                    ResponderError::MalformedRequest(_)
                    | ResponderError::UnsupportedHashAlgorithm(_) => {
                        debug!(error = %e, "Rejected OCSP request")
                    }
                    ResponderError::StoreUnavailable(_) => {
                        warn!(error = %e, "Revocation store unavailable")
                    }
                    _ => error!(error = %e, "Failed to answer OCSP request"),
                }
                (error_response(status), status)
            }
        };

        metrics::record_ocsp_response(status.as_str(), method, started.elapsed().as_secs_f64());
        bytes
    }

    /// Answer one request, surfacing the failure instead of encoding it
    pub async fn try_respond(&self, body: &[u8]) -> ResponderResult<Vec<u8>> {
        let decoded = request::decode_request(body)?;
        let statuses = self.resolver.resolve(&decoded.queries).await?;

        for status in &statuses {
            metrics::record_cert_status(status.as_str());
        }

        let entries = decoded
            .queries
            .into_iter()
            .map(|query| query.cert_id)
            .zip(statuses)
            .collect();

        self.signer
            .sign_response(entries, decoded.nonce.as_ref(), Utc::now())
    }
}
