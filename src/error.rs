//! Error types for certificate issuance.

use std::io;

use poem::{error::ResponseError, http::StatusCode};
use thiserror::Error;

/// Errors that can occur while driving an order through the ACME protocol.
#[derive(Debug, Error)]
pub enum Error {
    /// The domain name is not something a certificate can be requested for.
    #[error("invalid domain name `{0}`")]
    InvalidDomain(String),

    /// The requested challenge type is not one of `dns-01`/`http-01`.
    #[error("unsupported challenge type `{0}`")]
    UnsupportedChallengeType(String),

    /// The CA does not offer the requested challenge type for this identifier.
    #[error("the CA does not offer `{challenge_type}` validation for `{domain}`")]
    ValidationUnsupported {
        domain: String,
        challenge_type: String,
    },

    /// Verify/cancel was called for a domain with no live order record.
    #[error("no pending order for `{0}`")]
    OrderNotFound(String),

    /// The CA still reports the challenge as pending after the polling
    /// budget. Re-check propagation and retry verification.
    #[error(
        "challenge for `{domain}` is still `{last_status}` - check that the record has propagated \
         and retry verification"
    )]
    ChallengeNotYetSatisfied { domain: String, last_status: String },

    /// The CA declared the challenge permanently invalid. The key
    /// authorization is now stale; a fresh order must be started.
    #[error("the CA rejected the challenge for `{domain}`: {detail} (start a new order)")]
    CaRejected { domain: String, detail: String },

    /// The order was authorized but the CSR/finalize/download step failed.
    /// The stored order survives, so verification can be retried without
    /// repeating the challenge.
    #[error("failed to finalize the order for `{domain}`: {detail}")]
    FinalizationFailed { domain: String, detail: String },

    /// Network-level failure talking to the CA, a resolver, or the probed
    /// host. Always safe to retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// The CA answered with an unexpected status code. The problem detail
    /// text is preserved verbatim for diagnosis.
    #[error("unexpected CA response: status = {status}, detail = {detail}")]
    Protocol { status: u16, detail: String },

    /// The CA does not recognize the account url a request was signed
    /// with. Re-registering with the same key restores the identity.
    #[error("the CA does not recognize the stored account: {detail}")]
    UnknownAccount { detail: String },

    /// The CA answered with a body this client could not make sense of.
    #[error("bad CA response: {0}")]
    BadResponse(String),

    /// Key generation, loading, or signing failed.
    #[error("key error: {0}")]
    Key(String),

    /// The order state store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Building the certificate archive failed.
    #[error("failed to build certificate archive: {0}")]
    Archive(String),
}

impl ResponseError for Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::InvalidDomain(_) | Error::UnsupportedChallengeType(_) => StatusCode::BAD_REQUEST,
            Error::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Error::ChallengeNotYetSatisfied { .. } => StatusCode::CONFLICT,
            Error::ValidationUnsupported { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::CaRejected { .. }
            | Error::FinalizationFailed { .. }
            | Error::Transport(_)
            | Error::Protocol { .. }
            | Error::UnknownAccount { .. }
            | Error::BadResponse(_) => StatusCode::BAD_GATEWAY,
            Error::Key(_) | Error::Store(_) | Error::Archive(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Errors from the order state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode order record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("domain `{0}` cannot be used as a store key")]
    InvalidKey(String),
}
