//! Thin ACME client: directory discovery, JWS signing, and the
//! account/order/authorization/finalize/download primitives the
//! orchestrator sequences.
//!
//! Reference: <https://datatracker.ietf.org/doc/html/rfc8555>

mod client;
mod jose;
mod keypair;
mod protocol;

pub(crate) use client::AcmeClient;
pub(crate) use jose::key_authorization;
pub(crate) use keypair::KeyPair;
pub(crate) use protocol::Order;

/// Let's Encrypt production directory url
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// Let's Encrypt staging directory url
pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
