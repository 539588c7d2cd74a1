//! ACME certificate issuance as a small HTTP service.
//!
//! A caller starts an order for a domain and gets back the challenge
//! material to publish (a DNS TXT record or a token file). Propagation can
//! be checked from the public internet's point of view, and once the
//! material is live a second call drives the order through validation and
//! finalization and returns the certificate and key as a zip archive.
//! Order state is persisted per domain, so the two calls may be minutes
//! or days apart and served by different process instances.

pub mod acme;
pub mod api;
pub mod bundle;
pub mod challenge;
pub mod error;
pub mod orchestrator;
pub mod probe;
pub mod store;

pub use acme::{LETS_ENCRYPT_PRODUCTION, LETS_ENCRYPT_STAGING};
pub use challenge::{Challenge, ChallengeType};
pub use error::{Error, StoreError};
pub use orchestrator::{IssuedCertificate, Orchestrator, StartedOrder};
pub use probe::{ProbeReport, Prober};
pub use store::{OrderRecord, OrderStore, OrderSummary};
