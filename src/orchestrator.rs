//! The order orchestration state machine.
//!
//! One certificate order per domain, driven from "challenge offered" to
//! "certificate delivered" across two independent entry points: `start`
//! derives and persists everything needed to resume, `verify` reloads that
//! state minutes or hours later (possibly in a different process) and
//! finishes the CA-side dialogue. The order store is the only thing
//! joining the two; no protocol state lives in memory between calls.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use rcgen::{Certificate, CertificateParams, DistinguishedName, PKCS_ECDSA_P256_SHA256};
use tokio::time::{sleep, Instant};

use crate::{
    acme::{key_authorization, AcmeClient, KeyPair, Order},
    bundle,
    challenge::{Challenge, ChallengeType},
    error::Error,
    store::{OrderRecord, OrderStore, OrderSummary},
};

/// Attempts made while waiting for the CA to validate a challenge, with
/// growing sleeps in between. Exhausting the budget is recoverable; the
/// caller re-checks propagation and retries verification.
const CHALLENGE_POLL_ATTEMPTS: u64 = 6;

/// Budget for order status transitions during finalization.
const ORDER_WAIT: Duration = Duration::from_secs(60);
const ORDER_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Challenge material returned to the caller for publication.
#[derive(Debug, Clone)]
pub struct StartedOrder {
    pub challenge_type: ChallengeType,
    /// DNS record name or http token file name.
    pub key: String,
    /// DNS record value or http token file content.
    pub value: String,
}

/// A finished order: the archive to hand to the caller.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub file_name: String,
    pub archive: Vec<u8>,
}

pub struct Orchestrator {
    directory_url: String,
    store: Arc<OrderStore>,
}

impl Orchestrator {
    pub fn new(directory_url: impl Into<String>, store: Arc<OrderStore>) -> Self {
        Self {
            directory_url: directory_url.into(),
            store,
        }
    }

    /// Begin a fresh order for `domain`. Any prior order for the domain is
    /// superseded. Nothing is persisted unless every CA-side step
    /// succeeds, so a failed start never leaves a partial record.
    pub async fn start(
        &self,
        domain: &str,
        challenge_type: ChallengeType,
        contact_email: Option<&str>,
    ) -> Result<StartedOrder, Error> {
        validate_domain(domain)?;
        if domain.starts_with("*.") && challenge_type == ChallengeType::Http01 {
            // Wildcard identifiers can only be validated over DNS.
            return Err(Error::ValidationUnsupported {
                domain: domain.to_string(),
                challenge_type: challenge_type.to_string(),
            });
        }

        let contact = match contact_email {
            Some(email) => email.to_string(),
            None => format!("admin@{}", domain.trim_start_matches("*.")),
        };

        tracing::info!(
            domain = %domain,
            challenge_type = %challenge_type,
            "starting certificate order"
        );

        let account_key = KeyPair::generate()?;
        let mut client = AcmeClient::connect(
            &self.directory_url,
            vec![format!("mailto:{contact}")],
            account_key,
            None,
        )
        .await?;
        client.ensure_account().await?;

        let (order, order_url) = client.new_order(domain).await?;
        let auth_url = order
            .authorizations
            .first()
            .ok_or_else(|| Error::BadResponse("order has no authorizations".to_string()))?;
        let authz = client.authorization(auth_url).await?;

        let offered =
            authz
                .find_challenge(challenge_type)
                .ok_or_else(|| Error::ValidationUnsupported {
                    domain: domain.to_string(),
                    challenge_type: challenge_type.to_string(),
                })?;

        let key_auth = key_authorization(client.key_pair(), &offered.token)?;
        let challenge =
            Challenge::derive(challenge_type, domain, &offered.url, &offered.token, &key_auth);

        // The key the certificate will be issued for; persisted now, turned
        // into a CSR only at verify time.
        let domain_key = rcgen::KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
            .map_err(|err| Error::Key(format!("failed to generate domain key: {err}")))?;

        let now = Utc::now();
        let record = OrderRecord {
            domain: domain.to_string(),
            account_key: client.key_pair().pkcs8().to_vec(),
            account_url: client.account_url().map(ToString::to_string),
            order_url,
            finalize_url: order.finalize.clone(),
            domain_key_pem: domain_key.serialize_pem(),
            contact,
            challenge: challenge.clone(),
            created_at: now,
            updated_at: now,
        };
        self.store.put(&record).await?;

        tracing::info!(
            domain = %domain,
            key = challenge.name(),
            "order persisted, waiting for challenge publication"
        );

        Ok(StartedOrder {
            challenge_type,
            key: challenge.name().to_string(),
            value: challenge.value().to_string(),
        })
    }

    /// Resume the persisted order and drive it to a downloaded
    /// certificate. The record is deleted only after the archive is built;
    /// every recoverable failure leaves it in place so the identical call
    /// can be retried.
    pub async fn verify(&self, domain: &str) -> Result<IssuedCertificate, Error> {
        let record = self
            .store
            .get(domain)
            .await?
            .ok_or_else(|| Error::OrderNotFound(domain.to_string()))?;

        let key_pair = KeyPair::from_pkcs8(record.account_key.clone())?;
        if record.account_url.is_none() {
            // Registration with the same contact normally returns the same
            // identity, but flag it: subsequent operations may run under a
            // different account.
            tracing::warn!(
                domain = %domain,
                "no account url in stored state, re-registering to resume"
            );
        }
        let mut client = AcmeClient::connect(
            &self.directory_url,
            vec![format!("mailto:{}", record.contact)],
            key_pair,
            record.account_url.clone(),
        )
        .await?;
        client.ensure_account().await?;

        let order = match client.order(&record.order_url).await {
            Ok(order) => order,
            Err(Error::UnknownAccount { detail }) => {
                // The stored account url may be stale or malformed. The
                // account key is authoritative: registering again with it
                // recovers the identity. Flagged because subsequent calls
                // may run under a different account url than was stored.
                tracing::warn!(
                    domain = %domain,
                    detail = detail.as_str(),
                    "stored account url rejected by the CA, re-registering"
                );
                client.forget_account();
                client.ensure_account().await?;
                client.order(&record.order_url).await?
            }
            Err(err) => return Err(err),
        };
        tracing::debug!(domain = %domain, status = order.status.as_str(), "order resumed");
        if order.status == "invalid" {
            return Err(Error::CaRejected {
                domain: domain.to_string(),
                detail: order.error_detail(),
            });
        }

        if order.status != "valid" {
            self.complete_challenge(&client, &record).await?;
        }
        let certificate_url = self.finalize_order(&client, &record, order).await?;

        let certificate_pem = client.certificate(&certificate_url).await?;
        if let Some(not_after) = certificate_not_after(&certificate_pem) {
            tracing::info!(domain = %domain, expires = %not_after, "certificate issued");
        }

        let archive = bundle::package(domain, &certificate_pem, &record.domain_key_pem)?;
        self.store.delete(domain).await?;

        Ok(IssuedCertificate {
            file_name: bundle::archive_file_name(domain),
            archive,
        })
    }

    /// Drop the stored order, whatever state it is in. A no-op when
    /// nothing is stored.
    pub async fn cancel(&self, domain: &str) -> Result<(), Error> {
        self.store.delete(domain).await?;
        Ok(())
    }

    /// Public-safe summaries of every live order, keyed by domain.
    pub async fn pending_orders(
        &self,
    ) -> Result<std::collections::BTreeMap<String, OrderSummary>, Error> {
        let records = self.store.list().await?;
        Ok(records
            .into_iter()
            .map(|record| (record.domain.clone(), record.summary()))
            .collect())
    }

    /// Signal readiness and poll until the CA reports the challenge valid.
    async fn complete_challenge(
        &self,
        client: &AcmeClient,
        record: &OrderRecord,
    ) -> Result<(), Error> {
        let domain = &record.domain;
        let url = record.challenge.url();

        let current = client.challenge(url).await?;
        match current.status.as_deref() {
            Some("valid") => return Ok(()),
            Some("invalid") => {
                return Err(Error::CaRejected {
                    domain: domain.clone(),
                    detail: current.error_detail(),
                })
            }
            _ => {}
        }

        client.trigger_challenge(url).await?;
        tracing::debug!(domain = %domain, "challenge triggered, waiting for validation");

        let mut last_status = "pending".to_string();
        for attempt in 1..=CHALLENGE_POLL_ATTEMPTS {
            sleep(Duration::from_secs(attempt * 2)).await;

            let status = client.challenge(url).await?;
            last_status = status
                .status
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            match last_status.as_str() {
                "valid" => {
                    tracing::info!(domain = %domain, "challenge validated");
                    return Ok(());
                }
                "invalid" => {
                    return Err(Error::CaRejected {
                        domain: domain.clone(),
                        detail: status.error_detail(),
                    })
                }
                _ => {
                    tracing::debug!(
                        domain = %domain,
                        attempt = attempt,
                        status = last_status.as_str(),
                        "challenge not validated yet"
                    );
                }
            }
        }

        Err(Error::ChallengeNotYetSatisfied {
            domain: domain.clone(),
            last_status,
        })
    }

    /// Wait for the order to become ready, submit the CSR bound to the
    /// persisted domain key, and poll until the certificate url appears.
    async fn finalize_order(
        &self,
        client: &AcmeClient,
        record: &OrderRecord,
        mut order: Order,
    ) -> Result<String, Error> {
        let domain = &record.domain;

        let deadline = Instant::now() + ORDER_WAIT;
        loop {
            match order.status.as_str() {
                // Already finalized on a previous attempt.
                "valid" => {
                    if let Some(url) = &order.certificate {
                        return Ok(url.clone());
                    }
                }
                "ready" => break,
                "invalid" => {
                    return Err(Error::FinalizationFailed {
                        domain: domain.clone(),
                        detail: order.error_detail(),
                    })
                }
                _ => {}
            }
            if Instant::now() > deadline {
                return Err(Error::FinalizationFailed {
                    domain: domain.clone(),
                    detail: format!("order stuck in `{}`", order.status),
                });
            }
            sleep(ORDER_POLL_INTERVAL).await;
            order = client.order(&record.order_url).await?;
        }

        let csr = csr_for(record)?;
        let mut order = client
            .finalize(&record.finalize_url, &csr)
            .await
            .map_err(|err| Error::FinalizationFailed {
                domain: domain.clone(),
                detail: err.to_string(),
            })?;

        let deadline = Instant::now() + ORDER_WAIT;
        loop {
            match order.status.as_str() {
                "valid" => {
                    if let Some(url) = &order.certificate {
                        return Ok(url.clone());
                    }
                }
                "invalid" => {
                    return Err(Error::FinalizationFailed {
                        domain: domain.clone(),
                        detail: order.error_detail(),
                    })
                }
                _ => {}
            }
            if Instant::now() > deadline {
                return Err(Error::FinalizationFailed {
                    domain: domain.clone(),
                    detail: "timed out waiting for the certificate".to_string(),
                });
            }
            sleep(ORDER_POLL_INTERVAL).await;
            order = client.order(&record.order_url).await?;
        }
    }
}

/// CSR bound to the key persisted at start time; never a fresh one.
fn csr_for(record: &OrderRecord) -> Result<Vec<u8>, Error> {
    let key = rcgen::KeyPair::from_pem(&record.domain_key_pem)
        .map_err(|err| Error::Key(format!("failed to load domain key: {err}")))?;
    let mut params = CertificateParams::new(vec![record.domain.clone()]);
    params.distinguished_name = DistinguishedName::new();
    params.alg = &PKCS_ECDSA_P256_SHA256;
    params.key_pair = Some(key);
    let cert = Certificate::from_params(params)
        .map_err(|err| Error::Key(format!("failed to build certificate request: {err}")))?;
    cert.serialize_request_der()
        .map_err(|err| Error::Key(format!("failed to serialize certificate request: {err}")))
}

fn certificate_not_after(certificate_pem: &str) -> Option<String> {
    use x509_parser::{pem::parse_x509_pem, prelude::*};

    let (_, pem) = parse_x509_pem(certificate_pem.as_bytes()).ok()?;
    let (_, cert) = X509Certificate::from_der(&pem.contents).ok()?;
    Some(cert.validity().not_after.to_string())
}

fn validate_domain(domain: &str) -> Result<(), Error> {
    let host = domain.strip_prefix("*.").unwrap_or(domain);
    let valid = !host.is_empty()
        && host.len() <= 253
        && host.contains('.')
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        });
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidDomain(domain.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OrderStore;

    // Nothing listens here; tests below must fail before any CA call.
    const UNREACHABLE_DIRECTORY: &str = "http://127.0.0.1:1/directory";

    async fn orchestrator() -> (tempfile::TempDir, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(OrderStore::open(dir.path()).await.unwrap());
        (dir, Orchestrator::new(UNREACHABLE_DIRECTORY, store))
    }

    #[tokio::test]
    async fn verify_without_record_reports_order_not_found() {
        let (_dir, orchestrator) = orchestrator().await;
        let err = orchestrator.verify("example.com").await.unwrap_err();
        assert!(matches!(err, Error::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn cancel_without_record_succeeds() {
        let (_dir, orchestrator) = orchestrator().await;
        orchestrator.cancel("example.com").await.unwrap();
    }

    #[tokio::test]
    async fn start_rejects_invalid_domain_before_contacting_ca() {
        let (_dir, orchestrator) = orchestrator().await;
        let err = orchestrator
            .start("not a domain", ChallengeType::Dns01, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDomain(_)));
    }

    #[tokio::test]
    async fn start_rejects_http01_for_wildcards() {
        let (_dir, orchestrator) = orchestrator().await;
        let err = orchestrator
            .start("*.example.com", ChallengeType::Http01, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ValidationUnsupported { .. }));
    }

    #[tokio::test]
    async fn pending_orders_is_empty_for_a_fresh_store() {
        let (_dir, orchestrator) = orchestrator().await;
        assert!(orchestrator.pending_orders().await.unwrap().is_empty());
    }

    #[test]
    fn domain_validation() {
        assert!(validate_domain("example.com").is_ok());
        assert!(validate_domain("sub.example.co.uk").is_ok());
        assert!(validate_domain("*.example.com").is_ok());
        assert!(validate_domain("localhost").is_err());
        assert!(validate_domain("-bad.example.com").is_err());
        assert!(validate_domain("exa mple.com").is_err());
        assert!(validate_domain("").is_err());
    }

    #[test]
    fn csr_uses_the_persisted_domain_key() {
        let domain_key = rcgen::KeyPair::generate(&PKCS_ECDSA_P256_SHA256).unwrap();
        let now = Utc::now();
        let record = OrderRecord {
            domain: "example.com".to_string(),
            account_key: Vec::new(),
            account_url: None,
            order_url: String::new(),
            finalize_url: String::new(),
            domain_key_pem: domain_key.serialize_pem(),
            contact: "admin@example.com".to_string(),
            challenge: Challenge::derive(
                ChallengeType::Dns01,
                "example.com",
                "https://ca/c/1",
                "tok",
                "tok.print",
            ),
            created_at: now,
            updated_at: now,
        };
        let csr = csr_for(&record).unwrap();
        assert!(!csr.is_empty());
    }
}
