use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use reqwest::Client;

use crate::{
    acme::{
        jose,
        keypair::KeyPair,
        protocol::{
            Authorization, CsrRequest, Directory, Identifier, NewAccountRequest, NewOrderRequest,
            OfferedChallenge, Order,
        },
    },
    error::Error,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A client for ACME-supporting TLS certificate services.
///
/// Constructed fresh for every start/verify call from `{key material,
/// account url}`; nothing here outlives a single protocol exchange.
pub(crate) struct AcmeClient {
    http: Client,
    directory: Directory,
    key_pair: KeyPair,
    contact: Vec<String>,
    kid: Option<String>,
}

impl AcmeClient {
    /// Create a client for `directory_url`, authenticating with `key_pair`.
    /// Pass the stored account url as `kid` to resume an existing identity
    /// without re-registering.
    pub(crate) async fn connect(
        directory_url: &str,
        contact: Vec<String>,
        key_pair: KeyPair,
        kid: Option<String>,
    ) -> Result<Self, Error> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| Error::Transport(format!("failed to build http client: {err}")))?;
        let directory = get_directory(&http, directory_url).await?;
        Ok(Self {
            http,
            directory,
            key_pair,
            contact,
            kid,
        })
    }

    pub(crate) fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub(crate) fn account_url(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Discard the known account url so the next `ensure_account` call
    /// registers afresh. Registration with the same key returns the same
    /// account identity.
    pub(crate) fn forget_account(&mut self) {
        self.kid = None;
    }

    /// Register the account if no account url is known yet. Registration
    /// with identical contact details is treated as idempotent by the CA
    /// (`onlyReturnExisting = false` returns the existing account for a
    /// known key).
    pub(crate) async fn ensure_account(&mut self) -> Result<&str, Error> {
        if self.kid.is_none() {
            let nonce = self.nonce().await?;
            let resp = jose::request(
                &self.http,
                &self.key_pair,
                None,
                &nonce,
                &self.directory.new_account,
                Some(NewAccountRequest {
                    only_return_existing: false,
                    terms_of_service_agreed: true,
                    contact: self.contact.clone(),
                }),
            )
            .await?;
            let kid = location_header(&resp)
                .ok_or_else(|| Error::BadResponse("missing account url".to_string()))?;
            tracing::debug!(kid = kid.as_str(), "account registered");
            self.kid = Some(kid);
        }
        Ok(self.kid.as_deref().unwrap_or_default())
    }

    /// Create an order for a single dns identifier. Returns the order and
    /// its url, the resumption token for later verification.
    pub(crate) async fn new_order(&mut self, domain: &str) -> Result<(Order, String), Error> {
        self.ensure_account().await?;

        tracing::debug!(domain = domain, "new order request");

        let nonce = self.nonce().await?;
        let resp = jose::request(
            &self.http,
            &self.key_pair,
            self.kid.as_deref(),
            &nonce,
            &self.directory.new_order,
            Some(NewOrderRequest {
                identifiers: vec![Identifier {
                    ty: "dns".to_string(),
                    value: domain.to_string(),
                }],
            }),
        )
        .await?;

        let order_url = location_header(&resp)
            .ok_or_else(|| Error::BadResponse("missing order url".to_string()))?;
        let order: Order = resp
            .json()
            .await
            .map_err(|err| Error::BadResponse(err.to_string()))?;

        tracing::debug!(status = order.status.as_str(), url = %order_url, "order created");
        Ok((order, order_url))
    }

    /// POST-as-GET for an order object.
    pub(crate) async fn order(&self, order_url: &str) -> Result<Order, Error> {
        let nonce = self.nonce().await?;
        jose::request_json(
            &self.http,
            &self.key_pair,
            self.kid.as_deref(),
            &nonce,
            order_url,
            None::<()>,
        )
        .await
    }

    pub(crate) async fn authorization(&self, auth_url: &str) -> Result<Authorization, Error> {
        tracing::debug!(auth_url = %auth_url, "fetch authorization");

        let nonce = self.nonce().await?;
        let authz: Authorization = jose::request_json(
            &self.http,
            &self.key_pair,
            self.kid.as_deref(),
            &nonce,
            auth_url,
            None::<()>,
        )
        .await?;

        tracing::debug!(
            identifier = ?authz.identifier,
            status = authz.status.as_str(),
            "authorization response",
        );
        Ok(authz)
    }

    /// POST-as-GET for a single challenge's status.
    pub(crate) async fn challenge(&self, challenge_url: &str) -> Result<OfferedChallenge, Error> {
        let nonce = self.nonce().await?;
        jose::request_json(
            &self.http,
            &self.key_pair,
            self.kid.as_deref(),
            &nonce,
            challenge_url,
            None::<()>,
        )
        .await
    }

    /// Tell the CA the challenge material has been published and it may
    /// validate now.
    pub(crate) async fn trigger_challenge(&self, challenge_url: &str) -> Result<(), Error> {
        tracing::debug!(challenge_url = %challenge_url, "trigger challenge");

        let nonce = self.nonce().await?;
        jose::request(
            &self.http,
            &self.key_pair,
            self.kid.as_deref(),
            &nonce,
            challenge_url,
            Some(serde_json::json!({})),
        )
        .await?;
        Ok(())
    }

    pub(crate) async fn finalize(&self, finalize_url: &str, csr: &[u8]) -> Result<Order, Error> {
        tracing::debug!(url = %finalize_url, "send certificate request");

        let nonce = self.nonce().await?;
        jose::request_json(
            &self.http,
            &self.key_pair,
            self.kid.as_deref(),
            &nonce,
            finalize_url,
            Some(CsrRequest {
                csr: URL_SAFE_NO_PAD.encode(csr),
            }),
        )
        .await
    }

    pub(crate) async fn certificate(&self, certificate_url: &str) -> Result<String, Error> {
        tracing::debug!(url = %certificate_url, "download certificate");

        let nonce = self.nonce().await?;
        let resp = jose::request(
            &self.http,
            &self.key_pair,
            self.kid.as_deref(),
            &nonce,
            certificate_url,
            None::<()>,
        )
        .await?;

        resp.text()
            .await
            .map_err(|err| Error::Transport(format!("failed to download certificate: {err}")))
    }

    async fn nonce(&self) -> Result<String, Error> {
        let resp = self
            .http
            .get(&self.directory.new_nonce)
            .send()
            .await
            .map_err(|err| Error::Transport(format!("failed to get nonce: {err}")))?;

        if !resp.status().is_success() {
            return Err(Error::Protocol {
                status: resp.status().as_u16(),
                detail: "failed to get nonce".to_string(),
            });
        }

        Ok(resp
            .headers()
            .get("replay-nonce")
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string)
            .unwrap_or_default())
    }
}

fn location_header(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get(reqwest::header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

async fn get_directory(http: &Client, directory_url: &str) -> Result<Directory, Error> {
    tracing::debug!("loading directory");

    let resp = http
        .get(directory_url)
        .send()
        .await
        .map_err(|err| Error::Transport(format!("failed to load directory: {err}")))?;

    if !resp.status().is_success() {
        return Err(Error::Protocol {
            status: resp.status().as_u16(),
            detail: "failed to load directory".to_string(),
        });
    }

    let directory = resp
        .json::<Directory>()
        .await
        .map_err(|err| Error::BadResponse(format!("failed to load directory: {err}")))?;

    tracing::debug!(
        new_nonce = directory.new_nonce.as_str(),
        new_account = directory.new_account.as_str(),
        new_order = directory.new_order.as_str(),
        "directory loaded",
    );
    Ok(directory)
}
