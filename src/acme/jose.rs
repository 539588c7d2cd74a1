use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::digest::{digest, Digest, SHA256};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    acme::{keypair::KeyPair, protocol::Problem},
    error::Error,
};

#[derive(Serialize)]
struct Protected<'a> {
    alg: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
    nonce: &'a str,
    url: &'a str,
}

impl<'a> Protected<'a> {
    fn base64(
        jwk: Option<Jwk>,
        kid: Option<&'a str>,
        nonce: &'a str,
        url: &'a str,
    ) -> Result<String, Error> {
        let protected = Self {
            alg: "ES256",
            jwk,
            kid,
            nonce,
            url,
        };
        let protected = serde_json::to_vec(&protected)
            .map_err(|err| Error::Key(format!("failed to encode protected header: {err}")))?;
        Ok(URL_SAFE_NO_PAD.encode(protected))
    }
}

#[derive(Serialize)]
struct Jwk {
    alg: &'static str,
    crv: &'static str,
    kty: &'static str,
    #[serde(rename = "use")]
    u: &'static str,
    x: String,
    y: String,
}

impl Jwk {
    fn new(key: &KeyPair) -> Self {
        // Uncompressed SEC1 point: one tag byte, then x and y coordinates.
        let (x, y) = key.public_key()[1..].split_at(32);
        Self {
            alg: "ES256",
            crv: "P-256",
            kty: "EC",
            u: "sig",
            x: URL_SAFE_NO_PAD.encode(x),
            y: URL_SAFE_NO_PAD.encode(y),
        }
    }

    fn thumb_sha256_base64(&self) -> Result<String, Error> {
        #[derive(Serialize)]
        struct JwkThumb<'a> {
            crv: &'a str,
            kty: &'a str,
            x: &'a str,
            y: &'a str,
        }

        let jwk_thumb = JwkThumb {
            crv: self.crv,
            kty: self.kty,
            x: &self.x,
            y: &self.y,
        };
        let json = serde_json::to_vec(&jwk_thumb)
            .map_err(|err| Error::Key(format!("failed to encode jwk thumbprint: {err}")))?;
        Ok(URL_SAFE_NO_PAD.encode(sha256(json)))
    }
}

fn sha256(data: impl AsRef<[u8]>) -> Digest {
    digest(&SHA256, data.as_ref())
}

#[derive(Serialize)]
struct Body {
    protected: String,
    payload: String,
    signature: String,
}

/// Send a signed ACME request. `kid` selects between JWK (pre-account) and
/// key-id authentication; `payload = None` produces a POST-as-GET.
pub(crate) async fn request(
    cli: &reqwest::Client,
    key_pair: &KeyPair,
    kid: Option<&str>,
    nonce: &str,
    url: &str,
    payload: Option<impl Serialize>,
) -> Result<reqwest::Response, Error> {
    let jwk = match kid {
        None => Some(Jwk::new(key_pair)),
        Some(_) => None,
    };
    let protected = Protected::base64(jwk, kid, nonce, url)?;
    let payload = match payload {
        Some(payload) => serde_json::to_vec(&payload)
            .map_err(|err| Error::Key(format!("failed to encode payload: {err}")))?,
        None => Vec::new(),
    };
    let payload = URL_SAFE_NO_PAD.encode(payload);
    let combined = format!("{}.{}", &protected, &payload);
    let signature = URL_SAFE_NO_PAD.encode(key_pair.sign(combined.as_bytes())?);
    let body = Body {
        protected,
        payload,
        signature,
    };

    tracing::debug!(url = %url, "acme request");

    let resp = cli
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/jose+json")
        .json(&body)
        .send()
        .await
        .map_err(|err| Error::Transport(format!("failed to send acme request: {err}")))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.bytes().await.unwrap_or_default();
        // The CA reports failures as RFC 7807 problem documents; keep the
        // detail text intact for the operator.
        return Err(match serde_json::from_slice::<Problem>(&body) {
            Ok(problem) if problem.is_unknown_account() => Error::UnknownAccount {
                detail: problem.message(),
            },
            Ok(problem) => Error::Protocol {
                status: status.as_u16(),
                detail: problem.message(),
            },
            Err(_) => Error::Protocol {
                status: status.as_u16(),
                detail: String::from_utf8_lossy(&body).into_owned(),
            },
        });
    }
    Ok(resp)
}

pub(crate) async fn request_json<T, R>(
    cli: &reqwest::Client,
    key_pair: &KeyPair,
    kid: Option<&str>,
    nonce: &str,
    url: &str,
    payload: Option<T>,
) -> Result<R, Error>
where
    T: Serialize,
    R: DeserializeOwned,
{
    let resp = request(cli, key_pair, kid, nonce, url, payload).await?;

    let data = resp
        .text()
        .await
        .map_err(|err| Error::Transport(format!("failed to read acme response: {err}")))?;
    serde_json::from_str(&data).map_err(|err| Error::BadResponse(err.to_string()))
}

/// The key authorization for a challenge token: `{token}.{thumbprint}`,
/// bound to the account key.
pub(crate) fn key_authorization(key: &KeyPair, token: &str) -> Result<String, Error> {
    let jwk = Jwk::new(key);
    Ok(format!("{}.{}", token, jwk.thumb_sha256_base64()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_authorization_is_token_dot_thumbprint() {
        let key = KeyPair::generate().unwrap();
        let auth = key_authorization(&key, "sometoken").unwrap();
        let (token, thumb) = auth.split_once('.').unwrap();
        assert_eq!(token, "sometoken");
        // SHA-256 thumbprint, base64url unpadded.
        assert_eq!(thumb.len(), 43);
        assert!(!thumb.contains('='));
    }

    #[test]
    fn key_authorization_is_stable_per_key() {
        let key = KeyPair::generate().unwrap();
        assert_eq!(
            key_authorization(&key, "tok").unwrap(),
            key_authorization(&key, "tok").unwrap()
        );
    }
}
