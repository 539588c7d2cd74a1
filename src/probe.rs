//! Propagation probing.
//!
//! Checks, from the public internet's point of view, whether challenge
//! material is visible yet: a TXT lookup against public resolvers for
//! `dns-01`, a plain GET on the well-known path for `http-01`. "Not yet
//! propagated" is the expected common case, so lookup failures are
//! reported as `found = false`, never as errors.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use hickory_resolver::{
    config::{NameServerConfig, ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
    proto::xfer::Protocol,
    Resolver, TokioResolver,
};
use serde::Serialize;

use crate::{
    challenge::{dns_record_name, HTTP_WELL_KNOWN_PREFIX},
    error::Error,
};

/// Public resolvers queried directly, bypassing local and ISP caches.
const PUBLIC_RESOLVERS: &[IpAddr] = &[
    IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), // Google
    IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), // Cloudflare
    IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)), // Quad9
];

const DNS_TIMEOUT: Duration = Duration::from_secs(5);
const HTTP_TIMEOUT: Duration = Duration::from_secs(8);

/// What a probe observed. Serialized as-is in API responses.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProbeReport {
    Dns {
        found: bool,
        /// Every TXT value observed, multi-segment chunks concatenated.
        records: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Http {
        found: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl ProbeReport {
    pub fn found(&self) -> bool {
        match self {
            ProbeReport::Dns { found, .. } => *found,
            ProbeReport::Http { found, .. } => *found,
        }
    }
}

/// Read-only propagation prober. Safe to call repeatedly; never mutates
/// order state.
pub struct Prober {
    resolver: TokioResolver,
    http: reqwest::Client,
}

impl Prober {
    pub fn new() -> Result<Self, Error> {
        let mut config = ResolverConfig::new();
        for ip in PUBLIC_RESOLVERS {
            config.add_name_server(NameServerConfig::new(
                SocketAddr::new(*ip, 53),
                Protocol::Udp,
            ));
        }

        let mut opts = ResolverOpts::default();
        opts.timeout = DNS_TIMEOUT;
        opts.attempts = 2;
        // A cached negative answer would defeat the point of the probe.
        opts.cache_size = 0;

        let resolver = Resolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(opts)
            .build();

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| Error::Transport(format!("failed to build http client: {err}")))?;

        Ok(Self { resolver, http })
    }

    /// TXT lookup for the domain's challenge record.
    pub async fn probe_dns(&self, domain: &str) -> ProbeReport {
        let record_name = dns_record_name(domain);
        tracing::debug!(record = %record_name, "probing txt record");

        match self.resolver.txt_lookup(record_name.clone()).await {
            Ok(lookup) => {
                let records: Vec<String> = lookup
                    .iter()
                    .map(|txt| {
                        txt.txt_data()
                            .iter()
                            .map(|chunk| String::from_utf8_lossy(chunk))
                            .collect::<String>()
                    })
                    .collect();
                ProbeReport::Dns {
                    found: !records.is_empty(),
                    records,
                    detail: None,
                }
            }
            Err(err) => {
                // NXDOMAIN, empty answers and timeouts all mean "not yet".
                tracing::debug!(record = %record_name, error = %err, "txt lookup failed");
                ProbeReport::Dns {
                    found: false,
                    records: Vec::new(),
                    detail: Some(err.to_string()),
                }
            }
        }
    }

    /// GET the challenge file; found only on an exact 200.
    pub async fn probe_http(&self, url: &str) -> ProbeReport {
        tracing::debug!(url = %url, "probing challenge file");

        let resp = self
            .http
            .get(url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await;

        match resp {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => match resp.text().await {
                Ok(text) => ProbeReport::Http {
                    found: true,
                    content: Some(text.trim().to_string()),
                    status: Some(200),
                    detail: None,
                },
                Err(err) => ProbeReport::Http {
                    found: false,
                    content: None,
                    status: Some(200),
                    detail: Some(format!("failed to read body: {err}")),
                },
            },
            Ok(resp) => ProbeReport::Http {
                found: false,
                content: None,
                status: Some(resp.status().as_u16()),
                detail: None,
            },
            Err(err) => ProbeReport::Http {
                found: false,
                content: None,
                status: None,
                detail: Some(err.to_string()),
            },
        }
    }

    /// The url an `http-01` token is expected to be served from.
    pub fn http_challenge_url(domain: &str, token: &str) -> String {
        format!("http://{domain}{HTTP_WELL_KNOWN_PREFIX}{token}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_challenge_url_uses_well_known_prefix() {
        assert_eq!(
            Prober::http_challenge_url("example.com", "tok123"),
            "http://example.com/.well-known/acme-challenge/tok123"
        );
    }

    #[test]
    fn dns_report_serializes_records() {
        let report = ProbeReport::Dns {
            found: true,
            records: vec!["abc".to_string()],
            detail: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["found"], true);
        assert_eq!(json["records"][0], "abc");
        assert!(json.get("detail").is_none());
    }

    #[test]
    fn http_report_omits_empty_fields() {
        let report = ProbeReport::Http {
            found: false,
            content: None,
            status: Some(404),
            detail: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["found"], false);
        assert_eq!(json["status"], 404);
        assert!(json.get("content").is_none());
    }

    #[tokio::test]
    async fn prober_builds_with_public_resolvers() {
        assert!(Prober::new().is_ok());
    }

    #[tokio::test]
    async fn http_probe_reports_unreachable_host_as_not_found() {
        let prober = Prober::new().unwrap();
        // Nothing listens on port 1; the connection is refused immediately.
        let report = prober
            .probe_http("http://127.0.0.1:1/.well-known/acme-challenge/tok")
            .await;

        assert!(!report.found());
        match report {
            ProbeReport::Http {
                found,
                content,
                status,
                detail,
            } => {
                assert!(!found);
                assert!(content.is_none());
                assert!(status.is_none());
                assert!(detail.is_some());
            }
            ProbeReport::Dns { .. } => panic!("expected an http report"),
        }
    }
}
