//! Challenge material derivation.
//!
//! Given the key authorization string handed out by the CA, this module
//! computes exactly what the domain owner must publish: a DNS TXT record
//! for `dns-01`, or a token file for `http-01`.
//!
//! Reference: <https://datatracker.ietf.org/doc/html/rfc8555#section-8>

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::digest::{digest, SHA256};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Host label under which `dns-01` TXT records are published.
pub const DNS_RECORD_LABEL: &str = "_acme-challenge";

/// Path prefix under which `http-01` token files are served.
pub const HTTP_WELL_KNOWN_PREFIX: &str = "/.well-known/acme-challenge/";

/// Challenge type
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChallengeType {
    /// DNS-01 challenge
    ///
    /// Reference: <https://letsencrypt.org/docs/challenge-types/#dns-01-challenge>
    #[serde(rename = "dns-01")]
    Dns01,
    /// HTTP-01 challenge
    ///
    /// Reference: <https://letsencrypt.org/docs/challenge-types/#http-01-challenge>
    #[serde(rename = "http-01")]
    Http01,
}

impl Display for ChallengeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeType::Dns01 => f.write_str("dns-01"),
            ChallengeType::Http01 => f.write_str("http-01"),
        }
    }
}

impl FromStr for ChallengeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dns-01" => Ok(ChallengeType::Dns01),
            "http-01" => Ok(ChallengeType::Http01),
            _ => Err(Error::UnsupportedChallengeType(s.to_string())),
        }
    }
}

/// A challenge offered by the CA, with the material the domain owner must
/// publish. Each variant carries only the fields it needs; the type tag is
/// immutable for the lifetime of an order record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Challenge {
    #[serde(rename = "dns-01")]
    Dns01 {
        /// Challenge URL, used to signal readiness and poll status.
        url: String,
        /// Full TXT record name, e.g. `_acme-challenge.example.com`.
        record_name: String,
        /// TXT record value: base64url (no padding) of the SHA-256 digest
        /// of the key authorization.
        digest: String,
    },
    #[serde(rename = "http-01")]
    Http01 {
        /// Challenge URL, used to signal readiness and poll status.
        url: String,
        /// CA-issued token, used verbatim as the file name under the
        /// well-known prefix.
        token: String,
        /// Raw key authorization string, published unmodified as the file
        /// content.
        key_authorization: String,
    },
}

impl Challenge {
    /// Derive the material to publish for `challenge_type`.
    pub fn derive(
        challenge_type: ChallengeType,
        domain: &str,
        url: &str,
        token: &str,
        key_authorization: &str,
    ) -> Challenge {
        match challenge_type {
            ChallengeType::Dns01 => Challenge::Dns01 {
                url: url.to_string(),
                record_name: dns_record_name(domain),
                digest: dns_record_value(key_authorization),
            },
            ChallengeType::Http01 => Challenge::Http01 {
                url: url.to_string(),
                token: token.to_string(),
                key_authorization: key_authorization.to_string(),
            },
        }
    }

    pub fn challenge_type(&self) -> ChallengeType {
        match self {
            Challenge::Dns01 { .. } => ChallengeType::Dns01,
            Challenge::Http01 { .. } => ChallengeType::Http01,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Challenge::Dns01 { url, .. } => url,
            Challenge::Http01 { url, .. } => url,
        }
    }

    /// The DNS record name or the token file name.
    pub fn name(&self) -> &str {
        match self {
            Challenge::Dns01 { record_name, .. } => record_name,
            Challenge::Http01 { token, .. } => token,
        }
    }

    /// The DNS record value or the token file content.
    pub fn value(&self) -> &str {
        match self {
            Challenge::Dns01 { digest, .. } => digest,
            Challenge::Http01 {
                key_authorization, ..
            } => key_authorization,
        }
    }
}

/// TXT record name for a `dns-01` challenge. Wildcard identifiers publish
/// on the base name.
pub fn dns_record_name(domain: &str) -> String {
    let base = domain.strip_prefix("*.").unwrap_or(domain);
    format!("{DNS_RECORD_LABEL}.{base}")
}

/// TXT record value for a `dns-01` challenge: the base64url encoding,
/// without padding, of the SHA-256 digest of the key authorization. This
/// must match the validator byte for byte.
pub fn dns_record_value(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(digest(&SHA256, key_authorization.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_record_name_prefixes_domain() {
        assert_eq!(
            dns_record_name("example.com"),
            "_acme-challenge.example.com"
        );
    }

    #[test]
    fn dns_record_name_strips_wildcard() {
        assert_eq!(
            dns_record_name("*.example.com"),
            "_acme-challenge.example.com"
        );
    }

    #[test]
    fn dns_record_value_is_deterministic() {
        let key_auth = "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA.\
                        QxKhYaH6VWOWyLVV9dVRqY8hZVp-ZxCfmYkf8BwqF0c";
        assert_eq!(dns_record_value(key_auth), dns_record_value(key_auth));
    }

    #[test]
    fn dns_record_value_changes_with_input() {
        let a = dns_record_value("token.thumbprint");
        let b = dns_record_value("token.thumbprinT");
        assert_ne!(a, b);
    }

    #[test]
    fn dns_record_value_is_base64url_without_padding() {
        let value = dns_record_value("token.thumbprint");
        assert!(!value.contains('='));
        assert!(!value.contains('+'));
        assert!(!value.contains('/'));
        // SHA-256 digest is 32 bytes, which is 43 base64 characters unpadded.
        assert_eq!(value.len(), 43);
    }

    #[test]
    fn http_material_passes_key_authorization_through() {
        let challenge = Challenge::derive(
            ChallengeType::Http01,
            "example.com",
            "https://ca.example/chall/1",
            "token123",
            "token123.thumbprint",
        );
        assert_eq!(challenge.name(), "token123");
        assert_eq!(challenge.value(), "token123.thumbprint");
    }

    #[test]
    fn dns_material_uses_record_name_and_digest() {
        let challenge = Challenge::derive(
            ChallengeType::Dns01,
            "example.com",
            "https://ca.example/chall/2",
            "token123",
            "token123.thumbprint",
        );
        assert_eq!(challenge.name(), "_acme-challenge.example.com");
        assert_eq!(challenge.value(), dns_record_value("token123.thumbprint"));
    }

    #[test]
    fn challenge_type_parses_wire_names_only() {
        assert_eq!(
            "dns-01".parse::<ChallengeType>().unwrap(),
            ChallengeType::Dns01
        );
        assert_eq!(
            "http-01".parse::<ChallengeType>().unwrap(),
            ChallengeType::Http01
        );
        assert!("tls-alpn-01".parse::<ChallengeType>().is_err());
    }

    #[test]
    fn challenge_serializes_with_type_tag() {
        let challenge = Challenge::derive(
            ChallengeType::Dns01,
            "example.com",
            "https://ca.example/chall/3",
            "tok",
            "tok.print",
        );
        let json = serde_json::to_value(&challenge).unwrap();
        assert_eq!(json["type"], "dns-01");
        assert_eq!(json["recordName"], serde_json::Value::Null); // snake_case fields
        assert_eq!(json["record_name"], "_acme-challenge.example.com");
    }
}
