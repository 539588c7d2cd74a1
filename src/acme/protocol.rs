use serde::{Deserialize, Serialize};

use crate::challenge::ChallengeType;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Directory {
    pub(crate) new_nonce: String,
    pub(crate) new_account: String,
    pub(crate) new_order: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewAccountRequest {
    pub(crate) only_return_existing: bool,
    pub(crate) terms_of_service_agreed: bool,
    pub(crate) contact: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Identifier {
    #[serde(rename = "type")]
    pub(crate) ty: String,
    pub(crate) value: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewOrderRequest {
    pub(crate) identifiers: Vec<Identifier>,
}

/// RFC 7807 problem document, as attached to orders, authorizations and
/// challenges or returned as an error body.
#[derive(Debug, Deserialize)]
pub(crate) struct Problem {
    #[serde(rename = "type")]
    pub(crate) ty: Option<String>,
    pub(crate) detail: Option<String>,
}

impl Problem {
    pub(crate) fn message(&self) -> String {
        match (&self.detail, &self.ty) {
            (Some(detail), _) => detail.clone(),
            (None, Some(ty)) => ty.clone(),
            (None, None) => "unknown".to_string(),
        }
    }

    /// The CA no longer recognizes the account url the request was signed
    /// with. Recoverable: registering again with the same key restores the
    /// identity.
    pub(crate) fn is_unknown_account(&self) -> bool {
        self.ty.as_deref() == Some("urn:ietf:params:acme:error:accountDoesNotExist")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Order {
    pub(crate) status: String,
    pub(crate) authorizations: Vec<String>,
    pub(crate) finalize: String,
    pub(crate) certificate: Option<String>,
    pub(crate) error: Option<Problem>,
}

impl Order {
    pub(crate) fn error_detail(&self) -> String {
        self.error
            .as_ref()
            .map(Problem::message)
            .unwrap_or_else(|| format!("order status is `{}`", self.status))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct OfferedChallenge {
    #[serde(rename = "type")]
    pub(crate) ty: String,
    pub(crate) url: String,
    pub(crate) token: String,
    #[serde(default)]
    pub(crate) status: Option<String>,
    pub(crate) error: Option<Problem>,
}

impl OfferedChallenge {
    pub(crate) fn error_detail(&self) -> String {
        self.error
            .as_ref()
            .map(Problem::message)
            .unwrap_or_else(|| "challenge validation failed".to_string())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Authorization {
    pub(crate) identifier: Identifier,
    pub(crate) status: String,
    pub(crate) challenges: Vec<OfferedChallenge>,
}

impl Authorization {
    pub(crate) fn find_challenge(&self, ty: ChallengeType) -> Option<&OfferedChallenge> {
        self.challenges.iter().find(|c| c.ty == ty.to_string())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CsrRequest {
    pub(crate) csr: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_finds_challenge_by_wire_name() {
        let authz: Authorization = serde_json::from_value(serde_json::json!({
            "identifier": { "type": "dns", "value": "example.com" },
            "status": "pending",
            "challenges": [
                { "type": "http-01", "url": "https://ca/c/1", "token": "a" },
                { "type": "dns-01", "url": "https://ca/c/2", "token": "b" },
            ],
        }))
        .unwrap();

        let challenge = authz.find_challenge(ChallengeType::Dns01).unwrap();
        assert_eq!(challenge.token, "b");
        assert!(authz.find_challenge(ChallengeType::Http01).is_some());
    }

    #[test]
    fn problem_message_prefers_detail() {
        let problem: Problem = serde_json::from_value(serde_json::json!({
            "type": "urn:ietf:params:acme:error:unauthorized",
            "detail": "Invalid response from http://example.com",
        }))
        .unwrap();
        assert_eq!(problem.message(), "Invalid response from http://example.com");

        let bare: Problem = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(bare.message(), "unknown");
    }

    #[test]
    fn unknown_account_is_detected_by_problem_type() {
        let problem: Problem = serde_json::from_value(serde_json::json!({
            "type": "urn:ietf:params:acme:error:accountDoesNotExist",
            "detail": "Account \"https://ca/acct/1\" not found",
        }))
        .unwrap();
        assert!(problem.is_unknown_account());

        let other: Problem = serde_json::from_value(serde_json::json!({
            "type": "urn:ietf:params:acme:error:unauthorized",
        }))
        .unwrap();
        assert!(!other.is_unknown_account());

        let bare: Problem = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(!bare.is_unknown_account());
    }

    #[test]
    fn order_parses_without_certificate() {
        let order: Order = serde_json::from_value(serde_json::json!({
            "status": "ready",
            "authorizations": ["https://ca/authz/1"],
            "finalize": "https://ca/order/1/finalize",
        }))
        .unwrap();
        assert_eq!(order.status, "ready");
        assert!(order.certificate.is_none());
    }
}
