//! Fortis API gateway implementation.

use super::{
    ChargeAccepted, IntentionKind, MerchantCredentials, ProcessorError, ProcessorGateway,
    RefundAccepted, Settlement,
};
use crate::config::Config;
use crate::domain::Rail;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Fortis processor gateway over the sandbox or production API.
///
/// Stateless except for the per-merchant location cache. All calls carry
/// a bounded timeout; there are no internal retries.
#[derive(Debug)]
pub struct FortisGateway {
    client: Client,
    base_url: String,
    developer_id: String,
    location_cache: RwLock<HashMap<String, String>>,
}

impl FortisGateway {
    /// Build a gateway from configuration.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.processor_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.processor_api_url.trim_end_matches('/').to_string(),
            developer_id: config.processor_developer_id.trim().to_string(),
            location_cache: RwLock::new(HashMap::new()),
        })
    }

    async fn request(
        &self,
        credentials: &MerchantCredentials,
        method: Method,
        path: &str,
        payload: Option<&Value>,
    ) -> Result<Value, ProcessorError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(
            method = %method,
            path = %path,
            user_id = %mask_credential(&credentials.user_id),
            "processor request"
        );

        let mut builder = self
            .client
            .request(method, &url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("developer-id", &self.developer_id)
            .header("user-id", credentials.user_id.trim())
            .header("user-api-key", credentials.user_api_key.trim());

        if let Some(payload) = payload {
            builder = builder.json(payload);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProcessorError::Unavailable(transport_message(&e)))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProcessorError::Protocol(format!("invalid JSON body: {}", e)))?;

        if status.is_server_error() {
            return Err(ProcessorError::Unavailable(format!(
                "processor returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(ProcessorError::Declined {
                reason_code: None,
                message: error_detail(&body, status),
                raw: Some(body),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl ProcessorGateway for FortisGateway {
    async fn resolve_location(
        &self,
        credentials: &MerchantCredentials,
    ) -> Result<String, ProcessorError> {
        if let Ok(cache) = self.location_cache.read() {
            if let Some(location_id) = cache.get(&credentials.user_id) {
                return Ok(location_id.clone());
            }
        }

        let body = self
            .request(credentials, Method::GET, "locations", None)
            .await?;

        let location_id = body
            .get("list")
            .and_then(|v| v.as_array())
            .and_then(|list| list.first())
            .and_then(|loc| loc.get("id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProcessorError::Protocol("no locations returned".to_string()))?
            .to_string();

        // Concurrent resolvers may both write; last one wins, values match.
        if let Ok(mut cache) = self.location_cache.write() {
            cache.insert(credentials.user_id.clone(), location_id.clone());
        }

        Ok(location_id)
    }

    async fn create_intention(
        &self,
        credentials: &MerchantCredentials,
        location_id: &str,
        kind: IntentionKind,
        amount_cents: Option<i64>,
    ) -> Result<String, ProcessorError> {
        let (path, payload) = match kind {
            IntentionKind::Transaction => {
                let amount = amount_cents.ok_or_else(|| {
                    ProcessorError::Protocol(
                        "transaction intention requires an amount in cents".to_string(),
                    )
                })?;
                (
                    "elements/transaction/intention",
                    serde_json::json!({
                        "location_id": location_id,
                        "action": "sale",
                        "amount": amount,
                    }),
                )
            }
            IntentionKind::Ticket => (
                "elements/ticket/intention",
                serde_json::json!({ "location_id": location_id }),
            ),
        };

        let body = self
            .request(credentials, Method::POST, path, Some(&payload))
            .await?;

        body.get("data")
            .and_then(|d| d.get("client_token"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ProcessorError::Protocol("missing client_token".to_string()))
    }

    async fn charge_token(
        &self,
        credentials: &MerchantCredentials,
        token: &str,
        amount_cents: i64,
        rail: Rail,
        reference: &str,
    ) -> Result<ChargeAccepted, ProcessorError> {
        let path = match rail {
            Rail::Card => "transactions/cc/sale/token",
            Rail::Bank => "transactions/ach/debit/token",
        };
        let payload = serde_json::json!({
            "token_id": token,
            "transaction_amount": amount_cents,
            "transaction_c1": reference,
        });

        let body = self
            .request(credentials, Method::POST, path, Some(&payload))
            .await?;
        let tx = body
            .get("data")
            .ok_or_else(|| ProcessorError::Protocol("missing transaction data".to_string()))?;

        let external_id = tx.get("id").and_then(|v| v.as_str()).map(|s| s.to_string());
        let status_code = tx.get("status_code").and_then(|v| v.as_i64());
        let reason_code = tx.get("reason_code_id").and_then(|v| v.as_i64());

        let accepted = match rail {
            // 101 = approved, 102 = pending; 1000 = approved/accepted.
            Rail::Card => {
                matches!(
                    (status_code, reason_code),
                    (Some(101), Some(1000)) | (Some(102), Some(1000))
                ) || (external_id.is_some() && reason_code == Some(1000))
            }
            // ACH is accepted synchronously; the terminal outcome arrives
            // later via settlement confirmation.
            Rail::Bank => reason_code == Some(1000) || (external_id.is_some() && reason_code.is_none()),
        };

        if !accepted {
            let reason = reason_code.map(|c| c.to_string());
            let message = format!(
                "Payment declined: {}",
                reason_code.map(reason_message).unwrap_or("Unknown error")
            );
            warn!(
                reason_code = ?reason,
                rail = %rail,
                "processor declined charge"
            );
            return Err(ProcessorError::Declined {
                reason_code: reason,
                message,
                raw: Some(body.clone()),
            });
        }

        let external_id = external_id
            .ok_or_else(|| ProcessorError::Protocol("accepted charge without id".to_string()))?;
        let settlement = match rail {
            Rail::Card => Settlement::Settled,
            Rail::Bank => Settlement::Initiated,
        };

        Ok(ChargeAccepted {
            external_id,
            settlement,
            raw: body,
        })
    }

    async fn refund(
        &self,
        credentials: &MerchantCredentials,
        external_id: &str,
        amount_cents: i64,
    ) -> Result<RefundAccepted, ProcessorError> {
        let path = format!("transactions/{}/refund", external_id);
        let payload = serde_json::json!({ "transaction_amount": amount_cents });

        let body = self
            .request(credentials, Method::PATCH, &path, Some(&payload))
            .await?;

        let refund_id = body
            .get("data")
            .and_then(|d| d.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(RefundAccepted {
            external_id: refund_id,
            raw: body,
        })
    }
}

fn transport_message(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        "connection failed".to_string()
    } else {
        err.to_string()
    }
}

fn error_detail(body: &Value, status: StatusCode) -> String {
    body.get("detail")
        .or_else(|| body.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("processor rejected the request ({})", status))
}

/// Human-readable processor reason codes, kept verbatim for display.
fn reason_message(code: i64) -> &'static str {
    match code {
        0 => "N/A",
        1000 => "CC - Approved / ACH - Accepted",
        1001 => "AuthCompleted",
        1002 => "Forced",
        1003 => "AuthOnly Declined",
        1500 => "Generic Decline",
        1510 => "Call",
        1520 => "Pickup Card",
        1616 => "NSF",
        1622 => "Card Expired",
        1625 => "Card Not Permitted",
        1626 => "Trans Not Permitted",
        1660 => "Bank Account Error, please delete and re-add Token",
        2101 => "Insufficient funds",
        2102 => "Bank account closed",
        2103 => "No bank account/unable to locate account",
        2104 => "Invalid bank account number",
        2107 => "Authorization revoked by customer",
        2108 => "Payment stopped",
        _ => "Unknown error",
    }
}

/// Mask a credential for logging: first 4 and last 4 characters only.
fn mask_credential(credential: &str) -> String {
    let chars: Vec<char> = credential.chars().collect();
    if chars.len() <= 8 {
        "***".to_string()
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_credential() {
        assert_eq!(mask_credential("short"), "***");
        assert_eq!(mask_credential("12345678"), "***");
        assert_eq!(mask_credential("abcdefghijkl"), "abcd...ijkl");
    }

    #[test]
    fn test_mask_credential_multibyte() {
        // character boundaries, not byte offsets
        assert_eq!(mask_credential("ü123456789ü"), "ü123...789ü");
        assert_eq!(mask_credential("ümlautkey"), "ümla...tkey");
        assert_eq!(mask_credential("üüüüüüüü"), "***");
    }

    #[test]
    fn test_reason_message_known_codes() {
        assert_eq!(reason_message(1616), "NSF");
        assert_eq!(reason_message(1622), "Card Expired");
        assert_eq!(reason_message(2101), "Insufficient funds");
        assert_eq!(reason_message(9999), "Unknown error");
    }

    #[test]
    fn test_error_detail_extraction() {
        let body = serde_json::json!({ "detail": "Invalid token" });
        assert_eq!(
            error_detail(&body, StatusCode::BAD_REQUEST),
            "Invalid token"
        );

        let body = serde_json::json!({ "message": "Token expired" });
        assert_eq!(
            error_detail(&body, StatusCode::BAD_REQUEST),
            "Token expired"
        );

        let body = serde_json::json!({});
        assert!(error_detail(&body, StatusCode::BAD_REQUEST).contains("400"));
    }
}
