//! Hosted checkout client for the Stripe API.
//!
//! The only outbound network dependency of the service. Each call builds a
//! form-encoded request authenticated with the stored secret key, sends it
//! with a bounded timeout, and passes the raw response through
//! [`transform`](crate::transform::transform) before interpreting it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::idempotency::checkout_key;
use crate::metrics::Metrics;
use crate::payment_config::StripeConfiguration;
use crate::transform::{HttpHeader, HttpResponseRecord, TransformInput, TransformOutput, transform};

/// Metadata key carrying the purchasing identity on a session.
const OWNER_METADATA_KEY: &str = "user_principal";

/// One line of a checkout cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShoppingItem {
    pub product_name: String,
    pub product_description: String,
    pub currency: String,
    pub quantity: u64,
    pub price_in_cents: u64,
}

/// A freshly created hosted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Terminal classification of a session. Anything that is not a confirmed
/// payment, including transport errors, is `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SessionStatus {
    #[serde(rename_all = "camelCase")]
    Completed {
        owner_identity: Option<String>,
        response: String,
    },
    Failed { error: String },
}

impl SessionStatus {
    fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }
}

#[derive(Deserialize)]
struct SessionBody {
    id: Option<String>,
    url: Option<String>,
    status: Option<String>,
    payment_status: Option<String>,
    amount_total: Option<u64>,
    currency: Option<String>,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
}

/// What a completed session actually charged, in minor units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCharge {
    pub amount_total: u64,
    pub currency: String,
}

impl SessionCharge {
    /// Read the charge out of a completed session's raw response.
    pub fn from_response(response: &str) -> Option<Self> {
        let body: SessionBody = serde_json::from_str(response).ok()?;
        Some(Self {
            amount_total: body.amount_total?,
            currency: body.currency?.to_ascii_lowercase(),
        })
    }

    /// Check the charge against a whole-dollar order price.
    pub fn covers_usd(&self, price_usd: u64) -> Result<(), String> {
        let expected = price_usd.saturating_mul(100);
        if self.currency != "usd" {
            return Err(format!("session charged in {}, expected usd", self.currency));
        }
        if self.amount_total != expected {
            return Err(format!(
                "session charged {} cents, order requires {expected}",
                self.amount_total
            ));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// Client for the processor's checkout-session endpoints.
#[derive(Clone)]
pub struct StripeGateway {
    api_base: String,
    http: reqwest::Client,
    metrics: Arc<Metrics>,
}

impl StripeGateway {
    /// Create a gateway whose every call is bounded by `timeout`.
    pub fn new(api_base: &str, timeout: Duration, metrics: Arc<Metrics>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");

        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
            metrics,
        }
    }

    /// Create a hosted checkout session and return its id and redirect URL.
    ///
    /// Non-idempotent on the processor side. With an `attempt`, an
    /// `Idempotency-Key` derived from it lets a retry reuse the first
    /// session; without one every call creates a new session.
    #[instrument(skip_all, fields(items = items.len(), attempt = attempt.is_some()))]
    pub async fn create_session(
        &self,
        config: &StripeConfiguration,
        owner: Option<&str>,
        attempt: Option<&str>,
        items: &[ShoppingItem],
        success_url: &str,
        cancel_url: &str,
    ) -> ServiceResult<CheckoutSession> {
        let form = session_form(config, owner, items, success_url, cancel_url);

        let mut request = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&config.secret_key);
        if let Some(attempt) = attempt {
            let key = checkout_key(
                config.secret_key.as_bytes(),
                owner.unwrap_or_default(),
                attempt,
                &form,
            );
            request = request.header("Idempotency-Key", key);
        }
        let request = request.form(&form);

        let response = self
            .fetch(request)
            .await
            .map_err(ServiceError::ExternalCallFailed)?;
        parse_created_session(&response)
    }

    /// Look up a session and classify it as completed or failed.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn session_status(&self, config: &StripeConfiguration, session_id: &str) -> SessionStatus {
        if !is_valid_session_id(session_id) {
            return SessionStatus::failed("invalid session id");
        }

        let request = self
            .http
            .get(format!("{}/v1/checkout/sessions/{session_id}", self.api_base))
            .bearer_auth(&config.secret_key);

        match self.fetch(request).await {
            Ok(response) => classify_session(&response),
            Err(e) => SessionStatus::failed(e),
        }
    }

    /// Send a request and sanitize the response. Errors are human-readable.
    async fn fetch(&self, request: reqwest::RequestBuilder) -> Result<TransformOutput, String> {
        let start = Instant::now();
        let result = async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| HttpHeader {
                    name: name.to_string(),
                    value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
                })
                .collect();
            let body = response.bytes().await?.to_vec();
            Ok::<_, reqwest::Error>(HttpResponseRecord {
                status,
                headers,
                body,
            })
        }
        .await;
        self.metrics
            .record_outbound_call(start.elapsed().as_millis() as u64);

        match result {
            Ok(record) => {
                debug!(status = record.status, "Processor responded");
                Ok(transform(TransformInput {
                    response: record,
                    context: Vec::new(),
                }))
            }
            Err(e) if e.is_timeout() => {
                warn!(error = %e, "Processor call timed out");
                Err("payment processor timed out".to_string())
            }
            Err(e) => {
                warn!(error = %e, "Processor call failed");
                Err(format!("payment processor unreachable: {e}"))
            }
        }
    }
}

/// Form fields for a one-off payment session.
fn session_form(
    config: &StripeConfiguration,
    owner: Option<&str>,
    items: &[ShoppingItem],
    success_url: &str,
    cancel_url: &str,
) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), success_url.to_string()),
        ("cancel_url".to_string(), cancel_url.to_string()),
    ];

    for (i, item) in items.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        form.push((
            format!("{prefix}[price_data][currency]"),
            item.currency.to_ascii_lowercase(),
        ));
        form.push((
            format!("{prefix}[price_data][product_data][name]"),
            item.product_name.clone(),
        ));
        if !item.product_description.is_empty() {
            form.push((
                format!("{prefix}[price_data][product_data][description]"),
                item.product_description.clone(),
            ));
        }
        form.push((
            format!("{prefix}[price_data][unit_amount]"),
            item.price_in_cents.to_string(),
        ));
        form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
    }

    for (i, country) in config.allowed_countries.iter().enumerate() {
        form.push((
            format!("shipping_address_collection[allowed_countries][{i}]"),
            country.clone(),
        ));
    }

    if let Some(owner) = owner {
        form.push((format!("metadata[{OWNER_METADATA_KEY}]"), owner.to_string()));
    }

    form
}

/// Reject carts the processor would refuse anyway.
pub fn validate_cart(items: &[ShoppingItem], success_url: &str, cancel_url: &str) -> ServiceResult<()> {
    if items.is_empty() {
        return Err(ServiceError::invalid("items", "cart is empty"));
    }
    for item in items {
        if item.product_name.trim().is_empty() {
            return Err(ServiceError::invalid("productName", "must not be empty"));
        }
        if item.currency.len() != 3 || !item.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ServiceError::invalid(
                "currency",
                format!("{:?} is not an ISO 4217 code", item.currency),
            ));
        }
        if item.quantity == 0 {
            return Err(ServiceError::invalid("quantity", "must be at least 1"));
        }
    }
    if success_url.is_empty() || cancel_url.is_empty() {
        return Err(ServiceError::invalid("successUrl", "redirect URLs are required"));
    }
    Ok(())
}

/// Processor session ids are `[A-Za-z0-9_]+`; anything else never leaves the
/// process, so it cannot alter the request path.
fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= 255
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn error_message(response: &TransformOutput) -> String {
    let detail = serde_json::from_slice::<ErrorBody>(&response.body)
        .ok()
        .and_then(|b| b.error.message);
    match detail {
        Some(message) => format!("processor returned {}: {message}", response.status),
        None => format!("processor returned {}", response.status),
    }
}

fn parse_created_session(response: &TransformOutput) -> ServiceResult<CheckoutSession> {
    if !response.is_success() {
        return Err(ServiceError::ExternalCallFailed(error_message(response)));
    }
    let body: SessionBody = serde_json::from_slice(&response.body).map_err(|e| {
        ServiceError::ExternalCallFailed(format!("malformed session response: {e}"))
    })?;
    match (body.id, body.url) {
        (Some(id), Some(url)) => Ok(CheckoutSession { id, url }),
        _ => Err(ServiceError::ExternalCallFailed(
            "session response is missing id or url".to_string(),
        )),
    }
}

/// Map a sanitized session lookup onto the two terminal cases.
pub fn classify_session(response: &TransformOutput) -> SessionStatus {
    if !response.is_success() {
        return SessionStatus::failed(error_message(response));
    }
    let body: SessionBody = match serde_json::from_slice(&response.body) {
        Ok(body) => body,
        Err(e) => return SessionStatus::failed(format!("malformed session response: {e}")),
    };

    // `complete` alone is not enough: delayed payment methods finish the
    // session with `payment_status = unpaid`.
    let settled = matches!(
        body.payment_status.as_deref(),
        Some("paid" | "no_payment_required")
    );
    if settled {
        SessionStatus::Completed {
            owner_identity: body.metadata.get(OWNER_METADATA_KEY).cloned(),
            response: String::from_utf8_lossy(&response.body).into_owned(),
        }
    } else {
        SessionStatus::failed(format!(
            "payment not completed (status={}, payment_status={})",
            body.status.as_deref().unwrap_or("unknown"),
            body.payment_status.as_deref().unwrap_or("unknown"),
        ))
    }
}
