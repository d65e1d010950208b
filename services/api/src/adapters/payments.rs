//! services/api/src/adapters/payments.rs
//!
//! Adapters for the `PaymentService` port. `HttpPaymentAdapter` talks to a
//! Stripe-style processor that holds a pre-authorised payment intent per
//! reservation; `LoggingPaymentAdapter` is used when no processor key is
//! configured and only records what would have been charged.

use async_trait::async_trait;
use boothnow_core::ports::{PaymentCapture, PaymentService, PortError, PortResult};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

//=========================================================================================
// HTTP processor
//=========================================================================================

#[derive(Clone)]
pub struct HttpPaymentAdapter {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct IntentResponse {
    id: String,
    status: String,
}

#[derive(Deserialize)]
struct ProcessorErrorBody {
    error: ProcessorError,
}

#[derive(Deserialize)]
struct ProcessorError {
    message: Option<String>,
    code: Option<String>,
}

impl HttpPaymentAdapter {
    /// Creates a new `HttpPaymentAdapter`.
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self, PortError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            secret_key: secret_key.into(),
        })
    }

    async fn post_intent_action(
        &self,
        payment_intent_id: &str,
        action: &str,
        form: &[(&str, String)],
    ) -> PortResult<IntentResponse> {
        let url = format!(
            "{}/v1/payment_intents/{}/{}",
            self.base_url, payment_intent_id, action
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("payment processor unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = match response.json::<ProcessorErrorBody>().await {
                Ok(body) => body
                    .error
                    .message
                    .or(body.error.code)
                    .unwrap_or_else(|| status.to_string()),
                Err(_) => status.to_string(),
            };
            return Err(PortError::Unexpected(format!(
                "payment intent {} {} rejected: {}",
                payment_intent_id, action, detail
            )));
        }

        response
            .json::<IntentResponse>()
            .await
            .map_err(|e| PortError::Unexpected(format!("malformed processor response: {}", e)))
    }
}

#[async_trait]
impl PaymentService for HttpPaymentAdapter {
    async fn capture(
        &self,
        payment_intent_id: &str,
        amount_minor: i64,
        currency: &str,
    ) -> PortResult<PaymentCapture> {
        let intent = self
            .post_intent_action(
                payment_intent_id,
                "capture",
                &[("amount_to_capture", amount_minor.to_string())],
            )
            .await?;
        if intent.status != "succeeded" {
            warn!(
                "Payment intent {} is '{}' after capture of {} {}",
                intent.id, intent.status, amount_minor, currency
            );
        }
        info!("Captured {} {} on intent {}", amount_minor, currency, intent.id);
        Ok(PaymentCapture {
            capture_id: intent.id,
        })
    }

    async fn void(&self, payment_intent_id: &str) -> PortResult<()> {
        self.post_intent_action(payment_intent_id, "cancel", &[]).await?;
        info!("Voided payment intent {}", payment_intent_id);
        Ok(())
    }
}

//=========================================================================================
// No processor configured
//=========================================================================================

#[derive(Clone, Copy, Default)]
pub struct LoggingPaymentAdapter;

#[async_trait]
impl PaymentService for LoggingPaymentAdapter {
    async fn capture(
        &self,
        payment_intent_id: &str,
        amount_minor: i64,
        currency: &str,
    ) -> PortResult<PaymentCapture> {
        info!(
            "No payment processor configured; would capture {} {} on intent {}",
            amount_minor, currency, payment_intent_id
        );
        Ok(PaymentCapture {
            capture_id: format!("unprocessed_{}", payment_intent_id),
        })
    }

    async fn void(&self, payment_intent_id: &str) -> PortResult<()> {
        info!(
            "No payment processor configured; would void intent {}",
            payment_intent_id
        );
        Ok(())
    }
}
