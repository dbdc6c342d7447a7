use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{PaymentProvider, ProviderError};
use crate::domain::{CreatePaymentIntent, IntentMetadata, PaymentIntent};

#[derive(Debug, Serialize)]
struct PaymentIntentBody<'a> {
    amount: &'a bigdecimal::BigDecimal,
    currency: &'a str,
    customer: &'a str,
    confirm: bool,
    off_session: bool,
    metadata: &'a IntentMetadata,
}

/// HTTP client for the payment provider's intent API.
pub struct ProviderClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    circuit_breaker: StateMachine<
        failure_policy::ConsecutiveFailures<backoff::Exponential>,
        (),
    >,
}

impl ProviderClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self::with_circuit_breaker_config(base_url, api_key, 5, Duration::from_secs(60))
    }

    pub fn with_circuit_breaker_config(
        base_url: String,
        api_key: Option<String>,
        failure_threshold: u32,
        reset_timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::exponential(Duration::from_secs(10), reset_timeout);
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        ProviderClient {
            client,
            base_url,
            api_key,
            circuit_breaker,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl PaymentProvider for ProviderClient {
    async fn create_payment_intent(
        &self,
        request: &CreatePaymentIntent,
    ) -> Result<PaymentIntent, ProviderError> {
        let url = format!("{}/v1/payment_intents", self.base_url.trim_end_matches('/'));
        let body = serde_json::to_value(PaymentIntentBody {
            amount: &request.amount,
            currency: &request.currency,
            customer: &request.customer_id,
            confirm: true,
            off_session: true,
            metadata: &request.metadata,
        })
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let result = self
            .circuit_breaker
            .call(async move {
                let response = builder.send().await?;
                let status = response.status();

                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ProviderError::Rejected {
                        status: status.as_u16(),
                        body,
                    });
                }

                let intent = response
                    .json::<PaymentIntent>()
                    .await
                    .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
                Ok(intent)
            })
            .await;

        match result {
            Ok(intent) => Ok(intent),
            Err(FailsafeError::Rejected) => Err(ProviderError::CircuitBreakerOpen),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

impl Clone for ProviderClient {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
        }
    }
}
