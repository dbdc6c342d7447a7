//! Outbound calls to the payment provider.

pub mod client;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{CreatePaymentIntent, PaymentIntent};

pub use client::ProviderClient;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),
    #[error("Circuit breaker open - payment provider unavailable")]
    CircuitBreakerOpen,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: &CreatePaymentIntent,
    ) -> Result<PaymentIntent, ProviderError>;
}
