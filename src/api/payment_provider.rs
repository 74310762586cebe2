use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{enums::PaymentRecordStatus, platform::app_error::AppError};

#[derive(Serialize, Debug, Clone)]
pub struct ChargeRequest {
    pub reference: String,
    pub amount: f64,
    pub payment_method: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeOutcome {
    pub status: PaymentRecordStatus,
    pub provider_ref: Option<String>,
    pub failure_reason: Option<String>,
}

/// External payment provider. Returns the provider's immediate verdict; later
/// changes arrive on the `payments.payment_updated` queue.
#[async_trait]
pub trait PaymentPort: Send + Sync {
    async fn initiate(&self, request: &ChargeRequest) -> Result<ChargeOutcome, AppError>;
}

#[derive(Deserialize, Debug)]
struct ProviderChargeRes {
    status: String,
    reference: Option<String>,
    failure_reason: Option<String>,
}

fn parse_outcome(res: ProviderChargeRes) -> Result<ChargeOutcome, AppError> {
    let status = match res.status.to_ascii_lowercase().as_str() {
        "pending" | "processing" | "awaiting_payment" => PaymentRecordStatus::Pending,
        "completed" | "succeeded" | "paid" => PaymentRecordStatus::Completed,
        "failed" | "declined" => PaymentRecordStatus::Failed,
        "cancelled" | "canceled" | "expired" => PaymentRecordStatus::Cancelled,
        other => {
            return Err(AppError::Other(anyhow::anyhow!(
                "Payment provider returned an unknown status: {}",
                other
            )));
        }
    };

    Ok(ChargeOutcome {
        status,
        provider_ref: res.reference,
        failure_reason: res.failure_reason,
    })
}

pub struct HttpPaymentProvider {
    client: Client,
    base_url: String,
}

impl HttpPaymentProvider {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PaymentPort for HttpPaymentProvider {
    async fn initiate(&self, request: &ChargeRequest) -> Result<ChargeOutcome, AppError> {
        let res: ProviderChargeRes = self
            .client
            .post(format!("{}/charges", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|_| AppError::ServiceUnreachable("PaymentProvider".into()))?
            .error_for_status()
            .map_err(|err| {
                AppError::Other(anyhow::anyhow!("Payment provider rejected charge: {}", err))
            })?
            .json()
            .await
            .context("Failed to parse JSON")?;

        parse_outcome(res)
    }
}

/// Counter payments (cash, in-store card). Every charge starts pending and is
/// settled by staff through the mock-pay route.
pub struct CounterPaymentProvider;

#[async_trait]
impl PaymentPort for CounterPaymentProvider {
    async fn initiate(&self, _request: &ChargeRequest) -> Result<ChargeOutcome, AppError> {
        Ok(ChargeOutcome {
            status: PaymentRecordStatus::Pending,
            provider_ref: None,
            failure_reason: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(status: &str) -> ProviderChargeRes {
        ProviderChargeRes {
            status: status.to_string(),
            reference: Some("ch_123".to_string()),
            failure_reason: None,
        }
    }

    #[test]
    fn maps_provider_vocabulary() {
        assert_eq!(
            parse_outcome(res("SUCCEEDED")).unwrap().status,
            PaymentRecordStatus::Completed
        );
        assert_eq!(
            parse_outcome(res("processing")).unwrap().status,
            PaymentRecordStatus::Pending
        );
        assert_eq!(
            parse_outcome(res("declined")).unwrap().status,
            PaymentRecordStatus::Failed
        );
        assert_eq!(
            parse_outcome(res("expired")).unwrap().provider_ref.as_deref(),
            Some("ch_123")
        );
    }

    #[test]
    fn unknown_status_is_an_error() {
        assert!(parse_outcome(res("on_hold")).is_err());
    }

    #[tokio::test]
    async fn counter_payments_start_pending() {
        let outcome = CounterPaymentProvider
            .initiate(&ChargeRequest {
                reference: "appointment-1".into(),
                amount: 500.0,
                payment_method: "cash".into(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.status, PaymentRecordStatus::Pending);
    }
}
