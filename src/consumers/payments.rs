use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
};
use tracing::{error, info};

use crate::{events::PaymentUpdatedEvent, platform::app_state::AppState};

/// Bytes that are not UTF-8 JSON fail here like any other malformed body.
fn parse_payment_update(data: &[u8]) -> serde_json::Result<PaymentUpdatedEvent> {
    serde_json::from_slice(data)
}

/// Applies a provider status change to the payment ledger. Malformed and
/// unknown payments are dropped so they do not block the queue.
pub fn payment_updated(delivery: Delivery, state: Arc<AppState>) -> BoxFuture<'static, Result<()>> {
    Box::pin(async move {
        let payload = match parse_payment_update(&delivery.data) {
            Ok(payload) => payload,
            Err(err) => {
                error!("Dropping malformed payment update: {}", err);
                delivery.nack(BasicNackOptions::default()).await?;
                return Ok(());
            }
        };
        info!("Received event: {:?}", payload);

        let payment_id = payload.payment_id;
        match state.appointments.apply_payment_update(payload).await {
            Ok(()) => {
                info!("Payment {} has been updated", payment_id);
                delivery.ack(BasicAckOptions::default()).await?;
            }
            Err(err) => {
                error!("Failed to apply update for payment {}: {:?}", payment_id, err);
                delivery.nack(BasicNackOptions::default()).await?;
            }
        }

        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::enums::PaymentRecordStatus;

    #[test]
    fn well_formed_update_is_parsed() {
        let id = Uuid::new_v4();
        let body = format!(
            r#"{{"payment_id":"{}","status":"failed","provider_ref":null,"failure_reason":"declined"}}"#,
            id
        );

        let update = parse_payment_update(body.as_bytes()).unwrap();

        assert_eq!(update.payment_id, id);
        assert_eq!(update.status, PaymentRecordStatus::Failed);
        assert_eq!(update.failure_reason.as_deref(), Some("declined"));
    }

    #[test]
    fn invalid_utf8_is_treated_as_malformed() {
        assert!(parse_payment_update(&[0xff, 0xfe, 0x7b]).is_err());
        assert!(parse_payment_update(b"{\"payment_id\":\"\xff\"}").is_err());
        assert!(parse_payment_update(b"not json").is_err());
    }
}
