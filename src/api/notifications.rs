use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ExchangeKind,
    options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions},
    types::FieldTable,
};
use tracing::info;

/// Delivers domain events to whatever fans them out (email, push, sockets,
/// receipt rendering). Only the outbox relay calls this, after commit.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn dispatch(&self, event_type: &str, payload: &str) -> Result<()>;
}

/// Publishes events to a RabbitMQ topic exchange using the event type as the
/// routing key. The channel runs in confirm mode, so a dispatch only succeeds
/// once the broker has acked the message.
pub struct AmqpNotifier {
    channel: Channel,
    exchange: String,
}

impl AmqpNotifier {
    pub async fn new(connection: &Connection, exchange: &str) -> Result<Self> {
        let channel = connection
            .create_channel()
            .await
            .context("Failed to create AMQP channel")?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .context("Failed to enable publisher confirms")?;

        channel
            .exchange_declare(
                exchange.into(),
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare exchange")?;

        Ok(Self {
            channel,
            exchange: exchange.to_string(),
        })
    }
}

#[async_trait]
impl NotificationPort for AmqpNotifier {
    async fn dispatch(&self, event_type: &str, payload: &str) -> Result<()> {
        let confirmation = self
            .channel
            .basic_publish(
                self.exchange.as_str().into(),
                event_type.into(),
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default().with_content_type("application/json".into()),
            )
            .await
            .context("Failed to publish event")?
            .await
            .context("Broker did not confirm event")?;
        if confirmation.is_nack() {
            bail!("Broker rejected event {}", event_type);
        }
        Ok(())
    }
}

/// Used when no broker is configured: events only show up in the logs.
pub struct LogNotifier;

#[async_trait]
impl NotificationPort for LogNotifier {
    async fn dispatch(&self, event_type: &str, payload: &str) -> Result<()> {
        info!("Event {}: {}", event_type, payload);
        Ok(())
    }
}
