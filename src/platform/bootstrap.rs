use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use futures::{StreamExt, future::BoxFuture};
use lapin::{
    Connection, ConnectionProperties, ExchangeKind,
    message::Delivery,
    options::{BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{
        self,
        notifications::{AmqpNotifier, LogNotifier, NotificationPort},
    },
    appointments::{AppointmentService, clock::BusinessClock},
    platform::{
        app_state::AppState,
        config::{AmqpConfig, Config},
        db, outbox,
    },
};

/// Handles one message from a bound queue. Handlers ack or nack themselves.
pub type ConsumerHandler = fn(Delivery, Arc<AppState>) -> BoxFuture<'static, Result<()>>;

/// Logs to stdout, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

/// Loads `.env` when present. Real environment variables take precedence.
pub fn init_env() {
    if let Err(err) = dotenvy::dotenv() {
        info!("No .env file loaded: {}", err);
    }
}

async fn spawn_consumer(
    connection: &Connection,
    amqp: &AmqpConfig,
    queue: &str,
    handler: ConsumerHandler,
    state: Arc<AppState>,
) -> Result<()> {
    let channel = connection
        .create_channel()
        .await
        .context("Failed to create AMQP channel")?;

    channel
        .exchange_declare(
            amqp.exchange.as_str().into(),
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare exchange")?;
    channel
        .queue_declare(
            queue.into(),
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to declare queue {}", queue))?;
    channel
        .queue_bind(
            queue.into(),
            amqp.exchange.as_str().into(),
            queue.into(),
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to bind queue {}", queue))?;

    let tag = format!("appointmentservice.{}", queue);
    let mut consumer = channel
        .basic_consume(
            queue.into(),
            tag.as_str().into(),
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to consume {}", queue))?;

    let queue = queue.to_string();
    tokio::spawn(async move {
        info!("Consuming {}", queue);
        while let Some(delivery) = consumer.next().await {
            match delivery {
                Ok(delivery) => {
                    if let Err(err) = handler(delivery, state.clone()).await {
                        error!("Handler for {} failed: {:?}", queue, err);
                    }
                }
                Err(err) => error!("Delivery error on {}: {:?}", queue, err),
            }
        }
        warn!("Consumer for {} stopped", queue);
    });

    Ok(())
}

/// Builds shared state, wires consumers and the outbox relay, then serves
/// `app` until the process is stopped.
pub async fn bootstrap(
    name: &str,
    config: Config,
    app: Router<AppState>,
    consumers: &[(&str, ConsumerHandler)],
) -> Result<()> {
    let db_pool = db::create_pool(&config.database).await?;
    let http_client = reqwest::Client::new();
    let clock = BusinessClock::from_offset_minutes(config.business.utc_offset_minutes)?;
    let appointments =
        AppointmentService::new(db_pool.clone(), clock, api::payment_port(&config, http_client));
    let state = AppState {
        db_pool,
        appointments,
    };

    // Held for the lifetime of the server so channels stay open.
    let mut _connection = None;
    let notifier: Arc<dyn NotificationPort> = match &config.amqp {
        Some(amqp) => {
            let connection = Connection::connect(&amqp.url, ConnectionProperties::default())
                .await
                .context("Failed to connect to AMQP broker")?;
            let shared = Arc::new(state.clone());
            for (queue, handler) in consumers {
                spawn_consumer(&connection, amqp, queue, *handler, shared.clone()).await?;
            }
            let notifier = AmqpNotifier::new(&connection, &amqp.exchange).await?;
            _connection = Some(connection);
            Arc::new(notifier)
        }
        None => {
            warn!("AMQP_URL is not set; consumers are disabled and events are only logged");
            Arc::new(LogNotifier)
        }
    };

    tokio::spawn(outbox::run_relay(
        state.db_pool.clone(),
        notifier,
        config.outbox.clone(),
    ));

    let app = app.layer(TraceLayer::new_for_http()).with_state(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.server.port))?;
    info!("{} listening on {}", name, listener.local_addr()?);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
