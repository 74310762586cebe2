use std::sync::Arc;

use anyhow::{Context, Result};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    api::notifications::NotificationPort,
    enums::OutboxStatus,
    models::{CreateOutboxEntity, OutboxEntity},
    platform::{config::OutboxConfig, db::DbPool},
    schema::outbox,
};

/// Stores an event in the outbox as part of the caller's transaction.
///
/// Nothing leaves the service until the transaction commits and the relay
/// picks the row up.
pub async fn publish<T: Serialize>(
    conn: &mut AsyncPgConnection,
    event_type: String,
    payload: T,
) -> Result<()> {
    let payload = serde_json::to_string(&payload).context("Failed to serialize outbox payload")?;

    diesel::insert_into(outbox::table)
        .values(CreateOutboxEntity {
            event_type,
            payload,
            status: OutboxStatus::Pending,
        })
        .execute(conn)
        .await
        .context("Failed to insert outbox event")?;

    Ok(())
}

/// Outcome of one delivery attempt: the row's next status and attempt count.
pub fn settle(attempts: i32, delivered: bool, max_attempts: i32) -> (OutboxStatus, i32) {
    let attempts = attempts + 1;
    if delivered {
        (OutboxStatus::Sent, attempts)
    } else if attempts >= max_attempts {
        (OutboxStatus::Failed, attempts)
    } else {
        (OutboxStatus::Pending, attempts)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settled {
    pub id: i32,
    pub status: OutboxStatus,
    pub attempts: i32,
}

/// Dispatches events in order and reports each row's next state.
pub async fn deliver(
    notifier: &dyn NotificationPort,
    events: &[OutboxEntity],
    max_attempts: i32,
) -> Vec<Settled> {
    let mut settled = Vec::with_capacity(events.len());
    for event in events {
        let result = notifier.dispatch(&event.event_type, &event.payload).await;
        if let Err(err) = &result {
            warn!(
                "Failed to dispatch outbox event #{} ({}): {:?}",
                event.id, event.event_type, err
            );
        }

        let (status, attempts) = settle(event.attempts, result.is_ok(), max_attempts);
        if status == OutboxStatus::Failed {
            error!(
                "Giving up on outbox event #{} ({}) after {} attempts",
                event.id, event.event_type, attempts
            );
        }
        settled.push(Settled {
            id: event.id,
            status,
            attempts,
        });
    }
    settled
}

/// Delivers one batch of pending events. Returns how many were delivered.
pub async fn relay_batch(
    pool: &DbPool,
    notifier: Arc<dyn NotificationPort>,
    config: &OutboxConfig,
) -> Result<usize> {
    let mut pooled = pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;
    let conn: &mut AsyncPgConnection = &mut pooled;

    let batch_size = config.batch_size;
    let max_attempts = config.max_attempts;

    conn.transaction(move |conn| {
        Box::pin(async move {
            let pending: Vec<OutboxEntity> = outbox::table
                .filter(outbox::status.eq(OutboxStatus::Pending))
                .order_by(outbox::id.asc())
                .limit(batch_size)
                .for_update()
                .skip_locked()
                .select(OutboxEntity::as_select())
                .load(conn)
                .await
                .context("Failed to load pending outbox events")?;

            let settled = deliver(notifier.as_ref(), &pending, max_attempts).await;
            let delivered = settled
                .iter()
                .filter(|outcome| outcome.status == OutboxStatus::Sent)
                .count();

            for outcome in settled {
                diesel::update(outbox::table.find(outcome.id))
                    .set((
                        outbox::status.eq(outcome.status),
                        outbox::attempts.eq(outcome.attempts),
                        outbox::updated_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)
                    .await
                    .context("Failed to update outbox event")?;
            }

            Ok::<usize, anyhow::Error>(delivered)
        })
    })
    .await
}

/// Drains the outbox forever. Dispatch failures are logged and retried on a
/// later tick; they never reach the request that produced the event.
pub async fn run_relay(pool: DbPool, notifier: Arc<dyn NotificationPort>, config: OutboxConfig) {
    info!(
        "Outbox relay started (every {:?}, batch of {})",
        config.poll_interval, config.batch_size
    );
    let mut ticker = tokio::time::interval(config.poll_interval);
    loop {
        ticker.tick().await;
        match relay_batch(&pool, notifier.clone(), &config).await {
            Ok(0) => {}
            Ok(count) => debug!("Relayed {} outbox events", count),
            Err(err) => error!("Outbox relay failed: {:?}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;

    /// Records dispatched events; refuses the event types in `refuse`.
    #[derive(Default)]
    struct RecordingNotifier {
        refuse: Vec<&'static str>,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl NotificationPort for RecordingNotifier {
        async fn dispatch(&self, event_type: &str, payload: &str) -> Result<()> {
            if self.refuse.contains(&event_type) {
                anyhow::bail!("broker rejected {}", event_type);
            }
            self.sent
                .lock()
                .unwrap()
                .push((event_type.to_string(), payload.to_string()));
            Ok(())
        }
    }

    fn event(id: i32, event_type: &str, attempts: i32) -> OutboxEntity {
        OutboxEntity {
            id,
            event_type: event_type.to_string(),
            payload: format!("{{\"appointment_id\":{}}}", id),
            status: OutboxStatus::Pending,
            attempts,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_hold_back_the_batch() {
        let notifier = RecordingNotifier {
            refuse: vec!["receipts.appointment_finalized"],
            ..Default::default()
        };
        let events = [
            event(1, "notifications.appointment_completed", 0),
            event(2, "receipts.appointment_finalized", 4),
            event(3, "notifications.payment_received", 0),
        ];

        let settled = deliver(&notifier, &events, 5).await;

        assert_eq!(
            settled,
            vec![
                Settled {
                    id: 1,
                    status: OutboxStatus::Sent,
                    attempts: 1,
                },
                Settled {
                    id: 2,
                    status: OutboxStatus::Failed,
                    attempts: 5,
                },
                Settled {
                    id: 3,
                    status: OutboxStatus::Sent,
                    attempts: 1,
                },
            ]
        );
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "notifications.appointment_completed");
        assert_eq!(sent[0].1, "{\"appointment_id\":1}");
    }

    #[test]
    fn delivered_events_are_marked_sent() {
        assert_eq!(settle(0, true, 5), (OutboxStatus::Sent, 1));
        assert_eq!(settle(3, true, 5), (OutboxStatus::Sent, 4));
    }

    #[test]
    fn failures_stay_pending_until_the_attempt_budget_runs_out() {
        assert_eq!(settle(0, false, 3), (OutboxStatus::Pending, 1));
        assert_eq!(settle(1, false, 3), (OutboxStatus::Pending, 2));
        assert_eq!(settle(2, false, 3), (OutboxStatus::Failed, 3));
    }
}
