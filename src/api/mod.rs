pub mod notifications;
pub mod payment_provider;

use std::sync::Arc;

use reqwest::Client;

use crate::platform::config::Config;

use self::payment_provider::{CounterPaymentProvider, HttpPaymentProvider, PaymentPort};

/// Picks the payment provider for this deployment.
pub fn payment_port(config: &Config, client: Client) -> Arc<dyn PaymentPort> {
    match &config.payment_provider.url {
        Some(url) => Arc::new(HttpPaymentProvider::new(client, url.clone())),
        None => Arc::new(CounterPaymentProvider),
    }
}
