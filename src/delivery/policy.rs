//! Delivery policy and the sink wrapper the poller calls
//!
//! `FireAndForget` makes one bounded attempt per message.
//! `Retry` makes up to `max_attempts`, backing off exponentially between
//! them. Either way a message that could not be sent is logged and, when a
//! dead-letter file is configured, appended there. The caller's watermark
//! advances regardless of the outcome.

use crate::delivery::dead_letter::{DeadLetter, DeadLetterWriter};
use crate::delivery::retry::ExponentialBackoff;
use crate::delivery::sink::{DeliveryError, DeliverySink};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryPolicy {
    FireAndForget,
    Retry {
        max_attempts: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
    },
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        DeliveryPolicy::FireAndForget
    }
}

impl DeliveryPolicy {
    pub fn max_attempts(&self) -> u32 {
        match self {
            DeliveryPolicy::FireAndForget => 1,
            DeliveryPolicy::Retry { max_attempts, .. } => (*max_attempts).max(1),
        }
    }

    fn backoff(&self) -> Option<ExponentialBackoff> {
        match self {
            DeliveryPolicy::FireAndForget => None,
            DeliveryPolicy::Retry {
                initial_backoff,
                max_backoff,
                ..
            } => Some(ExponentialBackoff::new(
                *initial_backoff,
                *max_backoff,
                self.max_attempts() - 1,
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Failed { attempts: u32, error: String },
}

pub struct Deliverer {
    sink: Arc<dyn DeliverySink>,
    policy: DeliveryPolicy,
    timeout: Duration,
    dead_letters: Option<Mutex<DeadLetterWriter>>,
}

impl Deliverer {
    pub fn new(sink: Arc<dyn DeliverySink>, policy: DeliveryPolicy, timeout: Duration) -> Self {
        Self {
            sink,
            policy,
            timeout,
            dead_letters: None,
        }
    }

    pub fn with_dead_letters(mut self, writer: DeadLetterWriter) -> Self {
        self.dead_letters = Some(Mutex::new(writer));
        self
    }

    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    pub fn sink_type(&self) -> &'static str {
        self.sink.sink_type()
    }

    /// Send one rendered message according to the policy
    pub async fn deliver(&self, subscriber_id: &str, order_key: Option<u64>, text: &str) -> DeliveryOutcome {
        let mut backoff = self.policy.backoff();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let result = match tokio::time::timeout(self.timeout, self.sink.deliver(subscriber_id, text)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout(self.timeout)),
            };

            let error = match result {
                Ok(()) => return DeliveryOutcome::Delivered { attempts },
                Err(e) => e,
            };

            log::warn!(
                "⚠️  [{}] Delivery attempt {}/{} via {} failed: {}",
                subscriber_id,
                attempts,
                self.policy.max_attempts(),
                self.sink.sink_type(),
                error
            );

            let retrying = match backoff.as_mut() {
                Some(backoff) => backoff.sleep().await.is_ok(),
                None => false,
            };
            if retrying {
                continue;
            }

            if matches!(self.policy, DeliveryPolicy::Retry { .. }) {
                log::error!(
                    "❌ [{}] Giving up on lt {:?} after {} attempts: {}",
                    subscriber_id,
                    order_key,
                    attempts,
                    error
                );
            }
            self.dead_letter(subscriber_id, order_key, attempts, &error, text);

            return DeliveryOutcome::Failed {
                attempts,
                error: error.to_string(),
            };
        }
    }

    fn dead_letter(&self, subscriber_id: &str, order_key: Option<u64>, attempts: u32, error: &DeliveryError, text: &str) {
        let Some(writer) = &self.dead_letters else {
            return;
        };
        let letter = DeadLetter {
            timestamp: chrono::Utc::now().timestamp(),
            subscriber_id: subscriber_id.to_string(),
            order_key,
            attempts,
            error: error.to_string(),
            text: text.to_string(),
        };

        match writer.lock() {
            Ok(mut writer) => {
                if let Err(e) = writer.append(&letter) {
                    log::error!("❌ Failed to write dead letter for {}: {}", subscriber_id, e);
                }
            }
            Err(_) => log::error!("❌ Dead-letter writer lock poisoned"),
        }
    }
}
