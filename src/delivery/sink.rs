use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug)]
pub enum DeliveryError {
    Http(reqwest::Error),
    /// Transport answered but refused the message
    Rejected { status: u16, description: String },
    Timeout(Duration),
    Other(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Http(err)
    }
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Http(e) => write!(f, "HTTP error: {}", e),
            DeliveryError::Rejected { status, description } => {
                write!(f, "rejected ({}): {}", status, description)
            }
            DeliveryError::Timeout(d) => write!(f, "timed out after {}ms", d.as_millis()),
            DeliveryError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Notification transport
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Send already-rendered text to one subscriber
    async fn deliver(&self, subscriber_id: &str, text: &str) -> Result<(), DeliveryError>;

    /// Sink type for logging
    fn sink_type(&self) -> &'static str;
}

/// Sink that only logs (dry runs, no bot token configured)
#[derive(Debug, Default)]
pub struct LogSink {
    delivered: Mutex<Vec<(String, String)>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages "delivered" so far
    pub fn delivered(&self) -> Vec<(String, String)> {
        self.delivered
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeliverySink for LogSink {
    async fn deliver(&self, subscriber_id: &str, text: &str) -> Result<(), DeliveryError> {
        log::info!("📨 [{}] {}", subscriber_id, text.replace('\n', " | "));
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push((subscriber_id.to_string(), text.to_string()));
        }
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "log"
    }
}
