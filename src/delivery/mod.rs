//! Notification delivery
//!
//! ```text
//! render::render_event → Deliverer (policy, timeout, dead letters)
//!     ↓
//! DeliverySink (TelegramSink | LogSink)
//! ```

pub mod dead_letter;
pub mod policy;
pub mod render;
pub mod retry;
pub mod sink;
pub mod telegram;

pub use dead_letter::{DeadLetter, DeadLetterWriter};
pub use policy::{Deliverer, DeliveryOutcome, DeliveryPolicy};
pub use render::render_event;
pub use sink::{DeliveryError, DeliverySink, LogSink};
pub use telegram::TelegramSink;
