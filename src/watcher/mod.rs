//! Change detection and fan-out
//!
//! ```text
//! WatchService
//!   ├─ SubscriptionRegistry (address, enabled, generation)
//!   ├─ CursorStore          (watermark per subscription)
//!   └─ PollScheduler        (one tokio task per subscription)
//!         fetch → normalize → detect → deliver → advance
//! ```

pub mod cursor_store;
pub mod detector;
pub mod registry;
pub mod scheduler;
pub mod service;

pub use cursor_store::{CursorError, CursorSnapshot, CursorStore};
pub use detector::{detect, Detection};
pub use registry::{validate_address, RegistryError, Subscription, SubscriptionRegistry};
pub use scheduler::{CycleError, CyclePhase, CycleReport, PollScheduler, PollerConfig};
pub use service::WatchService;
