//! # dripq
//!
//! `dripq` drives leads through multi-step email sequences with a
//! three-stage pipeline over PostgreSQL and RabbitMQ:
//!
//! - the **scheduler** scans per-lead sequence state and turns due steps
//!   into durable outbox rows inside one transaction,
//! - the **pump** claims unprocessed outbox rows with `SKIP LOCKED` and
//!   publishes them to the broker, reverting rows whose publish fails,
//! - the **worker** consumes intents, renders a template for the lead,
//!   sends through the email provider and advances the per-lead cursor.
//!
//! ## Delivery contract
//!
//! The pipeline is **at-least-once at the provider and exactly-once at the
//! state machine**. The unique `Outbox."idemKey"` (a truncated SHA-256 over
//! the send coordinates) deduplicates enqueues across processes, and the
//! worker's conditional state update absorbs broker redelivery: a duplicate
//! email is possible, a double step-advance is not. Callers must treat
//! email delivery as possibly duplicated.
//!
//! ## Example
//!
//! ```no_run
//! use dripq::config::Config;
//! use dripq::idempotency::idem_key;
//!
//! # async fn example() -> dripq::error::Result<()> {
//! let config = Config::from_env()?;
//! let pool = dripq::pool::create_pool(&config).await?;
//!
//! // The key the scheduler derives for a lead's next step:
//! let key = idem_key("seq-1", "lead-1", 1, 0, "");
//! assert_eq!(key.len(), 32);
//! # Ok(())
//! # }
//! ```

pub mod ai;
pub mod broker;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod mailer;
pub mod metrics;
pub mod pool;
pub mod pump;
pub mod scheduler;
pub mod shutdown;
pub mod tables;
pub mod telemetry;
pub mod template;
pub mod types;
pub mod worker;

pub use crate::broker::{Broker, SEQUENCE_TOPIC};
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::pump::Pump;
pub use crate::scheduler::Scheduler;
pub use crate::shutdown::Shutdown;
pub use crate::types::{EmailData, OutboxRow, PendingLead, SendOutcome};
pub use crate::worker::Worker;
