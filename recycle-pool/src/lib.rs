//! Async connection pool that recycles physical connections by age and by
//! idle time.
//!
//! The pool does not speak any wire protocol. A [`Manager`] supplied by the
//! driver opens, pings and closes connections; the pool decides when.
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use recycle_pool::{Pool, PoolConfig, TracingEventSink};
//!
//! let pool = Pool::builder()
//!     .pool_config(
//!         PoolConfig::new(5)
//!             .with_max_idle(Some(Duration::from_secs(3)))
//!             .with_max_age(Some(Duration::from_secs(3600))),
//!     )
//!     .event_sink(TracingEventSink)
//!     .build(MysqlManager::new(url))
//!     .await?;
//!
//! let conn = pool.acquire().await?;
//! conn.query("SELECT 1").await?;
//! pool.release(conn).await?;
//! ```
//!
//! Staleness is checked lazily at checkout: an idle connection past
//! `max_age` or `max_idle` is closed and replaced by a fresh one in the same
//! capacity slot. Setting `maintenance_interval` additionally evicts stale
//! idle connections in the background.

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod manager;
pub mod policy;
pub mod pool;
pub mod state;
pub mod stats;

mod guard;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{PoolConfig, Timeouts};
pub use connection::PooledConnection;
pub use error::{BoxError, ConfigError, PoolError, Result};
pub use event::{CloseReason, EventSink, NoopEventSink, TracingEventSink};
pub use manager::Manager;
pub use policy::{RecyclePolicy, RecycleReason};
pub use pool::{Pool, PoolBuilder, ShutdownReport};
pub use state::{ConnectionState, HandleId, HandleState};
pub use stats::{MetricsSnapshot, PoolStatus};
