//! weread-pacer - paced reading-progress reporter for WeRead
//!
//! Replays a captured browser session against the WeRead web reader and
//! reports reading progress at human-like intervals, for one user or for
//! several users in turn.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - TOML configuration, environment overrides and ranges
//! - [`client`] - Captured-session parsing, request signing and the HTTP session client
//! - [`reading`] - Book/chapter catalog, position scheduling and behaviour simulation
//! - [`session`] - Reading session orchestration and statistics
//! - [`scheduler`] - Run modes, shutdown handling and the daemon loop
//! - [`notifications`] - Notification sink and push channels
//! - [`utils`] - Retry helper and small formatting helpers
//!
//! # Example
//!
//! ```no_run
//! use weread_pacer::config::Config;
//! use weread_pacer::scheduler::Application;
//!
//! #[tokio::main]
//! async fn main() -> weread_pacer::Result<()> {
//!     let config = Config::load("config.toml".as_ref())?;
//!     Application::new(config).run().await
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod notifications;
pub mod reading;
pub mod scheduler;
pub mod session;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{ReadOutcome, ReadingClient, SessionClient};
    pub use crate::config::{Config, ReadingMode, SpanRange, StartupMode};
    pub use crate::error::{Error, ErrorCategory, PacerErrorTrait, Result};
    pub use crate::notifications::{NotificationService, NotificationSink};
    pub use crate::reading::{Catalog, PositionScheduler};
    pub use crate::scheduler::{Application, ShutdownContext};
    pub use crate::session::{SessionOrchestrator, SessionStats};
}

pub use error::{Error, Result};
