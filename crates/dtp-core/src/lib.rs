//! DynamicTp core
//!
//! Registry and live reconfiguration of running worker pools:
//! - `DynamicExecutor`: tokio worker pool with runtime-mutable tunables
//! - `ExecutorRegistry`: name → executor directory
//! - `Refresher`: validates and applies configuration batches, diffs, notifies
//! - `StartupBinder`: one-time initial bind of configuration to executors
//! - `AlarmLimiter`, `NotificationDispatcher`, `AlarmMonitor`: alerting
//! - `ConfigWatchService`: polls a `ConfigSource` and refreshes on change

pub mod alarm;
pub mod binder;
pub mod config_watch;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod limiter;
pub mod notification;
pub mod queue;
pub mod refresher;
pub mod registry;
pub mod reject;
pub mod snapshot;

pub use alarm::{spawn_alarm_monitor, AlarmConfig, AlarmMonitor};
pub use binder::StartupBinder;
pub use config_watch::{spawn_config_watch_task, ConfigSource, ConfigWatchService};
pub use dispatcher::{Dispatch, NotificationDispatcher};
pub use error::DtpError;
pub use executor::{validate_properties, DynamicExecutor};
pub use limiter::AlarmLimiter;
pub use notification::{AlarmNotice, ChangeNotice, LogChannel, NotificationChannel, Notice, WebhookChannel};
pub use queue::{Task, WorkQueue};
pub use refresher::{NotifyDecision, RefreshOutcome, RefreshSummary, Refresher, SkippedField};
pub use registry::ExecutorRegistry;
pub use reject::RejectPolicy;
pub use snapshot::{ExecutorSnapshot, FieldChange, PropertyDiff};

pub type Result<T> = std::result::Result<T, DtpError>;
