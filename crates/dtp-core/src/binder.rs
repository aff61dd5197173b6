//! StartupBinder - pushes the initially loaded configuration into executors
//! that were registered before startup finished.

use std::sync::Arc;

use tracing::{info, warn};

use dtp_common::{default_notify_items, fill_platforms, merge_with_defaults, DtpProperties};

use crate::executor::validate_properties;
use crate::limiter::AlarmLimiter;
use crate::refresher::apply_properties;
use crate::registry::ExecutorRegistry;

pub struct StartupBinder {
    registry: Arc<ExecutorRegistry>,
    limiter: Arc<AlarmLimiter>,
}

impl StartupBinder {
    pub fn new(registry: Arc<ExecutorRegistry>, limiter: Arc<AlarmLimiter>) -> Self {
        Self { registry, limiter }
    }

    /// Apply each record to its registered executor without diffing or
    /// notifying, then normalise notify items and seed the alarm limiter for
    /// every registered executor. Returns the number of records applied.
    pub fn bind(&self, properties: &DtpProperties) -> usize {
        let mut applied = 0;

        for record in &properties.executors {
            let name = record.thread_pool_name.as_str();
            let executor = match self.registry.get_executor(name) {
                Ok(executor) => executor,
                Err(_) => {
                    info!(executor = %name, "DynamicTp bind, executor not yet defined, skipped");
                    continue;
                }
            };

            if let Err(e) = validate_properties(record) {
                warn!(executor = %name, error = %e, "DynamicTp bind, invalid parameters, skipped");
                continue;
            }

            let _guard = executor.refresh_lock();
            apply_properties(&executor, record, &properties.platforms, &self.limiter);
            applied += 1;
        }

        for executor in self.registry.executors() {
            let _guard = executor.refresh_lock();
            let current = executor.notify_items();
            let mut items = if current.is_empty() {
                default_notify_items()
            } else {
                merge_with_defaults(&current)
            };
            fill_platforms(&properties.platforms, &mut items);

            for item in &items {
                self.limiter.init(executor.name(), item);
            }
            executor.set_notify_items(items);
        }

        info!(
            records = properties.executors.len(),
            applied = applied,
            executors = self.registry.len(),
            "DynamicTp startup bind completed"
        );
        applied
    }
}
