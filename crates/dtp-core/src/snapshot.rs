//! Point-in-time view of an executor's tunables and field-level diffing.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use dtp_common::QueueType;

use crate::executor::DynamicExecutor;

/// Tunables of one executor at one instant.
///
/// Fields are read one at a time; a concurrent writer can make the view
/// inconsistent across fields. Refreshes of the same executor hold its
/// refresh lock, so that only matters for reads outside a refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutorSnapshot {
    pub name: String,
    pub core_size: usize,
    pub max_size: usize,
    pub queue_type: QueueType,
    pub queue_capacity: usize,
    #[serde(with = "duration_millis")]
    pub keep_alive: Duration,
    pub reject_policy: &'static str,
    pub allow_core_timeout: bool,
}

impl ExecutorSnapshot {
    pub fn capture(executor: &DynamicExecutor) -> Self {
        Self {
            name: executor.name().to_string(),
            core_size: executor.core_size(),
            max_size: executor.max_size(),
            queue_type: executor.queue_type(),
            queue_capacity: executor.queue_capacity(),
            keep_alive: executor.keep_alive(),
            reject_policy: executor.reject_policy().name(),
            allow_core_timeout: executor.allows_core_timeout(),
        }
    }

    /// Field-by-field comparison, in field declaration order
    pub fn diff(&self, new: &ExecutorSnapshot) -> PropertyDiff {
        let mut diff = PropertyDiff::default();
        diff.push("name", &self.name, &new.name);
        diff.push("core_size", self.core_size, new.core_size);
        diff.push("max_size", self.max_size, new.max_size);
        diff.push("queue_type", self.queue_type, new.queue_type);
        diff.push("queue_capacity", self.queue_capacity, new.queue_capacity);
        diff.push(
            "keep_alive",
            format!("{}ms", self.keep_alive.as_millis()),
            format!("{}ms", new.keep_alive.as_millis()),
        );
        diff.push("reject_policy", self.reject_policy, new.reject_policy);
        diff.push("allow_core_timeout", self.allow_core_timeout, new.allow_core_timeout);
        diff
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: &'static str,
    pub old: String,
    pub new: String,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} => {}", self.field, self.old, self.new)
    }
}

/// Changed fields between two snapshots. Empty means no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropertyDiff {
    pub changes: Vec<FieldChange>,
}

impl PropertyDiff {
    fn push<T: PartialEq + ToString>(&mut self, field: &'static str, old: T, new: T) {
        if old != new {
            self.changes.push(FieldChange {
                field,
                old: old.to_string(),
                new: new.to_string(),
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.changes.iter().map(|c| c.field).collect()
    }

    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.field == field)
    }
}

impl fmt::Display for PropertyDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, change) in self.changes.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", change)?;
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
