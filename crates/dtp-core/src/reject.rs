//! Rejection policies applied when an executor is saturated
//! (no queue room and no worker slot below max size).

use std::fmt;
use std::str::FromStr;

use crate::error::DtpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RejectPolicy {
    /// Fail the submission with `DtpError::Rejected`
    #[default]
    Abort,
    /// Run the task inline on the submitting task
    CallerRuns,
    /// Drop the task silently
    Discard,
    /// Drop the oldest queued task and enqueue the new one
    DiscardOldest,
}

impl RejectPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            RejectPolicy::Abort => "AbortPolicy",
            RejectPolicy::CallerRuns => "CallerRunsPolicy",
            RejectPolicy::Discard => "DiscardPolicy",
            RejectPolicy::DiscardOldest => "DiscardOldestPolicy",
        }
    }

    /// Resolve a configured policy name. Matching ignores ASCII case.
    pub fn resolve(name: &str) -> Result<Self, DtpError> {
        const POLICIES: [RejectPolicy; 4] = [
            RejectPolicy::Abort,
            RejectPolicy::CallerRuns,
            RejectPolicy::Discard,
            RejectPolicy::DiscardOldest,
        ];

        let name = name.trim();
        POLICIES
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| DtpError::UnknownPolicy(name.to_string()))
    }
}

impl FromStr for RejectPolicy {
    type Err = DtpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::resolve(s)
    }
}

impl fmt::Display for RejectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
