//! Bounded retention for finished jobs.
//!
//! Terminal jobs are evicted when they finished longer than `ttl` ago, or
//! when more than `max_terminal` of them are held (oldest completion first).
//! Queued and processing jobs are never evicted.

use std::time::Duration;

use meshpipe_core::job::Job;
use meshpipe_core::types::{JobId, Timestamp};

/// Default time a finished job stays queryable: 24 hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default cap on retained finished jobs.
pub const DEFAULT_MAX_TERMINAL: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub ttl: Duration,
    pub max_terminal: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_terminal: DEFAULT_MAX_TERMINAL,
        }
    }
}

impl RetentionPolicy {
    /// Ids of the jobs in `jobs` that should be evicted at `now`.
    pub fn select_evictions<'a>(
        &self,
        jobs: impl IntoIterator<Item = &'a Job>,
        now: Timestamp,
    ) -> Vec<JobId> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(ttl);

        let mut terminal: Vec<(Timestamp, JobId)> = jobs
            .into_iter()
            .filter(|j| j.status.is_terminal())
            .map(|j| (j.completed_at.unwrap_or(j.submitted_at), j.id))
            .collect();
        terminal.sort();

        let expired = terminal
            .iter()
            .take_while(|(done, _)| cutoff.is_some_and(|c| *done < c))
            .count();
        let over_cap = terminal.len().saturating_sub(self.max_terminal);

        terminal
            .into_iter()
            .take(expired.max(over_cap))
            .map(|(_, id)| id)
            .collect()
    }
}
