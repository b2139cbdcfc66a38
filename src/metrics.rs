use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::client::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operation {
    Insert,
    Read,
    Scan,
    Update,
    Delete,
}

impl Operation {
    fn label(self) -> &'static str {
        match self {
            Operation::Insert => "Inserts",
            Operation::Read => "Reads",
            Operation::Scan => "Scans",
            Operation::Update => "Updates",
            Operation::Delete => "Deletes",
        }
    }
}

/// Outcome counts for one operation type
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub ok: u64,
    pub not_found: u64,
    pub error: u64,
    pub batched_ok: u64,
}

impl Tally {
    fn record(&mut self, status: Status) {
        match status {
            Status::Ok => self.ok += 1,
            Status::NotFound => self.not_found += 1,
            Status::Error => self.error += 1,
            Status::BatchedOk => self.batched_ok += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.ok + self.not_found + self.error + self.batched_ok
    }
}

#[derive(Debug, Default, Clone)]
pub struct Metrics {
    tallies: BTreeMap<Operation, Tally>,
}

#[derive(Default, Clone)]
pub struct ConcurrentMetrics {
    metrics: Arc<Mutex<Metrics>>,
}

impl ConcurrentMetrics {
    #[cfg(test)]
    pub async fn record(&self, operation: Operation, status: Status) {
        self.metrics.lock().await.record(operation, status);
    }

    /// Fold a worker's local counts in
    pub async fn merge(&self, other: &Metrics) {
        let mut guard = self.metrics.lock().await;
        for (operation, tally) in &other.tallies {
            let entry = guard.tallies.entry(*operation).or_default();
            entry.ok += tally.ok;
            entry.not_found += tally.not_found;
            entry.error += tally.error;
            entry.batched_ok += tally.batched_ok;
        }
    }

    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }
}

impl Metrics {
    pub fn record(&mut self, operation: Operation, status: Status) {
        self.tallies.entry(operation).or_default().record(status);
    }

    pub fn tally(&self, operation: Operation) -> Tally {
        self.tallies.get(&operation).copied().unwrap_or_default()
    }

    pub fn errors(&self) -> u64 {
        self.tallies.values().map(|t| t.error).sum()
    }
}

impl Display for Metrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nOperation Outcomes:")?;
        writeln!(
            f,
            "{:<15} {:<12} {:<12} {:<12} {:<12} {:<12}",
            "Operation", "Count", "OK", "BATCHED_OK", "NOT_FOUND", "ERROR"
        )?;
        writeln!(f, "{:-<75}", "")?;

        for (operation, tally) in &self.tallies {
            writeln!(
                f,
                "{:<15} {:<12} {:<12} {:<12} {:<12} {:<12}",
                operation.label(),
                tally.total(),
                tally.ok,
                tally.batched_ok,
                tally.not_found,
                tally.error
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn merged_tallies_add_up() {
        let metrics = ConcurrentMetrics::default();
        metrics.record(Operation::Read, Status::Ok).await;

        let mut local = Metrics::default();
        local.record(Operation::Read, Status::NotFound);
        local.record(Operation::Insert, Status::BatchedOk);
        local.record(Operation::Insert, Status::Error);
        metrics.merge(&local).await;

        let snapshot = metrics.get_metrics().await;
        assert_eq!(
            snapshot.tally(Operation::Read),
            Tally {
                ok: 1,
                not_found: 1,
                ..Tally::default()
            }
        );
        assert_eq!(snapshot.tally(Operation::Insert).total(), 2);
        assert_eq!(snapshot.errors(), 1);
    }

    #[test]
    fn display_lists_recorded_operations_only() {
        let mut metrics = Metrics::default();
        metrics.record(Operation::Scan, Status::Ok);

        let table = metrics.to_string();
        assert!(table.contains("Scans"));
        assert!(!table.contains("Reads"));
    }
}
