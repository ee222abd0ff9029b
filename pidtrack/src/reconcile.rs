use std::{fmt, path::Path};

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};

use crate::{
    discover::{DiscoveryError, PidSource},
    writer::{MapUpdater, MapWriter, WriteError},
};

/// Result of seeding the map entry of a single PID.
#[derive(Debug)]
pub struct ReconciliationOutcome {
    pub pid: i64,
    pub result: Result<(), WriteError>,
}

/// Aggregated outcomes of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconciliationSummary {
    pub discovered: usize,
    pub inserted: Vec<i64>,
    pub failed: Vec<(i64, WriteError)>,
}

impl ReconciliationSummary {
    fn from_outcomes(discovered: usize, outcomes: Vec<ReconciliationOutcome>) -> Self {
        let mut summary = ReconciliationSummary {
            discovered,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome.result {
                Ok(()) => summary.inserted.push(outcome.pid),
                Err(e) => summary.failed.push((outcome.pid, e)),
            }
        }
        summary.inserted.sort_unstable();
        summary.failed.sort_unstable_by_key(|(pid, _)| *pid);
        summary
    }

    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// True when discovery succeeded but found no PIDs at all.
    pub fn is_empty(&self) -> bool {
        self.discovered == 0
    }
}

impl fmt::Display for ReconciliationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "no active network PIDs found");
        }
        write!(
            f,
            "discovered: {}, inserted: {}, failed: {}",
            self.discovered,
            self.inserted_count(),
            self.failed_count()
        )?;
        for (pid, e) in self.failed.iter() {
            write!(f, "\n  PID {}: {}", pid, e)?;
        }
        Ok(())
    }
}

/// Makes sure every process holding a socket has a slot in the traffic map.
pub struct Reconciler<S, U> {
    source: S,
    writer: MapWriter<U>,
    concurrency: usize,
}

impl<S, U> Reconciler<S, U>
where
    S: PidSource,
    U: MapUpdater,
{
    pub fn new(source: S, updater: U) -> Self {
        Reconciler {
            source,
            writer: MapWriter::new(updater),
            concurrency: 1,
        }
    }

    /// Number of map updates allowed to run at the same time.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[cfg(test)]
    pub(crate) fn updater(&self) -> &U {
        self.writer.updater()
    }

    /// Runs one discover-then-write pass. Only a discovery failure aborts
    /// the pass; failures of single PIDs end up in the summary.
    pub async fn reconcile_pass(
        &self,
        map_path: &Path,
    ) -> Result<ReconciliationSummary, DiscoveryError> {
        let pids = self.source.discover().await?;
        if pids.is_empty() {
            debug!("no PIDs discovered, nothing to write");
            return Ok(ReconciliationSummary::default());
        }
        info!("found {} active network PIDs", pids.len());

        let discovered = pids.len();
        let outcomes: Vec<ReconciliationOutcome> = stream::iter(pids)
            .map(|pid| async move {
                let result = self.writer.write(map_path, pid).await;
                if let Err(e) = &result {
                    warn!("failed to insert PID {}: {}", pid, e);
                }
                ReconciliationOutcome { pid, result }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        Ok(ReconciliationSummary::from_outcomes(discovered, outcomes))
    }

    /// Seeds the entry of a single, explicitly given PID.
    pub async fn insert_one(&self, map_path: &Path, pid: i64) -> Result<(), WriteError> {
        self.writer.write(map_path, pid).await?;
        info!("added PID {} to the BPF map at {}", pid, map_path.display());
        Ok(())
    }
}
