//! Periodic refresh of the version snapshot

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    evaluator::threshold_from_std,
    fetcher::{FetchError, UpdateInfoSource, VersionFetcher},
    store::SnapshotStore,
    types::{SnapshotStatus, ToolVersionRecord, TrackedTool, VersionSnapshot},
};

#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub refresh_interval: Duration,
    /// Upper bound for a single fetch, and therefore for the fetch phase of a cycle
    pub fetch_timeout: Duration,
    pub stale_threshold: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(10 * 60),
            fetch_timeout: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(15 * 60),
        }
    }
}

/// Summary of one refresh cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleResult {
    pub status: SnapshotStatus,
    pub tools_total: usize,
    pub tools_failed: usize,
    pub updated_at: DateTime<Utc>,
    pub update_info_refreshed: bool,
}

/// Owns the refresh schedule and the "cycle in progress" flag.
///
/// The updater is the only writer of the registry documents. It shares
/// nothing with the read path except the data directory.
pub struct Updater {
    store: SnapshotStore,
    tools: Vec<TrackedTool>,
    fetcher: Arc<dyn VersionFetcher>,
    update_source: Option<Arc<dyn UpdateInfoSource>>,
    config: UpdaterConfig,
    running: AtomicBool,
}

impl Updater {
    pub fn new(
        store: SnapshotStore,
        tools: Vec<TrackedTool>,
        fetcher: Arc<dyn VersionFetcher>,
        config: UpdaterConfig,
    ) -> Self {
        let mut unique: Vec<TrackedTool> = Vec::with_capacity(tools.len());
        for tool in tools {
            if unique.iter().any(|existing| existing.id == tool.id) {
                warn!("Ignoring duplicate tracked tool '{}'", tool.id);
                continue;
            }
            unique.push(tool);
        }

        Self {
            store,
            tools: unique,
            fetcher,
            update_source: None,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_update_source(mut self, source: Arc<dyn UpdateInfoSource>) -> Self {
        self.update_source = Some(source);
        self
    }

    pub fn tools(&self) -> &[TrackedTool] {
        &self.tools
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one refresh cycle. Returns `None` without doing anything when a
    /// cycle is already in progress on this updater.
    pub async fn run_cycle(&self) -> Option<CycleResult> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Refresh cycle already in progress, skipping");
            return None;
        }
        let _running = RunningGuard(&self.running);

        Some(self.refresh().await)
    }

    #[instrument(skip(self), fields(tools = self.tools.len()))]
    async fn refresh(&self) -> CycleResult {
        let threshold = threshold_from_std(self.config.stale_threshold);
        let previous = self.store.load_snapshot();
        debug!(
            "Starting refresh cycle over snapshot from {:?}",
            previous.updated_at
        );

        let outcomes = self.fetch_all().await;
        let tools_failed = outcomes.iter().filter(|outcome| outcome.is_err()).count();
        let now = Utc::now();
        let tools = merge_records(&self.tools, &previous, outcomes, now, threshold);

        // Another process may have written in the meantime; never go back in time.
        let on_disk = self.store.load_snapshot();
        let updated_at = [previous.updated_at, on_disk.updated_at]
            .into_iter()
            .flatten()
            .fold(now, Ord::max);

        let mut status = cycle_status(&tools, now, threshold);
        let snapshot = VersionSnapshot {
            tools,
            updated_at: Some(updated_at),
            status,
        };

        if let Err(e) = self.store.save_snapshot(&snapshot) {
            error!("Failed to persist snapshot: {}", e);
            status = SnapshotStatus::Error;
        }

        let update_info_refreshed = self.refresh_update_info(now).await;

        let result = CycleResult {
            status,
            tools_total: snapshot.tools.len(),
            tools_failed,
            updated_at,
            update_info_refreshed,
        };
        info!(
            "Refresh cycle finished: status={}, tools={}, failed={}",
            result.status, result.tools_total, result.tools_failed
        );
        result
    }

    /// Fetch every tool in its own task so that a slow, failing or panicking
    /// adapter only affects its own record. Results are in `self.tools` order.
    async fn fetch_all(&self) -> Vec<Result<String, FetchError>> {
        let timeout = self.config.fetch_timeout;
        let handles: Vec<JoinHandle<Result<String, FetchError>>> = self
            .tools
            .iter()
            .map(|tool| {
                let fetcher = Arc::clone(&self.fetcher);
                let tool_id = tool.id.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout(timeout, fetcher.fetch(&tool_id)).await {
                        Ok(result) => result,
                        Err(_) => Err(FetchError::Timeout(timeout)),
                    }
                })
            })
            .collect();

        futures::future::join_all(handles)
            .await
            .into_iter()
            .zip(&self.tools)
            .map(|(joined, tool)| {
                let outcome = joined.unwrap_or_else(|e| Err(FetchError::Aborted(e.to_string())));
                match &outcome {
                    Ok(version) => debug!("Resolved {} to {}", tool.id, version),
                    Err(e) => warn!("Failed to resolve {}: {}", tool.id, e),
                }
                outcome
            })
            .collect()
    }

    async fn refresh_update_info(&self, now: DateTime<Utc>) -> bool {
        let Some(source) = &self.update_source else {
            return false;
        };

        let timeout = self.config.fetch_timeout;
        let mut info = match tokio::time::timeout(timeout, source.fetch_update_info()).await {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                warn!("Failed to fetch update document: {}", e);
                return false;
            }
            Err(_) => {
                warn!("{}", FetchError::Timeout(timeout));
                return false;
            }
        };

        let previous = self.store.load_update_info();
        info.updated_at = Some(previous.updated_at.map_or(now, |prev| prev.max(now)));

        match self.store.save_update_info(&info) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to persist update document: {}", e);
                false
            }
        }
    }

    /// Spawn the periodic task: one cycle right away, then one per
    /// `refresh_interval`. Ticks missed while a cycle runs are dropped.
    pub fn start(self: Arc<Self>) -> UpdaterHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        let period = self.config.refresh_interval.max(Duration::from_secs(1));

        let task = tokio::spawn(async move {
            info!("Updater started, refreshing every {:?}", period);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.run_cycle().await;
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }

            info!("Updater stopped");
        });

        UpdaterHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running updater task
pub struct UpdaterHandle {
    shutdown: watch::Sender<()>,
    task: JoinHandle<()>,
}

impl UpdaterHandle {
    /// Stop scheduling cycles and wait for the task to exit. A cycle that is
    /// already running finishes first.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            error!("Updater task ended abnormally: {}", e);
        }
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fold one cycle's fetch outcomes into the previous records.
///
/// Records follow `tools` order; tools that are no longer tracked are dropped
/// and a failed fetch never discards a previously known version.
pub fn merge_records(
    tools: &[TrackedTool],
    previous: &VersionSnapshot,
    outcomes: Vec<Result<String, FetchError>>,
    now: DateTime<Utc>,
    threshold: chrono::Duration,
) -> Vec<ToolVersionRecord> {
    tools
        .iter()
        .zip(outcomes)
        .map(|(tool, outcome)| {
            let mut record = previous
                .find_tool(&tool.id)
                .cloned()
                .unwrap_or_else(|| ToolVersionRecord::unknown(tool));
            record.name = tool.name.clone();
            record.last_check_at = Some(now);

            match outcome {
                Ok(version) => {
                    record.latest_version = Some(version);
                    record.last_check_error = None;
                    record.is_stale = false;
                    record.last_success_at = Some(now);
                }
                Err(e) => {
                    record.last_check_error = Some(e.to_string());
                    record.is_stale = success_expired(record.last_success_at, now, threshold);
                }
            }
            record
        })
        .collect()
}

fn success_expired(
    last_success_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: chrono::Duration,
) -> bool {
    last_success_at.is_none_or(|at| now.signed_duration_since(at) > threshold)
}

/// `stale` when any tool has gone without a successful check for longer than
/// the threshold, `ok` otherwise.
pub fn cycle_status(
    tools: &[ToolVersionRecord],
    now: DateTime<Utc>,
    threshold: chrono::Duration,
) -> SnapshotStatus {
    if tools
        .iter()
        .any(|record| success_expired(record.last_success_at, now, threshold))
    {
        SnapshotStatus::Stale
    } else {
        SnapshotStatus::Ok
    }
}
