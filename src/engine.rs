//! Spread Engine
//!
//! Collector/Executor pipeline in the style of Artemis:
//!
//!   Collectors --mpsc--> dispatcher (Pipeline) --broadcast--> Executors
//!
//! Collectors turn external feeds into validated `PoolUpdate`s. A single
//! dispatcher task owns the reconciler, detector and tracker and runs each
//! update to completion before taking the next, so the core components need
//! no locking of their own. Execution candidates fan out to every executor.
//!
//! Based on: https://github.com/paradigmxyz/artemis

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::arbitrage::{DetectorConfig, ExecutionCostModel, OpportunityTracker, SpreadDetector, TrackerConfig};
use crate::config::SpreadConfig;
use crate::ingest::parse_update_line;
use crate::pool::PoolStateReconciler;
use crate::spread_logger::SpreadLogger;
use crate::types::{ExecutionCandidate, PoolUpdate};

/// A stream of events emitted by a Collector
pub type CollectorStream<'a, E> = Pin<Box<dyn Stream<Item = E> + Send + 'a>>;

/// Produces validated pool updates from an external feed
#[async_trait]
pub trait Collector: Send + Sync {
    async fn get_event_stream(&self) -> Result<CollectorStream<'_, PoolUpdate>>;

    fn name(&self) -> &str;
}

/// Consumes execution candidates
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, candidate: ExecutionCandidate) -> Result<()>;
}

/// Thresholds that can be swapped while running
#[derive(Debug, Clone)]
pub struct Thresholds {
    pub detector: DetectorConfig,
    pub execution_cost: ExecutionCostModel,
    pub tracker: TrackerConfig,
}

impl From<&SpreadConfig> for Thresholds {
    fn from(config: &SpreadConfig) -> Self {
        Self {
            detector: config.detector.clone(),
            execution_cost: config.execution_cost,
            tracker: config.tracker.clone(),
        }
    }
}

/// Running counters, logged on maintenance ticks and at shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub updates: u64,
    pub snapshots: u64,
    pub spreads: u64,
    pub detections: u64,
    pub opportunities: u64,
    pub candidates: u64,
}

/// Reconciler -> detector -> tracker, driven one update at a time
pub struct Pipeline {
    reconciler: PoolStateReconciler,
    detector: SpreadDetector,
    tracker: OpportunityTracker,
    spread_logger: Option<SpreadLogger>,
    /// Slots of history kept by the reconciler and detector cache
    retention_slots: u64,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(reconciler: PoolStateReconciler, detector: SpreadDetector, tracker: OpportunityTracker) -> Self {
        Self {
            reconciler,
            detector,
            tracker,
            spread_logger: None,
            retention_slots: u64::MAX,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_spread_logger(mut self, logger: SpreadLogger) -> Self {
        self.spread_logger = Some(logger);
        self
    }

    pub fn with_retention_slots(mut self, slots: u64) -> Self {
        self.retention_slots = slots;
        self
    }

    /// Run one update through every stage. `now` drives the tracker's gates.
    pub fn process_update(&mut self, update: PoolUpdate, now: Instant) -> Vec<ExecutionCandidate> {
        self.stats.updates += 1;

        let Some(snapshot) = self.reconciler.apply(update) else {
            return Vec::new();
        };
        self.stats.snapshots += 1;

        let mut candidates = Vec::new();
        for evaluation in self.detector.on_snapshot(snapshot) {
            self.stats.spreads += 1;
            if let Some(logger) = self.spread_logger.as_mut() {
                logger.log_spread(&evaluation.spread);
            }

            if let Some(detection) = &evaluation.detection {
                self.stats.detections += 1;
                if let Some(logger) = self.spread_logger.as_mut() {
                    logger.log_detection(detection);
                }
            }

            if let Some(opportunity) = &evaluation.opportunity {
                self.stats.opportunities += 1;
                if let Some(candidate) = self.tracker.observe(opportunity, now) {
                    self.stats.candidates += 1;
                    candidates.push(candidate);
                }
            }
        }
        candidates
    }

    /// Evict stale tracker routes and state older than the retention window
    pub fn run_maintenance(&mut self, now: Instant) {
        let routes = self.tracker.evict_stale(now);

        let (mut pools, mut cached) = (0, 0);
        if let Some(latest) = self.reconciler.latest_sequence() {
            let min_sequence = latest.saturating_sub(self.retention_slots);
            if min_sequence > 0 {
                pools = self.reconciler.prune_stale(min_sequence);
                cached = self.detector.prune_stale(min_sequence);
            }
        }

        debug!(
            "Maintenance: evicted {} routes, reset {} pools, dropped {} cached snapshots | {:?}",
            routes, pools, cached, self.stats
        );
    }

    pub fn apply_thresholds(&mut self, thresholds: Thresholds) {
        self.detector.update_config(thresholds.detector, thresholds.execution_cost);
        self.tracker.update_config(thresholds.tracker);
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn reconciler(&self) -> &PoolStateReconciler {
        &self.reconciler
    }

    pub fn detector(&self) -> &SpreadDetector {
        &self.detector
    }

    pub fn tracker(&self) -> &OpportunityTracker {
        &self.tracker
    }
}

/// Wires collectors, the pipeline and executors together
pub struct Engine {
    collectors: Vec<Box<dyn Collector>>,
    executors: Vec<Box<dyn Executor>>,
    update_channel_capacity: usize,
    candidate_channel_capacity: usize,
    maintenance_interval: Duration,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            collectors: vec![],
            executors: vec![],
            update_channel_capacity: 512,
            candidate_channel_capacity: 512,
            maintenance_interval: Duration::from_secs(10),
        }
    }

    pub fn with_update_channel_capacity(mut self, capacity: usize) -> Self {
        self.update_channel_capacity = capacity;
        self
    }

    pub fn with_candidate_channel_capacity(mut self, capacity: usize) -> Self {
        self.candidate_channel_capacity = capacity;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn add_collector(&mut self, collector: Box<dyn Collector>) {
        self.collectors.push(collector);
    }

    pub fn add_executor(&mut self, executor: Box<dyn Executor>) {
        self.executors.push(executor);
    }

    /// Spawn executors, the dispatcher and collectors.
    ///
    /// The dispatcher stops once every collector has finished; executors stop
    /// once the dispatcher has. `reloads` delivers new thresholds (SIGHUP).
    pub async fn run(self, mut pipeline: Pipeline, mut reloads: mpsc::Receiver<Thresholds>) -> Result<JoinSet<()>> {
        let (update_tx, mut update_rx) = mpsc::channel::<PoolUpdate>(self.update_channel_capacity);
        let (candidate_tx, _) = broadcast::channel::<ExecutionCandidate>(self.candidate_channel_capacity);

        let mut set = JoinSet::new();

        // Spawn executors
        for executor in self.executors {
            let mut receiver = candidate_tx.subscribe();
            set.spawn(async move {
                info!("Starting executor...");
                loop {
                    match receiver.recv().await {
                        Ok(candidate) => {
                            if let Err(e) = executor.execute(candidate).await {
                                error!("Error executing candidate: {:#}", e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Executor lagged, skipped {} candidates", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                info!("Executor stopped");
            });
        }

        // Spawn dispatcher
        let maintenance_interval = self.maintenance_interval;
        set.spawn(async move {
            info!("Starting dispatcher...");
            let mut maintenance = tokio::time::interval(maintenance_interval);
            maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut reloads_open = true;

            loop {
                tokio::select! {
                    update = update_rx.recv() => {
                        let Some(update) = update else { break };
                        for candidate in pipeline.process_update(update, Instant::now()) {
                            // No executors subscribed is not an error
                            let _ = candidate_tx.send(candidate);
                        }
                    }
                    _ = maintenance.tick() => {
                        pipeline.run_maintenance(Instant::now());
                    }
                    reload = reloads.recv(), if reloads_open => {
                        match reload {
                            Some(thresholds) => {
                                info!("Applying reloaded thresholds");
                                pipeline.apply_thresholds(thresholds);
                            }
                            None => reloads_open = false,
                        }
                    }
                }
            }

            info!("Dispatcher stopped | {:?}", pipeline.stats());
        });

        // Spawn collectors
        for collector in self.collectors {
            let update_tx = update_tx.clone();
            set.spawn(async move {
                info!("Starting collector {}...", collector.name());
                match collector.get_event_stream().await {
                    Ok(mut stream) => {
                        while let Some(update) = stream.next().await {
                            if update_tx.send(update).await.is_err() {
                                error!("Dispatcher gone, collector {} stopping", collector.name());
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Error starting collector {}: {:#}", collector.name(), e);
                    }
                }
                info!("Collector {} finished", collector.name());
            });
        }

        Ok(set)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

enum LineSource {
    File(PathBuf),
    Stdin,
}

/// Reads newline-delimited JSON pool updates from a file or stdin.
/// Lines that fail validation are logged and skipped.
pub struct JsonLinesCollector {
    source: LineSource,
    name: String,
}

impl JsonLinesCollector {
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: format!("jsonl:{}", path.display()),
            source: LineSource::File(path),
        }
    }

    pub fn from_stdin() -> Self {
        Self {
            source: LineSource::Stdin,
            name: "jsonl:stdin".to_string(),
        }
    }
}

fn update_stream<R>(reader: R, name: String) -> CollectorStream<'static, PoolUpdate>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let mut line_no = 0u64;
    let stream = LinesStream::new(reader.lines()).filter_map(move |line| {
        line_no += 1;
        match line {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return None;
                }
                match parse_update_line(trimmed) {
                    Ok(update) => Some(update),
                    Err(e) => {
                        warn!("{} line {} rejected: {}", name, line_no, e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!("{} read error at line {}: {}", name, line_no, e);
                None
            }
        }
    });
    Box::pin(stream)
}

#[async_trait]
impl Collector for JsonLinesCollector {
    async fn get_event_stream(&self) -> Result<CollectorStream<'_, PoolUpdate>> {
        match &self.source {
            LineSource::File(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open update feed {}", path.display()))?;
                Ok(update_stream(BufReader::new(file), self.name.clone()))
            }
            LineSource::Stdin => Ok(update_stream(BufReader::new(tokio::io::stdin()), self.name.clone())),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CandidateLogRecord<'a> {
    timestamp: i64,
    pair_key: String,
    #[serde(flatten)]
    candidate: &'a ExecutionCandidate,
}

/// Logs candidates with tracing and appends them to a JSONL file
pub struct CandidateLogExecutor {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl CandidateLogExecutor {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open candidate log {}", path.display()))?;

        info!("Candidate log: {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl Executor for CandidateLogExecutor {
    async fn execute(&self, candidate: ExecutionCandidate) -> Result<()> {
        info!(
            "Execution candidate {} | best ${:.2} | {}ms | {}x",
            candidate.pair_key(),
            candidate.best_net_usd,
            candidate.persistence_ms,
            candidate.occurrences
        );

        let record = CandidateLogRecord {
            timestamp: Utc::now().timestamp_millis(),
            pair_key: candidate.pair_key(),
            candidate: &candidate,
        };
        let mut line = serde_json::to_string(&record).context("Failed to serialize candidate")?;
        line.push('\n');

        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        Ok(())
    }
}
