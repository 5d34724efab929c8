//! Batch orchestrator: plan, dedup, submit, poll, materialize.
//!
//! Data flows one way: combinations → descriptors → handles → completion
//! records → materialized artifacts → ledger updates. Submission uses a
//! fixed-size concurrent pool; everything after runs on a single
//! cooperative loop, so no locking is needed around the outstanding set.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use reverie_client::{resolve_playlist, PlaylistApi};
use reverie_core::{
    build_descriptor, compose_prompt, defaults, scan_assets, Algorithm, BatchConfig, Error,
    Fingerprint, JobDescriptor, Result,
};

use crate::ledger::known_fingerprints;
use crate::materialize::{Destination, JobContext, Materializer};
use crate::results::{poll, ResultStore};
use crate::submit::Submitter;

/// Tuning knobs for a batch run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Size of the submission worker pool, independent of batch size.
    pub max_concurrent: usize,
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    /// Wall-clock deadline for the entire poll phase.
    pub deadline: Duration,
    /// Plan and dedup only; submit nothing.
    pub dry_run: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::SUBMIT_MAX_CONCURRENT,
            poll_interval: Duration::from_secs(defaults::POLL_INTERVAL_SECS),
            deadline: Duration::from_secs(defaults::BATCH_DEADLINE_SECS),
            dry_run: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Apply per-batch overrides from the batch file.
    pub fn apply_batch(mut self, batch: &BatchConfig) -> Self {
        if let Some(secs) = batch.deadline_secs {
            self.deadline = Duration::from_secs(secs);
        }
        if let Some(secs) = batch.poll_interval_secs {
            self.poll_interval = Duration::from_secs(secs);
        }
        self
    }
}

/// One combination of the batch's iteration axes, ready for submission.
#[derive(Debug, Clone)]
pub struct PlannedJob {
    pub index: usize,
    pub fingerprint: Fingerprint,
    pub display_name: String,
    /// Source keyframe to cross-link after upload (image-to-video).
    pub keyframe: Option<PathBuf>,
    /// Iteration-specific descriptor fields; always override base fields.
    overrides: Vec<(String, JsonValue)>,
}

impl PlannedJob {
    fn into_context(self, extension: &'static str) -> JobContext {
        JobContext {
            index: self.index,
            fingerprint: self.fingerprint,
            display_name: self.display_name,
            keyframe: self.keyframe,
            extension,
        }
    }
}

/// Expand a batch into the full cross-product of its iteration axes.
pub fn plan_jobs(batch: &BatchConfig) -> Result<Vec<PlannedJob>> {
    let mut jobs = Vec::new();

    match batch.algorithm {
        Algorithm::ImageToVideo => {
            let dir = batch.image_path.as_ref().ok_or_else(|| {
                Error::Config("image-to-video batches require image_path".to_string())
            })?;
            let assets = scan_assets(dir)?;
            let base_prompt = batch.prompt.clone().unwrap_or_default();

            for asset in &assets {
                for combo in batch.effective_combos() {
                    let asset_name = asset
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    let stem = asset
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_else(|| asset_name.clone());
                    let prompt = compose_prompt(&base_prompt, &combo);
                    let display_name = if combo.is_empty() {
                        stem
                    } else {
                        format!("{} {}", stem, combo)
                    };

                    jobs.push(PlannedJob {
                        index: jobs.len(),
                        fingerprint: Fingerprint::derive(&asset_name, &combo),
                        display_name,
                        keyframe: Some(asset.clone()),
                        overrides: vec![
                            ("prompt".to_string(), json!(prompt)),
                            ("image".to_string(), json!(asset.to_string_lossy())),
                        ],
                    });
                }
            }
        }
        Algorithm::TextToImage => {
            let prompt = batch
                .prompt
                .clone()
                .ok_or_else(|| Error::Config("text-to-image batches require a prompt".to_string()))?;
            let base_name = batch
                .base
                .get("output_filename")
                .and_then(JsonValue::as_str)
                .unwrap_or("image");
            let seed = batch.base.get("seed").cloned().unwrap_or(json!(-1));

            for generation in 1..=batch.num_generations {
                jobs.push(PlannedJob {
                    index: jobs.len(),
                    fingerprint: Fingerprint::derive(&format!("generation-{}", generation), &prompt),
                    display_name: format!("{}_{:04}", base_name, generation),
                    keyframe: None,
                    overrides: vec![
                        ("prompt".to_string(), json!(prompt)),
                        ("seed".to_string(), seed.clone()),
                    ],
                });
            }
        }
        Algorithm::Upscale => {
            if batch.sources.is_empty() {
                return Err(Error::Config(
                    "upscale batches require a non-empty sources list".to_string(),
                ));
            }
            for source in &batch.sources {
                let short = source.rsplit('/').next().unwrap_or(source).to_string();
                jobs.push(PlannedJob {
                    index: jobs.len(),
                    fingerprint: Fingerprint::derive(source, "upscale"),
                    display_name: short,
                    keyframe: None,
                    overrides: vec![("source".to_string(), json!(source))],
                });
            }
        }
    }

    Ok(jobs)
}

/// Drop combinations already materialized (ledger) or colliding with a
/// sibling earlier in the same plan (intra-batch dedup).
fn filter_duplicates(
    jobs: Vec<PlannedJob>,
    ledger: &HashSet<Fingerprint>,
) -> (Vec<PlannedJob>, usize) {
    let mut seen: HashSet<Fingerprint> = HashSet::new();
    let mut kept = Vec::with_capacity(jobs.len());
    let mut skipped = 0;

    for job in jobs {
        if ledger.contains(&job.fingerprint) || !seen.insert(job.fingerprint.clone()) {
            debug!(fingerprint = %job.fingerprint, name = %job.display_name, "skipping duplicate");
            skipped += 1;
        } else {
            kept.push(job);
        }
    }

    (kept, skipped)
}

/// Final counts for one batch run.
#[derive(Debug, Default, Clone)]
pub struct BatchReport {
    pub planned: usize,
    pub skipped_duplicate: usize,
    pub submitted: usize,
    pub failed_to_submit: usize,
    /// Accepted submissions whose handle could not be parsed; the jobs may
    /// still complete but cannot be tracked.
    pub untracked: usize,
    pub materialized: usize,
    pub timed_out: usize,
    /// Handles still pending when the run ended (timeout or interrupt).
    pub outstanding: Vec<String>,
}

impl BatchReport {
    /// A run succeeds unless a job failed to submit; timed-out jobs remain
    /// recoverable externally and do not fail the batch.
    pub fn success(&self) -> bool {
        self.failed_to_submit == 0
    }
}

/// Composes planning, dedup, bounded-concurrency submission, and the
/// poll/materialize loop.
pub struct BatchOrchestrator {
    submitter: Arc<dyn Submitter>,
    store: Arc<dyn ResultStore>,
    api: Arc<dyn PlaylistApi>,
    config: OrchestratorConfig,
}

impl BatchOrchestrator {
    pub fn new(
        submitter: Arc<dyn Submitter>,
        store: Arc<dyn ResultStore>,
        api: Arc<dyn PlaylistApi>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            submitter,
            store,
            api,
            config,
        }
    }

    /// Run one batch to completion, deadline, or shutdown signal.
    #[instrument(skip_all, fields(algorithm = %batch.algorithm))]
    pub async fn run(
        &self,
        batch: &BatchConfig,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        let planned = plan_jobs(batch)?;
        report.planned = planned.len();
        info!(planned = planned.len(), "planned batch combinations");

        // Resolve the destination before submitting anything: a playlist we
        // cannot create is a configuration-level failure.
        let destination = match (&batch.playlist, &batch.output_folder) {
            (Some(spec), _) => {
                let playlist = resolve_playlist(self.api.as_ref(), spec).await?;
                info!(playlist = %playlist.uuid, name = %playlist.name, "destination playlist ready");
                Some(Destination::Playlist(playlist.uuid))
            }
            (None, Some(dir)) => Some(Destination::Folder(dir.clone())),
            (None, None) => None,
        };

        let ledger = match &destination {
            Some(Destination::Playlist(uuid)) => known_fingerprints(self.api.as_ref(), uuid).await,
            _ => HashSet::new(),
        };

        let (jobs, skipped) = filter_duplicates(planned, &ledger);
        report.skipped_duplicate = skipped;
        if skipped > 0 {
            info!(skipped, "skipped already-materialized combinations");
        }

        // Build every descriptor up front so a missing required field aborts
        // before any submission.
        let mut prepared: Vec<(PlannedJob, JobDescriptor)> = Vec::with_capacity(jobs.len());
        for job in jobs {
            let descriptor = build_descriptor(batch.algorithm, &batch.base, job.overrides.clone())?;
            prepared.push((job, descriptor));
        }

        if self.config.dry_run {
            info!(
                would_submit = prepared.len(),
                skipped = report.skipped_duplicate,
                "dry run, submitting nothing"
            );
            return Ok(report);
        }

        let extension = batch.algorithm.artifact_extension();
        let tracked = self.submit_all(prepared, extension, &mut report).await;

        info!(
            submitted = report.submitted,
            failed = report.failed_to_submit,
            untracked = report.untracked,
            tracking = tracked.len(),
            "submission phase complete"
        );

        let Some(destination) = destination else {
            // Nowhere to materialize; the queue worker owns the results now.
            report.outstanding = tracked.into_iter().map(|(handle, _)| handle).collect();
            return Ok(report);
        };

        if !tracked.is_empty() {
            let materializer = Materializer::new(self.api.clone(), destination)?;
            self.poll_loop(batch.algorithm, tracked, &materializer, shutdown_rx, &mut report)
                .await;
        }

        Ok(report)
    }

    /// Submit prepared jobs through a fixed-size worker pool.
    ///
    /// Jobs are spawned in waves of at most `max_concurrent`; outcomes are
    /// aggregated through the pool's own join, so no shared mutable state.
    async fn submit_all(
        &self,
        prepared: Vec<(PlannedJob, JobDescriptor)>,
        extension: &'static str,
        report: &mut BatchReport,
    ) -> Vec<(String, JobContext)> {
        let total = prepared.len();
        let mut tracked = Vec::with_capacity(total);
        let mut queue = prepared.into_iter();

        loop {
            let wave: Vec<_> = queue.by_ref().take(self.config.max_concurrent).collect();
            if wave.is_empty() {
                break;
            }

            let mut tasks = JoinSet::new();
            for (job, descriptor) in wave {
                let submitter = self.submitter.clone();
                tasks.spawn(async move {
                    let outcome = submitter.submit(&descriptor).await;
                    (job, outcome)
                });
            }

            while let Some(result) = tasks.join_next().await {
                match result {
                    Ok((job, Ok(handle))) => {
                        info!(
                            handle = %handle,
                            name = %job.display_name,
                            progress = %format!("{}/{}", report.submitted + 1, total),
                            "job queued"
                        );
                        report.submitted += 1;
                        tracked.push((handle, job.into_context(extension)));
                    }
                    Ok((job, Err(Error::HandleMissing))) => {
                        // Accepted by the queue but untrackable; surfaced in
                        // the report rather than silently dropped.
                        warn!(name = %job.display_name, "submission accepted but handle missing, job is untracked");
                        report.submitted += 1;
                        report.untracked += 1;
                    }
                    Ok((job, Err(e))) => {
                        warn!(name = %job.display_name, error = %e, "submission failed");
                        report.failed_to_submit += 1;
                    }
                    Err(e) => {
                        error!(error = ?e, "submission task panicked");
                        report.failed_to_submit += 1;
                    }
                }
            }
        }

        tracked
    }

    /// Advance all pending handles once per cycle until none remain, the
    /// deadline passes, or a shutdown signal arrives.
    ///
    /// Worst case the loop runs one interval past the deadline (checked at
    /// the top of each cycle), so it terminates within deadline + interval.
    async fn poll_loop(
        &self,
        algorithm: Algorithm,
        tracked: Vec<(String, JobContext)>,
        materializer: &Materializer,
        shutdown_rx: &mut mpsc::Receiver<()>,
        report: &mut BatchReport,
    ) {
        let queue = algorithm.queue();
        let started = Instant::now();
        let mut outstanding = tracked;
        let mut interrupted = false;

        info!(
            waiting = outstanding.len(),
            deadline_secs = self.config.deadline.as_secs(),
            "waiting for jobs to complete"
        );

        while !outstanding.is_empty() {
            if shutdown_rx.try_recv().is_ok() {
                interrupted = true;
                break;
            }
            if started.elapsed() >= self.config.deadline {
                break;
            }

            let mut still_pending = Vec::with_capacity(outstanding.len());
            for (handle, ctx) in outstanding.drain(..) {
                match poll(self.store.as_ref(), queue, &handle).await {
                    Some(payload) => {
                        match materializer.materialize(&payload, &handle, &ctx).await {
                            Ok(()) => {
                                report.materialized += 1;
                            }
                            Err(e) => {
                                // Not fatal for the batch, only for this
                                // attempt; the handle goes back in the set.
                                warn!(handle = %handle, error = %e, "materialization failed, will retry next cycle");
                                still_pending.push((handle, ctx));
                            }
                        }
                    }
                    None => still_pending.push((handle, ctx)),
                }
            }
            outstanding = still_pending;

            if outstanding.is_empty() {
                break;
            }

            debug!(waiting = outstanding.len(), "jobs still pending");
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    interrupted = true;
                    break;
                }
                _ = sleep(self.config.poll_interval) => {}
            }
        }

        if !outstanding.is_empty() {
            if interrupted {
                info!(
                    remaining = outstanding.len(),
                    materialized = report.materialized,
                    "interrupted, reporting partial progress"
                );
            } else {
                report.timed_out = outstanding.len();
                warn!(timed_out = outstanding.len(), "deadline exceeded with jobs still pending");
            }
            report.outstanding = outstanding.into_iter().map(|(handle, _)| handle).collect();
        }
    }
}
