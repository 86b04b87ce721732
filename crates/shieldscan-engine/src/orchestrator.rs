//! Scan Orchestrator
//!
//! Owns the scan lifecycle: validates submissions, runs every scan on its own
//! task with the enabled modules dispatched concurrently, joins their
//! results, scores them and writes the terminal state.
//!
//! Terminal writes and cancellation both happen under the in-flight lock, so
//! a scan record has exactly one writer at a time and a cancelled scan never
//! gets its results written afterwards.

use crate::registry::{ModuleInfo, ModuleRegistry};
use crate::scorer::{self, ModuleReport};
use crate::store::ScanStore;
use serde::Deserialize;
use shieldscan_common::config::{DuplicatePolicy, ScannerConfig};
use shieldscan_core::{
    CancelHandle, CancelSignal, Error, Finding, ModuleError, ModuleResult, ProbeModule, Result,
    Scan, ScanDepth, ScanProfile, ScanTarget, ScoreHistoryEntry, Sensitivity, TargetType,
};
use shieldscan_vuln::{graph, prioritize, AttackGraph, PriorityReport};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Failure reason written onto scans a previous process left unfinished
pub const RESTART_REASON: &str = "interrupted by engine restart";

type ModuleOutcome = std::result::Result<ModuleResult, ModuleError>;

/// A scan submission as it arrives from a client
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanRequest {
    pub target: String,
    #[serde(default)]
    pub target_type: Option<TargetType>,
    #[serde(default)]
    pub depth: Option<ScanDepth>,
    #[serde(default)]
    pub modules: Option<Vec<String>>,
    #[serde(default)]
    pub sensitivity: Option<Sensitivity>,
}

impl ScanRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn depth(mut self, depth: ScanDepth) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn modules<S: Into<String>>(mut self, modules: impl IntoIterator<Item = S>) -> Self {
        self.modules = Some(modules.into_iter().map(Into::into).collect());
        self
    }

    pub fn sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = Some(sensitivity);
        self
    }
}

/// Result of a submission
#[derive(Debug, Clone)]
pub struct Submission {
    pub scan: Scan,
    /// The duplicate policy handed back a scan already in flight
    pub existing: bool,
}

struct InFlight {
    scan_id: String,
    cancel: CancelHandle,
}

type InFlightMap = HashMap<String, InFlight>;

fn release(in_flight: &mut InFlightMap, scan: &Scan) {
    if in_flight
        .get(&scan.target)
        .is_some_and(|entry| entry.scan_id == scan.id)
    {
        in_flight.remove(&scan.target);
    }
}

struct Inner {
    registry: ModuleRegistry,
    store: Arc<dyn ScanStore>,
    config: ScannerConfig,
    scan_slots: Arc<Semaphore>,
    /// Keyed by normalized target
    in_flight: Mutex<InFlightMap>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(registry: ModuleRegistry, store: Arc<dyn ScanStore>, config: ScannerConfig) -> Self {
        let slots = config.max_concurrent_scans.max(1);
        Self {
            inner: Arc::new(Inner {
                registry,
                store,
                config,
                scan_slots: Arc::new(Semaphore::new(slots)),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn catalog(&self) -> Vec<ModuleInfo> {
        self.inner.registry.catalog()
    }

    pub fn store(&self) -> Arc<dyn ScanStore> {
        Arc::clone(&self.inner.store)
    }

    /// Validate a request, apply the duplicate policy, record the scan as
    /// `queued` and start it.
    ///
    /// Every validation failure is returned before anything is stored.
    pub async fn submit(&self, request: ScanRequest) -> Result<Submission> {
        let target = match request.target_type {
            Some(expected) => ScanTarget::parse_as(&request.target, expected)?,
            None => ScanTarget::parse(&request.target)?,
        };
        let registry = &self.inner.registry;
        let modules = registry.select(request.modules.as_deref())?;
        let depth = request.depth.unwrap_or_default();
        let sensitivity = request.sensitivity.unwrap_or_default();

        let skipped: Vec<String> = modules
            .iter()
            .filter(|name| {
                registry
                    .get(name)
                    .is_some_and(|m| !sensitivity.permits(m.intrusiveness()))
            })
            .cloned()
            .collect();
        if skipped.len() == modules.len() {
            return Err(Error::Validation(format!(
                "none of the requested modules may run at sensitivity '{}'",
                sensitivity.as_str()
            )));
        }

        // Domains must resolve and CIDR blocks must fit before a record exists
        target.resolve(self.inner.config.max_cidr_hosts).await?;

        let key = target.display();
        let mut in_flight = self.inner.in_flight.lock().await;
        if let Some(existing_id) = in_flight.get(&key).map(|e| e.scan_id.clone()) {
            match self.inner.config.duplicate_policy {
                DuplicatePolicy::Reject => {
                    return Err(Error::DuplicateScan {
                        target: key,
                        scan_id: existing_id,
                    });
                }
                DuplicatePolicy::ReturnExisting => {
                    if let Some(scan) = self.inner.store.get_scan(&existing_id).await? {
                        info!(scan_id = %scan.id, target = %key, "returning in-flight scan");
                        return Ok(Submission {
                            scan,
                            existing: true,
                        });
                    }
                }
            }
        }

        let mut scan = Scan::new(key.clone(), target.target_type(), depth, sensitivity, modules);
        scan.modules_skipped = skipped;
        self.inner.store.insert_scan(&scan).await?;

        let (handle, signal) = CancelHandle::new();
        in_flight.insert(
            key,
            InFlight {
                scan_id: scan.id.clone(),
                cancel: handle,
            },
        );
        drop(in_flight);

        info!(
            scan_id = %scan.id,
            target = %scan.target,
            depth = %scan.scan_depth.as_str(),
            sensitivity = %scan.sensitivity.as_str(),
            skipped = ?scan.modules_skipped,
            "scan queued"
        );

        let inner = Arc::clone(&self.inner);
        let span = info_span!("scan", scan_id = %scan.id, target = %scan.target);
        tokio::spawn(inner.execute(scan.clone(), target, signal).instrument(span));

        Ok(Submission {
            scan,
            existing: false,
        })
    }

    /// Cancel a queued or running scan.
    ///
    /// Writes `failed` with the cancellation marker immediately; the scan's
    /// task discards whatever its modules still return. Cancelling a
    /// terminal scan changes nothing.
    pub async fn cancel(&self, scan_id: &str) -> Result<Scan> {
        let mut in_flight = self.inner.in_flight.lock().await;
        let mut scan = self.scan(scan_id).await?;
        if scan.is_terminal() {
            debug!(scan_id, status = %scan.status, "cancel on terminal scan ignored");
            return Ok(scan);
        }

        if let Some(entry) = in_flight.get(&scan.target) {
            if entry.scan_id == scan.id {
                entry.cancel.cancel();
            }
        }
        release(&mut in_flight, &scan);

        scan.mark_cancelled()?;
        self.inner.store.update_scan(&scan).await?;
        info!(scan_id, target = %scan.target, "scan cancelled");
        Ok(scan)
    }

    /// Mark scans a previous process left `queued`/`running` as failed
    pub async fn recover(&self) -> Result<usize> {
        let in_flight = self.inner.in_flight.lock().await;
        let mut recovered = 0;
        for mut scan in self.inner.store.unfinished_scans().await? {
            if in_flight.values().any(|e| e.scan_id == scan.id) {
                continue;
            }
            scan.mark_failed(RESTART_REASON, None)?;
            self.inner.store.update_scan(&scan).await?;
            warn!(scan_id = %scan.id, target = %scan.target, "unfinished scan marked failed");
            recovered += 1;
        }
        Ok(recovered)
    }

    pub async fn scan(&self, scan_id: &str) -> Result<Scan> {
        self.inner
            .store
            .get_scan(scan_id)
            .await?
            .ok_or_else(|| Error::ScanNotFound {
                scan_id: scan_id.to_string(),
            })
    }

    pub async fn list_scans(&self) -> Result<Vec<Scan>> {
        self.inner.store.list_scans().await
    }

    pub async fn findings(&self, scan_id: &str) -> Result<Vec<Finding>> {
        self.scan(scan_id).await?;
        self.inner.store.findings(scan_id).await
    }

    /// Score history for a target, written the way the client wrote it
    pub async fn history(&self, target: &str) -> Result<Vec<ScoreHistoryEntry>> {
        let key = ScanTarget::parse(target)
            .map(|t| t.display())
            .unwrap_or_else(|_| target.trim().to_string());
        self.inner.store.history(&key).await
    }

    pub async fn priorities(&self, scan_id: &str) -> Result<PriorityReport> {
        Ok(prioritize(&self.findings(scan_id).await?))
    }

    pub async fn graph(&self, scan_id: &str) -> Result<AttackGraph> {
        Ok(graph::build(&self.findings(scan_id).await?))
    }

    /// Poll until the scan reaches a terminal state
    pub async fn wait_for_terminal(&self, scan_id: &str, poll: Duration) -> Result<Scan> {
        loop {
            let scan = self.scan(scan_id).await?;
            if scan.is_terminal() {
                return Ok(scan);
            }
            tokio::time::sleep(poll).await;
        }
    }

    pub async fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().await.len()
    }
}

impl Inner {
    async fn execute(self: Arc<Self>, scan: Scan, target: ScanTarget, cancel: CancelSignal) {
        let _permit = tokio::select! {
            permit = Arc::clone(&self.scan_slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    self.fail(scan, "scan executor shut down".into(), &cancel).await;
                    return;
                }
            },
            _ = cancel.cancelled() => {
                debug!("cancelled while queued");
                return;
            }
        };

        let mut scan = scan;
        if !self.start(&mut scan, &cancel).await {
            return;
        }

        // DNS can change between submission and execution
        let ips = match target.resolve(self.config.max_cidr_hosts).await {
            Ok(ips) => ips,
            Err(e) => {
                self.fail(scan, format!("target could not be resolved: {}", e), &cancel)
                    .await;
                return;
            }
        };
        debug!(addresses = ips.len(), "target resolved");

        let Some(outcomes) = self.dispatch(&scan, &target, ips, &cancel).await else {
            debug!("cancelled during dispatch");
            return;
        };

        let mut reports = Vec::with_capacity(outcomes.len());
        let mut findings = Vec::new();
        for (module, outcome) in outcomes {
            let weight = self.registry.weight(&module);
            match outcome {
                Ok(result) => {
                    debug!(%module, score = result.score, findings = result.findings.len(), "module completed");
                    findings.extend(result.findings.iter().cloned());
                    reports.push(ModuleReport::completed(module, weight, result));
                }
                Err(e) => {
                    warn!(%module, error = %e, "module did not complete");
                    let reason = e.to_string();
                    findings.push(scorer::module_error_finding(&module, &reason));
                    reports.push(ModuleReport::errored(module, weight, reason));
                }
            }
        }
        for finding in &mut findings {
            finding.scan_id = scan.id.clone();
        }

        let card = scorer::score(&reports);
        let transition = if reports.iter().all(ModuleReport::is_error) {
            scan.mark_failed("all modules failed to complete", Some(card.outcome))
        } else {
            scan.mark_completed(card.shield_score, card.outcome)
        };
        if let Err(e) = transition {
            error!(error = %e, "scan left in an unexpected state");
            return;
        }

        self.finish(scan, findings, &cancel).await;
    }

    /// `queued -> running`, unless a cancellation already won
    async fn start(&self, scan: &mut Scan, cancel: &CancelSignal) -> bool {
        let mut in_flight = self.in_flight.lock().await;
        if cancel.is_cancelled() {
            return false;
        }
        if let Err(e) = scan.mark_running() {
            error!(error = %e, "scan cannot start");
            return false;
        }
        if let Err(e) = self.store.update_scan(scan).await {
            error!(error = %e, "failed to persist running state");
            self.record_store_failure(scan, &e).await;
            release(&mut in_flight, scan);
            return false;
        }
        info!(modules = ?scan.modules_to_run().collect::<Vec<_>>(), "scan running");
        true
    }

    /// Run every permitted module on the bounded worker pool and join them.
    ///
    /// Results come back in `modules_enabled` order. `None` means the scan
    /// was cancelled; outstanding module tasks are abandoned.
    async fn dispatch(
        &self,
        scan: &Scan,
        target: &ScanTarget,
        ips: Vec<IpAddr>,
        cancel: &CancelSignal,
    ) -> Option<Vec<(String, ModuleOutcome)>> {
        let profile = ScanProfile::new(&scan.id, scan.scan_depth, scan.sensitivity)
            .with_timeout(self.config.timeouts.for_depth(scan.scan_depth))
            .with_socket_timeouts(self.config.connect_timeout(), self.config.banner_timeout())
            .with_concurrency(self.config.port_concurrency)
            .with_cancel(cancel.clone());
        let workers = Arc::new(Semaphore::new(self.config.module_workers.max(1)));
        let ips: Arc<[IpAddr]> = ips.into();

        let names: Vec<String> = scan.modules_to_run().cloned().collect();
        let mut slots: Vec<Option<ModuleOutcome>> = names.iter().map(|_| None).collect();
        let mut tasks = JoinSet::new();

        for (index, name) in names.iter().enumerate() {
            let Some(module) = self.registry.get(name) else {
                slots[index] = Some(Err(ModuleError::Other(format!("module {} is not registered", name))));
                continue;
            };
            let target = target.clone();
            let ips = Arc::clone(&ips);
            let profile = profile.clone();
            let workers = Arc::clone(&workers);
            let span = info_span!("module", module = %name);
            tasks.spawn(
                async move { (index, run_module(module, &target, &ips, &profile, workers).await) }
                    .instrument(span),
            );
        }

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, outcome))) => slots[index] = Some(outcome),
                    Some(Err(e)) => error!(error = %e, "module task aborted"),
                    None => break,
                },
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return None;
                }
            }
        }

        Some(
            names
                .into_iter()
                .zip(slots)
                .map(|(name, slot)| {
                    let outcome = slot.unwrap_or_else(|| Err(ModuleError::Other("module task aborted".into())));
                    (name, outcome)
                })
                .collect(),
        )
    }

    /// Write a terminal scan with its findings, unless it was cancelled meanwhile
    async fn finish(&self, scan: Scan, findings: Vec<Finding>, cancel: &CancelSignal) {
        let mut in_flight = self.in_flight.lock().await;
        if cancel.is_cancelled() {
            debug!(discarded = findings.len(), "discarding results of cancelled scan");
            return;
        }

        match self.store.record_outcome(&scan, &findings).await {
            Ok(()) => info!(
                status = %scan.status,
                score = ?scan.shield_score,
                grade = ?scan.grade.map(|g| g.as_str()),
                findings = findings.len(),
                reason = ?scan.failure_reason,
                "scan finished"
            ),
            Err(e) => {
                error!(error = %e, "failed to persist scan outcome");
                self.record_store_failure(&scan, &e).await;
            }
        }
        release(&mut in_flight, &scan);
    }

    async fn fail(&self, mut scan: Scan, reason: String, cancel: &CancelSignal) {
        warn!(%reason, "scan failed");
        if let Err(e) = scan.mark_failed(reason, None) {
            error!(error = %e, "scan left in an unexpected state");
            return;
        }
        self.finish(scan, Vec::new(), cancel).await;
    }

    /// Best effort: mark the stored record failed after a store write fault
    async fn record_store_failure(&self, scan: &Scan, cause: &Error) {
        let Ok(Some(mut stored)) = self.store.get_scan(&scan.id).await else {
            return;
        };
        if stored.mark_failed(format!("store write failed: {}", cause), None).is_ok() {
            if let Err(e) = self.store.update_scan(&stored).await {
                error!(error = %e, "could not record store failure");
            }
        }
    }
}

async fn run_module(
    module: Arc<dyn ProbeModule>,
    target: &ScanTarget,
    ips: &[IpAddr],
    profile: &ScanProfile,
    workers: Arc<Semaphore>,
) -> ModuleOutcome {
    let _permit = workers
        .acquire_owned()
        .await
        .map_err(|_| ModuleError::Other("module worker pool closed".into()))?;
    // Modules that had not started by the time of a cancel never start
    profile.check_cancelled()?;

    let started = Instant::now();
    debug!("module started");
    let outcome = match tokio::time::timeout(profile.timeout, module.run(target, ips, profile)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ModuleError::Timeout(profile.timeout)),
    };
    debug!(elapsed_ms = started.elapsed().as_millis() as u64, ok = outcome.is_ok(), "module returned");
    outcome
}
