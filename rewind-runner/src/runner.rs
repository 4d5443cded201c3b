//! Bar orchestration loop.
//!
//! Drives event-time iteration: per bar group (all symbols at one
//! timestamp) the order of persisted events is closures, then candidate
//! writes, then decision events, then position openings. The loop is
//! single-threaded; the only internal concurrency is the per-bar LLM
//! fan-out, whose results are joined back in deterministic candidate
//! order before anything is persisted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use rewind_core::domain::{
    feature_fingerprint, Bar, Candidate, CandidateId, ClosureEvent, DecisionEvent, OutcomeLabel,
    RunId,
};
use rewind_core::features::{bucketing, FeaturePipeline, FeatureSnapshot};
use rewind_core::llm::harness::{HarnessConfig, LlmHarness, LlmResult};
use rewind_core::llm::prompt::{self, PolicyConstraints, PortfolioSnapshot};
use rewind_core::llm::rate_limiter::RateLimiter;
use rewind_core::llm::response::{Decision, LlmResponse};
use rewind_core::llm::{CircuitBreaker, LlmBackend};
use rewind_core::playbooks::{Breakout, Playbook, Pullback};
use rewind_core::playbooks::breakout::BreakoutParams;
use rewind_core::playbooks::pullback::PullbackParams;
use rewind_core::positions::{CostModel, PositionManager};
use rewind_core::schema::SCHEMA_VERSION;

use crate::checkpoint::{self, Checkpoint, PendingEntry};
use crate::config::{ConfigError, FillTiming, RunConfig, SizeMethod};
use crate::error::RunError;
use crate::manifest::{RunManifest, RunStatus};
use crate::progress::{Heartbeat, RunCounters};
use crate::source::OhlcvSource;
use crate::storage::{
    with_retry, CandidateCache, DecisionLog, OutcomeLabels, PositionLedger, StoreError,
};

/// Bounded retry policy for store writes inside the loop.
const STORE_RETRIES: u32 = 3;
const STORE_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: RunStatus,
    pub counters: RunCounters,
    pub final_equity: f64,
}

pub struct Runner {
    config: RunConfig,
    run_dir: PathBuf,
    source: Box<dyn OhlcvSource>,
    harness: LlmHarness,
    playbooks: Vec<Box<dyn Playbook>>,
    cancel: Arc<AtomicBool>,
}

impl Runner {
    pub fn new(
        config: RunConfig,
        source: Box<dyn OhlcvSource>,
        backend: Box<dyn LlmBackend>,
        artifacts_dir: &Path,
    ) -> Result<Self, RunError> {
        config.validate()?;
        let playbooks = build_playbooks(&config)?;
        let harness = build_harness(&config, backend);
        let run_dir = artifacts_dir.join(&config.run_id);
        Ok(Self {
            config,
            run_dir,
            source,
            harness,
            playbooks,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Cooperative cancellation: polled between bars; when set, the run
    /// checkpoints and exits cleanly with status `cancelled`.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn run(&self) -> Result<RunSummary, RunError> {
        let run_id = self.config.run_id();
        let config_hash = self.config.content_hash();

        self.preflight()?;
        self.write_config_snapshot()?;

        let mut manifest = RunManifest::start(run_id.clone(), config_hash.clone());
        let manifest_path = self.run_dir.join("manifest.json");
        manifest.write(&manifest_path)?;

        match self.execute(&run_id, &config_hash, &mut manifest, &manifest_path) {
            Ok(summary) => {
                manifest.counters = summary.counters;
                manifest.finalize(
                    match summary.status {
                        RunStatus::Cancelled => RunStatus::Cancelled,
                        _ => RunStatus::Completed,
                    },
                    None,
                );
                manifest.write(&manifest_path)?;
                Ok(summary)
            }
            Err(err) => {
                manifest.finalize(RunStatus::Failed, Some(err.to_string()));
                // Best effort: the original error is the diagnostic
                let _ = manifest.write(&manifest_path);
                Err(err)
            }
        }
    }

    // ── Pre-flight ──────────────────────────────────────────────────

    /// Fail fast before any store opens: run directory writable,
    /// playbook feature requirements satisfied by the pipeline.
    fn preflight(&self) -> Result<(), RunError> {
        std::fs::create_dir_all(&self.run_dir)?;
        let probe = self.run_dir.join(".write_probe");
        std::fs::write(&probe, b"probe")?;
        std::fs::remove_file(&probe)?;

        let declared = FeaturePipeline::declared_keys();
        for playbook in &self.playbooks {
            for key in playbook.required_features() {
                if !declared.contains(key) {
                    return Err(RunError::Config(ConfigError::MissingFeature {
                        playbook: playbook.name().to_string(),
                        feature: key.to_string(),
                    }));
                }
            }
        }
        Ok(())
    }

    fn write_config_snapshot(&self) -> Result<(), RunError> {
        let json = serde_json::to_string_pretty(&self.config)
            .map_err(|e| StoreError::Serde(e.to_string()))
            .map_err(RunError::Storage)?;
        std::fs::write(self.run_dir.join("run_config.json"), json)?;
        Ok(())
    }

    // ── Main loop ───────────────────────────────────────────────────

    fn execute(
        &self,
        run_id: &RunId,
        config_hash: &str,
        manifest: &mut RunManifest,
        manifest_path: &Path,
    ) -> Result<RunSummary, RunError> {
        let groups = self.load_grouped_bars()?;

        let cache = CandidateCache::open(&self.run_dir.join("candidates.sqlite"))?;
        let ledger = PositionLedger::open(&self.run_dir.join("positions.sqlite"))?;
        let labels = OutcomeLabels::open(&self.run_dir.join("labels.sqlite"))?;
        let checkpoint_path = self.run_dir.join("checkpoint.json");
        let log_path = self.run_dir.join("decision_events.jsonl");

        // Resume state
        let resume = match checkpoint::load(&checkpoint_path)? {
            Some(cp) if cp.config_hash == config_hash => {
                info!(bar_index = cp.bar_index, "resuming from checkpoint");
                DecisionLog::truncate_after(&log_path, cp.bar_timestamp)?;
                Some(cp)
            }
            Some(_) => {
                warn!("checkpoint config hash mismatch, starting fresh");
                None
            }
            None => None,
        };

        let mut log = DecisionLog::open(&log_path)?;

        let mut pipelines: BTreeMap<String, FeaturePipeline> = match &resume {
            Some(cp) => cp.feature_pipelines.clone(),
            None => self
                .config
                .market
                .symbols
                .iter()
                .map(|s| {
                    (
                        s.clone(),
                        FeaturePipeline::new(
                            s.clone(),
                            self.config.market.warmup_bars,
                            self.config.market.spread_bps,
                        ),
                    )
                })
                .collect(),
        };

        let costs = CostModel {
            fee_maker_bps: self.config.fees.maker_bps,
            fee_taker_bps: self.config.fees.taker_bps,
            slippage_bps: self.config.execution.slippage_bps,
        };
        let mut manager = PositionManager::new(
            run_id.clone(),
            costs,
            self.config.execution.r_multiple_basis,
        );
        if let Some(cp) = &resume {
            // Reset ledger rows to the checkpointed state: writes between
            // the checkpoint and the crash (trailing advances, even a
            // closure) belong to bars the replay is about to redo
            for position in &cp.open_positions {
                let row = position.to_row();
                with_retry(STORE_RETRIES, STORE_RETRY_DELAY, || {
                    ledger.open_position(&row)
                })?;
            }
            manager.restore(cp.open_positions.clone());
        }

        let mut counters = resume.as_ref().map(|cp| cp.counters).unwrap_or_default();
        let mut pending: Vec<PendingEntry> = resume
            .as_ref()
            .map(|cp| cp.pending_entries.clone())
            .unwrap_or_default();
        let first_group = resume.as_ref().map(|cp| cp.bar_index + 1).unwrap_or(0);

        let heartbeat = Heartbeat::new(self.config.execution.heartbeat_interval_bars);
        let starting_equity = self.config.portfolio.starting_equity_quote;
        let mut peak_equity = starting_equity + ledger.realized_pnl(run_id)?;
        let mut status = RunStatus::Completed;

        for (group_index, group) in groups.iter().enumerate().skip(first_group) {
            if self.cancel.load(Ordering::Relaxed) {
                info!(group_index, "cancellation requested, checkpointing");
                status = RunStatus::Cancelled;
                // Nothing to checkpoint if no group has completed yet
                if group_index > 0 {
                    log.flush()?;
                    self.write_checkpoint(
                        &checkpoint_path,
                        run_id,
                        config_hash,
                        group_index - 1,
                        group[0].timestamp,
                        &pipelines,
                        &manager,
                        &pending,
                        starting_equity + ledger.realized_pnl(run_id)?,
                        counters,
                    )?;
                }
                break;
            }

            // 1. Features
            let mut snapshots: BTreeMap<String, (usize, Option<FeatureSnapshot>)> =
                BTreeMap::new();
            for bar in group {
                let pipeline = pipelines
                    .get_mut(&bar.symbol)
                    .ok_or_else(|| RunError::Data {
                        timestamp: bar.timestamp.to_rfc3339(),
                        message: format!("bar for unconfigured symbol {}", bar.symbol),
                    })?;
                let snapshot = pipeline.on_bar(bar);
                let symbol_bar_index = pipeline.bar_count() - 1;
                snapshots.insert(bar.symbol.clone(), (symbol_bar_index, snapshot));
            }

            // 2. Closures for positions that exited this bar
            for bar in group {
                let symbol_bar_index = snapshots[&bar.symbol].0;
                let closures = manager.update(bar, symbol_bar_index);
                for closure in closures {
                    self.persist_closure(&ledger, &labels, &closure)?;
                    counters.positions_closed += 1;
                }
            }
            // Persist live trailing state for survivors
            for bar in group {
                for position in manager.open_positions() {
                    if position.symbol == bar.symbol {
                        with_retry(STORE_RETRIES, STORE_RETRY_DELAY, || {
                            ledger.update_trailing_state(
                                &position.position_id,
                                position.trailing_armed,
                                position.trailing_stop,
                                position.highest_high,
                                position.lowest_low,
                            )
                        })?;
                    }
                }
            }

            // 3. Candidates, in deterministic (playbook, symbol) order
            let mut candidates: Vec<Candidate> = Vec::new();
            for bar in group {
                let (symbol_bar_index, snapshot) = &snapshots[&bar.symbol];
                let Some(snapshot) = snapshot else { continue };
                if !snapshot.feature_ready {
                    continue;
                }
                for playbook in &self.playbooks {
                    if let Some(setup) = playbook.evaluate(snapshot, bar) {
                        let candidate = self.make_candidate(
                            run_id,
                            bar,
                            *symbol_bar_index,
                            playbook.name(),
                            snapshot,
                            setup,
                        )?;
                        candidates.push(candidate);
                    }
                }
            }
            candidates.sort_by(|a, b| {
                a.playbook.cmp(&b.playbook).then_with(|| a.symbol.cmp(&b.symbol))
            });
            for candidate in &candidates {
                with_retry(STORE_RETRIES, STORE_RETRY_DELAY, || cache.put(candidate))?;
                counters.candidates_generated += 1;
            }

            // 4. LLM consultation (concurrent within the bar, joined in order)
            let equity = starting_equity + ledger.realized_pnl(run_id)?;
            peak_equity = peak_equity.max(equity);
            let drawdown_bps = if peak_equity > 0.0 {
                (peak_equity - equity) / peak_equity * 10_000.0
            } else {
                0.0
            };
            let portfolio = PortfolioSnapshot {
                open_positions: manager.open_count() + pending.len(),
                exposure_frac: if equity > 0.0 {
                    (manager.exposure_quote()
                        + pending.iter().map(|p| p.size_quote).sum::<f64>())
                        / equity
                } else {
                    1.0
                },
                drawdown_bps,
                equity_quote: equity,
            };
            let policy = PolicyConstraints {
                minimum_quality: self.config.llm.minimum_quality,
                max_risk_per_trade_frac: self.config.portfolio.risk_per_trade_fraction,
            };
            let results = self.consult_llm(&candidates, &snapshots, &portfolio, &policy);

            // 5. Decision events + gate, collecting accepted entries
            let mut accepted: Vec<PendingEntry> = Vec::new();
            for (candidate, result) in candidates.iter().zip(results.iter()) {
                counters.llm_calls += 1;
                if result.fallback_used {
                    counters.llm_failures += 1;
                }

                let committed_exposure = manager.exposure_quote()
                    + pending.iter().map(|p| p.size_quote).sum::<f64>()
                    + accepted.iter().map(|p| p.size_quote).sum::<f64>();
                let committed_positions =
                    manager.open_count() + pending.len() + accepted.len();

                let (passed_gate, was_executed, rejection_reason, size_quote) = self
                    .evaluate_gate(
                        candidate,
                        &result.response,
                        equity,
                        committed_exposure,
                        committed_positions,
                    );

                let event = self.decision_event(candidate, result, passed_gate, was_executed,
                    rejection_reason.clone());
                with_retry(STORE_RETRIES, STORE_RETRY_DELAY, || log.append(&event))?;
                with_retry(STORE_RETRIES, STORE_RETRY_DELAY, || {
                    cache.record_decision(
                        &candidate.candidate_id,
                        result.response.decision,
                        result.response.confidence,
                        result.response.setup_quality,
                        rejection_reason.as_deref(),
                    )
                })?;

                if was_executed {
                    accepted.push(PendingEntry {
                        candidate: candidate.clone(),
                        size_quote,
                    });
                }
            }

            // 6. Openings: fill pending entries from prior bars at this
            //    bar's open (or immediately at close for same_close runs)
            let mut still_pending = Vec::new();
            for entry in pending.drain(..) {
                let bar = group.iter().find(|b| b.symbol == entry.candidate.symbol);
                match bar {
                    Some(bar) => {
                        let symbol_bar_index = snapshots[&bar.symbol].0;
                        self.open_entry(
                            &cache,
                            &ledger,
                            &mut manager,
                            &entry,
                            bar.open,
                            symbol_bar_index,
                            bar.timestamp,
                            &mut counters,
                        )?;
                    }
                    None => still_pending.push(entry),
                }
            }
            pending = still_pending;

            match self.config.execution.fill_timing {
                FillTiming::NextOpen => pending.extend(accepted),
                FillTiming::SameClose => {
                    for entry in accepted {
                        let bar = group
                            .iter()
                            .find(|b| b.symbol == entry.candidate.symbol)
                            .ok_or_else(|| RunError::Data {
                                timestamp: entry.candidate.timestamp.to_rfc3339(),
                                message: "decision bar missing from its own group".to_string(),
                            })?;
                        let symbol_bar_index = snapshots[&bar.symbol].0;
                        self.open_entry(
                            &cache,
                            &ledger,
                            &mut manager,
                            &entry,
                            bar.close,
                            symbol_bar_index,
                            bar.timestamp,
                            &mut counters,
                        )?;
                    }
                }
            }

            counters.bars_processed += group.len() as u64;
            log.flush()?;

            // 7. Checkpoint + heartbeat
            let group_timestamp = group[0].timestamp;
            if (group_index as u64 + 1) % self.config.execution.checkpoint_interval_bars == 0 {
                log.flush()?;
                self.write_checkpoint(
                    &checkpoint_path,
                    run_id,
                    config_hash,
                    group_index,
                    group_timestamp,
                    &pipelines,
                    &manager,
                    &pending,
                    starting_equity + ledger.realized_pnl(run_id)?,
                    counters,
                )?;
                manifest.counters = counters;
                manifest.write(manifest_path)?;
            }
            heartbeat.maybe_emit(
                &counters,
                manager.open_count(),
                equity,
                self.harness.circuit_state(),
            );

            if let Some(max_bars) = self.config.execution.max_bars {
                if (group_index as u64 + 1) >= max_bars {
                    info!(group_index, "max_bars reached, checkpointing and stopping");
                    status = RunStatus::Cancelled;
                    log.flush()?;
                    self.write_checkpoint(
                        &checkpoint_path,
                        run_id,
                        config_hash,
                        group_index,
                        group_timestamp,
                        &pipelines,
                        &manager,
                        &pending,
                        starting_equity + ledger.realized_pnl(run_id)?,
                        counters,
                    )?;
                    break;
                }
            }
        }

        // End of data: force-close whatever is still open at the final bar
        if status == RunStatus::Completed {
            let mut last_bars: BTreeMap<String, (Bar, usize)> = BTreeMap::new();
            for group in &groups {
                for bar in group {
                    let index = pipelines
                        .get(&bar.symbol)
                        .map(|p| p.bar_count().saturating_sub(1))
                        .unwrap_or(0);
                    last_bars.insert(bar.symbol.clone(), (bar.clone(), index));
                }
            }
            for (bar, index) in last_bars.values() {
                let closures = manager.force_close_symbol(bar, *index);
                for closure in closures {
                    self.persist_closure(&ledger, &labels, &closure)?;
                    counters.positions_closed += 1;
                }
            }
        }

        log.flush()?;
        let final_equity = starting_equity + ledger.realized_pnl(run_id)?;
        info!(
            status = ?status,
            bars = counters.bars_processed,
            candidates = counters.candidates_generated,
            trades = counters.trades_taken,
            final_equity,
            "run finished"
        );

        Ok(RunSummary {
            run_id: run_id.clone(),
            status,
            counters,
            final_equity,
        })
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// Load, validate, and merge bars across symbols into event-time
    /// groups (one group per timestamp).
    fn load_grouped_bars(&self) -> Result<Vec<Vec<Bar>>, RunError> {
        let start = self.config.market.start().map_err(RunError::Config)?;
        let end = self.config.market.end().map_err(RunError::Config)?;

        let mut all_bars: Vec<Bar> = Vec::new();
        for symbol in &self.config.market.symbols {
            let bars =
                self.source
                    .bars(symbol, start, end, &self.config.market.timeframe)?;
            if bars.is_empty() {
                return Err(RunError::Data {
                    timestamp: "-".to_string(),
                    message: format!("no bars available for {symbol} in the requested range"),
                });
            }
            let mut prev: Option<DateTime<Utc>> = None;
            for bar in &bars {
                bar.validate().map_err(|e| RunError::Data {
                    timestamp: bar.timestamp.to_rfc3339(),
                    message: e.to_string(),
                })?;
                if let Some(prev_ts) = prev {
                    if bar.timestamp <= prev_ts {
                        return Err(RunError::Data {
                            timestamp: bar.timestamp.to_rfc3339(),
                            message: format!("bar out of order for {symbol}"),
                        });
                    }
                }
                prev = Some(bar.timestamp);
            }
            all_bars.extend(bars);
        }

        all_bars.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        let mut groups: Vec<Vec<Bar>> = Vec::new();
        for bar in all_bars {
            match groups.last_mut() {
                Some(group) if group[0].timestamp == bar.timestamp => group.push(bar),
                _ => groups.push(vec![bar]),
            }
        }
        Ok(groups)
    }

    fn make_candidate(
        &self,
        run_id: &RunId,
        bar: &Bar,
        bar_index: usize,
        playbook: &str,
        snapshot: &FeatureSnapshot,
        setup: rewind_core::playbooks::CandidateSetup,
    ) -> Result<Candidate, RunError> {
        setup
            .exit_spec
            .validate(setup.entry_price, setup.direction)
            .map_err(|e| RunError::ExitLogic(format!("{playbook} produced invalid exit spec: {e}")))?;

        let buckets = bucketing::bucket_features(snapshot);
        Ok(Candidate {
            candidate_id: CandidateId::for_bar(run_id, &bar.symbol, bar_index, playbook),
            run_id: run_id.clone(),
            symbol: bar.symbol.clone(),
            timeframe: self.config.market.timeframe.clone(),
            bar_index,
            timestamp: bar.timestamp,
            playbook: playbook.to_string(),
            direction: setup.direction,
            entry_price: setup.entry_price,
            atr_at_entry: setup.atr_at_entry,
            exit_spec: setup.exit_spec,
            features: snapshot.values().clone(),
            feature_fingerprint: feature_fingerprint(&buckets),
            llm_decision: None,
            llm_confidence: None,
            llm_setup_quality: None,
            rejection_reason: None,
            taken: false,
            position_id: None,
        })
    }

    /// Fan out harness calls for this bar's candidates. Results come back
    /// in candidate order regardless of completion order.
    fn consult_llm(
        &self,
        candidates: &[Candidate],
        snapshots: &BTreeMap<String, (usize, Option<FeatureSnapshot>)>,
        portfolio: &PortfolioSnapshot,
        policy: &PolicyConstraints,
    ) -> Vec<LlmResult> {
        let requests: Vec<_> = candidates
            .iter()
            .map(|candidate| {
                let snapshot = snapshots
                    .get(&candidate.symbol)
                    .and_then(|(_, s)| s.as_ref())
                    .cloned()
                    .unwrap_or_else(|| {
                        FeatureSnapshot::new(
                            candidate.symbol.clone(),
                            candidate.bar_index,
                            candidate.timestamp,
                        )
                    });
                prompt::build_request(
                    candidate,
                    &snapshot,
                    portfolio,
                    policy,
                    &self.config.llm.model,
                    self.config.llm.temperature,
                    self.config.llm.max_tokens,
                    Duration::from_millis(self.config.llm.attempt_timeout_ms),
                )
            })
            .collect();

        if requests.len() <= 1 {
            return requests.iter().map(|r| self.harness.query(r)).collect();
        }

        let harness = &self.harness;
        std::thread::scope(|scope| {
            let handles: Vec<_> = requests
                .iter()
                .map(|request| scope.spawn(move || harness.query(request)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("LLM worker thread panicked, substituting fallback");
                        LlmResult {
                            response: LlmResponse::fallback(
                                self.config.llm.fallback_decision,
                                "worker panic",
                            ),
                            success: false,
                            fallback_used: true,
                            error: Some("worker panic".to_string()),
                            retries: 0,
                            latency_ms: 0,
                            circuit_state: harness.circuit_state(),
                            raw_response: None,
                        }
                    }
                })
                .collect()
        })
    }

    /// Quality gate plus portfolio constraints. Returns
    /// (passed_gate, was_executed, rejection_reason, size_quote).
    fn evaluate_gate(
        &self,
        candidate: &Candidate,
        response: &LlmResponse,
        equity: f64,
        committed_exposure: f64,
        committed_positions: usize,
    ) -> (bool, bool, Option<String>, f64) {
        if response.decision != Decision::Take {
            return (false, false, None, 0.0);
        }
        if !response.setup_quality.meets(self.config.llm.minimum_quality) {
            return (false, false, Some("below_minimum_quality".to_string()), 0.0);
        }

        let p = &self.config.portfolio;
        if committed_positions >= p.max_positions {
            return (true, false, Some("max_positions_reached".to_string()), 0.0);
        }

        let budget = equity * p.max_exposure_fraction - committed_exposure;
        if budget <= 0.0 {
            return (true, false, Some("exposure_budget_exhausted".to_string()), 0.0);
        }

        let size = match p.size_method {
            SizeMethod::EqualWeight => {
                equity * p.max_exposure_fraction / p.max_positions as f64
            }
            SizeMethod::RiskParity => {
                let stop_distance_pct = candidate
                    .exit_spec
                    .stop_distance(candidate.entry_price, candidate.direction)
                    / candidate.entry_price;
                if stop_distance_pct <= 0.0 {
                    return (true, false, Some("degenerate_stop_distance".to_string()), 0.0);
                }
                equity * p.risk_per_trade_fraction / stop_distance_pct
            }
        };
        let size = size.min(budget);
        if size <= 0.0 {
            return (true, false, Some("insufficient_capital".to_string()), 0.0);
        }
        (true, true, None, size)
    }

    fn decision_event(
        &self,
        candidate: &Candidate,
        result: &LlmResult,
        passed_gate: bool,
        was_executed: bool,
        rejection_reason: Option<String>,
    ) -> DecisionEvent {
        DecisionEvent {
            schema_version: SCHEMA_VERSION,
            candidate_id: candidate.candidate_id.clone(),
            run_id: candidate.run_id.clone(),
            timestamp: candidate.timestamp,
            symbol: candidate.symbol.clone(),
            playbook: candidate.playbook.clone(),
            bar_index: candidate.bar_index,
            decision: result.response.decision,
            setup_quality: result.response.setup_quality,
            confidence: result.response.confidence,
            risk_flags: result.response.risk_flags.clone(),
            notes: result.response.notes.clone(),
            llm_raw_response: result.raw_response.clone(),
            latency_ms: result.latency_ms,
            retries: result.retries,
            fallback_used: result.fallback_used,
            circuit_state: result.circuit_state,
            llm_error: result.error.clone(),
            passed_gate,
            rejection_reason,
            was_executed,
            prompt_version: prompt::PROMPT_VERSION.to_string(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn open_entry(
        &self,
        cache: &CandidateCache,
        ledger: &PositionLedger,
        manager: &mut PositionManager,
        entry: &PendingEntry,
        fill_reference: f64,
        entry_bar_index: usize,
        entry_timestamp: DateTime<Utc>,
        counters: &mut RunCounters,
    ) -> Result<(), RunError> {
        let position = manager.open(
            &entry.candidate,
            fill_reference,
            entry.size_quote,
            entry_bar_index,
            entry_timestamp,
        );
        let row = position.to_row();
        with_retry(STORE_RETRIES, STORE_RETRY_DELAY, || ledger.open_position(&row))?;
        with_retry(STORE_RETRIES, STORE_RETRY_DELAY, || {
            cache.mark_taken(&entry.candidate.candidate_id, &position.position_id)
        })?;
        counters.trades_taken += 1;
        Ok(())
    }

    fn persist_closure(
        &self,
        ledger: &PositionLedger,
        labels: &OutcomeLabels,
        closure: &ClosureEvent,
    ) -> Result<(), RunError> {
        with_retry(STORE_RETRIES, STORE_RETRY_DELAY, || ledger.close_position(closure))?;
        let label = OutcomeLabel {
            schema_version: SCHEMA_VERSION,
            candidate_id: closure.candidate_id.clone(),
            position_id: closure.position_id.clone(),
            pnl_quote: closure.pnl_quote,
            actual_r_multiple: closure.r_multiple,
            exit_reason: closure.exit_reason,
            bars_held: closure.bars_held,
        };
        with_retry(STORE_RETRIES, STORE_RETRY_DELAY, || labels.put_label(&label))?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_checkpoint(
        &self,
        path: &Path,
        run_id: &RunId,
        config_hash: &str,
        bar_index: usize,
        bar_timestamp: DateTime<Utc>,
        pipelines: &BTreeMap<String, FeaturePipeline>,
        manager: &PositionManager,
        pending: &[PendingEntry],
        equity_quote: f64,
        counters: RunCounters,
    ) -> Result<(), RunError> {
        let checkpoint = Checkpoint {
            schema_version: SCHEMA_VERSION,
            run_id: run_id.clone(),
            config_hash: config_hash.to_string(),
            bar_index,
            bar_timestamp,
            feature_pipelines: pipelines.clone(),
            open_positions: manager.open_positions().cloned().collect(),
            pending_entries: pending.to_vec(),
            equity_quote,
            counters,
        };
        checkpoint::save(path, &checkpoint)?;
        Ok(())
    }
}

fn build_playbooks(config: &RunConfig) -> Result<Vec<Box<dyn Playbook>>, ConfigError> {
    let mut playbooks: Vec<Box<dyn Playbook>> = Vec::new();
    for entry in config.enabled_playbooks() {
        match entry.name.as_str() {
            "breakout" => playbooks.push(Box::new(Breakout::new(
                BreakoutParams::default().with_overrides(&entry.params),
                entry.exits,
            ))),
            "pullback" => playbooks.push(Box::new(Pullback::new(
                PullbackParams::default().with_overrides(&entry.params),
                entry.exits,
            ))),
            other => return Err(ConfigError::UnknownPlaybook(other.to_string())),
        }
    }
    Ok(playbooks)
}

fn build_harness(config: &RunConfig, backend: Box<dyn LlmBackend>) -> LlmHarness {
    let l = &config.llm;
    LlmHarness::new(
        backend,
        HarnessConfig {
            max_retries: l.max_retries,
            initial_retry_delay: Duration::from_millis(l.initial_retry_delay_ms),
            acquire_timeout: Duration::from_millis(l.attempt_timeout_ms),
            fallback_decision: l.fallback_decision,
        },
        RateLimiter::new(l.max_calls_per_minute, l.burst),
        CircuitBreaker::new(
            l.circuit_breaker_threshold,
            Duration::from_secs_f64(l.circuit_breaker_timeout_secs),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaybookEntry;
    use rewind_core::playbooks::ExitParams;

    fn base_config() -> RunConfig {
        let toml = r#"
run_id = "unit"

[market]
symbols = ["BTC-USD"]
warmup_bars = 10

[[playbooks]]
name = "breakout"

[playbooks.exits]
stop_loss_atr = 1.2
take_profit_atr = 2.4
time_stop_bars = 32
trailing_activation_r = 1.0
trailing_distance_atr = 1.2
"#;
        RunConfig::from_toml(toml).unwrap()
    }

    #[test]
    fn build_playbooks_orders_by_name() {
        let mut config = base_config();
        config.playbooks.push(PlaybookEntry {
            name: "pullback".into(),
            enabled: true,
            params: Default::default(),
            exits: ExitParams {
                stop_loss_atr: 1.0,
                take_profit_atr: 1.8,
                time_stop_bars: 48,
                trailing_enabled: true,
                trailing_activation_r: 0.8,
                trailing_distance_atr: 1.0,
            },
        });
        // Config lists pullback second; reversing must not change the order
        config.playbooks.reverse();
        let playbooks = build_playbooks(&config).unwrap();
        let names: Vec<_> = playbooks.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["breakout", "pullback"]);
    }

    #[test]
    fn playbook_requirements_are_in_declared_keys() {
        let config = base_config();
        let playbooks = build_playbooks(&config).unwrap();
        let declared = FeaturePipeline::declared_keys();
        for playbook in &playbooks {
            for key in playbook.required_features() {
                assert!(declared.contains(key), "{key} missing from pipeline");
            }
        }
    }
}
