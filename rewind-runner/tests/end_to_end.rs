//! End-to-end scenarios: crafted bars through the full runner with mock
//! LLM backends, asserting against the durable artifacts.

mod common;

use common::{scenario_config, staircase_bars, two_playbook_bars};
use rewind_core::domain::ExitReason;
use rewind_core::llm::mock::{StaticLlm, ScriptedLlm};
use rewind_core::llm::mock;
use rewind_core::llm::response::Decision;
use rewind_core::playbooks::ExitParams;
use rewind_runner::config::PlaybookEntry;
use rewind_runner::manifest::{RunManifest, RunStatus};
use rewind_runner::source::VecSource;
use rewind_runner::storage::{CandidateCache, CandidateFilter, DecisionLog, OutcomeLabels, PositionLedger};
use rewind_runner::Runner;

#[test]
fn single_winner_exits_via_trailing_stop() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = scenario_config("single_winner");
    let bars = staircase_bars("BTC-USD", 220, 80);
    let runner = Runner::new(
        config,
        Box::new(VecSource::new(bars)),
        Box::new(StaticLlm::always_take()),
        dir.path(),
    )
    .unwrap();

    let summary = runner.run().unwrap();
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.counters.candidates_generated, 1);
    assert_eq!(summary.counters.trades_taken, 1);
    assert_eq!(summary.counters.positions_closed, 1);

    let run_dir = runner.run_dir();
    let cache = CandidateCache::open(&run_dir.join("candidates.sqlite")).unwrap();
    assert_eq!(cache.count(&CandidateFilter::default()).unwrap(), 1);
    let taken = cache
        .query(&CandidateFilter { taken: Some(true), ..Default::default() })
        .unwrap();
    assert_eq!(taken.len(), 1);
    assert!(taken[0].position_id.is_some());
    assert_eq!(taken[0].llm_decision, Some(Decision::Take));

    let ledger = PositionLedger::open(&run_dir.join("positions.sqlite")).unwrap();
    let positions = ledger.all_positions(&summary.run_id).unwrap();
    assert_eq!(positions.len(), 1);
    let position = &positions[0];
    assert!(!position.is_open);
    assert_eq!(position.exit_reason, Some(ExitReason::TrailingStop));
    assert!(position.r_multiple.unwrap() > 0.0, "trailing exit after a long climb must be profitable");
    assert!(position.pnl_quote.unwrap() > 0.0);
    // Entry filled at the bar after the signal
    assert_eq!(position.entry_bar_index, 81);

    // Outcome label mirrors the closure
    let labels = OutcomeLabels::open(&run_dir.join("labels.sqlite")).unwrap();
    let label = labels.get_label(&position.candidate_id).unwrap().unwrap();
    assert_eq!(label.exit_reason, ExitReason::TrailingStop);
    assert!((label.actual_r_multiple - position.r_multiple.unwrap()).abs() < 1e-12);

    // Ledger is the source of truth for equity
    assert!(
        (summary.final_equity
            - (10_000.0 + ledger.realized_pnl(&summary.run_id).unwrap()))
        .abs()
            < 1e-9
    );

    let manifest = RunManifest::read(&run_dir.join("manifest.json")).unwrap();
    assert_eq!(manifest.status, RunStatus::Completed);
    assert_eq!(manifest.counters.trades_taken, 1);
}

#[test]
fn skip_decision_writes_candidate_but_opens_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = scenario_config("all_skips");
    let bars = staircase_bars("BTC-USD", 220, 80);
    let runner = Runner::new(
        config,
        Box::new(VecSource::new(bars)),
        Box::new(StaticLlm::always_skip()),
        dir.path(),
    )
    .unwrap();

    let summary = runner.run().unwrap();
    assert_eq!(summary.counters.candidates_generated, 1);
    assert_eq!(summary.counters.trades_taken, 0);

    let run_dir = runner.run_dir();
    let cache = CandidateCache::open(&run_dir.join("candidates.sqlite")).unwrap();
    let all = cache.query(&CandidateFilter::default()).unwrap();
    assert_eq!(all.len(), 1);
    assert!(!all[0].taken);
    assert_eq!(all[0].llm_decision, Some(Decision::Skip));

    let ledger = PositionLedger::open(&run_dir.join("positions.sqlite")).unwrap();
    assert!(ledger.all_positions(&summary.run_id).unwrap().is_empty());

    let events = DecisionLog::read_all(&run_dir.join("decision_events.jsonl")).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].decision, Decision::Skip);
    assert!(!events[0].was_executed);
    assert!(!events[0].fallback_used);

    // Skipped candidates are never labeled
    let labels = OutcomeLabels::open(&run_dir.join("labels.sqlite")).unwrap();
    assert_eq!(labels.count().unwrap(), 0);

    // Equity untouched
    assert!((summary.final_equity - 10_000.0).abs() < 1e-9);
}

#[test]
fn quality_gate_vetoes_low_grade_takes() {
    let dir = tempfile::tempdir().unwrap();
    let config = scenario_config("gated"); // minimum_quality = B
    let bars = staircase_bars("BTC-USD", 220, 80);
    // Take, but at C+ grade: below the gate
    let backend = StaticLlm::new(mock::take_response("C+", 0.9));
    let runner = Runner::new(
        config,
        Box::new(VecSource::new(bars)),
        Box::new(backend),
        dir.path(),
    )
    .unwrap();

    let summary = runner.run().unwrap();
    assert_eq!(summary.counters.candidates_generated, 1);
    assert_eq!(summary.counters.trades_taken, 0);

    let events =
        DecisionLog::read_all(&runner.run_dir().join("decision_events.jsonl")).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].decision, Decision::Take);
    assert!(!events[0].passed_gate);
    assert!(!events[0].was_executed);
    assert_eq!(events[0].rejection_reason.as_deref(), Some("below_minimum_quality"));
}

#[test]
fn simultaneous_playbooks_yield_two_candidates_in_stable_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = scenario_config("multi_playbook");
    config.portfolio.max_positions = 2;
    // Enable the pullback with thresholds relaxed to match the crafted bar
    let mut params = std::collections::BTreeMap::new();
    params.insert("min_trend_strength".to_string(), 0.0);
    params.insert("max_rsi".to_string(), 100.0);
    params.insert("check_ema50_distance".to_string(), 0.0);
    config.playbooks.push(PlaybookEntry {
        name: "pullback".into(),
        enabled: true,
        params,
        exits: ExitParams {
            stop_loss_atr: 1.0,
            take_profit_atr: 50.0,
            time_stop_bars: 500,
            trailing_enabled: true,
            trailing_activation_r: 0.8,
            trailing_distance_atr: 1.0,
        },
    });

    let bars = two_playbook_bars("BTC-USD", 180, 150);
    let runner = Runner::new(
        config.clone(),
        Box::new(VecSource::new(bars.clone())),
        Box::new(StaticLlm::always_take()),
        dir.path(),
    )
    .unwrap();
    let summary = runner.run().unwrap();

    assert_eq!(summary.counters.candidates_generated, 2);
    assert_eq!(summary.counters.trades_taken, 2);

    let events =
        DecisionLog::read_all(&runner.run_dir().join("decision_events.jsonl")).unwrap();
    assert_eq!(events.len(), 2);
    // Deterministic order: playbook name, then symbol
    assert_eq!(events[0].playbook, "breakout");
    assert_eq!(events[1].playbook, "pullback");
    assert_eq!(events[0].bar_index, 150);
    assert_eq!(events[1].bar_index, 150);

    let ledger = PositionLedger::open(&runner.run_dir().join("positions.sqlite")).unwrap();
    let positions = ledger.all_positions(&summary.run_id).unwrap();
    assert_eq!(positions.len(), 2);
    // Both filled at the next bar's open, closed by the end-of-run sweep
    for position in &positions {
        assert_eq!(position.entry_bar_index, 151);
        assert!(!position.is_open);
    }

    // Rerun in a fresh directory: event order must be identical
    let dir2 = tempfile::tempdir().unwrap();
    let runner2 = Runner::new(
        config,
        Box::new(VecSource::new(bars)),
        Box::new(StaticLlm::always_take()),
        dir2.path(),
    )
    .unwrap();
    runner2.run().unwrap();
    let events2 =
        DecisionLog::read_all(&runner2.run_dir().join("decision_events.jsonl")).unwrap();
    assert_eq!(events, events2);
}

#[test]
fn rerun_produces_byte_identical_artifacts() {
    let bars = staircase_bars("BTC-USD", 220, 80);
    let config = scenario_config("determinism");

    let run = |dir: &std::path::Path| {
        let backend = ScriptedLlm::new(vec![Ok(mock::take_response("A", 0.9))]);
        let runner = Runner::new(
            config.clone(),
            Box::new(VecSource::new(bars.clone())),
            Box::new(backend),
            dir,
        )
        .unwrap();
        let summary = runner.run().unwrap();
        (runner.run_dir().to_path_buf(), summary)
    };

    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let (run_dir_a, summary_a) = run(dir_a.path());
    let (run_dir_b, summary_b) = run(dir_b.path());

    // Byte-identical decision log
    let log_a = std::fs::read(run_dir_a.join("decision_events.jsonl")).unwrap();
    let log_b = std::fs::read(run_dir_b.join("decision_events.jsonl")).unwrap();
    assert_eq!(log_a, log_b);

    // Identical ledger rows
    let ledger_a = PositionLedger::open(&run_dir_a.join("positions.sqlite")).unwrap();
    let ledger_b = PositionLedger::open(&run_dir_b.join("positions.sqlite")).unwrap();
    assert_eq!(
        ledger_a.all_positions(&summary_a.run_id).unwrap(),
        ledger_b.all_positions(&summary_b.run_id).unwrap()
    );

    // Candidate accounting invariant: taken candidates == opened positions
    let cache = CandidateCache::open(&run_dir_a.join("candidates.sqlite")).unwrap();
    let taken = cache
        .count(&CandidateFilter { taken: Some(true), ..Default::default() })
        .unwrap();
    assert_eq!(taken, summary_a.counters.trades_taken);
}
