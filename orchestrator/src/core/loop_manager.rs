//! Per-agent loop analysis: continue or stop, and why.
//!
//! Pure analysis over agent output text and the previous [`AgentLoopState`].
//! Nothing here performs I/O or fails; every verdict carries a reason string.

use regex::Regex;

use crate::core::config::CircuitBreakerConfig;
use crate::core::fingerprint::fingerprint;
use crate::core::patterns::{
    EXIT_SIGNAL_PATTERN, PatternCatalogue, completion_catalogue, error_catalogue,
};
use crate::core::types::{AgentLoopState, CircuitState};

/// Completion phrases required alongside the exit marker.
pub const MIN_COMPLETION_INDICATORS: usize = 2;

/// Result of the dual-gate exit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitCondition {
    /// Explicit `EXIT_SIGNAL: true` marker present.
    pub exit_signal: bool,
    /// Distinct completion phrases matched, in catalogue order.
    pub indicators: Vec<String>,
    pub should_exit: bool,
    pub reason: String,
}

impl ExitCondition {
    pub fn completion_count(&self) -> usize {
        self.indicators.len()
    }
}

/// How an output's error markers relate to the previous signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorSighting {
    /// No error marker matched.
    Clear,
    /// Errors matched with a signature different from the previous one.
    New(String),
    /// Same signature as the previous loop.
    Repeated(String),
}

impl ErrorSighting {
    pub fn signature(&self) -> Option<&str> {
        match self {
            ErrorSighting::Clear => None,
            ErrorSighting::New(sig) | ErrorSighting::Repeated(sig) => Some(sig),
        }
    }
}

/// Which rule produced a loop verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    Continue,
    BreakerDisabled,
    NoProgressTrip,
    RepeatedErrorTrip,
    /// The circuit was already open when the loop arrived.
    CircuitOpen,
    ExitSignal,
}

impl LoopOutcome {
    /// True when this loop opened the circuit.
    pub fn is_trip(self) -> bool {
        matches!(
            self,
            LoopOutcome::NoProgressTrip | LoopOutcome::RepeatedErrorTrip
        )
    }
}

/// Verdict for one loop together with the updated counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDecision {
    pub loop_state: AgentLoopState,
    pub should_continue: bool,
    pub reason: String,
    pub outcome: LoopOutcome,
    /// Whether this loop's output counted as progress.
    pub progressed: bool,
}

/// Circuit-breaking loop analyzer.
#[derive(Debug)]
pub struct LoopManager {
    config: CircuitBreakerConfig,
    completion: PatternCatalogue,
    errors: PatternCatalogue,
    exit_marker: Regex,
}

impl LoopManager {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_catalogues(config, completion_catalogue(), error_catalogue())
    }

    /// Use custom completion and error catalogues.
    pub fn with_catalogues(
        config: CircuitBreakerConfig,
        completion: PatternCatalogue,
        errors: PatternCatalogue,
    ) -> Self {
        Self {
            config,
            completion,
            errors,
            exit_marker: Regex::new(EXIT_SIGNAL_PATTERN).expect("exit marker pattern is valid"),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn initialize_loop_state(&self) -> AgentLoopState {
        AgentLoopState::default()
    }

    /// Dual gate: the explicit marker AND at least two distinct completion phrases.
    pub fn analyze_exit_condition(&self, output: &str) -> ExitCondition {
        let exit_signal = self.exit_marker.is_match(output);
        let indicators: Vec<String> = self
            .completion
            .matches(output)
            .into_iter()
            .map(|m| m.text)
            .collect();
        let count = indicators.len();
        let should_exit = exit_signal && count >= MIN_COMPLETION_INDICATORS;

        let reason = if should_exit {
            format!(
                "Exit conditions met: EXIT_SIGNAL=true, completion indicators={count} ({})",
                indicators.join(", ")
            )
        } else if !exit_signal {
            format!("EXIT_SIGNAL not set (found {count} completion indicators)")
        } else {
            format!("Need >= {MIN_COMPLETION_INDICATORS} completion indicators (found {count})")
        };

        ExitCondition {
            exit_signal,
            indicators,
            should_exit,
            reason,
        }
    }

    /// True on the first loop, otherwise iff the normalized fingerprint changed.
    pub fn detect_progress(&self, output: &str, last_fingerprint: Option<&str>) -> bool {
        match last_fingerprint {
            None => true,
            Some(last) => fingerprint(output) != last,
        }
    }

    /// Pipe-joined signature of every error marker in `output`, compared to `last_error`.
    pub fn detect_repeated_error(&self, output: &str, last_error: Option<&str>) -> ErrorSighting {
        let matched = self.errors.matches(output);
        if matched.is_empty() {
            return ErrorSighting::Clear;
        }
        let signature = matched
            .into_iter()
            .map(|m| m.text)
            .collect::<Vec<_>>()
            .join("|");
        if last_error == Some(signature.as_str()) {
            ErrorSighting::Repeated(signature)
        } else {
            ErrorSighting::New(signature)
        }
    }

    /// Advance `loop_state` by one loop of `output` and decide whether to continue.
    ///
    /// Evaluation order: count the loop, update progress and error counters, then
    /// (if the breaker is enabled) no-progress trip, repeated-error trip, exit gate.
    pub fn update_loop_state(&self, loop_state: &AgentLoopState, output: &str) -> LoopDecision {
        let mut next = loop_state.clone();
        next.current_loop += 1;

        let progressed = self.detect_progress(output, loop_state.last_progress.as_deref());
        if progressed {
            next.no_progress_loops = 0;
            next.last_progress = Some(fingerprint(output));
        } else {
            next.no_progress_loops += 1;
        }

        match self.detect_repeated_error(output, loop_state.last_error.as_deref()) {
            ErrorSighting::Repeated(_) => next.repeated_error_loops += 1,
            ErrorSighting::New(signature) => {
                next.repeated_error_loops = 1;
                next.last_error = Some(signature);
            }
            ErrorSighting::Clear => {
                next.repeated_error_loops = 0;
                next.last_error = None;
            }
        }

        if !self.config.enabled {
            return decision(
                next,
                true,
                "Circuit breaker disabled".to_string(),
                LoopOutcome::BreakerDisabled,
                progressed,
            );
        }

        if loop_state.circuit_state == CircuitState::Open {
            return decision(
                next,
                false,
                "Circuit breaker OPEN: reset required before continuing".to_string(),
                LoopOutcome::CircuitOpen,
                progressed,
            );
        }

        if next.no_progress_loops >= self.config.max_no_progress_loops {
            next.circuit_state = CircuitState::Open;
            let reason = format!(
                "Circuit breaker OPEN: {} consecutive loops with no progress (max {})",
                next.no_progress_loops, self.config.max_no_progress_loops
            );
            return decision(next, false, reason, LoopOutcome::NoProgressTrip, progressed);
        }

        if next.repeated_error_loops >= self.config.max_repeated_error_loops {
            next.circuit_state = CircuitState::Open;
            let reason = format!(
                "Circuit breaker OPEN: {} consecutive loops with repeated error \"{}\" (max {})",
                next.repeated_error_loops,
                next.last_error.as_deref().unwrap_or_default(),
                self.config.max_repeated_error_loops
            );
            return decision(next, false, reason, LoopOutcome::RepeatedErrorTrip, progressed);
        }

        let exit = self.analyze_exit_condition(output);
        next.exit_signal = exit.exit_signal;
        next.completion_indicators = exit.indicators.clone();
        if exit.should_exit {
            return decision(next, false, exit.reason, LoopOutcome::ExitSignal, progressed);
        }

        next.circuit_state = CircuitState::Closed;
        let reason = if progressed {
            "Progress detected, continuing".to_string()
        } else {
            format!(
                "No progress ({}/{}), continuing",
                next.no_progress_loops, self.config.max_no_progress_loops
            )
        };
        decision(next, true, reason, LoopOutcome::Continue, progressed)
    }
}

fn decision(
    loop_state: AgentLoopState,
    should_continue: bool,
    reason: String,
    outcome: LoopOutcome,
    progressed: bool,
) -> LoopDecision {
    LoopDecision {
        loop_state,
        should_continue,
        reason,
        outcome,
        progressed,
    }
}

/// Close the circuit and zero both loop counters. The only way back from `Open`.
pub fn reset_circuit(loop_state: &AgentLoopState) -> AgentLoopState {
    AgentLoopState {
        circuit_state: CircuitState::Closed,
        no_progress_loops: 0,
        repeated_error_loops: 0,
        ..loop_state.clone()
    }
}

/// One-line audit summary of a loop.
pub fn loop_summary(agent_id: &str, loop_state: &AgentLoopState, exit: &ExitCondition) -> String {
    let circuit = match loop_state.circuit_state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    };
    [
        format!("Agent {agent_id} - Loop {}", loop_state.current_loop),
        format!("Circuit: {circuit}"),
        format!("No Progress: {}", loop_state.no_progress_loops),
        format!("Repeated Errors: {}", loop_state.repeated_error_loops),
        format!("Exit Signal: {}", exit.exit_signal),
        format!("Completion Indicators: {}", exit.completion_count()),
        format!("Should Exit: {}", exit.should_exit),
        format!("Reason: {}", exit.reason),
    ]
    .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> LoopManager {
        LoopManager::new(CircuitBreakerConfig::default())
    }

    fn manager_with(max_no_progress: u32, max_repeated: u32) -> LoopManager {
        LoopManager::new(CircuitBreakerConfig {
            max_no_progress_loops: max_no_progress,
            max_repeated_error_loops: max_repeated,
            enabled: true,
        })
    }

    #[test]
    fn exit_requires_marker_even_with_many_phrases() {
        let exit = manager().analyze_exit_condition(
            "Task complete. All done. PR merged. Ready for review. DONE",
        );
        assert!(!exit.exit_signal);
        assert_eq!(exit.completion_count(), 5);
        assert!(!exit.should_exit);
        assert_eq!(exit.reason, "EXIT_SIGNAL not set (found 5 completion indicators)");
    }

    #[test]
    fn exit_with_marker_and_two_phrases() {
        let exit = manager().analyze_exit_condition("Task is complete, all done.\nEXIT_SIGNAL: true");
        assert!(exit.exit_signal);
        assert_eq!(exit.indicators, vec!["Task is complete", "all done"]);
        assert!(exit.should_exit);
        assert!(exit.reason.starts_with("Exit conditions met"));
    }

    #[test]
    fn exit_with_marker_and_one_phrase_is_refused() {
        let exit = manager().analyze_exit_condition("exit_signal: TRUE\nThe phase is complete");
        assert!(exit.exit_signal);
        assert_eq!(exit.completion_count(), 1);
        assert!(!exit.should_exit);
        assert_eq!(exit.reason, "Need >= 2 completion indicators (found 1)");
    }

    #[test]
    fn repeated_phrase_counts_once() {
        let exit = manager()
            .analyze_exit_condition("all done, all done, all done\nEXIT_SIGNAL: true");
        assert_eq!(exit.completion_count(), 1);
        assert!(!exit.should_exit);
    }

    #[test]
    fn first_loop_always_progresses() {
        assert!(manager().detect_progress("anything", None));
    }

    #[test]
    fn timestamp_and_hex_changes_are_not_progress() {
        let lm = manager();
        let previous = fingerprint("2025-01-01T00:00:00Z build 1a2b3c4d5e6f ok");
        assert!(!lm.detect_progress("2025-02-02T11:11:11Z build abcdef012345 ok", Some(&previous)));
        assert!(lm.detect_progress("2025-02-02T11:11:11Z build failed", Some(&previous)));
    }

    #[test]
    fn error_signature_joins_matches_with_pipes() {
        let sighting = manager().detect_repeated_error("Error: cannot read config", None);
        assert_eq!(sighting, ErrorSighting::New("Error:|cannot read".to_string()));

        let repeated =
            manager().detect_repeated_error("Error: cannot read config", Some("Error:|cannot read"));
        assert_eq!(repeated, ErrorSighting::Repeated("Error:|cannot read".to_string()));

        assert_eq!(manager().detect_repeated_error("all green", None), ErrorSighting::Clear);
    }

    #[test]
    fn no_progress_trips_exactly_at_threshold() {
        let lm = manager_with(3, 10);
        let mut state = lm.initialize_loop_state();

        // Loop 1 records the fingerprint; loops 2 and 3 are stalls 1 and 2.
        for expected_stalls in 0..3 {
            let d = lm.update_loop_state(&state, "same output");
            assert!(d.should_continue, "loop {} should continue", expected_stalls + 1);
            assert_eq!(d.loop_state.no_progress_loops, expected_stalls);
            state = d.loop_state;
        }

        let tripped = lm.update_loop_state(&state, "same output");
        assert!(!tripped.should_continue);
        assert_eq!(tripped.outcome, LoopOutcome::NoProgressTrip);
        assert_eq!(tripped.loop_state.circuit_state, CircuitState::Open);
        assert_eq!(tripped.loop_state.current_loop, 4);
        assert_eq!(
            tripped.reason,
            "Circuit breaker OPEN: 3 consecutive loops with no progress (max 3)"
        );
    }

    #[test]
    fn repeated_error_trips_exactly_at_threshold() {
        let lm = manager_with(100, 3);
        let mut state = lm.initialize_loop_state();
        let outputs = ["attempt 1 error: boom", "attempt 2 error: boom"];
        for (idx, output) in outputs.iter().enumerate() {
            let d = lm.update_loop_state(&state, output);
            assert!(d.should_continue);
            assert_eq!(d.loop_state.repeated_error_loops, idx as u32 + 1);
            state = d.loop_state;
        }

        let tripped = lm.update_loop_state(&state, "attempt 3 error: boom");
        assert!(!tripped.should_continue);
        assert_eq!(tripped.outcome, LoopOutcome::RepeatedErrorTrip);
        assert_eq!(tripped.loop_state.repeated_error_loops, 3);
        assert!(tripped.reason.contains("repeated error \"error:\""));
    }

    #[test]
    fn new_error_signature_resets_counter_to_one() {
        let lm = manager();
        let first = lm.update_loop_state(&lm.initialize_loop_state(), "error: a");
        let second = lm.update_loop_state(&first.loop_state, "error: b");
        assert_eq!(second.loop_state.repeated_error_loops, 2);

        let third = lm.update_loop_state(&second.loop_state, "fatal: disk full");
        assert_eq!(third.loop_state.repeated_error_loops, 1);
        assert_eq!(third.loop_state.last_error.as_deref(), Some("fatal:"));

        let clean = lm.update_loop_state(&third.loop_state, "all tests passing");
        assert_eq!(clean.loop_state.repeated_error_loops, 0);
        assert_eq!(clean.loop_state.last_error, None);
    }

    #[test]
    fn disabled_breaker_never_trips() {
        let lm = LoopManager::new(CircuitBreakerConfig {
            max_no_progress_loops: 1,
            max_repeated_error_loops: 1,
            enabled: false,
        });
        let mut state = lm.initialize_loop_state();
        for _ in 0..5 {
            let d = lm.update_loop_state(&state, "error: same");
            assert!(d.should_continue);
            assert_eq!(d.outcome, LoopOutcome::BreakerDisabled);
            assert_eq!(d.reason, "Circuit breaker disabled");
            state = d.loop_state;
        }
        assert_eq!(state.circuit_state, CircuitState::Closed);
        assert_eq!(state.no_progress_loops, 4);
        assert_eq!(state.repeated_error_loops, 5);
    }

    #[test]
    fn exit_signal_stops_and_records_indicators() {
        let lm = manager();
        let d = lm.update_loop_state(
            &lm.initialize_loop_state(),
            "Implementation finished and PR merged.\nEXIT_SIGNAL: true",
        );
        assert!(!d.should_continue);
        assert_eq!(d.outcome, LoopOutcome::ExitSignal);
        assert!(d.loop_state.exit_signal);
        assert_eq!(d.loop_state.completion_indicators.len(), 2);
    }

    #[test]
    fn continue_reason_reports_stall_count() {
        let lm = manager();
        let first = lm.update_loop_state(&lm.initialize_loop_state(), "step");
        assert_eq!(first.reason, "Progress detected, continuing");
        let second = lm.update_loop_state(&first.loop_state, "step");
        assert_eq!(second.reason, "No progress (1/5), continuing");
    }

    #[test]
    fn open_circuit_stays_open_until_reset() {
        let lm = manager_with(1, 10);
        let first = lm.update_loop_state(&lm.initialize_loop_state(), "x");
        let tripped = lm.update_loop_state(&first.loop_state, "x");
        assert_eq!(tripped.loop_state.circuit_state, CircuitState::Open);

        let after = lm.update_loop_state(&tripped.loop_state, "fresh progress");
        assert!(!after.should_continue);
        assert_eq!(after.outcome, LoopOutcome::CircuitOpen);
        assert_eq!(after.loop_state.circuit_state, CircuitState::Open);

        let reset = reset_circuit(&after.loop_state);
        let resumed = lm.update_loop_state(&reset, "more fresh progress");
        assert!(resumed.should_continue);
        assert_eq!(resumed.loop_state.circuit_state, CircuitState::Closed);
    }

    #[test]
    fn reset_circuit_zeroes_counters_from_any_state() {
        let state = AgentLoopState {
            current_loop: 9,
            no_progress_loops: 4,
            repeated_error_loops: 7,
            last_error: Some("fatal:".to_string()),
            circuit_state: CircuitState::HalfOpen,
            ..AgentLoopState::default()
        };
        let reset = reset_circuit(&state);
        assert_eq!(reset.circuit_state, CircuitState::Closed);
        assert_eq!(reset.no_progress_loops, 0);
        assert_eq!(reset.repeated_error_loops, 0);
        assert_eq!(reset.current_loop, 9);
        assert_eq!(reset.last_error.as_deref(), Some("fatal:"));
    }

    #[test]
    fn summary_lists_all_fields() {
        let lm = manager();
        let exit = lm.analyze_exit_condition("working");
        let state = AgentLoopState {
            current_loop: 3,
            ..AgentLoopState::default()
        };
        let summary = loop_summary("agent-7", &state, &exit);
        assert!(summary.starts_with("Agent agent-7 - Loop 3 | Circuit: closed"));
        assert!(summary.contains("Should Exit: false"));
        assert_eq!(summary.matches(" | ").count(), 7);
    }
}
