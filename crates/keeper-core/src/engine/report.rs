//! Per-cycle outcome reporting.

use crate::dispatch::DispatchSummary;
use keeper_types::DispatchDecision;
use std::fmt;

/// How a poll cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
	/// The decision was favorable and eligible items were dispatched.
	Dispatched,
	/// The gas price was above the threshold.
	Unfavorable,
	/// The cycle stopped early; nothing was dispatched after the failure.
	Failed(String),
}

impl fmt::Display for CycleOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CycleOutcome::Dispatched => f.write_str("dispatched"),
			CycleOutcome::Unfavorable => f.write_str("unfavorable"),
			CycleOutcome::Failed(_) => f.write_str("failed"),
		}
	}
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
	pub outcome: CycleOutcome,
	pub block_number: Option<u64>,
	/// Whether the cycle wrote a new metric row.
	pub recorded: bool,
	pub decision: Option<DispatchDecision>,
	pub registered: u64,
	pub confirmed: usize,
	pub dispatch: DispatchSummary,
}

impl CycleReport {
	pub(crate) fn new() -> Self {
		Self {
			outcome: CycleOutcome::Dispatched,
			block_number: None,
			recorded: false,
			decision: None,
			registered: 0,
			confirmed: 0,
			dispatch: DispatchSummary::default(),
		}
	}

	pub(crate) fn fail(mut self, reason: impl fmt::Display) -> Self {
		self.outcome = CycleOutcome::Failed(reason.to_string());
		self
	}

	/// Emits the report as one structured event.
	pub fn log(&self) {
		let observed = self.decision.map(|d| d.observed_price_gwei.to_string());
		let threshold = self.decision.map(|d| d.threshold_gwei.to_string());

		match &self.outcome {
			CycleOutcome::Failed(reason) => tracing::warn!(
				outcome = %self.outcome,
				block_number = ?self.block_number,
				recorded = self.recorded,
				observed_gwei = ?observed,
				reason = %reason,
				"Cycle failed"
			),
			_ => tracing::info!(
				outcome = %self.outcome,
				block_number = ?self.block_number,
				recorded = self.recorded,
				observed_gwei = ?observed,
				threshold_gwei = ?threshold,
				registered = self.registered,
				confirmed = self.confirmed,
				attempted = self.dispatch.attempted,
				submitted = self.dispatch.submitted,
				failed = self.dispatch.failed,
				deferred = self.dispatch.deferred,
				gaps_filled = self.dispatch.gaps_filled,
				"Cycle complete"
			),
		}
	}
}
