//! Per-cycle nonce reservation.

use std::collections::BTreeSet;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct ReservationState {
	last: Option<u64>,
	/// Released nonces below `last`, each a hole in the submitted sequence.
	gaps: BTreeSet<u64>,
}

/// Hands out nonces for one dispatch cycle.
///
/// Each reservation is `max(node pending nonce, last reserved + 1)`, taken
/// under a lock, so concurrent dispatches never share a nonce even when the
/// node has not yet seen an earlier submission. A released nonce that is
/// not the latest becomes a gap; later reservations fill gaps first, and
/// [`NonceReservation::take_gaps`] returns whatever is left at the end of the
/// round. A reservation is created fresh every cycle; nothing is cached
/// across cycles.
#[derive(Debug, Default)]
pub struct NonceReservation {
	state: Mutex<ReservationState>,
}

impl NonceReservation {
	pub fn new() -> Self {
		Self::default()
	}

	/// Reserves the next nonce given the node's current pending nonce.
	pub async fn reserve(&self, node_nonce: u64) -> u64 {
		let mut state = self.state.lock().await;

		// Gaps below the node's nonce were consumed elsewhere
		state.gaps = state.gaps.split_off(&node_nonce);
		if let Some(gap) = state.gaps.pop_first() {
			return gap;
		}

		let nonce = match state.last {
			Some(previous) => node_nonce.max(previous + 1),
			None => node_nonce,
		};
		state.last = Some(nonce);
		nonce
	}

	/// Returns an unused nonce.
	///
	/// Releasing the latest reservation rolls it back, together with any gaps
	/// directly beneath it. Releasing an older one records a gap. Returns
	/// `true` when the nonce was rolled back.
	pub async fn release(&self, nonce: u64) -> bool {
		let mut state = self.state.lock().await;
		if state.last != Some(nonce) {
			state.gaps.insert(nonce);
			return false;
		}

		let mut last = nonce.checked_sub(1);
		while let Some(candidate) = last {
			if !state.gaps.remove(&candidate) {
				break;
			}
			last = candidate.checked_sub(1);
		}
		state.last = last;
		true
	}

	/// Removes and returns the unfilled gaps, lowest first.
	pub async fn take_gaps(&self) -> Vec<u64> {
		let mut state = self.state.lock().await;
		std::mem::take(&mut state.gaps).into_iter().collect()
	}
}
