//! Poll loop orchestration.
//!
//! A cycle has two phases. Collecting reads the latest block and records it;
//! any failure there ends the cycle with nothing dispatched. Deciding runs
//! the confirmation pass, reads the suggested gas price, applies the policy,
//! and on a favorable decision syncs deposits, reconciles the journal and
//! dispatches eligible items.
//!
//! Cycles never overlap: the interval is slept after each cycle ends, and a
//! shutdown request is only acted on between cycles.

pub mod report;

pub use report::{CycleOutcome, CycleReport};

use crate::deposits::DepositSource;
use crate::dispatch::{DispatchJournal, DispatchSettings, Dispatcher};
use crate::metrics::MetricsRecorder;
use crate::policy::{check_anomalies, decide};
use crate::recovery::RecoveryService;
use crate::snapshot::SnapshotReader;
use crate::state::WorkRegistry;
use crate::CycleError;
use keeper_account::AccountService;
use keeper_config::Config;
use keeper_delivery::DeliveryService;
use keeper_storage::StorageService;
use keeper_types::{wei_to_gwei, Address, BlockTag, ChainSnapshot};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::instrument;

/// Errors that can occur while setting up the engine.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
}

/// Main keeper engine driving the poll cycle.
pub struct KeeperEngine {
	config: Config,
	delivery: Arc<DeliveryService>,
	snapshots: SnapshotReader,
	recorder: MetricsRecorder,
	registry: Arc<WorkRegistry>,
	deposits: DepositSource,
	recovery: RecoveryService,
	dispatcher: Arc<Dispatcher>,
}

impl KeeperEngine {
	/// Creates an engine over already constructed service handles.
	///
	/// `sender` is the account address whose nonces are used.
	pub fn new(
		config: Config,
		sender: Address,
		storage: Arc<StorageService>,
		account: Arc<AccountService>,
		delivery: Arc<DeliveryService>,
	) -> Result<Self, EngineError> {
		let contract = config
			.network
			.deposit_contract_address()
			.map_err(|e| EngineError::Config(e.to_string()))?;
		let registry = Arc::new(WorkRegistry::new(storage.clone()));
		let journal = Arc::new(DispatchJournal::new(storage.clone()));

		let dispatcher = Arc::new(Dispatcher::new(
			delivery.clone(),
			account,
			registry.clone(),
			journal.clone(),
			sender,
			DispatchSettings {
				chain_id: config.network.chain_id,
				contract,
				gas_limit: config.network.gas_limit,
				max_nonce_retries: config.keeper.max_nonce_retries,
				max_concurrent_dispatches: config.keeper.max_concurrent_dispatches,
			},
		));

		Ok(Self {
			snapshots: SnapshotReader::new(
				delivery.clone(),
				config.network.chain_id,
				config.keeper.sample_pending_pool,
			),
			recorder: MetricsRecorder::new(storage),
			deposits: DepositSource::new(delivery.clone(), contract),
			recovery: RecoveryService::new(delivery.clone(), registry.clone(), journal, sender),
			registry,
			dispatcher,
			delivery,
			config,
		})
	}

	/// Returns a reference to the keeper configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns the work registry.
	pub fn registry(&self) -> &Arc<WorkRegistry> {
		&self.registry
	}

	/// Runs until ctrl-c or SIGTERM, finishing the in-flight cycle first.
	pub async fn run(&self) {
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let signal = tokio::spawn(async move {
			match shutdown_signal().await {
				Ok(name) => {
					tracing::info!(
						signal = name,
						"Shutdown signal received, stopping after current cycle"
					);
					let _ = shutdown_tx.send(true);
				},
				Err(e) => {
					tracing::error!(error = %e, "Failed to listen for shutdown signal");
					// Holding the sender keeps the loop on its normal interval
					let _sender = shutdown_tx;
					std::future::pending::<()>().await;
				},
			}
		});

		self.run_until(shutdown_rx).await;
		signal.abort();
	}

	/// Runs cycles until `shutdown` becomes true.
	pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) {
		let interval = Duration::from_secs(self.config.keeper.poll_interval_seconds);
		tracing::info!(
			keeper_id = %self.config.keeper.id,
			chain_id = self.config.network.chain_id,
			poll_interval_secs = interval.as_secs(),
			threshold_gwei = %self.config.keeper.price_threshold_gwei,
			"Keeper started"
		);

		loop {
			self.run_cycle().await.log();

			if *shutdown.borrow() {
				break;
			}
			tokio::select! {
				_ = tokio::time::sleep(interval) => {}
				changed = shutdown.changed() => {
					if changed.is_err() {
						// No one can signal shutdown any more
						tokio::time::sleep(interval).await;
					}
				}
			}
			if *shutdown.borrow() {
				break;
			}
		}

		tracing::info!(keeper_id = %self.config.keeper.id, "Keeper stopped");
	}

	/// Runs one poll cycle. Failures are captured in the report.
	#[instrument(skip_all)]
	pub async fn run_cycle(&self) -> CycleReport {
		let mut report = CycleReport::new();

		// Collecting
		let snapshot = match self.collect(&mut report).await {
			Ok(snapshot) => snapshot,
			Err(e) => return report.fail(e),
		};
		tracing::debug!(block_number = snapshot.block_number, "Collected block");

		// Deciding
		match self.recovery.confirm_submitted().await {
			Ok(confirmation) => report.confirmed = confirmation.confirmed,
			Err(e) => tracing::warn!(error = %e, "Confirmation pass failed"),
		}

		let price_wei = match self.delivery.get_gas_price().await {
			Ok(price) => price,
			Err(e) => return report.fail(CycleError::from(e)),
		};
		let Some(observed_gwei) = wei_to_gwei(price_wei) else {
			return report.fail(CycleError::MalformedResponse(format!(
				"gas price {} out of range",
				price_wei
			)));
		};

		let decision = decide(
			&snapshot,
			observed_gwei,
			self.config.keeper.price_threshold_gwei,
		);
		report.decision = Some(decision);
		tracing::info!(
			block_number = decision.block_number,
			favorable = decision.favorable,
			observed_gwei = %decision.observed_price_gwei,
			threshold_gwei = %decision.threshold_gwei,
			margin_gwei = %decision.margin_gwei,
			"Dispatch decision"
		);
		if !decision.favorable {
			report.outcome = CycleOutcome::Unfavorable;
			return report;
		}

		match self.deposits.sync(&self.registry).await {
			Ok(sync) => report.registered = sync.registered,
			Err(e) => tracing::warn!(error = %e, "Deposit sync failed"),
		}

		let reconciled = match self.recovery.reconcile().await {
			Ok(reconciled) => reconciled,
			Err(e) => return report.fail(format!("reconciliation failed: {}", e)),
		};

		let eligible = match self.registry.list_eligible().await {
			Ok(items) => items,
			Err(e) => return report.fail(CycleError::Persistence(e.to_string())),
		};
		let items: Vec<_> = eligible
			.into_iter()
			.filter(|item| !reconciled.in_flight.contains(&item.id))
			.collect();

		report.dispatch = self.dispatcher.dispatch_all(items, price_wei).await;
		report.outcome = CycleOutcome::Dispatched;
		report
	}

	async fn collect(&self, report: &mut CycleReport) -> Result<ChainSnapshot, CycleError> {
		let snapshot = self.snapshots.read_snapshot(BlockTag::Latest).await?;
		report.block_number = Some(snapshot.block_number);
		check_anomalies(&snapshot);
		report.recorded = self.recorder.record(&snapshot).await?;
		Ok(snapshot)
	}
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> std::io::Result<&'static str> {
	let ctrl_c = async { tokio::signal::ctrl_c().await.map(|()| "ctrl-c") };

	#[cfg(unix)]
	let terminate = async {
		use tokio::signal::unix::{signal, SignalKind};

		signal(SignalKind::terminate())?.recv().await;
		Ok::<_, std::io::Error>("SIGTERM")
	};
	#[cfg(not(unix))]
	let terminate = std::future::pending::<std::io::Result<&'static str>>();

	tokio::select! {
		result = ctrl_c => result,
		result = terminate => result,
	}
}
