//! Scripted node, account and storage doubles shared by the unit tests.

use crate::deposits::{getDepositCall, getDepositCountCall, sendWhenGasLowCall};
use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{address, keccak256};
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use keeper_account::implementations::local::LocalWallet;
use keeper_account::AccountService;
use keeper_delivery::{DeliveryError, DeliveryService, NodeInterface};
use keeper_storage::implementations::memory::MemoryStorage;
use keeper_storage::{StorageError, StorageInterface, StorageService};
use keeper_types::{
	Address, BlockTag, ChainSnapshot, ConfigSchema, SecretString, TransactionHash,
	TransactionReceipt, U256,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub fn memory_storage() -> Arc<StorageService> {
	Arc::new(StorageService::new(Box::new(MemoryStorage::new())))
}

/// Full-transaction block JSON with one gwei base fee.
pub fn block_json(number: u64, tx_count: usize) -> Value {
	let transactions: Vec<Value> = (0..tx_count)
		.map(|i| json!({ "hash": format!("0x{:064x}", i), "maxPriorityFeePerGas": "0x3b9aca00" }))
		.collect();
	json!({
		"number": format!("0x{:x}", number),
		"timestamp": "0x65a0c0f0",
		"baseFeePerGas": "0x3b9aca00",
		"gasUsed": "0x5208",
		"gasLimit": "0x1c9c380",
		"transactions": transactions,
	})
}

pub fn snapshot(block_number: u64) -> ChainSnapshot {
	ChainSnapshot {
		chain_id: 31337,
		block_number,
		timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
		base_fee_gwei: Decimal::ONE,
		gas_used: 21_000,
		gas_limit: 30_000_000,
		transaction_count: 1,
		average_priority_fee_gwei: Some(Decimal::ONE),
		pending_pool_size: None,
	}
}

/// Signing account with the well-known first Anvil key.
pub struct TestAccount;

impl TestAccount {
	pub fn service() -> Arc<AccountService> {
		let wallet = LocalWallet::new(&SecretString::from(ANVIL_KEY)).unwrap();
		Arc::new(AccountService::new(Box::new(wallet)))
	}

	pub fn address() -> Address {
		address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
	}
}

/// A transaction the fake node accepted, decoded from its raw payload.
#[derive(Debug, Clone)]
pub struct SentTransaction {
	pub hash: TransactionHash,
	pub nonce: u64,
	pub gas_price: u128,
	pub gas_limit: u64,
	pub deposit_id: u64,
}

struct NodeState {
	latest_block: Option<Value>,
	pending_block: Option<Value>,
	pending_error: Option<DeliveryError>,
	block_stall: Duration,
	latest_block_reads: usize,
	gas_price: u128,
	gas_price_error: Option<DeliveryError>,
	latest_nonce: u64,
	pending_nonce: u64,
	submit_errors: VecDeque<(Duration, DeliveryError)>,
	submit_calls: usize,
	sent: Vec<SentTransaction>,
	gap_fills: Vec<u64>,
	receipts: HashMap<Vec<u8>, bool>,
	deposits: Vec<u8>,
	call_error: bool,
}

/// In-process node with scripted responses.
#[derive(Clone)]
pub struct FakeNode {
	state: Arc<Mutex<NodeState>>,
}

impl FakeNode {
	pub fn new() -> Self {
		Self {
			state: Arc::new(Mutex::new(NodeState {
				latest_block: Some(block_json(1, 0)),
				pending_block: Some(block_json(2, 0)),
				pending_error: None,
				block_stall: Duration::ZERO,
				latest_block_reads: 0,
				gas_price: 1_000_000_000,
				gas_price_error: None,
				latest_nonce: 0,
				pending_nonce: 0,
				submit_errors: VecDeque::new(),
				submit_calls: 0,
				sent: Vec::new(),
				gap_fills: Vec::new(),
				receipts: HashMap::new(),
				deposits: Vec::new(),
				call_error: false,
			})),
		}
	}

	/// Deposit contract address, matching the test configuration default.
	pub fn contract() -> Address {
		address!("5FbDB2315678afecb367f032d93F642f64180aa3")
	}

	/// Delivery service over this node with a ten second call timeout.
	pub fn service(&self) -> Arc<DeliveryService> {
		Arc::new(DeliveryService::new(
			Box::new(self.clone()),
			Duration::from_secs(10),
		))
	}

	fn with<R>(&self, f: impl FnOnce(&mut NodeState) -> R) -> R {
		f(&mut self.state.lock().unwrap())
	}

	pub fn set_latest_block(&self, block: Option<Value>) {
		self.with(|s| s.latest_block = block);
	}

	pub fn set_pending_block(&self, block: Option<Value>) {
		self.with(|s| s.pending_block = block);
	}

	/// Fails the next pending block read.
	pub fn set_pending_error(&self, error: Option<DeliveryError>) {
		self.with(|s| s.pending_error = error);
	}

	/// Delays latest block reads; zero disables the stall.
	pub fn stall_blocks(&self, stall: Duration) {
		self.with(|s| s.block_stall = stall);
	}

	pub fn latest_block_reads(&self) -> usize {
		self.with(|s| s.latest_block_reads)
	}

	pub fn set_gas_price(&self, wei: u128) {
		self.with(|s| s.gas_price = wei);
	}

	/// Fails the next gas price read.
	pub fn set_gas_price_error(&self, error: Option<DeliveryError>) {
		self.with(|s| s.gas_price_error = error);
	}

	pub fn set_nonces(&self, latest: u64, pending: u64) {
		self.with(|s| {
			s.latest_nonce = latest;
			s.pending_nonce = pending;
		});
	}

	/// Includes every accepted transaction in a block.
	pub fn mine_pending(&self) {
		self.with(|s| s.latest_nonce = s.pending_nonce);
	}

	/// Queues an error for the next submission.
	pub fn push_submit_error(&self, error: DeliveryError) {
		self.push_delayed_submit_error(Duration::ZERO, error);
	}

	/// Queues an error returned only after `delay`.
	pub fn push_delayed_submit_error(&self, delay: Duration, error: DeliveryError) {
		self.with(|s| s.submit_errors.push_back((delay, error)));
	}

	pub fn submit_calls(&self) -> usize {
		self.with(|s| s.submit_calls)
	}

	/// Accepted transactions in submission order.
	pub fn sent_transactions(&self) -> Vec<SentTransaction> {
		self.with(|s| s.sent.clone())
	}

	/// Nonces of accepted transactions without calldata.
	pub fn gap_fills(&self) -> Vec<u64> {
		self.with(|s| s.gap_fills.clone())
	}

	pub fn set_receipt(&self, hash: &TransactionHash, success: bool) {
		self.with(|s| s.receipts.insert(hash.0.clone(), success));
	}

	/// On-chain status per deposit id, indexed from zero.
	pub fn set_deposits(&self, statuses: &[u8]) {
		self.with(|s| s.deposits = statuses.to_vec());
	}

	pub fn set_call_error(&self, fail: bool) {
		self.with(|s| s.call_error = fail);
	}
}

#[async_trait]
impl NodeInterface for FakeNode {
	async fn get_block(&self, tag: BlockTag) -> Result<Option<Value>, DeliveryError> {
		match tag {
			BlockTag::Latest => {
				let (stall, block) = self.with(|s| {
					s.latest_block_reads += 1;
					(s.block_stall, s.latest_block.clone())
				});
				if !stall.is_zero() {
					tokio::time::sleep(stall).await;
				}
				Ok(block)
			},
			BlockTag::Pending => self.with(|s| match s.pending_error.take() {
				Some(e) => Err(e),
				None => Ok(s.pending_block.clone()),
			}),
		}
	}

	async fn get_gas_price(&self) -> Result<u128, DeliveryError> {
		self.with(|s| match s.gas_price_error.take() {
			Some(e) => Err(e),
			None => Ok(s.gas_price),
		})
	}

	async fn get_transaction_count(
		&self,
		_address: Address,
		tag: BlockTag,
	) -> Result<u64, DeliveryError> {
		self.with(|s| {
			Ok(match tag {
				BlockTag::Latest => s.latest_nonce,
				BlockTag::Pending => s.pending_nonce,
			})
		})
	}

	async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TransactionHash, DeliveryError> {
		let scripted = self.with(|s| {
			s.submit_calls += 1;
			s.submit_errors.pop_front()
		});
		if let Some((delay, e)) = scripted {
			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}
			return Err(e);
		}

		self.with(|s| {
			let envelope = TxEnvelope::decode_2718(&mut &raw[..])
				.map_err(|e| DeliveryError::Rejected(e.to_string()))?;
			let legacy = envelope
				.as_legacy()
				.ok_or_else(|| DeliveryError::Rejected("expected legacy transaction".into()))?
				.tx();

			let hash = TransactionHash(keccak256(raw).to_vec());
			if legacy.input.is_empty() {
				s.pending_nonce = s.pending_nonce.max(legacy.nonce + 1);
				s.gap_fills.push(legacy.nonce);
				return Ok(hash);
			}

			let call = sendWhenGasLowCall::abi_decode(&legacy.input)
				.map_err(|e| DeliveryError::Rejected(e.to_string()))?;
			s.pending_nonce = s.pending_nonce.max(legacy.nonce + 1);
			s.sent.push(SentTransaction {
				hash: hash.clone(),
				nonce: legacy.nonce,
				gas_price: legacy.gas_price,
				gas_limit: legacy.gas_limit,
				deposit_id: call.depositId.to::<u64>(),
			});
			Ok(hash)
		})
	}

	async fn get_transaction_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		self.with(|s| {
			Ok(s.receipts.get(&hash.0).map(|success| TransactionReceipt {
				hash: hash.clone(),
				block_number: 1,
				success: *success,
			}))
		})
	}

	async fn call(&self, _to: Address, data: Vec<u8>) -> Result<Vec<u8>, DeliveryError> {
		self.with(|s| {
			if s.call_error {
				return Err(DeliveryError::Network("connection refused".into()));
			}
			if data.starts_with(&getDepositCountCall::SELECTOR) {
				return Ok(U256::from(s.deposits.len()).abi_encode());
			}
			if data.starts_with(&getDepositCall::SELECTOR) {
				let call = getDepositCall::abi_decode(&data)
					.map_err(|e| DeliveryError::MalformedResponse(e.to_string()))?;
				let status = s
					.deposits
					.get(call.depositId.to::<usize>())
					.copied()
					.ok_or_else(|| DeliveryError::Rejected("execution reverted".into()))?;
				// uint8 status occupies a full word like any uint
				let fields = (Address::ZERO, Address::ZERO, U256::ZERO, U256::ZERO, U256::from(status));
				return Ok(fields.abi_encode_params());
			}
			Err(DeliveryError::Rejected("unknown selector".into()))
		})
	}
}

/// Switches that make [`FailingStorage`] writes fail.
#[derive(Default)]
pub struct FailFlags {
	inserts: AtomicBool,
	writes: AtomicBool,
	swaps: AtomicBool,
}

impl FailFlags {
	/// Fails insert-if-absent writes.
	pub fn fail_inserts(&self, fail: bool) {
		self.inserts.store(fail, Ordering::SeqCst);
	}

	/// Fails plain overwrites.
	pub fn fail_writes(&self, fail: bool) {
		self.writes.store(fail, Ordering::SeqCst);
	}

	/// Fails compare-and-swap updates.
	pub fn fail_swaps(&self, fail: bool) {
		self.swaps.store(fail, Ordering::SeqCst);
	}
}

/// Memory storage whose writes can be made to fail.
pub struct FailingStorage {
	inner: MemoryStorage,
	flags: Arc<FailFlags>,
}

fn injected() -> StorageError {
	StorageError::Backend("injected failure".into())
}

#[async_trait]
impl StorageInterface for FailingStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.inner.get_bytes(key).await
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		if self.flags.writes.load(Ordering::SeqCst) {
			return Err(injected());
		}
		self.inner.set_bytes(key, value).await
	}

	async fn set_bytes_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, StorageError> {
		if self.flags.inserts.load(Ordering::SeqCst) {
			return Err(injected());
		}
		self.inner.set_bytes_if_absent(key, value).await
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: &[u8],
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		if self.flags.swaps.load(Ordering::SeqCst) {
			return Err(injected());
		}
		self.inner.compare_and_swap(key, expected, value).await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.inner.delete(key).await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		self.inner.exists(key).await
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		self.inner.list_keys(prefix).await
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		self.inner.config_schema()
	}
}

pub fn failing_storage() -> (Arc<StorageService>, Arc<FailFlags>) {
	let flags = Arc::new(FailFlags::default());
	let storage = FailingStorage {
		inner: MemoryStorage::new(),
		flags: flags.clone(),
	};
	(Arc::new(StorageService::new(Box::new(storage))), flags)
}
