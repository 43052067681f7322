use std::sync::Arc;
use std::time::Duration;

use alloy::sol;
use alloy::sol_types::{Panic, Revert, SolCall, SolError, SolEvent, SolInterface};
use alloy_primitives::utils::parse_ether;
use alloy_primitives::{address, Address, Bytes, B256, U256, U64};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{ClientConfig, GatewayConfig};
use crate::provider::{LogFilter, ProviderRpcError, ReceiptSummary, TransactionParams, WalletProvider, WalletProviderExt};
use crate::tx::{TxError, TxPhase, WriteAction};

sol! {
    /// Snapshot of one envelope as stored by the contract
    #[derive(Debug, Default, PartialEq, Eq)]
    struct EnvelopeInfo {
        address creator;
        uint256 totalAmount;
        uint256 remainingAmount;
        uint256 totalCount;
        uint256 remainingCount;
        bool isRandom;
        bool isActive;
        string message;
    }

    interface IRedEnvelope {
        /// @dev Revert when the caller already took a share of this envelope.
        error AlreadyClaimed();

        /// @dev Revert when the envelope id was never created.
        error EnvelopeNotFound();

        /// @dev Revert when every share has been claimed.
        error EnvelopeEmpty();

        /// @dev Revert when the deposit cannot cover the requested share count.
        error InvalidAmount();

        function getEnvelopeInfo(uint256 envelopeId) external view returns (EnvelopeInfo memory);

        function hasClaimed(uint256 envelopeId, address user) external view returns (bool);

        function getTotalEnvelopes() external view returns (uint256);

        /// Deposit msg.value and split it into `count` shares, randomly when `isRandom` is set.
        /// `message` is the blessing shown to claimants.
        function createEnvelope(uint256 count, bool isRandom, string calldata message) external payable returns (uint256 envelopeId);

        /// Take one share of an envelope, at most once per address.
        function claimEnvelope(uint256 envelopeId) external returns (uint256 amount);

        #[derive(Debug, PartialEq, Eq)]
        event EnvelopeCreated(uint256 indexed envelopeId, address indexed creator, uint256 totalAmount, uint256 count, bool isRandom, string message);

        #[derive(Debug, PartialEq, Eq)]
        event EnvelopeClaimed(uint256 indexed envelopeId, address indexed claimer, uint256 amount);
    }
}

use IRedEnvelope::IRedEnvelopeErrors;

/// Hardhat / anvil default first deployment
pub const LOCAL_DEPLOYMENT: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
pub const SEPOLIA_DEPLOYMENT: Address = address!("54b7c1B0ff111AcAd646298f3cA0227f0C6804AD");

const DEPLOYMENTS: [(u64, Address); 2] = [(31337, LOCAL_DEPLOYMENT), (11155111, SEPOLIA_DEPLOYMENT)];

pub const MAX_ENVELOPE_COUNT: u64 = 100;
pub const MAX_MESSAGE_CHARS: usize = 200;
pub const DEFAULT_MESSAGE: &str = "恭喜发财，新年快乐！";

/// Built-in red envelope deployment for a chain, `None` for unsupported chains
pub fn resolve_address(chain_id: u64) -> Option<Address> {
    DEPLOYMENTS.iter().find(|(id, _)| *id == chain_id).map(|(_, address)| *address)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("network {0} is not supported")]
    UnsupportedNetwork(u64),
    #[error("no wallet connected")]
    NotConnected,
    #[error("write action was already started")]
    ActionReused,
    #[error("invalid envelope: {0}")]
    InvalidDraft(String),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderRpcError),
    #[error("failed to decode {call} result: {reason}")]
    Decode { call: &'static str, reason: String },
    #[error(transparent)]
    Transaction(#[from] TxError),
}

impl GatewayError {
    pub fn is_unsupported_network(&self) -> bool {
        matches!(self, Self::UnsupportedNetwork(_))
    }
}

/// What a user asked for when creating an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeDraft {
    pub count: u64,
    pub is_random: bool,
    pub message: String,
    /// Total deposit in wei
    pub value: U256,
}

impl EnvelopeDraft {
    pub fn new(count: u64, is_random: bool, message: impl Into<String>, value: U256) -> Self {
        Self { count, is_random, message: message.into(), value }
    }

    /// Build from raw form input, `amount` is in ether
    pub fn from_form(amount: &str, count: &str, is_random: bool, message: &str) -> Result<Self, GatewayError> {
        let value = parse_ether(amount.trim()).map_err(|_| GatewayError::InvalidDraft("amount must be a valid ether value".into()))?;
        let count = count
            .trim()
            .parse::<u64>()
            .map_err(|_| GatewayError::InvalidDraft("count must be a whole number".into()))?;
        let draft = Self::new(count, is_random, message.trim(), value);
        draft.validate()?;
        Ok(draft)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.value.is_zero() {
            return Err(GatewayError::InvalidDraft("amount must be greater than zero".into()));
        }
        if self.count == 0 {
            return Err(GatewayError::InvalidDraft("count must be at least 1".into()));
        }
        if self.count > MAX_ENVELOPE_COUNT {
            return Err(GatewayError::InvalidDraft(format!("count cannot exceed {MAX_ENVELOPE_COUNT}")));
        }
        if self.message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(GatewayError::InvalidDraft(format!("message cannot exceed {MAX_MESSAGE_CHARS} characters")));
        }
        Ok(())
    }

    pub fn message_or_default(&self) -> &str {
        if self.message.is_empty() {
            DEFAULT_MESSAGE
        } else {
            &self.message
        }
    }
}

/// A mined, successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
}

/// Live contract event feed, stops polling when dropped
pub struct EventSubscription {
    task: JoinHandle<()>,
}

impl EventSubscription {
    pub fn unsubscribe(self) {}
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Pull a human readable reason out of revert data
pub fn decode_revert(data: &[u8]) -> Option<String> {
    if let Ok(custom) = IRedEnvelopeErrors::abi_decode(data, true) {
        let signature = match custom {
            IRedEnvelopeErrors::AlreadyClaimed(_) => IRedEnvelope::AlreadyClaimed::SIGNATURE,
            IRedEnvelopeErrors::EnvelopeNotFound(_) => IRedEnvelope::EnvelopeNotFound::SIGNATURE,
            IRedEnvelopeErrors::EnvelopeEmpty(_) => IRedEnvelope::EnvelopeEmpty::SIGNATURE,
            IRedEnvelopeErrors::InvalidAmount(_) => IRedEnvelope::InvalidAmount::SIGNATURE,
        };
        return Some(signature.to_string());
    }
    if let Ok(revert) = Revert::abi_decode(data, true) {
        return Some(revert.reason);
    }
    if let Ok(panic) = Panic::abi_decode(data, true) {
        return Some(format!("panic code {:#x}", panic.code));
    }
    None
}

/// Wallets bury revert bytes at different depths of the error `data`
fn revert_data(value: &Value) -> Option<Bytes> {
    match value {
        Value::String(hex) => hex.parse().ok(),
        Value::Object(map) => map
            .get("data")
            .and_then(revert_data)
            .or_else(|| map.get("originalError").and_then(revert_data)),
        _ => None,
    }
}

fn tx_error(err: &ProviderRpcError) -> TxError {
    let reason = err.data.as_ref().and_then(revert_data).and_then(|data| decode_revert(&data));
    TxError::from_rpc(err, reason)
}

/// Typed access to the red envelope contract on one chain
///
/// Reads go out as `eth_call`, writes as `eth_sendTransaction` through the same injected
/// wallet, so the wallet's own signer authorizes them.
#[derive(Clone)]
pub struct ContractGateway {
    provider: Arc<dyn WalletProvider>,
    chain_id: u64,
    address: Option<Address>,
    config: GatewayConfig,
}

impl ContractGateway {
    pub fn new(provider: Arc<dyn WalletProvider>, chain_id: u64) -> Self {
        Self::with_config(provider, chain_id, &ClientConfig::default())
    }

    pub fn with_config(provider: Arc<dyn WalletProvider>, chain_id: u64, config: &ClientConfig) -> Self {
        Self { provider, chain_id, address: config.deployment(chain_id), config: config.gateway.clone() }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn address(&self) -> Option<Address> {
        self.address
    }

    pub fn is_supported(&self) -> bool {
        self.address.is_some()
    }

    fn contract(&self) -> Result<Address, GatewayError> {
        self.address.ok_or(GatewayError::UnsupportedNetwork(self.chain_id))
    }

    async fn read<C: SolCall + Send>(&self, call: C) -> Result<C::Return, GatewayError> {
        let contract = self.contract()?;
        let output = self.provider.call(contract, Bytes::from(call.abi_encode())).await?;
        C::abi_decode_returns(&output, true).map_err(|e| GatewayError::Decode { call: C::SIGNATURE, reason: e.to_string() })
    }

    pub async fn get_envelope_info(&self, envelope_id: U256) -> Result<EnvelopeInfo, GatewayError> {
        let info = self.read(IRedEnvelope::getEnvelopeInfoCall { envelopeId: envelope_id }).await?;
        Ok(info._0)
    }

    pub async fn has_claimed(&self, envelope_id: U256, user: Address) -> Result<bool, GatewayError> {
        let claimed = self.read(IRedEnvelope::hasClaimedCall { envelopeId: envelope_id, user }).await?;
        Ok(claimed._0)
    }

    pub async fn get_total_envelopes(&self) -> Result<U256, GatewayError> {
        let total = self.read(IRedEnvelope::getTotalEnvelopesCall {}).await?;
        Ok(total._0)
    }

    /// Submit a `createEnvelope` and drive `action` until it is mined or fails
    pub async fn create_envelope(&self, draft: &EnvelopeDraft, action: &WriteAction) -> Result<WriteReceipt, GatewayError> {
        draft.validate()?;
        let call = IRedEnvelope::createEnvelopeCall {
            count: U256::from(draft.count),
            isRandom: draft.is_random,
            message: draft.message_or_default().to_string(),
        };
        self.write(call.abi_encode(), Some(draft.value), action).await
    }

    /// Submit a `claimEnvelope` and drive `action` until it is mined or fails
    pub async fn claim_envelope(&self, envelope_id: U256, action: &WriteAction) -> Result<WriteReceipt, GatewayError> {
        let call = IRedEnvelope::claimEnvelopeCall { envelopeId: envelope_id };
        self.write(call.abi_encode(), None, action).await
    }

    async fn write(&self, data: Vec<u8>, value: Option<U256>, action: &WriteAction) -> Result<WriteReceipt, GatewayError> {
        let contract = self.contract()?;
        if action.phase() != TxPhase::Idle {
            return Err(GatewayError::ActionReused);
        }
        let from = self.provider.accounts().await?.first().copied().ok_or(GatewayError::NotConnected)?;

        // another write may have claimed the action while accounts were being fetched
        if !action.advance(TxPhase::Pending) {
            return Err(GatewayError::ActionReused);
        }
        let tx = TransactionParams { from, to: contract, value, data: Bytes::from(data) };
        let tx_hash = match self.provider.send_transaction(&tx).await {
            Ok(hash) => hash,
            Err(err) => {
                let err = tx_error(&err);
                tracing::warn!("transaction from {from} rejected: {}", err.message);
                action.advance(TxPhase::Error(err.clone()));
                return Err(err.into());
            }
        };

        tracing::info!("transaction {tx_hash} submitted, waiting for inclusion");
        action.advance(TxPhase::Confirming { tx_hash });

        let err = match self.wait_for_receipt(tx_hash).await {
            Ok(receipt) if receipt.succeeded() => {
                let block_number = receipt.block();
                tracing::info!("transaction {tx_hash} confirmed in block {block_number:?}");
                action.advance(TxPhase::Confirmed { tx_hash, block_number });
                return Ok(WriteReceipt { tx_hash, block_number });
            }
            Ok(receipt) => TxError::reverted_on_chain(tx_hash, receipt.block()),
            Err(err) => tx_error(&err),
        };

        tracing::warn!("transaction {tx_hash} failed: {}", err.message);
        action.advance(TxPhase::Error(err.clone()));
        Err(err.into())
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<ReceiptSummary, ProviderRpcError> {
        let mut failures = 0;
        loop {
            match self.provider.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => failures = 0,
                Err(err) => {
                    failures += 1;
                    if failures > self.config.receipt_poll_retries {
                        return Err(err);
                    }
                    tracing::debug!("receipt poll for {tx_hash} failed ({failures}): {err}");
                }
            }
            tokio::time::sleep(self.config.receipt_poll_interval()).await;
        }
    }

    pub fn on_envelope_created(
        &self,
        handler: impl Fn(IRedEnvelope::EnvelopeCreated) + Send + Sync + 'static,
    ) -> Result<EventSubscription, GatewayError> {
        self.watch(handler)
    }

    pub fn on_envelope_claimed(
        &self,
        handler: impl Fn(IRedEnvelope::EnvelopeClaimed) + Send + Sync + 'static,
    ) -> Result<EventSubscription, GatewayError> {
        self.watch(handler)
    }

    fn watch<E: SolEvent + Send + 'static>(
        &self,
        handler: impl Fn(E) + Send + Sync + 'static,
    ) -> Result<EventSubscription, GatewayError> {
        let address = self.contract()?;
        let provider = self.provider.clone();
        let period = self.config.event_poll_interval();
        let task = tokio::spawn(poll_logs(provider, address, period, handler));
        Ok(EventSubscription { task })
    }
}

/// Poll `eth_getLogs` for one event signature, starting after the block current at subscribe time
async fn poll_logs<E: SolEvent>(
    provider: Arc<dyn WalletProvider>,
    address: Address,
    period: Duration,
    handler: impl Fn(E) + Send + Sync,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut next_block: Option<u64> = None;

    loop {
        ticker.tick().await;

        let head = match provider.block_number().await {
            Ok(head) => head,
            Err(err) => {
                tracing::warn!("{} poll: block number unavailable: {err}", E::SIGNATURE);
                continue;
            }
        };
        let from = match next_block {
            Some(from) => from,
            None => {
                next_block = Some(head + 1);
                continue;
            }
        };
        if head < from {
            continue;
        }

        let filter = LogFilter {
            address,
            topics: vec![E::SIGNATURE_HASH],
            from_block: U64::from(from),
            to_block: U64::from(head),
        };
        match provider.logs(&filter).await {
            Ok(logs) => {
                for log in logs {
                    match E::decode_raw_log(log.topics.iter().copied(), &log.data, true) {
                        Ok(event) => handler(event),
                        Err(err) => tracing::warn!("skipping undecodable {} log: {err}", E::SIGNATURE),
                    }
                }
                next_block = Some(head + 1);
            }
            Err(err) => tracing::warn!("{} poll: eth_getLogs failed: {err}", E::SIGNATURE),
        }
    }
}
