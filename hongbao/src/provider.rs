use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// EIP-1193 user rejected the request
pub const USER_REJECTED_REQUEST: i64 = 4001;
/// EIP-1193 the requested account or method is not authorized
pub const UNAUTHORIZED: i64 = 4100;
/// EIP-1193 provider is disconnected from all chains
pub const DISCONNECTED: i64 = 4900;
/// `wallet_switchEthereumChain` was asked for a chain the wallet has never seen
pub const UNRECOGNIZED_CHAIN: i64 = 4902;
/// JSON-RPC execution reverted
pub const EXECUTION_REVERTED: i64 = 3;
pub const INTERNAL_ERROR: i64 = -32603;

/// Structured error returned by a wallet provider request
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct ProviderRpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl ProviderRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == USER_REJECTED_REQUEST
    }

    fn invalid_response(method: &str, err: impl fmt::Display) -> Self {
        Self::new(INTERNAL_ERROR, format!("invalid {method} response: {err}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WalletEventKind {
    AccountsChanged,
    ChainChanged,
    Disconnect,
}

impl WalletEventKind {
    pub const ALL: [WalletEventKind; 3] = [Self::AccountsChanged, Self::ChainChanged, Self::Disconnect];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountsChanged => "accountsChanged",
            Self::ChainChanged => "chainChanged",
            Self::Disconnect => "disconnect",
        }
    }
}

impl fmt::Display for WalletEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events a wallet provider pushes to the page
#[derive(Debug, Clone, PartialEq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    Disconnect(Option<ProviderRpcError>),
}

impl WalletEvent {
    pub fn kind(&self) -> WalletEventKind {
        match self {
            Self::AccountsChanged(_) => WalletEventKind::AccountsChanged,
            Self::ChainChanged(_) => WalletEventKind::ChainChanged,
            Self::Disconnect(_) => WalletEventKind::Disconnect,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&WalletEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// The injected wallet (EIP-1193) surface
///
/// Browser wallets, node-side signers and test fakes all sit behind this trait, callers hold
/// it as an `Arc<dyn WalletProvider>` handle.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError>;

    fn on(&self, event: WalletEventKind, handler: EventHandler) -> ListenerId;

    fn remove_listener(&self, event: WalletEventKind, id: ListenerId);
}

/// Registration of one event handler, removed from the provider when dropped
pub struct ListenerHandle {
    provider: Arc<dyn WalletProvider>,
    event: WalletEventKind,
    id: ListenerId,
}

impl ListenerHandle {
    pub fn register(provider: &Arc<dyn WalletProvider>, event: WalletEventKind, handler: EventHandler) -> Self {
        let id = provider.on(event, handler);
        Self { provider: provider.clone(), event, id }
    }

    pub fn event(&self) -> WalletEventKind {
        self.event
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.provider.remove_listener(self.event, self.id);
    }
}

/// Receipt fields the write lifecycle cares about
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSummary {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub status: Option<U64>,
}

impl ReceiptSummary {
    pub fn succeeded(&self) -> bool {
        self.status.map(|status| status == U64::from(1)).unwrap_or(false)
    }

    pub fn block(&self) -> Option<u64> {
        self.block_number.map(|n| n.to())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub address: Address,
    pub topics: Vec<B256>,
    pub from_block: U64,
    pub to_block: U64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TransactionParams {
    pub from: Address,
    pub to: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    pub data: Bytes,
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, ProviderRpcError> {
    serde_json::from_value(value).map_err(|e| ProviderRpcError::invalid_response(method, e))
}

/// Typed wrappers over the raw JSON requests
#[async_trait]
pub trait WalletProviderExt: WalletProvider {
    /// Already-authorized accounts, never prompts
    async fn accounts(&self) -> Result<Vec<Address>, ProviderRpcError> {
        let value = self.request("eth_accounts", json!([])).await?;
        decode("eth_accounts", value)
    }

    /// Ask the user to authorize accounts, this is the one that pops the wallet prompt
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderRpcError> {
        let value = self.request("eth_requestAccounts", json!([])).await?;
        decode("eth_requestAccounts", value)
    }

    async fn chain_id(&self) -> Result<u64, ProviderRpcError> {
        let value = self.request("eth_chainId", json!([])).await?;
        decode::<U64>("eth_chainId", value).map(|id| id.to())
    }

    async fn balance(&self, address: Address) -> Result<U256, ProviderRpcError> {
        let value = self.request("eth_getBalance", json!([address, "latest"])).await?;
        decode("eth_getBalance", value)
    }

    async fn block_number(&self) -> Result<u64, ProviderRpcError> {
        let value = self.request("eth_blockNumber", json!([])).await?;
        decode::<U64>("eth_blockNumber", value).map(|n| n.to())
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), ProviderRpcError> {
        let params = json!([{ "chainId": crate::networks::chain_id_hex(chain_id) }]);
        self.request("wallet_switchEthereumChain", params).await.map(|_| ())
    }

    async fn add_chain(&self, parameters: &crate::networks::AddChainParameters) -> Result<(), ProviderRpcError> {
        self.request("wallet_addEthereumChain", json!([parameters])).await.map(|_| ())
    }

    /// Read-only contract call against the latest block
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ProviderRpcError> {
        let value = self.request("eth_call", json!([{ "to": to, "data": data }, "latest"])).await?;
        decode("eth_call", value)
    }

    /// Hand a transaction to the wallet for signing and broadcast, returns its hash
    async fn send_transaction(&self, tx: &TransactionParams) -> Result<B256, ProviderRpcError> {
        let value = self.request("eth_sendTransaction", json!([tx])).await?;
        decode("eth_sendTransaction", value)
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<ReceiptSummary>, ProviderRpcError> {
        let value = self.request("eth_getTransactionReceipt", json!([tx_hash])).await?;
        decode("eth_getTransactionReceipt", value)
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ProviderRpcError> {
        let value = self.request("eth_getLogs", json!([filter])).await?;
        decode("eth_getLogs", value)
    }
}

impl<P: WalletProvider + ?Sized> WalletProviderExt for P {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        removed: Mutex<Vec<(WalletEventKind, ListenerId)>>,
    }

    #[async_trait]
    impl WalletProvider for Recorder {
        async fn request(&self, method: &str, _params: Value) -> Result<Value, ProviderRpcError> {
            match method {
                "eth_chainId" => Ok(json!("0x7a69")),
                "eth_accounts" => Ok(json!(["0x5fbdb2315678afecb367f032d93f642f64180aa3"])),
                "eth_getTransactionReceipt" => Ok(Value::Null),
                _ => Err(ProviderRpcError::new(4200, "unsupported method")),
            }
        }

        fn on(&self, _event: WalletEventKind, _handler: EventHandler) -> ListenerId {
            ListenerId(7)
        }

        fn remove_listener(&self, event: WalletEventKind, id: ListenerId) {
            self.removed.lock().unwrap().push((event, id));
        }
    }

    #[tokio::test]
    async fn test_typed_requests_decode() {
        let provider = Recorder::default();
        assert_eq!(provider.chain_id().await.unwrap(), 31337);
        assert_eq!(
            provider.accounts().await.unwrap(),
            vec![address!("5FbDB2315678afecb367f032d93F642f64180aa3")]
        );
        assert_eq!(provider.transaction_receipt(B256::ZERO).await.unwrap(), None);
        assert_eq!(provider.block_number().await.unwrap_err().code, 4200);
    }

    #[test]
    fn test_listener_handle_removes_on_drop() {
        let recorder = Arc::new(Recorder::default());
        let provider: Arc<dyn WalletProvider> = recorder.clone();
        let handle = ListenerHandle::register(&provider, WalletEventKind::ChainChanged, Arc::new(|_| {}));
        assert_eq!(handle.event(), WalletEventKind::ChainChanged);
        drop(handle);
        assert_eq!(*recorder.removed.lock().unwrap(), vec![(WalletEventKind::ChainChanged, ListenerId(7))]);
    }

    #[test]
    fn test_receipt_status() {
        let receipt: ReceiptSummary = serde_json::from_value(json!({
            "transactionHash": B256::ZERO,
            "blockNumber": "0x10",
            "status": "0x1",
        }))
        .unwrap();
        assert!(receipt.succeeded());
        assert_eq!(receipt.block(), Some(16));
    }
}
