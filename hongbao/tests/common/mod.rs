#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::{address, keccak256, Address, Bytes, B256, U256, U64};
use async_trait::async_trait;
use hongbao::{
    EnsLookup, EnsResolver, EventHandler, ListenerId, ProviderRpcError, RawLog, WalletEvent, WalletEventKind,
    WalletProvider, EXECUTION_REVERTED, UNRECOGNIZED_CHAIN, USER_REJECTED_REQUEST,
};
use serde::Deserialize;
use serde_json::{json, Value};

pub const ALICE: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");
pub const BOB: Address = address!("3C44CdDdB6a900fa2b585dd299e03d12FA4293BC");

/// Everything the fake wallet answers with, tests poke at it through [FakeWallet::with]
pub struct FakeState {
    /// What `eth_accounts` returns
    pub authorized: Vec<Address>,
    /// What the user approves on `eth_requestAccounts`
    pub available: Vec<Address>,
    pub reject_connect: bool,
    pub chain_id: u64,
    /// Chains `wallet_switchEthereumChain` accepts
    pub known_chains: Vec<u64>,
    pub balances: HashMap<Address, U256>,
    /// `eth_call` results keyed by function selector
    pub calls: HashMap<[u8; 4], Bytes>,
    pub send_error: Option<ProviderRpcError>,
    pub revert_on_chain: bool,
    /// `eth_getTransactionReceipt` answers null this many times before the receipt shows up
    pub receipt_after_polls: usize,
    pub block_number: u64,
    pub logs: Vec<RawLog>,
    pub requests: Vec<(String, Value)>,
    pub sent: Vec<Value>,
    pending: HashMap<B256, usize>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            authorized: Vec::new(),
            available: vec![ALICE],
            reject_connect: false,
            chain_id: 31337,
            known_chains: vec![1, 31337],
            balances: HashMap::new(),
            calls: HashMap::new(),
            send_error: None,
            revert_on_chain: false,
            receipt_after_polls: 1,
            block_number: 100,
            logs: Vec::new(),
            requests: Vec::new(),
            sent: Vec::new(),
            pending: HashMap::new(),
        }
    }
}

#[derive(Default)]
pub struct FakeWallet {
    state: Mutex<FakeState>,
    listeners: Mutex<Vec<(WalletEventKind, ListenerId, EventHandler)>>,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainParam {
    chain_id: U64,
}

#[derive(Deserialize)]
struct CallParam {
    data: Bytes,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogsParam {
    topics: Vec<B256>,
    from_block: U64,
    to_block: U64,
}

fn param<T: serde::de::DeserializeOwned>(params: &Value, index: usize) -> T {
    serde_json::from_value(params[index].clone()).expect("fake wallet got malformed params")
}

impl FakeWallet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A wallet that already authorized `account` on `chain_id` holding `balance` wei
    pub fn connected(account: Address, chain_id: u64, balance: U256) -> Arc<Self> {
        let wallet = Self::new();
        wallet.with(|state| {
            state.authorized = vec![account];
            state.chain_id = chain_id;
            state.balances.insert(account, balance);
        });
        wallet
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn as_provider(self: &Arc<Self>) -> Arc<dyn WalletProvider> {
        self.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn request_count(&self, method: &str) -> usize {
        self.with(|state| state.requests.iter().filter(|(m, _)| m == method).count())
    }

    pub fn last_request(&self, method: &str) -> Option<Value> {
        self.with(|state| state.requests.iter().rev().find(|(m, _)| m == method).map(|(_, p)| p.clone()))
    }

    /// Push an event to every handler registered for its kind
    pub fn emit(&self, event: WalletEvent) {
        let handlers: Vec<EventHandler> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .filter(|(kind, _, _)| *kind == event.kind())
            .map(|(_, _, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(&event);
        }
    }

    /// Mine a block holding `log`
    pub fn push_log(&self, address: Address, log: alloy_primitives::LogData) {
        self.with(|state| {
            state.block_number += 1;
            state.logs.push(RawLog {
                address,
                topics: log.topics().to_vec(),
                data: log.data,
                block_number: Some(U64::from(state.block_number)),
                transaction_hash: None,
            });
        });
    }

    fn answer(&self, method: &str, params: &Value) -> Result<Value, ProviderRpcError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push((method.to_string(), params.clone()));

        match method {
            "eth_accounts" => Ok(json!(state.authorized)),
            "eth_requestAccounts" => {
                if state.reject_connect {
                    return Err(ProviderRpcError::new(USER_REJECTED_REQUEST, "User rejected the request."));
                }
                state.authorized = state.available.clone();
                Ok(json!(state.authorized))
            }
            "eth_chainId" => Ok(json!(U64::from(state.chain_id))),
            "eth_getBalance" => {
                let account: Address = param(params, 0);
                Ok(json!(state.balances.get(&account).copied().unwrap_or_default()))
            }
            "eth_blockNumber" => Ok(json!(U64::from(state.block_number))),
            "eth_call" => {
                let call: CallParam = param(params, 0);
                let selector: [u8; 4] = call.data[..4].try_into().unwrap();
                state
                    .calls
                    .get(&selector)
                    .map(|output| json!(output))
                    .ok_or_else(|| ProviderRpcError::new(EXECUTION_REVERTED, "execution reverted"))
            }
            "eth_sendTransaction" => {
                state.sent.push(params[0].clone());
                if let Some(err) = state.send_error.clone() {
                    return Err(err);
                }
                let hash = keccak256(state.sent.len().to_be_bytes());
                let polls = state.receipt_after_polls;
                state.pending.insert(hash, polls);
                Ok(json!(hash))
            }
            "eth_getTransactionReceipt" => {
                let hash: B256 = param(params, 0);
                let Some(remaining) = state.pending.get_mut(&hash) else {
                    return Ok(Value::Null);
                };
                if *remaining > 0 {
                    *remaining -= 1;
                    return Ok(Value::Null);
                }
                state.block_number += 1;
                let status = if state.revert_on_chain { "0x0" } else { "0x1" };
                Ok(json!({
                    "transactionHash": hash,
                    "blockNumber": U64::from(state.block_number),
                    "status": status,
                }))
            }
            "eth_getLogs" => {
                let filter: LogsParam = param(params, 0);
                let logs: Vec<&RawLog> = state
                    .logs
                    .iter()
                    .filter(|log| {
                        let block = log.block_number.unwrap_or_default();
                        block >= filter.from_block
                            && block <= filter.to_block
                            && log.topics.first() == filter.topics.first()
                    })
                    .collect();
                Ok(json!(logs))
            }
            "wallet_switchEthereumChain" => {
                let wanted: ChainParam = param(params, 0);
                let chain_id = wanted.chain_id.to::<u64>();
                if !state.known_chains.contains(&chain_id) {
                    return Err(ProviderRpcError::new(UNRECOGNIZED_CHAIN, "Unrecognized chain ID"));
                }
                state.chain_id = chain_id;
                Ok(Value::Null)
            }
            "wallet_addEthereumChain" => {
                let added: ChainParam = param(params, 0);
                let chain_id = added.chain_id.to::<u64>();
                state.known_chains.push(chain_id);
                state.chain_id = chain_id;
                Ok(Value::Null)
            }
            other => Err(ProviderRpcError::new(4200, format!("{other} not supported by fake"))),
        }
    }
}

#[async_trait]
impl WalletProvider for FakeWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError> {
        let chain_before = self.with(|state| state.chain_id);
        let answer = self.answer(method, &params);

        // wallets announce a chain switch right after honoring it
        let chain_after = self.with(|state| state.chain_id);
        if chain_after != chain_before {
            self.emit(WalletEvent::ChainChanged(chain_after));
        }
        answer
    }

    fn on(&self, event: WalletEventKind, handler: EventHandler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().unwrap().push((event, id, handler));
        id
    }

    fn remove_listener(&self, event: WalletEventKind, id: ListenerId) {
        self.listeners.lock().unwrap().retain(|(kind, existing, _)| !(*kind == event && *existing == id));
    }
}

/// A [FakeWallet] that hands control back to the scheduler before answering, like a real
/// wallet waiting on its extension or node
pub struct YieldingWallet(pub Arc<FakeWallet>);

#[async_trait]
impl WalletProvider for YieldingWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError> {
        tokio::task::yield_now().await;
        self.0.request(method, params).await
    }

    fn on(&self, event: WalletEventKind, handler: EventHandler) -> ListenerId {
        self.0.on(event, handler)
    }

    fn remove_listener(&self, event: WalletEventKind, id: ListenerId) {
        self.0.remove_listener(event, id)
    }
}

/// Primary names keyed by address, counts how often it was asked
#[derive(Default)]
pub struct FakeEns {
    pub names: HashMap<Address, String>,
    pub avatars: HashMap<String, String>,
    pub lookups: AtomicUsize,
}

impl FakeEns {
    pub fn with_name(address: Address, name: &str) -> Self {
        let mut ens = Self::default();
        ens.names.insert(address, name.to_string());
        ens
    }

    pub fn resolver(self: &Arc<Self>) -> EnsResolver {
        EnsResolver::new(vec![self.clone() as Arc<dyn EnsLookup>], Duration::from_secs(5))
    }
}

#[async_trait]
impl EnsLookup for FakeEns {
    fn label(&self) -> &str {
        "fake"
    }

    async fn lookup_address(&self, address: Address) -> eyre::Result<Option<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.names.get(&address).cloned())
    }

    async fn resolver(&self, name: &str) -> eyre::Result<Option<Address>> {
        Ok(self.avatars.contains_key(name).then_some(Address::ZERO))
    }

    async fn avatar_record(&self, _resolver: Address, name: &str) -> eyre::Result<Option<String>> {
        Ok(self.avatars.get(name).cloned())
    }
}

/// Let spawned tasks run until `check` holds, gives up after ~10 simulated seconds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}
