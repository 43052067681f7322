use std::sync::atomic::{AtomicU64, Ordering};

use alloy::network::EthereumWallet;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::Http;
use alloy::transports::{RpcError, TransportErrorKind};
use alloy_primitives::Address;
use async_trait::async_trait;
use eyre::Result;
use reqwest::Client;
use serde_json::{json, Value};

use crate::provider::{
    EventHandler, ListenerId, ProviderRpcError, WalletEventKind, WalletProvider, DISCONNECTED, UNRECOGNIZED_CHAIN,
};

/// EIP-1193 code for methods a provider does not implement
const UNSUPPORTED_METHOD: i64 = 4200;

fn rpc_error(err: RpcError<TransportErrorKind>) -> ProviderRpcError {
    match err.as_error_resp() {
        Some(payload) => ProviderRpcError {
            code: payload.code,
            message: payload.message.to_string(),
            data: payload.data.as_ref().and_then(|raw| serde_json::from_str(raw.get()).ok()),
        },
        None => ProviderRpcError::new(DISCONNECTED, err.to_string()),
    }
}

fn first_param<T: serde::de::DeserializeOwned>(method: &str, params: Value) -> Result<T, ProviderRpcError> {
    let first = match params {
        Value::Array(mut values) if !values.is_empty() => values.swap_remove(0),
        _ => return Err(ProviderRpcError::new(-32602, format!("{method} expects one parameter"))),
    };
    serde_json::from_value(first).map_err(|e| ProviderRpcError::new(-32602, format!("invalid {method} parameter: {e}")))
}

/// A [WalletProvider] backed by a local key and a JSON-RPC node
///
/// Used from node-side callers and tests where no browser wallet exists. Account requests
/// never prompt and the key never changes accounts or chains, so no events are ever emitted.
pub struct RpcWallet<P> {
    address: Address,
    provider: P,
    next_listener: AtomicU64,
}

impl RpcWallet<()> {
    pub fn http(signer: PrivateKeySigner, rpc_url: &str) -> Result<RpcWallet<impl Provider<Http<Client>>>> {
        let address = signer.address();
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(EthereumWallet::from(signer))
            .on_http(rpc_url.parse()?);
        Ok(RpcWallet::new(address, provider))
    }

    /// Wallet over the public RPC of a supported network
    pub fn for_network(signer: PrivateKeySigner, chain_id: u64) -> Result<RpcWallet<impl Provider<Http<Client>>>> {
        let address = signer.address();
        let provider = crate::default_provider(EthereumWallet::from(signer), chain_id)?;
        Ok(RpcWallet::new(address, provider))
    }
}

impl<P: Provider<Http<Client>>> RpcWallet<P> {
    /// `provider` must be able to sign for `address`
    pub fn new(address: Address, provider: P) -> Self {
        Self { address, provider, next_listener: AtomicU64::new(0) }
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl<P: Provider<Http<Client>> + 'static> WalletProvider for RpcWallet<P> {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderRpcError> {
        match method {
            "eth_accounts" | "eth_requestAccounts" => Ok(json!([self.address])),
            "eth_sendTransaction" => {
                let tx: TransactionRequest = first_param(method, params)?;
                let pending = self.provider.send_transaction(tx).await.map_err(rpc_error)?;
                tracing::debug!("broadcast {} from {}", pending.tx_hash(), self.address);
                Ok(json!(pending.tx_hash()))
            }
            "wallet_switchEthereumChain" => {
                #[derive(serde::Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct SwitchChain {
                    chain_id: alloy_primitives::U64,
                }
                let wanted: SwitchChain = first_param(method, params)?;
                let current = self.provider.get_chain_id().await.map_err(rpc_error)?;
                if wanted.chain_id.to::<u64>() == current {
                    Ok(Value::Null)
                } else {
                    Err(ProviderRpcError::new(UNRECOGNIZED_CHAIN, format!("node is on chain {current}")))
                }
            }
            "wallet_addEthereumChain" => {
                Err(ProviderRpcError::new(UNSUPPORTED_METHOD, "a local key cannot add networks"))
            }
            _ => self
                .provider
                .raw_request::<_, Value>(method.to_owned().into(), params)
                .await
                .map_err(rpc_error),
        }
    }

    fn on(&self, _event: WalletEventKind, _handler: EventHandler) -> ListenerId {
        ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed))
    }

    fn remove_listener(&self, _event: WalletEventKind, _id: ListenerId) {}
}
