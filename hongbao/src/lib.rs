mod config;
mod ens;
mod feed;
mod gateway;
mod networks;
mod provider;
mod rpc_wallet;
mod session;
mod store;
mod timeout;
mod tx;

use alloy::network::EthereumWallet;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::transports::http::Http;
use eyre::Result;
use reqwest::Client;

pub use crate::config::{ClientConfig, EnsConfig, GatewayConfig};

// Wallet session and the injected provider surface
pub use crate::provider::{EventHandler,
                          ListenerHandle,
                          ListenerId,
                          LogFilter,
                          ProviderRpcError,
                          RawLog,
                          ReceiptSummary,
                          TransactionParams,
                          WalletEvent,
                          WalletEventKind,
                          WalletProvider,
                          WalletProviderExt,
                          DISCONNECTED,
                          EXECUTION_REVERTED,
                          UNAUTHORIZED,
                          UNRECOGNIZED_CHAIN,
                          USER_REJECTED_REQUEST
};
pub use crate::session::{SessionManager, WalletError, WalletSession};
pub use crate::rpc_wallet::RpcWallet;

// Contract access and the write lifecycle
pub use crate::gateway::{decode_revert,
                         resolve_address,
                         ContractGateway,
                         EnvelopeDraft,
                         EnvelopeInfo,
                         EventSubscription,
                         GatewayError,
                         IRedEnvelope,
                         WriteReceipt,
                         DEFAULT_MESSAGE,
                         LOCAL_DEPLOYMENT,
                         MAX_ENVELOPE_COUNT,
                         MAX_MESSAGE_CHARS,
                         SEPOLIA_DEPLOYMENT
};
pub use crate::tx::{TxError, TxPhase, WriteAction};
pub use crate::feed::{recent_envelope_ids,
                      EnvelopeDetail,
                      EnvelopeFeed,
                      EnvelopeListing,
                      EnvelopeView,
                      FeedState,
                      RECENT_ENVELOPE_LIMIT
};

// ENS display data
pub use crate::ens::{namehash,
                     normalize_avatar,
                     reverse_name,
                     EnsInfo,
                     EnsLookup,
                     EnsResolver,
                     RpcEnsLookup,
                     DEFAULT_ENS_ENDPOINTS
};

pub use crate::networks::{chain_id_hex,
                          is_supported,
                          network,
                          AddChainParameters,
                          NativeCurrency,
                          NetworkDescriptor,
                          ETHEREUM_MAINNET,
                          LOCAL_NETWORK,
                          SEPOLIA,
                          SUPPORTED_NETWORKS
};
pub use crate::store::{Store, StoreSubscription};
pub use crate::timeout::{with_timeout, AttemptTimer, TimedOut};

/// Signing provider over the public RPC of a supported network
pub fn default_provider(wallet: EthereumWallet, chain_id: u64) -> Result<impl Provider<Http<Client>>> {
    let network = network(chain_id).ok_or_else(|| eyre::eyre!("network {chain_id} is not supported"))?;
    Ok(
        ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(network.rpc_url.parse()?)
    )
}
