use std::sync::{Arc, Mutex};

use alloy_primitives::utils::format_ether;
use alloy_primitives::{Address, U256};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::ens::EnsResolver;
use crate::gateway::{ContractGateway, GatewayError};
use crate::networks::{self, AddChainParameters, NetworkDescriptor};
use crate::provider::{
    ListenerHandle, ProviderRpcError, WalletEvent, WalletEventKind, WalletProvider, WalletProviderExt, UNRECOGNIZED_CHAIN,
};
use crate::store::{Store, StoreSubscription};

/// What the page knows about the connected wallet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletSession {
    pub address: Option<Address>,
    pub chain_id: Option<u64>,
    /// Native balance in ether, full precision
    pub balance: Option<String>,
    pub ens_name: Option<String>,
    pub ens_avatar: Option<String>,
}

impl WalletSession {
    pub fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    pub fn network(&self) -> Option<&'static NetworkDescriptor> {
        self.chain_id.and_then(networks::network)
    }

    pub fn is_supported_network(&self) -> bool {
        self.network().is_some()
    }

    /// `0x1234...abcd`, empty when disconnected
    pub fn short_address(&self) -> String {
        match self.address {
            Some(address) => {
                let full = address.to_checksum(None);
                format!("{}...{}", &full[..6], &full[full.len() - 4..])
            }
            None => String::new(),
        }
    }

    /// Balance rounded to 4 decimals, "0" when unknown
    pub fn display_balance(&self) -> String {
        self.balance
            .as_deref()
            .and_then(|balance| balance.parse::<f64>().ok())
            .map(|balance| format!("{balance:.4}"))
            .unwrap_or_else(|| "0".to_string())
    }

    /// ENS name when known, otherwise the shortened address
    pub fn display_name(&self) -> String {
        self.ens_name.clone().unwrap_or_else(|| self.short_address())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WalletError {
    #[error("no wallet provider detected, install a browser wallet extension")]
    ProviderMissing,
    #[error("request rejected: {0}")]
    Rejected(ProviderRpcError),
    #[error("wallet returned no accounts")]
    NoAccounts,
    #[error("network {0} is not supported")]
    UnsupportedNetwork(u64),
    #[error("wallet request failed: {0}")]
    Rpc(ProviderRpcError),
}

impl From<ProviderRpcError> for WalletError {
    fn from(err: ProviderRpcError) -> Self {
        if err.is_user_rejection() {
            Self::Rejected(err)
        } else {
            Self::Rpc(err)
        }
    }
}

#[derive(Default)]
struct EnsTask {
    requested_for: Option<Address>,
    handle: Option<JoinHandle<()>>,
}

impl EnsTask {
    fn reset(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.requested_for = None;
    }
}

struct Inner {
    provider: Option<Arc<dyn WalletProvider>>,
    ens: Option<EnsResolver>,
    session: Store<WalletSession>,
    connecting: Store<bool>,
    ens_task: Mutex<EnsTask>,
}

impl Inner {
    async fn check_connection(self: &Arc<Self>) {
        let Some(provider) = &self.provider else {
            return;
        };

        match read_wallet(provider.as_ref()).await {
            Ok(Some((address, chain_id, balance))) => {
                self.session.update(|session| {
                    if session.address != Some(address) {
                        session.ens_name = None;
                        session.ens_avatar = None;
                    }
                    session.address = Some(address);
                    session.chain_id = Some(chain_id);
                    session.balance = Some(format_ether(balance));
                });
                self.resolve_ens_once(address);
            }
            Ok(None) => tracing::debug!("wallet has no authorized accounts"),
            Err(err) => tracing::error!("checking wallet connection failed: {err}"),
        }
    }

    fn disconnect(&self) {
        self.ens_task().reset();
        self.session.set(WalletSession::default());
    }

    /// Kick off ENS resolution unless one was already started for this exact address
    fn resolve_ens_once(self: &Arc<Self>, address: Address) {
        let Some(ens) = self.ens.clone() else {
            return;
        };
        let mut task = self.ens_task();
        if task.requested_for == Some(address) {
            return;
        }
        task.reset();
        task.requested_for = Some(address);

        let inner = Arc::clone(self);
        task.handle = Some(tokio::spawn(async move {
            let info = ens.resolve(address).await;
            inner.session.update_if(|session| {
                // the wallet moved on while we were resolving
                if session.address != Some(address) || (info.name.is_none() && info.avatar.is_none()) {
                    return false;
                }
                session.ens_name = info.name;
                session.ens_avatar = info.avatar;
                true
            });
        }));
    }

    fn ens_task(&self) -> std::sync::MutexGuard<'_, EnsTask> {
        self.ens_task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn read_wallet(provider: &dyn WalletProvider) -> Result<Option<(Address, u64, U256)>, ProviderRpcError> {
    let accounts = provider.accounts().await?;
    let Some(&address) = accounts.first() else {
        return Ok(None);
    };
    let chain_id = provider.chain_id().await?;
    let balance = provider.balance(address).await?;
    Ok(Some((address, chain_id, balance)))
}

async fn pump_events(inner: Arc<Inner>, mut events: UnboundedReceiver<WalletEvent>) {
    while let Some(event) = events.recv().await {
        tracing::debug!("wallet event {}", event.kind());
        match event {
            WalletEvent::AccountsChanged(accounts) if accounts.is_empty() => inner.disconnect(),
            WalletEvent::AccountsChanged(_) | WalletEvent::ChainChanged(_) => inner.check_connection().await,
            WalletEvent::Disconnect(_) => inner.disconnect(),
        }
    }
}

/// Keeps a [WalletSession] in line with what the wallet reports
///
/// Mounting registers one listener per wallet event and reads the current state. Dropping the
/// manager removes those listeners, cancels in-flight work and resets the session.
pub struct SessionManager {
    inner: Arc<Inner>,
    listeners: Vec<ListenerHandle>,
    pump: Option<JoinHandle<()>>,
}

impl SessionManager {
    /// `provider` is `None` when no wallet is injected into the page
    pub async fn mount(provider: Option<Arc<dyn WalletProvider>>, ens: Option<EnsResolver>) -> Self {
        let inner = Arc::new(Inner {
            provider,
            ens,
            session: Store::default(),
            connecting: Store::default(),
            ens_task: Mutex::new(EnsTask::default()),
        });

        let mut listeners = Vec::new();
        let mut pump = None;
        if let Some(provider) = &inner.provider {
            let (sender, receiver) = unbounded_channel();
            for kind in WalletEventKind::ALL {
                let sender = sender.clone();
                listeners.push(ListenerHandle::register(
                    provider,
                    kind,
                    Arc::new(move |event: &WalletEvent| {
                        let _ = sender.send(event.clone());
                    }),
                ));
            }
            pump = Some(tokio::spawn(pump_events(inner.clone(), receiver)));
        }

        inner.check_connection().await;
        Self { inner, listeners, pump }
    }

    pub fn session(&self) -> WalletSession {
        self.inner.session.get()
    }

    pub fn subscribe(&self, listener: impl Fn(&WalletSession) + Send + Sync + 'static) -> StoreSubscription<WalletSession> {
        self.inner.session.subscribe(listener)
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.connecting.get()
    }

    pub fn has_provider(&self) -> bool {
        self.inner.provider.is_some()
    }

    /// Re-read accounts, chain and balance from the wallet without prompting
    ///
    /// Failures are logged and leave the session as it was.
    pub async fn check_connection(&self) {
        self.inner.check_connection().await
    }

    /// Ask the wallet for account access, then load the session
    pub async fn connect(&self) -> Result<WalletSession, WalletError> {
        let provider = self.inner.provider.as_ref().ok_or(WalletError::ProviderMissing)?;

        self.inner.connecting.set(true);
        let outcome = match provider.request_accounts().await {
            Ok(accounts) if accounts.is_empty() => Err(WalletError::NoAccounts),
            Ok(_) => {
                self.inner.check_connection().await;
                Ok(self.session())
            }
            Err(err) => {
                tracing::warn!("wallet connection failed: {err}");
                Err(err.into())
            }
        };
        self.inner.connecting.set(false);
        outcome
    }

    /// Forget the local session, the wallet keeps its own authorization
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Ask the wallet to change chains, adding the chain first if the wallet does not know it
    ///
    /// The session's chain id only changes once the wallet emits `chainChanged`.
    pub async fn switch_network(&self, chain_id: u64) -> Result<(), WalletError> {
        let provider = self.inner.provider.as_ref().ok_or(WalletError::ProviderMissing)?;

        match provider.switch_chain(chain_id).await {
            Ok(()) => Ok(()),
            Err(err) if err.code == UNRECOGNIZED_CHAIN => {
                let network = networks::network(chain_id).ok_or(WalletError::UnsupportedNetwork(chain_id))?;
                tracing::info!("wallet does not know {}, adding it", network.name);
                provider.add_chain(&AddChainParameters::from(network)).await.map_err(|err| {
                    tracing::error!("adding network {chain_id} failed: {err}");
                    WalletError::from(err)
                })
            }
            Err(err) => {
                tracing::error!("switching to network {chain_id} failed: {err}");
                Err(err.into())
            }
        }
    }

    /// Gateway bound to the wallet's current chain
    pub fn gateway(&self, config: &ClientConfig) -> Result<ContractGateway, GatewayError> {
        let provider = self.inner.provider.clone().ok_or(GatewayError::NotConnected)?;
        let chain_id = self.session().chain_id.ok_or(GatewayError::NotConnected)?;
        Ok(ContractGateway::with_config(provider, chain_id, config))
    }

    /// Explicit teardown, same as dropping the manager
    pub fn unmount(self) {}
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.listeners.clear();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.inner.disconnect();
    }
}
