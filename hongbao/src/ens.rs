use std::sync::Arc;
use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder};
use alloy::sol;
use alloy::transports::http::Http;
use alloy_primitives::{address, keccak256, Address, B256};
use async_trait::async_trait;
use eyre::Result;
use reqwest::Client;

use crate::config::EnsConfig;
use crate::timeout::with_timeout;

/// Free public mainnet endpoints, in the order they are tried
pub const DEFAULT_ENS_ENDPOINTS: [&str; 3] = [
    "https://eth.llamarpc.com",
    "https://rpc.ankr.com/eth",
    "https://cloudflare-eth.com",
];

const ENS_REGISTRY_ADDRESS: Address = address!("00000000000C2E074eC69A0dFb2997BA6C7d2e1e");

const IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";

sol! {
    #[sol(rpc)]
    interface IEnsRegistry {
        function resolver(bytes32 node) external view returns (address);
    }

    #[sol(rpc)]
    interface IEnsResolver {
        function addr(bytes32 node) external view returns (address);
        function name(bytes32 node) external view returns (string);
        function text(bytes32 node, string key) external view returns (string);
    }
}

/// Outcome of a resolution, both fields absent means "nothing known"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnsInfo {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// One read-only ENS data source
#[async_trait]
pub trait EnsLookup: Send + Sync {
    /// Human readable tag for logs, usually the endpoint url
    fn label(&self) -> &str;

    /// Reverse lookup of the primary name for `address`
    async fn lookup_address(&self, address: Address) -> Result<Option<String>>;

    /// Resolver contract configured for `name`
    async fn resolver(&self, name: &str) -> Result<Option<Address>>;

    /// Raw `avatar` text record from `resolver`
    async fn avatar_record(&self, resolver: Address, name: &str) -> Result<Option<String>>;
}

/// EIP-137 namehash
pub fn namehash(name: &str) -> B256 {
    let mut node = B256::ZERO;
    if name.is_empty() {
        return node;
    }
    for label in name.to_lowercase().rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(node.as_slice());
        buf[32..].copy_from_slice(label_hash.as_slice());
        node = keccak256(buf);
    }
    node
}

/// The `<hex>.addr.reverse` name reverse records live under
pub fn reverse_name(address: Address) -> String {
    format!("{}.addr.reverse", alloy::hex::encode(address))
}

/// Turn an avatar record into something an `<img>` can load, or drop it
pub fn normalize_avatar(record: &str) -> Option<String> {
    let record = record.trim();
    if record.starts_with("https://") || record.starts_with("http://") || record.starts_with("data:") {
        Some(record.to_string())
    } else if let Some(path) = record.strip_prefix("ipfs://") {
        let path = path.strip_prefix("ipfs/").unwrap_or(path);
        Some(format!("{IPFS_GATEWAY}{path}"))
    } else {
        None
    }
}

/// [EnsLookup] over a plain HTTP JSON-RPC provider
pub struct RpcEnsLookup<P> {
    url: String,
    provider: P,
}

impl RpcEnsLookup<()> {
    pub fn http(url: &str) -> Result<RpcEnsLookup<impl Provider<Http<Client>>>> {
        let provider = ProviderBuilder::new().on_http(url.parse()?);
        Ok(RpcEnsLookup { url: url.to_string(), provider })
    }
}

impl<P: Provider<Http<Client>>> RpcEnsLookup<P> {
    async fn resolver_for(&self, node: B256) -> Result<Option<Address>> {
        let registry = IEnsRegistry::new(ENS_REGISTRY_ADDRESS, &self.provider);
        let resolver = registry.resolver(node).call().await?._0;
        Ok((!resolver.is_zero()).then_some(resolver))
    }
}

#[async_trait]
impl<P: Provider<Http<Client>>> EnsLookup for RpcEnsLookup<P> {
    fn label(&self) -> &str {
        &self.url
    }

    async fn lookup_address(&self, address: Address) -> Result<Option<String>> {
        let reverse_node = namehash(&reverse_name(address));
        let Some(reverse_resolver) = self.resolver_for(reverse_node).await? else {
            return Ok(None);
        };

        let name = IEnsResolver::new(reverse_resolver, &self.provider)
            .name(reverse_node)
            .call()
            .await?
            ._0;
        if name.is_empty() {
            return Ok(None);
        }

        // a reverse record only counts if the name points back at the address
        let forward_node = namehash(&name);
        let Some(forward_resolver) = self.resolver_for(forward_node).await? else {
            return Ok(None);
        };
        let forward = IEnsResolver::new(forward_resolver, &self.provider)
            .addr(forward_node)
            .call()
            .await?
            ._0;

        Ok((forward == address).then_some(name))
    }

    async fn resolver(&self, name: &str) -> Result<Option<Address>> {
        self.resolver_for(namehash(name)).await
    }

    async fn avatar_record(&self, resolver: Address, name: &str) -> Result<Option<String>> {
        let record = IEnsResolver::new(resolver, &self.provider)
            .text(namehash(name), "avatar".to_string())
            .call()
            .await?
            ._0;
        Ok((!record.is_empty()).then_some(record))
    }
}

/// Best-effort name and avatar resolution over an ordered list of data sources
///
/// Sources are tried strictly one after another, each lookup bounded by its own timer.
/// The first source that yields a name wins, the whole chain never returns an error.
#[derive(Clone)]
pub struct EnsResolver {
    lookups: Vec<Arc<dyn EnsLookup>>,
    attempt_timeout: Duration,
}

impl EnsResolver {
    pub fn new(lookups: Vec<Arc<dyn EnsLookup>>, attempt_timeout: Duration) -> Self {
        Self { lookups, attempt_timeout }
    }

    pub fn from_config(config: &EnsConfig) -> Result<Self> {
        let mut lookups: Vec<Arc<dyn EnsLookup>> = Vec::with_capacity(config.endpoints.len());
        for endpoint in &config.endpoints {
            lookups.push(Arc::new(RpcEnsLookup::http(endpoint)?));
        }
        Ok(Self::new(lookups, config.attempt_timeout()))
    }

    /// Resolver over the default public mainnet endpoints
    pub fn mainnet() -> Result<Self> {
        Self::from_config(&EnsConfig::default())
    }

    pub fn source_count(&self) -> usize {
        self.lookups.len()
    }

    pub async fn resolve(&self, address: Address) -> EnsInfo {
        tracing::debug!("resolving ENS for {address}");

        for lookup in &self.lookups {
            let name = match with_timeout("ENS name lookup", self.attempt_timeout, lookup.lookup_address(address)).await {
                Ok(Ok(Some(name))) => name,
                Ok(Ok(None)) => {
                    tracing::debug!("{} has no ENS name for {address}", lookup.label());
                    continue;
                }
                Ok(Err(err)) => {
                    tracing::warn!("ENS source {} failed: {err}", lookup.label());
                    continue;
                }
                Err(timed_out) => {
                    tracing::warn!("ENS source {}: {timed_out}", lookup.label());
                    continue;
                }
            };

            let avatar = self.avatar(lookup.as_ref(), &name).await;
            tracing::info!("resolved {address} to {name} (avatar: {})", avatar.is_some());
            return EnsInfo { name: Some(name), avatar };
        }

        tracing::debug!("no ENS source produced a name for {address}");
        EnsInfo::default()
    }

    /// Avatar failures never cost us the name, they just leave the avatar empty
    async fn avatar(&self, lookup: &dyn EnsLookup, name: &str) -> Option<String> {
        let resolver = match with_timeout("ENS resolver lookup", self.attempt_timeout, lookup.resolver(name)).await {
            Ok(Ok(Some(resolver))) => resolver,
            Ok(Ok(None)) => return None,
            Ok(Err(err)) => {
                tracing::warn!("resolver lookup for {name} failed: {err}");
                return None;
            }
            Err(timed_out) => {
                tracing::warn!("{timed_out} for {name}");
                return None;
            }
        };

        match with_timeout("ENS avatar lookup", self.attempt_timeout, lookup.avatar_record(resolver, name)).await {
            Ok(Ok(record)) => record.as_deref().and_then(normalize_avatar),
            Ok(Err(err)) => {
                tracing::warn!("avatar lookup for {name} failed: {err}");
                None
            }
            Err(timed_out) => {
                tracing::warn!("{timed_out} for {name}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    const ALICE: Address = address!("00000000000000000000000000000000000a11ce");

    #[derive(Clone)]
    enum Reply {
        Name(&'static str, Duration),
        NoName,
        Fail,
        Hang,
    }

    #[derive(Clone)]
    enum Avatar {
        Record(&'static str),
        Fail,
        HangResolver,
    }

    struct FakeLookup {
        reply: Reply,
        avatar: Avatar,
        name_calls: AtomicUsize,
    }

    impl FakeLookup {
        fn new(reply: Reply, avatar: Avatar) -> Arc<Self> {
            Arc::new(Self { reply, avatar, name_calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl EnsLookup for FakeLookup {
        fn label(&self) -> &str {
            "fake"
        }

        async fn lookup_address(&self, _address: Address) -> Result<Option<String>> {
            self.name_calls.fetch_add(1, Ordering::SeqCst);
            match self.reply.clone() {
                Reply::Name(name, delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(Some(name.to_string()))
                }
                Reply::NoName => Ok(None),
                Reply::Fail => eyre::bail!("rate limited"),
                Reply::Hang => pending().await,
            }
        }

        async fn resolver(&self, _name: &str) -> Result<Option<Address>> {
            match self.avatar {
                Avatar::HangResolver => pending().await,
                _ => Ok(Some(address!("231b0Ee14048e9dCcD1d247744d114a4EB5E8E63"))),
            }
        }

        async fn avatar_record(&self, _resolver: Address, _name: &str) -> Result<Option<String>> {
            match self.avatar {
                Avatar::Record(record) => Ok(Some(record.to_string())),
                _ => eyre::bail!("no avatar"),
            }
        }
    }

    fn resolver_over(lookups: &[Arc<FakeLookup>]) -> EnsResolver {
        EnsResolver::new(
            lookups.iter().map(|l| l.clone() as Arc<dyn EnsLookup>).collect(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_namehash_vectors() {
        assert_eq!(namehash(""), B256::ZERO);
        assert_eq!(
            namehash("eth").to_string(),
            "0x93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae"
        );
        assert_eq!(
            namehash("foo.eth").to_string(),
            "0xde9b09fd7c5f901e23a3f19fecc54828e9c848539801e86591bd9801b019f84f"
        );
        assert_eq!(namehash("Foo.ETH"), namehash("foo.eth"));
    }

    #[test]
    fn test_reverse_name_and_avatar_normalization() {
        assert_eq!(reverse_name(ALICE), "00000000000000000000000000000000000a11ce.addr.reverse");
        assert_eq!(normalize_avatar("https://x.y/a.png").as_deref(), Some("https://x.y/a.png"));
        assert_eq!(
            normalize_avatar("ipfs://ipfs/QmHash").as_deref(),
            Some("https://ipfs.io/ipfs/QmHash")
        );
        assert_eq!(normalize_avatar("ipfs://QmHash").as_deref(), Some("https://ipfs.io/ipfs/QmHash"));
        assert_eq!(normalize_avatar("eip155:1/erc721:0xabc/1"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_name_tries_every_source() {
        let lookups = [
            FakeLookup::new(Reply::NoName, Avatar::Fail),
            FakeLookup::new(Reply::Fail, Avatar::Fail),
            FakeLookup::new(Reply::NoName, Avatar::Fail),
        ];
        let info = resolver_over(&lookups).resolve(ALICE).await;

        assert_eq!(info, EnsInfo::default());
        let calls: usize = lookups.iter().map(|l| l.name_calls.load(Ordering::SeqCst)).sum();
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_through_to_next_source() {
        let lookups = [
            FakeLookup::new(Reply::Hang, Avatar::Fail),
            FakeLookup::new(Reply::Name("alice.eth", Duration::from_millis(300)), Avatar::Record("https://a/b.png")),
            FakeLookup::new(Reply::Name("never.eth", Duration::ZERO), Avatar::Fail),
        ];
        let started = Instant::now();
        let info = resolver_over(&lookups).resolve(ALICE).await;

        assert_eq!(info.name.as_deref(), Some("alice.eth"));
        assert_eq!(info.avatar.as_deref(), Some("https://a/b.png"));
        assert_eq!(started.elapsed(), Duration::from_secs(5) + Duration::from_millis(300));
        assert_eq!(lookups[2].name_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_avatar_failure_keeps_name() {
        let failing = [FakeLookup::new(Reply::Name("bob.eth", Duration::ZERO), Avatar::Fail)];
        let info = resolver_over(&failing).resolve(ALICE).await;
        assert_eq!(info, EnsInfo { name: Some("bob.eth".to_string()), avatar: None });

        let hanging = [FakeLookup::new(Reply::Name("bob.eth", Duration::ZERO), Avatar::HangResolver)];
        let started = Instant::now();
        let info = resolver_over(&hanging).resolve(ALICE).await;
        assert_eq!(info.name.as_deref(), Some("bob.eth"));
        assert_eq!(info.avatar, None);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn test_mainnet_sources() {
        let resolver = EnsResolver::mainnet().unwrap();
        assert_eq!(resolver.source_count(), DEFAULT_ENS_ENDPOINTS.len());
    }
}
