use serde::Serialize;

/// Static metadata for a chain the dApp knows how to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkDescriptor {
    pub chain_id: u64,
    pub name: &'static str,
    pub symbol: &'static str,
    pub rpc_url: &'static str,
    pub block_explorer: Option<&'static str>,
}

pub const ETHEREUM_MAINNET: NetworkDescriptor = NetworkDescriptor {
    chain_id: 1,
    name: "Ethereum Mainnet",
    symbol: "ETH",
    rpc_url: "https://ethereum-rpc.publicnode.com",
    block_explorer: Some("https://etherscan.io"),
};

pub const SEPOLIA: NetworkDescriptor = NetworkDescriptor {
    chain_id: 11155111,
    name: "Sepolia Testnet",
    symbol: "ETH",
    rpc_url: "https://ethereum-sepolia-rpc.publicnode.com",
    block_explorer: Some("https://sepolia.etherscan.io"),
};

pub const LOCAL_NETWORK: NetworkDescriptor = NetworkDescriptor {
    chain_id: 31337,
    name: "Local Network",
    symbol: "ETH",
    rpc_url: "http://localhost:8545",
    block_explorer: None,
};

pub const SUPPORTED_NETWORKS: [NetworkDescriptor; 3] = [ETHEREUM_MAINNET, SEPOLIA, LOCAL_NETWORK];

/// Look up a supported network, `None` means the chain is unsupported
pub fn network(chain_id: u64) -> Option<&'static NetworkDescriptor> {
    SUPPORTED_NETWORKS.iter().find(|n| n.chain_id == chain_id)
}

pub fn is_supported(chain_id: u64) -> bool {
    network(chain_id).is_some()
}

/// Chain ids travel over EIP-1193 as 0x-prefixed hex quantities
pub fn chain_id_hex(chain_id: u64) -> String {
    format!("0x{chain_id:x}")
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Parameter object for `wallet_addEthereumChain` (EIP-3085)
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddChainParameters {
    pub chain_id: String,
    pub chain_name: String,
    pub native_currency: NativeCurrency,
    pub rpc_urls: Vec<String>,
    pub block_explorer_urls: Option<Vec<String>>,
}

impl From<&NetworkDescriptor> for AddChainParameters {
    fn from(network: &NetworkDescriptor) -> Self {
        Self {
            chain_id: chain_id_hex(network.chain_id),
            chain_name: network.name.to_string(),
            native_currency: NativeCurrency {
                name: network.symbol.to_string(),
                symbol: network.symbol.to_string(),
                decimals: 18,
            },
            rpc_urls: vec![network.rpc_url.to_string()],
            block_explorer_urls: network.block_explorer.map(|url| vec![url.to_string()]),
        }
    }
}
