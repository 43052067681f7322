#![deny(clippy::all)]

#[macro_use]
extern crate napi_derive;

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::utils::format_ether;
use alloy::primitives::{Address, U256};
use alloy::signers::local::coins_bip39::English;
use alloy::signers::local::{MnemonicBuilder, PrivateKeySigner};
use hongbao::{ClientConfig, ContractGateway, EnsResolver, EnvelopeDraft, GatewayError, RpcWallet, WalletProvider, WriteAction};
use napi::Error;
use napi::Status::{GenericFailure, InvalidArg};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum HongbaoError {
    #[error("Invalid mnemonic supplied")]
    InvalidMnemonic,
    #[error("Error parsing a hex value")]
    HexSerialization,
    #[error("Invalid number: {0}")]
    InvalidNumber(String),
    #[error("Invalid client config: {0}")]
    Config(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl From<HongbaoError> for Error {
    fn from(value: HongbaoError) -> Self {
        match value {
            HongbaoError::InvalidMnemonic
            | HongbaoError::HexSerialization
            | HongbaoError::InvalidNumber(_)
            | HongbaoError::Config(_) => Error::new(InvalidArg, value),
            HongbaoError::Gateway(GatewayError::InvalidDraft(_)) => Error::new(InvalidArg, value),
            HongbaoError::Gateway(_) => Error::new(GenericFailure, value),
        }
    }
}

fn parse_address(address: String) -> Result<Address, Error> {
    Address::from_str(address.trim()).map_err(|_| Error::from(HongbaoError::HexSerialization))
}

fn parse_id(envelope_id: String) -> Result<U256, Error> {
    U256::from_str(envelope_id.trim()).map_err(|_| Error::from(HongbaoError::InvalidNumber(envelope_id)))
}

fn load_config(config_json: Option<String>) -> Result<ClientConfig, Error> {
    match config_json {
        Some(json) => ClientConfig::from_json(&json).map_err(|e| Error::from(HongbaoError::Config(format!("{e:#}")))),
        None => Ok(ClientConfig::default()),
    }
}

/// Configured `rpc_urls` win, otherwise the chain must be one of the built-in networks
fn gateway(signer: PrivateKeySigner, chain_id: u32, config: &ClientConfig) -> Result<ContractGateway, Error> {
    let chain_id = chain_id as u64;
    let wallet: Arc<dyn WalletProvider> = match config.rpc_urls.get(&chain_id) {
        Some(url) => Arc::new(
            RpcWallet::http(signer, url).map_err(|e| Error::from(HongbaoError::Config(format!("{e:#}"))))?,
        ),
        None => Arc::new(RpcWallet::for_network(signer, chain_id).map_err(|e| {
            Error::from(HongbaoError::Config(format!("{e:#}, add an rpc_urls entry for chain {chain_id}")))
        })?),
    };
    Ok(ContractGateway::with_config(wallet, chain_id, config))
}

/// Reads never sign, any key will do
fn read_gateway(chain_id: u32, config_json: Option<String>) -> Result<ContractGateway, Error> {
    gateway(PrivateKeySigner::random(), chain_id, &load_config(config_json)?)
}

#[napi]
/// Route crate logs to stderr, `filter` uses `RUST_LOG` syntax and defaults to it
pub fn init_logging(filter: Option<String>) {
    let filter = filter
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[napi(object)]
pub struct EnsProfile {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

#[napi]
/// Primary ENS name and avatar of an address, both empty when nothing resolves
pub async fn resolve_ens(address_hex: String, config_json: Option<String>) -> Result<EnsProfile, Error> {
    let address = parse_address(address_hex)?;
    let config = load_config(config_json)?;
    let resolver = EnsResolver::from_config(&config.ens)
        .map_err(|e| Error::from(HongbaoError::Config(e.to_string())))?;

    let info = resolver.resolve(address).await;
    Ok(EnsProfile { name: info.name, avatar: info.avatar })
}

#[napi(object)]
pub struct Envelope {
    pub creator: String,
    /// In ether
    pub total_amount: String,
    /// In ether
    pub remaining_amount: String,
    pub total_count: u32,
    pub remaining_count: u32,
    pub is_random: bool,
    pub is_active: bool,
    pub message: String,
}

#[napi]
/// Number of envelopes ever created on `chain_id`, as a decimal string
pub async fn total_envelopes(chain_id: u32, config_json: Option<String>) -> Result<String, Error> {
    let total = read_gateway(chain_id, config_json)?
        .get_total_envelopes()
        .await
        .map_err(HongbaoError::from)?;
    Ok(total.to_string())
}

#[napi]
pub async fn envelope_info(chain_id: u32, envelope_id: String, config_json: Option<String>) -> Result<Envelope, Error> {
    let envelope_id = parse_id(envelope_id)?;
    let info = read_gateway(chain_id, config_json)?
        .get_envelope_info(envelope_id)
        .await
        .map_err(HongbaoError::from)?;

    Ok(Envelope {
        creator: info.creator.to_checksum(None),
        total_amount: format_ether(info.totalAmount),
        remaining_amount: format_ether(info.remainingAmount),
        total_count: info.totalCount.saturating_to(),
        remaining_count: info.remainingCount.saturating_to(),
        is_random: info.isRandom,
        is_active: info.isActive,
        message: info.message,
    })
}

#[napi]
pub async fn has_claimed(
    chain_id: u32,
    envelope_id: String,
    address_hex: String,
    config_json: Option<String>,
) -> Result<bool, Error> {
    let envelope_id = parse_id(envelope_id)?;
    let user = parse_address(address_hex)?;
    let claimed = read_gateway(chain_id, config_json)?
        .has_claimed(envelope_id, user)
        .await
        .map_err(HongbaoError::from)?;
    Ok(claimed)
}

#[napi]
/// Fund a new envelope with `amount` ether split into `count` shares, returns the transaction hash
pub async fn create_envelope(
    account: &Account,
    chain_id: u32,
    amount: String,
    count: String,
    is_random: bool,
    message: Option<String>,
    config_json: Option<String>,
) -> Result<String, Error> {
    let draft = EnvelopeDraft::from_form(&amount, &count, is_random, message.as_deref().unwrap_or_default())
        .map_err(HongbaoError::from)?;
    let config = load_config(config_json)?;

    let receipt = gateway(account.private_key.clone(), chain_id, &config)?
        .create_envelope(&draft, &WriteAction::new())
        .await
        .map_err(HongbaoError::from)?;
    Ok(receipt.tx_hash.to_string())
}

#[napi]
/// Take one share of an envelope, returns the transaction hash
pub async fn claim_envelope(
    account: &Account,
    chain_id: u32,
    envelope_id: String,
    config_json: Option<String>,
) -> Result<String, Error> {
    let envelope_id = parse_id(envelope_id)?;
    let config = load_config(config_json)?;

    let receipt = gateway(account.private_key.clone(), chain_id, &config)?
        .claim_envelope(envelope_id, &WriteAction::new())
        .await
        .map_err(HongbaoError::from)?;
    Ok(receipt.tx_hash.to_string())
}

#[napi]
/// Holder class for the signer that creates and claims envelopes
pub struct Account {
    private_key: PrivateKeySigner
}

#[napi]
impl Account {

    #[napi(factory)]
    pub fn from_mnemonic(mnemonic: String) -> Result<Self, Error> {
        let mnemonic_signer = MnemonicBuilder::<English>::default()
            .phrase(mnemonic)
            .build()
            .map_err(|_| Error::from(HongbaoError::InvalidMnemonic))?;

        Ok(
            Self {
                private_key: mnemonic_signer
            }
        )
    }

    #[napi(factory)]
    pub fn from_private_key_hex(private_key_hex: String) -> Result<Self, Error> {
        let signer = PrivateKeySigner::from_str(private_key_hex.as_str())
            .map_err(|_| Error::from(HongbaoError::HexSerialization))?;

        Ok(
            Self {
                private_key: signer
            }
        )
    }

    #[napi(getter)]
    pub fn address(&self) -> String {
        self.private_key.address().to_checksum(None)
    }
}
