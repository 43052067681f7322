use alloy::primitives::B256;

use crate::provider::ProviderRpcError;
use crate::store::{Store, StoreSubscription};

/// Where a single write call is in its lifecycle
///
/// `Idle -> Pending -> Confirming -> Confirmed`, with `Error` reachable from `Pending`
/// or `Confirming`. `Confirmed` and `Error` are terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TxPhase {
    #[default]
    Idle,
    /// Wallet prompt shown or transaction submitted, no hash yet
    Pending,
    /// Accepted by the network, waiting for block inclusion
    Confirming { tx_hash: B256 },
    Confirmed { tx_hash: B256, block_number: Option<u64> },
    Error(TxError),
}

impl TxPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Confirming { .. } => "confirming",
            Self::Confirmed { .. } => "confirmed",
            Self::Error(_) => "error",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_confirming(&self) -> bool {
        matches!(self, Self::Confirming { .. })
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    /// Either pending or confirming, the window where a submit button stays disabled
    pub fn is_busy(&self) -> bool {
        self.is_pending() || self.is_confirming()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed { .. } | Self::Error(_))
    }

    pub fn error(&self) -> Option<&TxError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    fn can_advance_to(&self, next: &TxPhase) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Pending)
                | (Self::Pending, Self::Confirming { .. })
                | (Self::Pending, Self::Error(_))
                | (Self::Confirming { .. }, Self::Confirmed { .. })
                | (Self::Confirming { .. }, Self::Error(_))
        )
    }
}

/// Failure of a write call, shaped for display: a short line plus the full detail
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{short_message}")]
pub struct TxError {
    pub code: Option<i64>,
    pub short_message: String,
    pub message: String,
}

impl TxError {
    /// Build from a provider error, `revert_reason` is the decoded revert data if any
    pub fn from_rpc(err: &ProviderRpcError, revert_reason: Option<String>) -> Self {
        let short_message = if err.is_user_rejection() {
            "user rejected action".to_string()
        } else if let Some(reason) = revert_reason {
            format!("execution reverted: {reason}")
        } else {
            err.message.clone()
        };

        let message = match &err.data {
            Some(data) => format!("{} (code={}, data={})", err.message, err.code, data),
            None => format!("{} (code={})", err.message, err.code),
        };

        Self { code: Some(err.code), short_message, message }
    }

    pub fn reverted_on_chain(tx_hash: B256, block_number: Option<u64>) -> Self {
        let block = block_number.map(|n| n.to_string()).unwrap_or_else(|| "unknown".to_string());
        Self {
            code: None,
            short_message: "transaction execution reverted".to_string(),
            message: format!("transaction {tx_hash} reverted in block {block}"),
        }
    }
}

/// One write attempt whose phases can be observed
///
/// An action is single use: once it is past `Idle` it cannot be started again, callers
/// create a fresh one for every submit.
#[derive(Clone, Default)]
pub struct WriteAction {
    phase: Store<TxPhase>,
}

impl WriteAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> TxPhase {
        self.phase.get()
    }

    pub fn subscribe(&self, listener: impl Fn(&TxPhase) + Send + Sync + 'static) -> StoreSubscription<TxPhase> {
        self.phase.subscribe(listener)
    }

    /// Move to `next` if the lifecycle allows it, returns whether the move happened
    pub(crate) fn advance(&self, next: TxPhase) -> bool {
        self.phase.update_if(|phase| {
            if phase.can_advance_to(&next) {
                tracing::debug!("write action {} -> {}", phase.name(), next.name());
                *phase = next;
                true
            } else {
                tracing::warn!("ignored write action transition {} -> {}", phase.name(), next.name());
                false
            }
        })
    }
}
