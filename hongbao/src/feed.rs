use alloy_primitives::{Address, U256};

use crate::gateway::{ContractGateway, EnvelopeInfo, EventSubscription, GatewayError, WriteReceipt};
use crate::store::{Store, StoreSubscription};
use crate::tx::WriteAction;

/// How many of the newest envelopes the list shows
pub const RECENT_ENVELOPE_LIMIT: u64 = 5;

/// Read model state as a view renders it
#[derive(Debug, Clone, PartialEq)]
pub enum FeedState<T> {
    Loading,
    Ready(T),
    /// Terminal until the next successful refresh
    Failed(String),
    Unsupported(u64),
}

impl<T> FeedState<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    fn from_result(result: Result<T, GatewayError>, what: &str) -> Self {
        match result {
            Ok(value) => Self::Ready(value),
            Err(GatewayError::UnsupportedNetwork(chain_id)) => Self::Unsupported(chain_id),
            Err(err) => {
                tracing::error!("failed to fetch {what}: {err}");
                Self::Failed(err.to_string())
            }
        }
    }
}

/// Newest ids first: `total - 1` down to `max(0, total - limit)`
pub fn recent_envelope_ids(total: U256, limit: u64) -> Vec<U256> {
    let total: u64 = total.saturating_to();
    let start = total.saturating_sub(limit);
    (start..total).rev().map(U256::from).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeListing {
    pub total: U256,
    pub recent: Vec<U256>,
}

async fn load_listing(gateway: &ContractGateway, state: &Store<FeedState<EnvelopeListing>>) {
    let listing = gateway.get_total_envelopes().await.map(|total| EnvelopeListing {
        total,
        recent: recent_envelope_ids(total, RECENT_ENVELOPE_LIMIT),
    });
    state.set(FeedState::from_result(listing, "envelope count"));
}

/// The envelope list, refreshed whenever a new envelope is created
pub struct EnvelopeFeed {
    gateway: ContractGateway,
    state: Store<FeedState<EnvelopeListing>>,
    _created: Option<EventSubscription>,
}

impl EnvelopeFeed {
    pub async fn open(gateway: ContractGateway) -> Self {
        let state = Store::new(FeedState::Loading);

        let created = {
            let source = gateway.clone();
            let state = state.clone();
            gateway.on_envelope_created(move |event| {
                tracing::info!("envelope {} created by {}", event.envelopeId, event.creator);
                let gateway = source.clone();
                let state = state.clone();
                tokio::spawn(async move { load_listing(&gateway, &state).await });
            })
        };

        load_listing(&gateway, &state).await;
        Self { gateway, state, _created: created.ok() }
    }

    pub fn state(&self) -> FeedState<EnvelopeListing> {
        self.state.get()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&FeedState<EnvelopeListing>) + Send + Sync + 'static,
    ) -> StoreSubscription<FeedState<EnvelopeListing>> {
        self.state.subscribe(listener)
    }

    pub async fn refresh(&self) {
        load_listing(&self.gateway, &self.state).await
    }
}

/// One envelope plus whether the viewer already claimed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeView {
    pub info: EnvelopeInfo,
    /// `None` when nobody is connected
    pub claimed: Option<bool>,
}

impl EnvelopeView {
    pub fn can_claim(&self) -> bool {
        self.info.isActive && !self.info.remainingCount.is_zero() && self.claimed == Some(false)
    }
}

async fn load_view(
    gateway: &ContractGateway,
    envelope_id: U256,
    viewer: Option<Address>,
    state: &Store<FeedState<EnvelopeView>>,
) {
    let view = async {
        match viewer {
            Some(viewer) => {
                let (info, claimed) =
                    tokio::join!(gateway.get_envelope_info(envelope_id), gateway.has_claimed(envelope_id, viewer));
                Ok(EnvelopeView { info: info?, claimed: Some(claimed?) })
            }
            None => Ok(EnvelopeView { info: gateway.get_envelope_info(envelope_id).await?, claimed: None }),
        }
    }
    .await;
    state.set(FeedState::from_result(view, "envelope details"));
}

/// Detail view of one envelope, refreshed when that envelope is claimed by anyone
pub struct EnvelopeDetail {
    gateway: ContractGateway,
    envelope_id: U256,
    viewer: Option<Address>,
    state: Store<FeedState<EnvelopeView>>,
    _claimed: Option<EventSubscription>,
}

impl EnvelopeDetail {
    pub async fn open(gateway: ContractGateway, envelope_id: U256, viewer: Option<Address>) -> Self {
        let state = Store::new(FeedState::Loading);

        let claimed = {
            let source = gateway.clone();
            let state = state.clone();
            gateway.on_envelope_claimed(move |event| {
                if event.envelopeId != envelope_id {
                    return;
                }
                tracing::info!("envelope {envelope_id} claimed by {}", event.claimer);
                let gateway = source.clone();
                let state = state.clone();
                tokio::spawn(async move { load_view(&gateway, envelope_id, viewer, &state).await });
            })
        };

        load_view(&gateway, envelope_id, viewer, &state).await;
        Self { gateway, envelope_id, viewer, state, _claimed: claimed.ok() }
    }

    pub fn envelope_id(&self) -> U256 {
        self.envelope_id
    }

    pub fn state(&self) -> FeedState<EnvelopeView> {
        self.state.get()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&FeedState<EnvelopeView>) + Send + Sync + 'static,
    ) -> StoreSubscription<FeedState<EnvelopeView>> {
        self.state.subscribe(listener)
    }

    pub async fn refresh(&self) {
        load_view(&self.gateway, self.envelope_id, self.viewer, &self.state).await
    }

    /// Claim a share through `action`, then reload the envelope
    pub async fn claim(&self, action: &WriteAction) -> Result<WriteReceipt, GatewayError> {
        let receipt = self.gateway.claim_envelope(self.envelope_id, action).await?;
        self.refresh().await;
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u64]) -> Vec<U256> {
        values.iter().copied().map(U256::from).collect()
    }

    #[test]
    fn test_recent_ids_newest_first() {
        assert_eq!(recent_envelope_ids(U256::ZERO, 5), ids(&[]));
        assert_eq!(recent_envelope_ids(U256::from(3), 5), ids(&[2, 1, 0]));
        assert_eq!(recent_envelope_ids(U256::from(12), 5), ids(&[11, 10, 9, 8, 7]));
    }

    #[test]
    fn test_can_claim() {
        let mut view = EnvelopeView {
            info: EnvelopeInfo { isActive: true, remainingCount: U256::from(2), ..Default::default() },
            claimed: Some(false),
        };
        assert!(view.can_claim());

        view.claimed = Some(true);
        assert!(!view.can_claim());

        view.claimed = None;
        assert!(!view.can_claim());

        view.claimed = Some(false);
        view.info.remainingCount = U256::ZERO;
        assert!(!view.can_claim());
    }

    #[test]
    fn test_feed_state_from_result() {
        assert_eq!(FeedState::from_result(Ok(1u8), "x"), FeedState::Ready(1));
        assert_eq!(
            FeedState::<u8>::from_result(Err(GatewayError::UnsupportedNetwork(5)), "x"),
            FeedState::Unsupported(5)
        );
        assert!(matches!(
            FeedState::<u8>::from_result(Err(GatewayError::NotConnected), "x"),
            FeedState::Failed(_)
        ));
    }
}
