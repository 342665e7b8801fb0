use std::{fmt::Debug, future::Future, hash::Hash, io, sync::Arc};

use futures_util::future::join_all;
use tracing::debug;

use crate::registry::PresenceRegistry;

/// How the broadcaster reaches one registered peer.
pub trait PeerLink: Clone + Send + Sync + 'static {
    /// When true a failed delivery is treated as the peer having gone away
    /// and the peer is evicted from the registry.
    const EVICT_ON_FAILURE: bool;

    fn deliver(&self, frame: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Called once the peer has been evicted after a failed delivery.
    fn evicted(&self) {}
}

/// Outcome of one fan-out.
#[derive(Debug)]
pub struct FanOut<P> {
    pub delivered: Vec<P>,
    pub failed: Vec<P>,
}

impl<P> Default for FanOut<P> {
    fn default() -> Self {
        Self {
            delivered: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Delivers frames to every registered peer except the sender.
pub struct Broadcaster<P, L> {
    registry: Arc<PresenceRegistry<P, L>>,
}

impl<P, L> Clone for Broadcaster<P, L> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<P, L> Broadcaster<P, L>
where
    P: Eq + Hash + Clone + Debug + Send + Sync,
    L: PeerLink,
{
    pub fn new(registry: Arc<PresenceRegistry<P, L>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PresenceRegistry<P, L> {
        &self.registry
    }

    /// Sends `frame` to a snapshot of the registry taken now, minus `exclude`.
    ///
    /// Deliveries run concurrently and fail independently. A failed peer
    /// is evicted when the link asks for it and its link is told so, but no
    /// leave is announced from here; that stays with the peer's own teardown.
    pub async fn broadcast(&self, frame: &[u8], exclude: Option<&P>) -> FanOut<P> {
        let recipients = self.registry.snapshot_peers(exclude).await;

        let deliveries = recipients.into_iter().map(|(peer, link)| async move {
            let result = link.deliver(frame).await;
            (peer, link, result)
        });

        let mut report = FanOut::default();
        for (peer, link, result) in join_all(deliveries).await {
            match result {
                Ok(()) => report.delivered.push(peer),
                Err(error) => {
                    debug!(?peer, ?error, "failed to deliver frame");
                    if L::EVICT_ON_FAILURE && self.registry.unregister(&peer).await.is_some() {
                        link.evicted();
                    }
                    report.failed.push(peer);
                }
            }
        }
        report
    }

    /// Sends `frame` to a single peer, outside of any fan-out.
    pub async fn send_to(&self, link: &L, frame: &[u8]) -> io::Result<()> {
        link.deliver(frame).await
    }
}
