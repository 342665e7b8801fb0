use std::{
    collections::{BTreeSet, HashMap},
    hash::Hash,
};

use tokio::sync::Mutex;

use crate::codec::UNKNOWN_ALIAS;

/// Server-side map of live peers to the alias they claimed.
///
/// `P` identifies the peer (a connection id for TCP, the source address
/// for UDP) and `L` is whatever the broadcaster needs to reach it. Every
/// operation takes the single lock, copies out what it needs and releases
/// it before returning, so callers never hold the lock across I/O.
pub struct PresenceRegistry<P, L> {
    peers: Mutex<HashMap<P, PeerEntry<L>>>,
}

struct PeerEntry<L> {
    alias: String,
    link: L,
}

impl<P, L> PresenceRegistry<P, L>
where
    P: Eq + Hash + Clone,
    L: Clone,
{
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts or overwrites `peer` and returns the sorted, deduplicated
    /// aliases of every other peer, skipping the placeholder alias.
    pub async fn register(&self, peer: P, alias: String, link: L) -> Vec<String> {
        let mut peers = self.peers.lock().await;

        let others: BTreeSet<String> = peers
            .iter()
            .filter(|(id, entry)| **id != peer && entry.alias != UNKNOWN_ALIAS)
            .map(|(_, entry)| entry.alias.clone())
            .collect();

        peers.insert(peer, PeerEntry { alias, link });
        others.into_iter().collect()
    }

    /// Removes `peer`, returning the alias it was registered under.
    pub async fn unregister(&self, peer: &P) -> Option<String> {
        let mut peers = self.peers.lock().await;
        peers.remove(peer).map(|entry| entry.alias)
    }

    /// Copies out every registered peer except `exclude`.
    pub async fn snapshot_peers(&self, exclude: Option<&P>) -> Vec<(P, L)> {
        let peers = self.peers.lock().await;
        peers
            .iter()
            .filter(|(id, _)| Some(*id) != exclude)
            .map(|(id, entry)| (id.clone(), entry.link.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn alias_of(&self, peer: &P) -> Option<String> {
        let peers = self.peers.lock().await;
        peers.get(peer).map(|entry| entry.alias.clone())
    }

    #[cfg(test)]
    pub(crate) async fn contains(&self, peer: &P) -> bool {
        self.peers.lock().await.contains_key(peer)
    }
}

impl<P, L> Default for PresenceRegistry<P, L>
where
    P: Eq + Hash + Clone,
    L: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn register_returns_other_aliases_sorted_and_deduplicated() {
        let registry = PresenceRegistry::<u64, ()>::new();

        assert!(registry.register(1, "carol".into(), ()).await.is_empty());
        registry.register(2, "alice".into(), ()).await;
        registry.register(3, "carol".into(), ()).await;
        registry.register(4, UNKNOWN_ALIAS.into(), ()).await;

        let seed = registry.register(5, "bob".into(), ()).await;
        assert_eq!(seed, vec!["alice".to_string(), "carol".to_string()]);
    }

    #[tokio::test]
    async fn re_registering_overwrites_instead_of_duplicating() {
        let registry = PresenceRegistry::<u64, ()>::new();
        registry.register(1, "alice".into(), ()).await;
        let seed = registry.register(1, "alicia".into(), ()).await;

        assert!(seed.is_empty(), "own previous alias must not be seeded");
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.alias_of(&1).await.as_deref(), Some("alicia"));
    }

    #[tokio::test]
    async fn unregister_is_a_no_op_for_unknown_peers() {
        let registry = PresenceRegistry::<u64, ()>::new();
        registry.register(1, "alice".into(), ()).await;

        assert_eq!(registry.unregister(&1).await.as_deref(), Some("alice"));
        assert_eq!(registry.unregister(&1).await, None);
        assert_eq!(registry.unregister(&42).await, None);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn snapshot_skips_the_excluded_peer() {
        let registry = PresenceRegistry::<u64, &'static str>::new();
        registry.register(1, "alice".into(), "a").await;
        registry.register(2, "bob".into(), "b").await;
        registry.register(3, "carol".into(), "c").await;

        let mut snapshot = registry.snapshot_peers(Some(&2)).await;
        snapshot.sort();
        assert_eq!(snapshot, vec![(1, "a"), (3, "c")]);
        assert_eq!(registry.snapshot_peers(None).await.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_mutations_leave_only_last_registered_peers() {
        let registry = Arc::new(PresenceRegistry::<u64, ()>::new());

        let mut tasks = Vec::new();
        for peer in 0..64u64 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.register(peer, format!("user-{peer}"), ()).await;
                tokio::task::yield_now().await;
                if peer % 3 == 0 {
                    registry.unregister(&peer).await;
                }
            }));
        }
        for task in tasks {
            task.await.expect("task panicked");
        }

        for peer in 0..64u64 {
            assert_eq!(registry.contains(&peer).await, peer % 3 != 0, "peer {peer}");
        }
    }
}
