//! Client-side view of who is online, rebuilt from the relay's event stream.
//!
//! The view is advisory: it is never sent anywhere and may lag behind the
//! relay, or stay wrong for good when datagrams are lost.

use std::collections::BTreeSet;

use tokio::sync::Mutex;

use crate::codec::{DecodedEvent, EventKind, SYSTEM_ALIAS, UNKNOWN_ALIAS};

/// What the presentation layer should do with an applied event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// Bulk seed merged in; nothing to show.
    Seeded,
    Joined(String),
    Left(String),
    Message { alias: String, text: String },
    /// Our own frame came back; it was already rendered when sent.
    SelfEcho,
}

pub struct Presence {
    me: String,
    users: Mutex<BTreeSet<String>>,
}

impl Presence {
    /// Starts a view containing only `me`.
    pub fn new(me: impl Into<String>) -> Self {
        let me = me.into();
        let users = BTreeSet::from([me.clone()]);
        Self {
            me,
            users: Mutex::new(users),
        }
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    /// Folds one inbound event into the view. Events must be applied in
    /// arrival order by a single consumer.
    pub async fn apply(&self, event: DecodedEvent) -> Update {
        let DecodedEvent { alias, kind } = event;

        if let EventKind::UserListSeed(names) = kind {
            self.users.lock().await.extend(names);
            return Update::Seeded;
        }

        if alias == self.me {
            return Update::SelfEcho;
        }

        let mut users = self.users.lock().await;
        // Any tagged frame proves the sender is around, which also repairs
        // the view when a join was missed.
        if alias != UNKNOWN_ALIAS && alias != SYSTEM_ALIAS {
            users.insert(alias.clone());
        }

        match kind {
            EventKind::Hello => Update::Joined(alias),
            EventKind::Leave => {
                users.remove(&alias);
                Update::Left(alias)
            }
            EventKind::Chat(text) => Update::Message { alias, text },
            EventKind::UserListSeed(_) => Update::Seeded,
        }
    }

    /// Sorted copy of the current view, including ourselves.
    pub async fn users(&self) -> Vec<String> {
        self.users.lock().await.iter().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) async fn contains(&self, alias: &str) -> bool {
        self.users.lock().await.contains(alias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;

    #[tokio::test]
    async fn starts_with_only_ourselves() {
        let presence = Presence::new("alice");
        assert_eq!(presence.users().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn seed_is_merged_not_replaced() {
        let presence = Presence::new("carol");
        presence.apply(decode("[dave] __HELLO__")).await;

        let update = presence.apply(decode("[System] __USERS__ alice,bob")).await;
        assert_eq!(update, Update::Seeded);
        assert_eq!(presence.users().await, vec!["alice", "bob", "carol", "dave"]);
    }

    #[tokio::test]
    async fn repeated_hello_is_idempotent() {
        let presence = Presence::new("alice");
        assert_eq!(
            presence.apply(decode("[bob] __HELLO__")).await,
            Update::Joined("bob".into())
        );
        let once = presence.users().await;
        presence.apply(decode("[bob] __HELLO__")).await;
        assert_eq!(presence.users().await, once);
    }

    #[tokio::test]
    async fn leave_for_unknown_alias_is_a_no_op() {
        let presence = Presence::new("alice");
        presence.apply(decode("[bob] __HELLO__")).await;
        presence.apply(decode("[bob] __LEAVE__")).await;
        assert!(!presence.contains("bob").await);

        let update = presence.apply(decode("[zoe] __LEAVE__")).await;
        assert_eq!(update, Update::Left("zoe".into()));
        assert_eq!(presence.users().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn own_echoes_are_suppressed() {
        let presence = Presence::new("alice");
        assert_eq!(presence.apply(decode("[alice] hi")).await, Update::SelfEcho);
        assert_eq!(presence.apply(decode("[alice] __HELLO__")).await, Update::SelfEcho);
        assert_eq!(presence.apply(decode("[alice] __LEAVE__")).await, Update::SelfEcho);
        assert_eq!(presence.users().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn chat_from_unseen_alias_adds_it() {
        let presence = Presence::new("alice");
        let update = presence.apply(decode("[bob] hello")).await;
        assert_eq!(
            update,
            Update::Message {
                alias: "bob".into(),
                text: "hello".into()
            }
        );
        assert!(presence.contains("bob").await);

        // Unframed text is shown but never counted as a user.
        presence.apply(decode("garbage")).await;
        assert!(!presence.contains(UNKNOWN_ALIAS).await);
    }

    #[tokio::test]
    async fn two_client_scenario() {
        let alice = Presence::new("alice");
        let bob = Presence::new("bob");

        bob.apply(decode("[System] __USERS__ alice")).await;
        alice.apply(decode("[bob] __HELLO__")).await;
        assert_eq!(alice.users().await, vec!["alice", "bob"]);
        assert_eq!(bob.users().await, vec!["alice", "bob"]);

        alice.apply(decode("[bob] __LEAVE__")).await;
        assert_eq!(alice.users().await, vec!["alice".to_string()]);
    }
}
