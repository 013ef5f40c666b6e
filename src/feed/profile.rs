// SPDX-License-Identifier: MPL-2.0

use crate::feed::query::{FeedQuery, Order};
use crate::feed::{FeedStrategy, ROOT_POST};
use crate::log::{Identity, Message, MessageId};
use crate::store::{Result, ViewStore};

/// How far a profile reaches beyond its own feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reach {
    /// Its own root posts plus the root posts of the feeds it follows
    OneHop,
    /// Its own root posts and follow edges
    NoHop,
}

/// One identity's feed, newest first.
///
/// A pub's own feed is mostly follow-backs, so an identity advertised as a
/// pub gets the one-hop view of the community it serves instead. The choice
/// is made on every call, since a pub announcement may arrive at any time.
#[derive(Debug, Clone)]
pub struct Profile {
    pub identity: Identity,
    pub include_undecrypted: bool,
}

impl Profile {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            include_undecrypted: false,
        }
    }

    pub fn reach(&self, store: &ViewStore) -> Result<Reach> {
        Ok(if store.is_pub(&self.identity)? {
            Reach::OneHop
        } else {
            Reach::NoHop
        })
    }

    fn query(&self, store: &ViewStore) -> Result<FeedQuery> {
        let selection = match self.reach(store)? {
            Reach::OneHop => format!(
                r#"{ROOT_POST} AND (a.author = :author OR m.author_id IN (
                    SELECT c.contact_id FROM contacts c JOIN authors p ON p.id = c.author_id
                    WHERE p.author = :author AND c.state = 1
                ))"#
            ),
            Reach::NoHop => format!(
                r#"a.author = :author AND (({ROOT_POST}) OR (
                    m.type = 'contact'
                    AND EXISTS(SELECT 1 FROM contacts c WHERE c.msg_ref = m.msg_id AND c.state = 1)
                ))"#
            ),
        };

        Ok(FeedQuery::new(Order::Newest("m.claimed_at".to_string()))
            .filter(selection)
            .bind(":author", self.identity.as_str().to_string())
            .include_undecrypted(self.include_undecrypted))
    }
}

impl FeedStrategy for Profile {
    fn count(&self, store: &ViewStore, _viewer: &Identity) -> Result<i64> {
        self.query(store)?.count(store)
    }

    fn count_since(&self, store: &ViewStore, _viewer: &Identity, since: &MessageId) -> Result<i64> {
        self.query(store)?.count_since(store, since)
    }

    fn fetch(
        &self,
        store: &ViewStore,
        _viewer: &Identity,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        self.query(store)?.fetch(store, limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::tests::{contact, id, post, reply, store_for};
    use crate::log::compose;
    use serde_json::json;

    #[test]
    fn test_no_hop_profile() {
        let (_dir, store) = store_for("viewer");
        let alice = id("alice");
        let root = post(&alice, 1, "root", 100);
        let batch = vec![
            root.clone(),
            reply(&alice, 2, "self reply", &root.key, &root.key, 150),
            contact(&alice, 3, &id("bob"), 200),
            post(&id("bob"), 1, "bob", 300),
        ];
        store.fill_messages(&batch, false).expect("fill");

        let profile = Profile::new(alice.clone());
        assert_eq!(profile.reach(&store).expect("reach"), Reach::NoHop);

        let items = profile.fetch(&store, &id("viewer"), 10, 0).expect("fetch");
        let types: Vec<_> = items.iter().map(|m| m.content_type.as_str()).collect();
        assert_eq!(types, vec!["contact", "post"]);
        assert!(items.iter().all(|m| m.author == alice));
        assert_eq!(profile.count(&store, &id("viewer")).expect("count"), 2);
    }

    #[test]
    fn test_pub_profile_reaches_one_hop() {
        let (_dir, store) = store_for("viewer");
        let hub = id("hub");
        let announce = compose(
            &id("someone"),
            1,
            None,
            json!({ "type": "pub", "address": { "host": "hub.example", "port": 8008, "key": hub } }),
            10,
        );
        let batch = vec![
            contact(&hub, 1, &id("member"), 20),
            post(&hub, 2, "welcome", 30),
            post(&id("member"), 1, "hi all", 40),
            post(&id("outsider"), 1, "not here", 50),
        ];
        store.fill_messages(&batch, false).expect("fill");

        let profile = Profile::new(hub.clone());
        assert_eq!(profile.count(&store, &id("viewer")).expect("count"), 2);

        // Becomes a pub once the announcement arrives
        store.fill_messages(&[announce], false).expect("fill announce");
        assert_eq!(profile.reach(&store).expect("reach"), Reach::OneHop);
        let authors: Vec<_> = profile
            .fetch(&store, &id("viewer"), 10, 0)
            .expect("fetch")
            .into_iter()
            .map(|m| m.author)
            .collect();
        assert_eq!(authors, vec![id("member"), hub]);
    }
}
