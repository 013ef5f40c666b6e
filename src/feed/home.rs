// SPDX-License-Identifier: MPL-2.0

use crate::feed::query::{FeedQuery, Order};
use crate::feed::{FOLLOWED_BY_VIEWER, FeedStrategy, ROOT_POST};
use crate::log::{Identity, Message, MessageId};
use crate::store::{Result, ViewStore};

/// Latest activity in a root post's thread: the post itself or its newest
/// visible reply.
const ACTIVITY: &str = r#"MAX(m.claimed_at, COALESCE((
    SELECT MAX(r.claimed_at) FROM tangles t
    JOIN messages r ON r.msg_id = t.msg_ref
    JOIN posts rp ON rp.msg_ref = r.msg_id
    WHERE t.root = m.msg_id AND r.hidden = 0 AND r.claimed_at <= :now
), 0))"#;

/// The viewer's and followed feeds' root posts, bumped by replies.
///
/// With `include_contacts`, follow edges authored by followed feeds show up
/// too, except edges pointing at the viewer (those are reports). Feeds that
/// are only advertised as pubs are left out.
#[derive(Debug, Clone, Default)]
pub struct Home {
    pub include_contacts: bool,
    pub include_undecrypted: bool,
}

impl Home {
    pub fn new(include_contacts: bool) -> Self {
        Self {
            include_contacts,
            include_undecrypted: false,
        }
    }

    fn query(&self, viewer: &Identity) -> FeedQuery {
        let posts = format!(
            "{ROOT_POST} AND (a.author = :viewer OR m.author_id IN ({FOLLOWED_BY_VIEWER}))"
        );
        let selection = if self.include_contacts {
            format!(
                r#"({posts}) OR (
                    m.type = 'contact'
                    AND m.author_id IN ({FOLLOWED_BY_VIEWER})
                    AND EXISTS(
                        SELECT 1 FROM contacts c JOIN authors ca ON ca.id = c.contact_id
                        WHERE c.msg_ref = m.msg_id AND c.state = 1 AND ca.author != :viewer
                    )
                )"#
            )
        } else {
            posts
        };

        FeedQuery::new(Order::Newest(ACTIVITY.to_string()))
            .filter(selection)
            .filter("a.author = :viewer OR a.author NOT IN (SELECT key FROM pubs)")
            .bind(":viewer", viewer.as_str().to_string())
            .include_undecrypted(self.include_undecrypted)
    }
}

impl FeedStrategy for Home {
    fn count(&self, store: &ViewStore, viewer: &Identity) -> Result<i64> {
        self.query(viewer).count(store)
    }

    fn count_since(&self, store: &ViewStore, viewer: &Identity, since: &MessageId) -> Result<i64> {
        self.query(viewer).count_since(store, since)
    }

    fn fetch(
        &self,
        store: &ViewStore,
        viewer: &Identity,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        self.query(viewer).fetch(store, limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::tests::{contact, id, post, reply, store_for};
    use serde_json::json;

    #[test]
    fn test_reply_bumps_root_and_count_is_posts_only() {
        let (_dir, store) = store_for("b");
        let a = id("a");
        let b = id("b");

        let older = post(&id("c"), 1, "older content", 1_000);
        let root = post(&a, 1, "root", 2_000);
        let first = reply(&a, 2, "first reply", &root.key, &root.key, 2_100);
        let second = reply(&a, 3, "second reply", &root.key, &first.key, 2_200);
        let newer = post(&b, 1, "b's own post", 2_150);

        let batch = vec![
            older,
            root.clone(),
            first,
            second,
            contact(&a, 4, &b, 2_300),
            contact(&b, 2, &a, 100),
            contact(&b, 3, &id("c"), 100),
            newer.clone(),
        ];
        store.fill_messages(&batch, false).expect("fill");

        let home = Home::new(true);
        let items = home.fetch(&store, &b, 10, 0).expect("fetch");
        let keys: Vec<_> = items.iter().map(|m| m.key.clone()).collect();

        // Root's thread was active at 2_200, after b's post at 2_150
        assert_eq!(keys[0], root.key);
        assert_eq!(keys[1], newer.key);
        assert_eq!(items.len(), 3);
        assert_eq!(home.count(&store, &b).expect("count"), 3);

        // Replies bump their root but are not items themselves
        assert_eq!(items.iter().filter(|m| m.author == a).count(), 1);
    }

    #[test]
    fn test_contact_edges_of_follows() {
        let (_dir, store) = store_for("viewer");
        let viewer = id("viewer");
        let a = id("a");
        let batch = vec![
            contact(&viewer, 1, &a, 100),
            contact(&a, 1, &id("d"), 200),
            contact(&a, 2, &viewer, 300),
            post(&a, 3, "hello", 400),
        ];
        store.fill_messages(&batch, false).expect("fill");

        let with = Home::new(true);
        let without = Home::new(false);
        assert_eq!(with.count(&store, &viewer).expect("count"), 2);
        assert_eq!(without.count(&store, &viewer).expect("count"), 1);

        let types: Vec<_> = with
            .fetch(&store, &viewer, 10, 0)
            .expect("fetch")
            .into_iter()
            .map(|m| m.content_type)
            .collect();
        assert_eq!(types, vec!["post".to_string(), "contact".to_string()]);
    }

    #[test]
    fn test_pub_feeds_are_excluded() {
        let (_dir, store) = store_for("viewer");
        let viewer = id("viewer");
        let hub = id("hub");
        let announce = crate::log::compose(
            &id("someone"),
            1,
            None,
            json!({ "type": "pub", "address": { "host": "hub.example", "port": 8008, "key": hub } }),
            50,
        );
        let batch = vec![
            announce,
            contact(&viewer, 1, &hub, 100),
            post(&hub, 1, "welcome to the pub", 200),
            post(&viewer, 2, "my own", 300),
        ];
        store.fill_messages(&batch, false).expect("fill");

        let items = Home::new(false).fetch(&store, &viewer, 10, 0).expect("fetch");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].author, viewer);
    }

    #[test]
    fn test_count_since() {
        let (_dir, store) = store_for("viewer");
        let viewer = id("viewer");
        let first = post(&viewer, 1, "one", 100);
        let second = post(&viewer, 2, "two", 200);
        let third = post(&viewer, 3, "three", 300);
        store
            .fill_messages(&[first.clone(), second.clone(), third], false)
            .expect("fill");

        let home = Home::new(false);
        assert_eq!(home.count_since(&store, &viewer, &first.key).expect("since"), 2);
        assert_eq!(home.count_since(&store, &viewer, &second.key).expect("since"), 1);
        assert!(matches!(
            home.count_since(&store, &viewer, &MessageId::new("%nope.sha256")),
            Err(crate::store::StoreError::UnknownMessage(_))
        ));
    }
}
