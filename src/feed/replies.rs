// SPDX-License-Identifier: MPL-2.0

use crate::feed::FeedStrategy;
use crate::feed::query::{FeedQuery, Order};
use crate::log::{Identity, Message, MessageId};
use crate::store::{Result, ViewStore};

/// Posts and votes in the thread under `root`, oldest first
#[derive(Debug, Clone)]
pub struct Replies {
    pub root: MessageId,
    pub include_undecrypted: bool,
}

impl Replies {
    pub fn new(root: MessageId) -> Self {
        Self {
            root,
            include_undecrypted: false,
        }
    }

    fn query(&self) -> FeedQuery {
        FeedQuery::new(Order::Oldest("m.claimed_at".to_string()))
            .filter("m.type IN ('post', 'vote')")
            .filter(
                r#"m.msg_id IN (
                    SELECT t.msg_ref FROM tangles t JOIN msgkeys rk ON rk.id = t.root
                    WHERE rk.key = :root
                )"#,
            )
            .bind(":root", self.root.as_str().to_string())
            .include_undecrypted(self.include_undecrypted)
    }
}

impl FeedStrategy for Replies {
    fn count(&self, store: &ViewStore, _viewer: &Identity) -> Result<i64> {
        self.query().count(store)
    }

    fn count_since(&self, store: &ViewStore, _viewer: &Identity, since: &MessageId) -> Result<i64> {
        self.query().count_since(store, since)
    }

    fn fetch(
        &self,
        store: &ViewStore,
        _viewer: &Identity,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        self.query().fetch(store, limit, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::tests::{id, post, reply, store_for};
    use crate::log::compose;
    use serde_json::json;

    #[test]
    fn test_thread_oldest_first_with_votes() {
        let (_dir, store) = store_for("viewer");
        let root = post(&id("a"), 1, "root", 100);
        let later = reply(&id("b"), 1, "later", &root.key, &root.key, 300);
        let earlier = reply(&id("c"), 1, "earlier", &root.key, &root.key, 200);
        let like = compose(
            &id("d"),
            1,
            None,
            json!({ "type": "vote", "vote": { "link": root.key, "value": 1, "expression": "Like" } }),
            400,
        );
        let elsewhere = post(&id("e"), 1, "elsewhere", 250);
        store
            .fill_messages(
                &[root.clone(), later.clone(), earlier.clone(), like.clone(), elsewhere],
                false,
            )
            .expect("fill");

        let replies = Replies::new(root.key.clone());
        let keys: Vec<_> = replies
            .fetch(&store, &id("viewer"), 10, 0)
            .expect("fetch")
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec![earlier.key.clone(), later.key, like.key]);
        assert_eq!(
            replies
                .count_since(&store, &id("viewer"), &earlier.key)
                .expect("since"),
            2
        );
    }

    #[test]
    fn test_undecrypted_replies_on_request() {
        let (_dir, store) = store_for("viewer");
        let root = post(&id("a"), 1, "root", 100);
        let boxed = compose(&id("b"), 1, None, json!("Ym94ZWQ=.box"), 200);
        store
            .fill_messages(&[root.clone(), boxed], false)
            .expect("fill");

        // Ciphertext carries no thread pointers, so it never joins a thread
        let mut replies = Replies::new(root.key.clone());
        replies.include_undecrypted = true;
        assert_eq!(replies.count(&store, &id("viewer")).expect("count"), 0);
    }
}
