// SPDX-License-Identifier: MPL-2.0

use crate::feed::FeedStrategy;
use crate::feed::query::{FeedQuery, Order};
use crate::log::facets::normalize_tag;
use crate::log::{Identity, Message, MessageId};
use crate::store::{Result, ViewStore};

/// Messages assigned to one hashtag, newest first. An unknown tag is an
/// empty feed.
#[derive(Debug, Clone)]
pub struct Hashtag {
    name: String,
    pub include_undecrypted: bool,
}

impl Hashtag {
    pub fn new(name: &str) -> Self {
        Self {
            name: normalize_tag(name),
            include_undecrypted: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn query(&self) -> FeedQuery {
        FeedQuery::new(Order::Newest("m.claimed_at".to_string()))
            .join("JOIN channel_assignments ca ON ca.msg_ref = m.msg_id")
            .join("JOIN channels ch ON ch.id = ca.chan_ref")
            .filter("ch.name = :tag")
            .bind(":tag", self.name.clone())
            .include_undecrypted(self.include_undecrypted)
    }
}

impl FeedStrategy for Hashtag {
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
    use crate::feed::tests::{id, post, store_for};

    #[test]
    fn test_tagged_newest_first() {
        let (_dir, store) = store_for("viewer");
        let batch = vec![
            post(&id("a"), 1, "first #Gardening", 100),
            post(&id("b"), 1, "unrelated", 200),
            post(&id("c"), 1, "second #gardening", 300),
        ];
        store.fill_messages(&batch, false).expect("fill");

        let tag = Hashtag::new("#GARDENING");
        assert_eq!(tag.name(), "gardening");
        let texts: Vec<_> = tag
            .fetch(&store, &id("viewer"), 10, 0)
            .expect("fetch")
            .iter()
            .map(|m| m.text().unwrap_or_default().to_string())
            .collect();
        assert_eq!(texts, vec!["second #gardening", "first #Gardening"]);
        assert_eq!(
            tag.count_since(&store, &id("viewer"), &batch[0].key)
                .expect("since"),
            1
        );
    }

    #[test]
    fn test_unknown_tag_is_empty() {
        let (_dir, store) = store_for("viewer");
        let tag = Hashtag::new("nothing");
        assert_eq!(tag.count(&store, &id("viewer")).expect("count"), 0);
        assert!(tag.fetch(&store, &id("viewer"), 10, 0).expect("fetch").is_empty());
    }
}
