// SPDX-License-Identifier: MPL-2.0

use crate::feed::query::{FeedQuery, Order};
use crate::feed::{FeedStrategy, ROOT_POST};
use crate::log::{Identity, Message, MessageId};
use crate::store::{Result, ViewStore};

/// Root posts from outside the viewer's graph, in a seeded random order.
///
/// Unread posts come first; read ones fill in after them. The seed fixes
/// the permutation, so offsets stay consistent for as long as one instance
/// is paged through.
#[derive(Debug, Clone)]
pub struct Discover {
    seed: u64,
}

impl Discover {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn query(&self, viewer: &Identity) -> FeedQuery {
        FeedQuery::new(Order::Shuffled(self.seed))
            .filter(ROOT_POST)
            .filter("a.author != :viewer")
            .filter(
                r#"m.author_id NOT IN (
                    SELECT c.contact_id FROM contacts c JOIN authors v ON v.id = c.author_id
                    WHERE v.author = :viewer AND c.state != 0
                )"#,
            )
            .bind(":viewer", viewer.as_str().to_string())
    }
}

impl Default for Discover {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedStrategy for Discover {
    fn count(&self, store: &ViewStore, viewer: &Identity) -> Result<i64> {
        self.query(viewer).count(store)
    }

    /// Always 0: a shuffled feed has no notion of "newer than".
    fn count_since(&self, _store: &ViewStore, _viewer: &Identity, _since: &MessageId) -> Result<i64> {
        Ok(0)
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
