// SPDX-License-Identifier: MPL-2.0

use crate::feed::FeedStrategy;
use crate::log::{Identity, Message, MessageId};
use crate::store::{Result, StoreError, ViewStore};

/// A fixed list of messages in the caller's order.
///
/// Keys that are unknown, hidden, undecrypted or not yet due are skipped.
#[derive(Debug, Clone, Default)]
pub struct StaticList {
    pub keys: Vec<MessageId>,
}

impl StaticList {
    pub fn new(keys: Vec<MessageId>) -> Self {
        Self { keys }
    }

    fn visible(&self, store: &ViewStore) -> Result<Vec<Message>> {
        let now = ViewStore::now();
        let mut messages = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            match store.get(key) {
                Ok(m) if !m.hidden && m.decrypted && m.claimed_at <= now => messages.push(m),
                Ok(_) | Err(StoreError::UnknownMessage(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(messages)
    }
}

impl FeedStrategy for StaticList {
    fn count(&self, store: &ViewStore, _viewer: &Identity) -> Result<i64> {
        Ok(self.visible(store)?.len() as i64)
    }

    /// Visible entries listed before `since`; 0 when `since` is not among them.
    fn count_since(&self, store: &ViewStore, _viewer: &Identity, since: &MessageId) -> Result<i64> {
        Ok(self
            .visible(store)?
            .iter()
            .position(|m| &m.key == since)
            .unwrap_or(0) as i64)
    }

    fn fetch(
        &self,
        store: &ViewStore,
        _viewer: &Identity,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        Ok(self
            .visible(store)?
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }
}
