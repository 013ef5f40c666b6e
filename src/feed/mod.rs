// SPDX-License-Identifier: MPL-2.0

//! Feed strategies: interchangeable ranking and filtering over the view.

mod discover;
mod hashtag;
mod home;
mod profile;
mod query;
mod replies;
mod static_list;

pub use discover::Discover;
pub use hashtag::Hashtag;
pub use home::Home;
pub use profile::{Profile, Reach};
pub use query::{FeedQuery, Order};
pub use replies::Replies;
pub use static_list::StaticList;

use crate::log::{Identity, Message, MessageId};
use crate::pager::PageSource;
use crate::store::{Result, ViewStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Root posts only; replies carry a tangle root.
pub(crate) const ROOT_POST: &str =
    "m.type = 'post' AND EXISTS(SELECT 1 FROM posts p WHERE p.msg_ref = m.msg_id AND p.is_root = 1)";

/// Author ids the viewer currently follows
pub(crate) const FOLLOWED_BY_VIEWER: &str = "SELECT c.contact_id FROM contacts c \
     JOIN authors v ON v.id = c.author_id WHERE v.author = :viewer AND c.state = 1";

/// A ranking algorithm. Callers hold a `dyn FeedStrategy` and never care
/// which one it is.
pub trait FeedStrategy: Send + Sync {
    fn count(&self, store: &ViewStore, viewer: &Identity) -> Result<i64>;

    /// Items ranked ahead of `since`. Orderings that are not chronological
    /// report 0.
    fn count_since(&self, store: &ViewStore, viewer: &Identity, since: &MessageId) -> Result<i64>;

    fn fetch(
        &self,
        store: &ViewStore,
        viewer: &Identity,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>>;
}

fn default_true() -> bool {
    true
}

/// Persisted choice of algorithm for a feed surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedAlgorithm {
    Home {
        #[serde(default = "default_true")]
        include_contacts: bool,
    },
    Discover,
    Profile {
        identity: Identity,
    },
    Hashtag {
        name: String,
    },
    Replies {
        root: MessageId,
    },
    Static {
        #[serde(default)]
        keys: Vec<MessageId>,
    },
}

impl Default for FeedAlgorithm {
    fn default() -> Self {
        FeedAlgorithm::Home {
            include_contacts: true,
        }
    }
}

impl FeedAlgorithm {
    /// Concrete strategy for this choice. Discover gets a fresh seed on
    /// every build.
    pub fn build(&self) -> Box<dyn FeedStrategy> {
        match self {
            FeedAlgorithm::Home { include_contacts } => Box::new(Home::new(*include_contacts)),
            FeedAlgorithm::Discover => Box::new(Discover::new()),
            FeedAlgorithm::Profile { identity } => Box::new(Profile::new(identity.clone())),
            FeedAlgorithm::Hashtag { name } => Box::new(Hashtag::new(name)),
            FeedAlgorithm::Replies { root } => Box::new(Replies::new(root.clone())),
            FeedAlgorithm::Static { keys } => Box::new(StaticList::new(keys.clone())),
        }
    }

    /// Decode a stored value, falling back to the default when it is
    /// missing, corrupt or names an algorithm this build does not know.
    pub fn decode_lenient(value: &serde_json::Value) -> Self {
        Self::decode_or(value, Self::default())
    }

    /// Like `decode_lenient`, with the caller's fallback
    pub fn decode_or(value: &serde_json::Value, fallback: Self) -> Self {
        match serde_json::from_value(value.clone()) {
            Ok(algorithm) => algorithm,
            Err(e) => {
                warn!(%value, error = %e, "unreadable feed algorithm, using fallback");
                fallback
            }
        }
    }
}

/// A strategy bound to a store and viewer, paged through by a `Pager`.
///
/// The total is fixed when the source is built, so indexes a pager hands
/// out stay meaningful while new messages arrive underneath.
pub struct StrategySource {
    store: Arc<ViewStore>,
    viewer: Identity,
    strategy: Box<dyn FeedStrategy>,
    total: usize,
}

impl StrategySource {
    pub fn new(
        store: Arc<ViewStore>,
        viewer: Identity,
        strategy: Box<dyn FeedStrategy>,
    ) -> Result<Self> {
        let total = strategy.count(&store, &viewer)?.max(0) as usize;
        Ok(Self {
            store,
            viewer,
            strategy,
            total,
        })
    }
}

impl PageSource for StrategySource {
    type Item = Message;

    fn total(&self) -> usize {
        self.total
    }

    fn retrieve(&self, limit: usize, offset: usize) -> std::result::Result<Vec<Message>, String> {
        self.strategy
            .fetch(&self.store, &self.viewer, limit, offset)
            .map_err(|e| e.to_string())
    }
}
