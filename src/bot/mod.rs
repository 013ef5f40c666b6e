// SPDX-License-Identifier: MPL-2.0

//! The bot: one long-lived handle tying a log source to its view.
//!
//! Every store call runs on a worker lane, never on the caller's task:
//! feed access and publishing on the user lane, log sync on the utility
//! lane, statistics on the serial lane.

mod stats;

pub use stats::{BotStatistics, RefreshLoad, RefreshReport};

use crate::config::STATS_TIMEOUT;
use crate::feed::{FeedAlgorithm, StrategySource};
use crate::log::{Identity, LogSource, Message, MessageId, RawMessage, SourceError, Thread};
use crate::pager::Pager;
use crate::runtime::{Lane, LaneError, Lanes};
use crate::store::{AboutInfo, BanOutcome, Migration, Report, StoreConfig, StoreError, ViewStore};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::info;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("already logged in")]
    AlreadyLoggedIn,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("log source error: {0}")]
    Source(#[from] SourceError),
    #[error("lane error: {0}")]
    Lane(#[from] LaneError),
    #[error("statistics did not finish within {0:?}")]
    Stuck(Duration),
}

pub type Result<T> = std::result::Result<T, BotError>;

pub struct Bot<S: LogSource + 'static> {
    source: Arc<S>,
    lanes: Lanes,
    store: RwLock<Option<Arc<ViewStore>>>,
    /// Shared with the statistics path, hence its own lock
    published: Arc<Mutex<u64>>,
    stats_timeout: Duration,
}

impl<S: LogSource + 'static> Bot<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(source),
            lanes: Lanes::new(),
            store: RwLock::new(None),
            published: Arc::new(Mutex::new(0)),
            stats_timeout: STATS_TIMEOUT,
        }
    }

    /// Override how long `statistics` waits before reporting `Stuck`
    pub fn with_stats_timeout(mut self, timeout: Duration) -> Self {
        self.stats_timeout = timeout;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn is_logged_in(&self) -> bool {
        self.store.read().is_some()
    }

    /// Open the view for `identity`, at `path` or the default location
    pub async fn login(
        &self,
        identity: Identity,
        path: Option<PathBuf>,
        config: StoreConfig,
    ) -> Result<Migration> {
        if self.is_logged_in() {
            return Err(BotError::AlreadyLoggedIn);
        }
        let path = match path {
            Some(path) => path,
            None => ViewStore::default_path(&identity)?,
        };

        let store = Arc::new(ViewStore::new(config));
        let opening = store.clone();
        let viewer = identity.clone();
        let migration = self
            .lanes
            .run(Lane::User, move || opening.open(&path, &viewer))
            .await??;

        {
            let mut session = self.store.write();
            if session.is_some() {
                return Err(BotError::AlreadyLoggedIn);
            }
            *session = Some(store);
        }
        *self.published.lock() = 0;

        info!(identity = %identity, ?migration, "logged in");
        Ok(migration)
    }

    /// Close the view, waiting for lent readers to come back
    pub async fn logout(&self) -> Result<()> {
        let store = self.store.write().take().ok_or(BotError::NotLoggedIn)?;
        store.close().await?;
        info!("logged out");
        Ok(())
    }

    fn view(&self) -> Result<Arc<ViewStore>> {
        self.store.read().clone().ok_or(BotError::NotLoggedIn)
    }

    async fn on_lane<T, F>(&self, lane: Lane, f: F) -> Result<T>
    where
        F: FnOnce(&ViewStore) -> crate::store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.view()?;
        Ok(self.lanes.run(lane, move || f(&store)).await??)
    }

    /// Pull one batch of the receive log and one of the private log
    pub async fn refresh(&self, load: RefreshLoad) -> Result<RefreshReport> {
        let started = Instant::now();
        let batch_size = load.batch_size();

        let cursor = self.on_lane(Lane::Utility, |s| s.receive_cursor()).await?;
        let received = self.source.receive_log(cursor + 1, batch_size).await?;
        let received_rows = received.len();
        let received_report = self.ingest(received, cursor, false).await?;

        let cursor = self.on_lane(Lane::Utility, |s| s.private_cursor()).await?;
        let private = self.source.private_log(cursor + 1, batch_size).await?;
        let private_rows = private.len();
        let private_report = self.ingest(private, cursor, true).await?;

        let report = RefreshReport {
            received: received_report,
            private: private_report,
            received_rows,
            private_rows,
            batch_size,
            elapsed: started.elapsed(),
        };
        info!(
            received = received_rows,
            private = private_rows,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "refresh finished"
        );
        Ok(report)
    }

    /// Fill a log batch and advance that log's cursor past it
    async fn ingest(
        &self,
        batch: Vec<RawMessage>,
        cursor: i64,
        is_private: bool,
    ) -> Result<crate::store::FillReport> {
        if batch.is_empty() {
            return Ok(Default::default());
        }
        let last = batch
            .iter()
            .filter_map(|m| m.receive_seq)
            .max()
            .unwrap_or(cursor + batch.len() as i64);

        self.on_lane(Lane::Utility, move |s| {
            let report = s.fill_messages(&batch, is_private)?;
            if is_private {
                s.set_private_cursor(last)?;
            } else {
                s.set_receive_cursor(last)?;
            }
            Ok(report)
        })
        .await
    }

    /// Publish `content` as the viewer and bring the view up to date with
    /// the viewer's own feed right away.
    pub async fn publish(&self, content: serde_json::Value) -> Result<MessageId> {
        let store = self.view()?;
        let key = self.source.publish(content).await?;

        let viewer = store.viewer()?;
        let after = self
            .on_lane(Lane::User, move |s| s.latest_sequence(&viewer))
            .await?;
        let own = self.source.published_log(after).await?;
        self.on_lane(Lane::User, move |s| s.fill_messages(&own, false))
            .await?;

        *self.published.lock() += 1;
        info!(key = %key, "published");
        Ok(key)
    }

    /// Counters, taken on the serial lane. A backend that does not answer
    /// within the statistics timeout is reported as stuck; the query itself
    /// keeps running.
    pub async fn statistics(&self) -> Result<BotStatistics> {
        let published = self.published.clone();
        let work = self.on_lane(Lane::Serial, move |s| {
            Ok(BotStatistics {
                store: s.statistics()?,
                published: *published.lock(),
                receive_cursor: s.receive_cursor()?,
                private_cursor: s.private_cursor()?,
            })
        });

        match tokio::time::timeout(self.stats_timeout, work).await {
            Ok(stats) => stats,
            Err(_) => Err(BotError::Stuck(self.stats_timeout)),
        }
    }

    pub async fn count(&self, algorithm: &FeedAlgorithm) -> Result<i64> {
        let viewer = self.view()?.viewer()?;
        let strategy = algorithm.build();
        self.on_lane(Lane::User, move |s| strategy.count(s, &viewer))
            .await
    }

    pub async fn count_since(&self, algorithm: &FeedAlgorithm, since: &MessageId) -> Result<i64> {
        let viewer = self.view()?.viewer()?;
        let strategy = algorithm.build();
        let since = since.clone();
        self.on_lane(Lane::User, move |s| strategy.count_since(s, &viewer, &since))
            .await
    }

    pub async fn fetch(
        &self,
        algorithm: &FeedAlgorithm,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        let viewer = self.view()?.viewer()?;
        let strategy = algorithm.build();
        self.on_lane(Lane::User, move |s| strategy.fetch(s, &viewer, limit, offset))
            .await
    }

    /// A pager over `algorithm`, its total fixed now. Background retrieves
    /// run on the current runtime.
    pub async fn pager(&self, algorithm: &FeedAlgorithm) -> Result<Pager<StrategySource>> {
        let store = self.view()?;
        let viewer = store.viewer()?;
        let strategy = algorithm.build();
        let source = self
            .lanes
            .run(Lane::User, move || StrategySource::new(store, viewer, strategy))
            .await??;
        Ok(Pager::new(source, Handle::current(), self.lanes.clone()))
    }

    pub async fn get(&self, key: &MessageId) -> Result<Message> {
        let key = key.clone();
        self.on_lane(Lane::User, move |s| s.get(&key)).await
    }

    pub async fn thread(&self, root: &MessageId) -> Result<Thread> {
        let root = root.clone();
        self.on_lane(Lane::User, move |s| s.thread(&root)).await
    }

    pub async fn about(&self, identity: &Identity) -> Result<AboutInfo> {
        let identity = identity.clone();
        self.on_lane(Lane::User, move |s| s.about(&identity)).await
    }

    /// Reports addressed to the viewer, newest first
    pub async fn reports(&self, limit: usize, offset: usize) -> Result<Vec<Report>> {
        self.on_lane(Lane::User, move |s| s.reports(&s.viewer()?, limit, offset))
            .await
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<Message>> {
        let query = query.to_string();
        self.on_lane(Lane::User, move |s| s.search(&query, limit))
            .await
    }

    pub async fn mark_read(&self, key: &MessageId) -> Result<()> {
        let key = key.clone();
        self.on_lane(Lane::User, move |s| s.mark_read(&key)).await
    }

    pub async fn apply_bans(&self, hashes: Vec<String>) -> Result<BanOutcome> {
        self.on_lane(Lane::User, move |s| s.apply_bans(&hashes))
            .await
    }

    pub async fn delete_message(&self, key: &MessageId) -> Result<()> {
        let key = key.clone();
        self.on_lane(Lane::User, move |s| s.delete_message(&key))
            .await
    }

    pub async fn delete_author(&self, identity: &Identity) -> Result<usize> {
        let identity = identity.clone();
        self.on_lane(Lane::User, move |s| s.delete_author(&identity))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{MemoryLog, compose};
    use serde_json::json;
    use tempfile::TempDir;

    fn me() -> Identity {
        Identity::new("@me.ed25519")
    }

    fn config() -> StoreConfig {
        StoreConfig {
            retention: None,
            ..StoreConfig::default()
        }
    }

    async fn logged_in(log: MemoryLog) -> (TempDir, Bot<MemoryLog>) {
        let dir = TempDir::new().expect("tempdir");
        let bot = Bot::new(log);
        bot.login(me(), Some(dir.path().join("view.sqlite")), config())
            .await
            .expect("login");
        (dir, bot)
    }

    #[tokio::test]
    async fn test_login_twice_and_logout() {
        let (dir, bot) = logged_in(MemoryLog::new(me())).await;
        let again = bot
            .login(me(), Some(dir.path().join("other.sqlite")), config())
            .await;
        assert!(matches!(again, Err(BotError::AlreadyLoggedIn)));

        bot.logout().await.expect("logout");
        assert!(!bot.is_logged_in());
        assert!(matches!(bot.logout().await, Err(BotError::NotLoggedIn)));
        assert!(matches!(
            bot.refresh(RefreshLoad::Short).await,
            Err(BotError::NotLoggedIn)
        ));
    }

    #[tokio::test]
    async fn test_refresh_advances_cursors() {
        let log = MemoryLog::new(me());
        let friend = Identity::new("@friend.ed25519");
        for seq in 1..=3u64 {
            log.push(compose(
                &friend,
                seq,
                None,
                json!({ "type": "post", "text": format!("note {seq}") }),
                1_000 * seq as i64,
            ));
        }
        let secret = compose(
            &friend,
            4,
            None,
            json!({ "type": "post", "text": "psst", "recps": [me()] }),
            5_000,
        );
        log.push_private(secret);

        let (_dir, bot) = logged_in(log).await;
        let report = bot.refresh(RefreshLoad::Short).await.expect("refresh");
        assert_eq!(report.received.inserted, 3);
        assert_eq!(report.private.inserted, 1);
        assert!(report.caught_up());

        let again = bot.refresh(RefreshLoad::Short).await.expect("refresh");
        assert_eq!(again.received_rows, 0);
        assert_eq!(again.private_rows, 0);

        let stats = bot.statistics().await.expect("stats");
        assert_eq!(stats.receive_cursor, 2);
        assert_eq!(stats.private_cursor, 0);
        assert_eq!(stats.store.posts, 4);
    }

    #[tokio::test]
    async fn test_published_counter() {
        let (_dir, bot) = logged_in(MemoryLog::new(me())).await;
        bot.publish(json!({ "type": "post", "text": "one" }))
            .await
            .expect("publish");
        bot.publish(json!({ "type": "post", "text": "two" }))
            .await
            .expect("publish");

        let stats = bot.statistics().await.expect("stats");
        assert_eq!(stats.published, 2);
        assert_eq!(stats.store.posts, 2);
    }

    #[tokio::test]
    async fn test_statistics_reports_stuck() {
        let (_dir, bot) = logged_in(MemoryLog::new(me())).await;
        let bot = bot.with_stats_timeout(Duration::from_millis(50));

        // Wedge the serial lane
        let lanes = bot.lanes.clone();
        let (started, wedged) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            lanes
                .run(Lane::Serial, move || {
                    let _ = started.send(());
                    std::thread::sleep(Duration::from_millis(300));
                })
                .await
        });
        wedged.await.expect("wedge started");

        assert!(matches!(
            bot.statistics().await,
            Err(BotError::Stuck(d)) if d == Duration::from_millis(50)
        ));
    }

    #[tokio::test]
    async fn test_pager_over_profile() {
        let (_dir, bot) = logged_in(MemoryLog::new(me())).await;
        for i in 0..30 {
            bot.publish(json!({ "type": "post", "text": format!("post {i}") }))
                .await
                .expect("publish");
        }

        let algorithm = FeedAlgorithm::Profile { identity: me() };
        let pager = bot.pager(&algorithm).await.expect("pager");
        assert_eq!(pager.total(), 30);
        let newest = pager.fetch(0).await.expect("row");
        let oldest = pager.fetch(29).await.expect("row");
        assert!(newest.claimed_at >= oldest.claimed_at);
        assert_eq!(oldest.sequence, 1);
    }
}
