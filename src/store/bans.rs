// SPDX-License-Identifier: MPL-2.0

//! Moderation: reversible bans and irreversible deletes.
//!
//! A ban only flips `hidden`; rows stay so a lifted ban restores them. A
//! delete removes the message from every projection table and, for single
//! messages, marks the key dropped so the log cannot bring it back.

use crate::log::{Identity, MessageId};
use crate::store::db::{key_id, require_author};
use crate::store::{Result, StoreError, ViewStore};
use rusqlite::{Connection, params};
use tracing::info;

/// Hidden-row changes made by one `apply_bans` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BanOutcome {
    pub unhidden: usize,
    pub hidden: usize,
}

const MATCHES_BANNED: &str = r#"
    msg_id IN (SELECT k.id FROM msgkeys k JOIN banned_content b ON b.hash = k.hashed)
    OR author_id IN (SELECT a.id FROM authors a JOIN banned_content b ON b.hash = a.hashed)
"#;

impl ViewStore {
    /// Replace the applied ban list with `hashes`.
    ///
    /// Rows hidden by the previous list are unhidden first, so an entry
    /// dropped from the list (an appeal) takes effect here.
    pub fn apply_bans(&self, hashes: &[String]) -> Result<BanOutcome> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;

        let unhidden = tx.execute(
            &format!("UPDATE messages SET hidden = 0 WHERE hidden = 1 AND ({MATCHES_BANNED})"),
            [],
        )?;
        tx.execute("DELETE FROM banned_content", [])?;
        {
            let mut insert = tx.prepare("INSERT OR IGNORE INTO banned_content (hash) VALUES (?)")?;
            for hash in hashes {
                insert.execute([hash.to_lowercase()])?;
            }
        }
        let hidden = tx.execute(
            &format!("UPDATE messages SET hidden = 1 WHERE {MATCHES_BANNED}"),
            [],
        )?;

        tx.commit()?;
        info!(entries = hashes.len(), unhidden, hidden, "applied ban list");
        Ok(BanOutcome { unhidden, hidden })
    }

    /// Remove one message from the view for good
    pub fn delete_message(&self, key: &MessageId) -> Result<()> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;

        let msg_ref = key_id(&tx, key)?.ok_or_else(|| StoreError::UnknownMessage(key.clone()))?;
        if !purge_message(&tx, msg_ref)? {
            return Err(StoreError::UnknownMessage(key.clone()));
        }
        tombstone(&tx, msg_ref)?;

        tx.commit()?;
        info!(key = %key, "deleted message");
        Ok(())
    }

    /// Remove every message of `author`; returns how many went.
    ///
    /// The keys are not tombstoned, so the author's feed can be ingested
    /// again later.
    pub fn delete_author(&self, author: &Identity) -> Result<usize> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;

        let author_ref = require_author(&tx, author)?;
        let msg_refs: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT msg_id FROM messages WHERE author_id = ?")?;
            stmt.query_map([author_ref], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };

        for msg_ref in &msg_refs {
            purge_message(&tx, *msg_ref)?;
        }
        tx.execute("DELETE FROM forks WHERE author_id = ?", [author_ref])?;
        tx.execute(
            "UPDATE authors SET name = NULL, image = NULL, description = NULL, about_at = 0 WHERE id = ?",
            [author_ref],
        )?;

        tx.commit()?;
        info!(author = %author, messages = msg_refs.len(), "deleted author");
        Ok(msg_refs.len())
    }
}

/// Delete a message and everything projected from it. Returns whether a
/// message row existed.
pub(crate) fn purge_message(conn: &Connection, msg_ref: i64) -> Result<bool> {
    conn.execute(
        "DELETE FROM branches WHERE tangle_id IN (SELECT id FROM tangles WHERE msg_ref = ?)",
        [msg_ref],
    )?;
    for table in [
        "tangles",
        "posts",
        "post_blobs",
        "mention_feed",
        "mention_message",
        "mention_image",
        "contacts",
        "votes",
        "abouts",
        "pubs",
        "addresses",
        "channel_assignments",
        "read_messages",
    ] {
        conn.execute(&format!("DELETE FROM {table} WHERE msg_ref = ?"), [msg_ref])?;
    }
    conn.execute("DELETE FROM post_search WHERE rowid = ?", [msg_ref])?;
    let removed = conn.execute("DELETE FROM messages WHERE msg_id = ?", [msg_ref])?;
    Ok(removed > 0)
}

/// Mark a key so later ingestion skips it
pub(crate) fn tombstone(conn: &Connection, msg_ref: i64) -> Result<()> {
    conn.execute(
        "UPDATE msgkeys SET dropped = 1 WHERE id = ?1",
        params![msg_ref],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{RawMessage, compose, hash_identifier};
    use crate::store::db::tests::test_store;
    use serde_json::json;

    fn post(author: &str, seq: u64, text: &str) -> RawMessage {
        compose(
            &Identity::new(author),
            seq,
            None,
            json!({ "type": "post", "text": text }),
            ViewStore::now() - 10_000 + seq as i64,
        )
    }

    fn hidden_count(store: &ViewStore) -> i64 {
        let conn = store.writer().expect("writer");
        conn.query_row("SELECT COUNT(*) FROM messages WHERE hidden = 1", [], |row| row.get(0))
            .expect("count")
    }

    #[test]
    fn test_ban_and_lift_is_reversible() {
        let (_dir, store) = test_store();
        let spam = post("@spammer.ed25519", 1, "buy now");
        let rude = post("@alice.ed25519", 1, "rude");
        let fine = post("@alice.ed25519", 2, "fine");
        store
            .fill_messages(&[spam.clone(), rude.clone(), fine], false)
            .expect("fill");

        let outcome = store
            .apply_bans(&[hash_identifier("@spammer.ed25519"), rude.key.hashed()])
            .expect("ban");
        assert_eq!(outcome.hidden, 2);
        assert_eq!(hidden_count(&store), 2);
        assert!(store.get(&spam.key).expect("still stored").hidden);

        let lifted = store.apply_bans(&[]).expect("lift");
        assert_eq!(lifted.unhidden, 2);
        assert_eq!(lifted.hidden, 0);
        assert_eq!(hidden_count(&store), 0);
    }

    #[test]
    fn test_appeal_unhides_only_dropped_entries() {
        let (_dir, store) = test_store();
        let a = post("@a.ed25519", 1, "a");
        let b = post("@b.ed25519", 1, "b");
        store.fill_messages(&[a.clone(), b.clone()], false).expect("fill");

        store
            .apply_bans(&[a.key.hashed(), b.key.hashed()])
            .expect("ban both");
        store.apply_bans(&[b.key.hashed()]).expect("appeal a");

        assert!(!store.get(&a.key).expect("a").hidden);
        assert!(store.get(&b.key).expect("b").hidden);
    }

    #[test]
    fn test_banned_author_new_messages_arrive_hidden() {
        let (_dir, store) = test_store();
        store
            .apply_bans(&[hash_identifier("@spammer.ed25519")])
            .expect("ban");
        let spam = post("@spammer.ed25519", 1, "late spam");
        store.fill_messages(&[spam.clone()], false).expect("fill");
        assert!(store.get(&spam.key).expect("stored").hidden);
    }

    #[test]
    fn test_delete_message_is_permanent() {
        let (_dir, store) = test_store();
        let gone = post("@alice.ed25519", 1, "delete me #tag");
        store.fill_messages(&[gone.clone()], false).expect("fill");

        store.delete_message(&gone.key).expect("delete");
        assert!(matches!(store.get(&gone.key), Err(StoreError::UnknownMessage(_))));
        assert_eq!(store.row_count("channel_assignments").expect("count"), 0);

        let report = store.fill_messages(&[gone.clone()], false).expect("refill");
        assert_eq!(report.tombstoned, 1);
        assert!(matches!(
            store.delete_message(&gone.key),
            Err(StoreError::UnknownMessage(_))
        ));
    }

    #[test]
    fn test_delete_author_allows_reingest() {
        let (_dir, store) = test_store();
        let batch = vec![
            post("@alice.ed25519", 1, "one"),
            post("@alice.ed25519", 2, "two"),
            post("@bob.ed25519", 1, "bob"),
        ];
        store.fill_messages(&batch, false).expect("fill");

        let removed = store
            .delete_author(&Identity::new("@alice.ed25519"))
            .expect("delete author");
        assert_eq!(removed, 2);
        assert_eq!(store.row_count("messages").expect("count"), 1);

        let report = store.fill_messages(&batch, false).expect("refill");
        assert_eq!(report.inserted, 2);
    }
}
