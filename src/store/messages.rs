// SPDX-License-Identifier: MPL-2.0

use crate::log::facets::normalize_tag;
use crate::log::{Identity, Message, MessageId, Thread};
use crate::store::db::{key_id, require_author};
use crate::store::{Result, StoreError, ViewStore};
use rusqlite::{OptionalExtension, params};
use std::collections::HashMap;

/// Columns `row_to_message` expects, over `messages m` joined to its key and author
pub(crate) const MESSAGE_COLUMNS: &str = r#"
    k.key, a.author, m.sequence, m.type, m.content_json,
    m.claimed_at, m.received_at, m.hidden, m.is_decrypted,
    a.name, a.image
"#;

pub(crate) const MESSAGE_JOINS: &str = r#"
    JOIN msgkeys k ON k.id = m.msg_id
    JOIN authors a ON a.id = m.author_id
"#;

/// Convert a database row to a Message
pub(crate) fn row_to_message(row: &rusqlite::Row) -> std::result::Result<Message, rusqlite::Error> {
    let content_json: String = row.get(4)?;
    let content = serde_json::from_str(&content_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Message {
        key: MessageId(row.get(0)?),
        author: Identity(row.get(1)?),
        sequence: row.get::<_, i64>(2)? as u64,
        content_type: row.get(3)?,
        content,
        claimed_at: row.get(5)?,
        received_at: row.get(6)?,
        hidden: row.get(7)?,
        decrypted: row.get(8)?,
        author_name: row.get(9)?,
        author_image: row.get(10)?,
    })
}

impl ViewStore {
    /// Get a message by key, hidden or not
    pub fn get(&self, key: &MessageId) -> Result<Message> {
        let conn = self.reader()?;
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m {MESSAGE_JOINS} WHERE k.key = ?");

        conn.query_row(&sql, [key.as_str()], row_to_message)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::UnknownMessage(key.clone()),
                other => StoreError::Database(other),
            })
    }

    /// Get a message by its interned key id
    pub fn get_by_reference(&self, msg_ref: i64) -> Result<Message> {
        let conn = self.reader()?;
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m {MESSAGE_JOINS} WHERE m.msg_id = ?");

        conn.query_row(&sql, [msg_ref], row_to_message)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::UnknownReferenceId(msg_ref),
                other => StoreError::Database(other),
            })
    }

    /// Get a message that must be a post
    pub fn get_post(&self, key: &MessageId) -> Result<Message> {
        let message = self.get(key)?;
        if message.content_type != "post" {
            return Err(StoreError::UnexpectedContentType {
                expected: "post".to_string(),
                found: message.content_type,
            });
        }
        Ok(message)
    }

    /// Visible messages of one author, newest sequence first
    pub fn messages_by_author(
        &self,
        author: &Identity,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        let conn = self.reader()?;
        let author_ref = require_author(&conn, author)?;

        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages m {MESSAGE_JOINS}
            WHERE m.author_id = ?1 AND m.hidden = 0
            ORDER BY m.sequence DESC
            LIMIT ?2 OFFSET ?3
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(
                params![author_ref, limit as i64, offset as i64],
                row_to_message,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Reconstruct the reply thread under `root`.
    ///
    /// Replies come oldest first; hidden and undecrypted replies are left out.
    /// A hidden root is reported as unknown.
    pub fn thread(&self, root: &MessageId) -> Result<Thread> {
        let root_message = self.get(root)?;
        if root_message.hidden {
            return Err(StoreError::UnknownMessage(root.clone()));
        }
        let conn = self.reader()?;
        let root_ref = key_id(&conn, root)?.ok_or_else(|| StoreError::UnknownMessage(root.clone()))?;

        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS}, t.id FROM messages m {MESSAGE_JOINS}
            JOIN tangles t ON t.msg_ref = m.msg_id
            JOIN posts p ON p.msg_ref = m.msg_id
            WHERE t.root = ?1 AND m.hidden = 0 AND m.is_decrypted = 1
            ORDER BY m.claimed_at ASC, m.id ASC
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([root_ref], |row| Ok((row_to_message(row)?, row.get::<_, i64>(11)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut messages = vec![root_message];
        let mut tangle_ids = vec![None];
        for (message, tangle_id) in rows {
            messages.push(message);
            tangle_ids.push(Some(tangle_id));
        }

        let position: HashMap<MessageId, usize> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| (m.key.clone(), i))
            .collect();

        let mut branch_stmt = conn.prepare(
            r#"
            SELECT k.key FROM branches b
            JOIN msgkeys k ON k.id = b.branch
            WHERE b.tangle_id = ?
            "#,
        )?;

        let mut branches = Vec::with_capacity(messages.len());
        for tangle_id in tangle_ids {
            let Some(tangle_id) = tangle_id else {
                branches.push(Vec::new());
                continue;
            };
            let mut parents: Vec<usize> = branch_stmt
                .query_map([tangle_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?
                .into_iter()
                .filter_map(|key| position.get(&MessageId(key)).copied())
                .collect();
            parents.sort_unstable();
            branches.push(parents);
        }

        Ok(Thread { messages, branches })
    }

    /// Visible messages tagged `hashtag`, newest first
    pub fn messages_by_hashtag(
        &self,
        hashtag: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        let name = normalize_tag(hashtag);
        let conn = self.reader()?;
        let chan_ref: i64 = conn
            .query_row("SELECT id FROM channels WHERE name = ?", [&name], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| StoreError::UnknownHashtag(name.clone()))?;

        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages m {MESSAGE_JOINS}
            JOIN channel_assignments ca ON ca.msg_ref = m.msg_id
            WHERE ca.chan_ref = ?1 AND m.hidden = 0
            ORDER BY m.claimed_at DESC, m.id DESC
            LIMIT ?2 OFFSET ?3
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params![chan_ref, limit as i64, offset as i64], row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Full-text search over post text, best match first
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<Message>> {
        let terms = fts_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.reader()?;
        let sql = format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM post_search
            JOIN messages m ON m.msg_id = post_search.rowid
            {MESSAGE_JOINS}
            WHERE post_search MATCH ?1 AND m.hidden = 0
            ORDER BY post_search.rank, m.claimed_at DESC
            LIMIT ?2
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params![terms, limit as i64], row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Record that the viewer has seen `key`
    pub fn mark_read(&self, key: &MessageId) -> Result<()> {
        let conn = self.writer()?;
        let msg_ref = key_id(&conn, key)?.ok_or_else(|| StoreError::UnknownMessage(key.clone()))?;
        conn.execute(
            "INSERT INTO read_messages (msg_ref, read_at) VALUES (?1, ?2) ON CONFLICT(msg_ref) DO NOTHING",
            params![msg_ref, ViewStore::now()],
        )?;
        Ok(())
    }

    pub fn is_read(&self, key: &MessageId) -> Result<bool> {
        let conn = self.reader()?;
        let read = conn.query_row(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM read_messages r JOIN msgkeys k ON k.id = r.msg_ref
                WHERE k.key = ?
            )
            "#,
            [key.as_str()],
            |row| row.get(0),
        )?;
        Ok(read)
    }
}

/// Quote each word so user input never reaches FTS5 as query syntax
fn fts_terms(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| format!("\"{}\"", word.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{RawMessage, compose};
    use crate::store::db::tests::test_store;
    use serde_json::{Value, json};

    fn alice() -> Identity {
        Identity::new("@alice.ed25519")
    }

    fn raw(seq: u64, content: Value, at: i64) -> RawMessage {
        compose(&alice(), seq, None, content, at)
    }

    #[test]
    fn test_get_unknown_message() {
        let (_dir, store) = test_store();
        let missing = MessageId::new("%missing.sha256");
        assert!(matches!(
            store.get(&missing),
            Err(StoreError::UnknownMessage(key)) if key == missing
        ));
        assert!(matches!(
            store.get_by_reference(9999),
            Err(StoreError::UnknownReferenceId(9999))
        ));
    }

    #[test]
    fn test_get_post_rejects_other_types() {
        let (_dir, store) = test_store();
        let contact = raw(
            1,
            json!({ "type": "contact", "contact": "@bob.ed25519", "following": true }),
            ViewStore::now() - 1000,
        );
        store.fill_messages(&[contact.clone()], false).expect("fill");
        assert!(matches!(
            store.get_post(&contact.key),
            Err(StoreError::UnexpectedContentType { .. })
        ));
    }

    #[test]
    fn test_thread_arena_edges() {
        let (_dir, store) = test_store();
        let base = ViewStore::now() - 10_000;
        let root = raw(1, json!({ "type": "post", "text": "root" }), base);
        let first = raw(
            2,
            json!({ "type": "post", "text": "first", "root": root.key, "branch": root.key }),
            base + 1,
        );
        let nested = raw(
            3,
            json!({ "type": "post", "text": "nested", "root": root.key, "branch": first.key }),
            base + 2,
        );
        store
            .fill_messages(&[root.clone(), first.clone(), nested], false)
            .expect("fill");

        let thread = store.thread(&root.key).expect("thread");
        assert_eq!(thread.messages.len(), 3);
        assert_eq!(thread.root().key, root.key);
        assert_eq!(thread.branches[1], vec![0]);
        assert_eq!(thread.branches[2], vec![1]);
        assert_eq!(thread.children(0), vec![1]);
        assert_eq!(thread.children(1), vec![2]);
    }

    #[test]
    fn test_hidden_root_has_no_thread() {
        let (_dir, store) = test_store();
        let base = ViewStore::now() - 10_000;
        let root = raw(1, json!({ "type": "post", "text": "root" }), base);
        let reply = raw(
            2,
            json!({ "type": "post", "text": "reply", "root": root.key, "branch": root.key }),
            base + 1,
        );
        store.fill_messages(&[root.clone(), reply], false).expect("fill");
        store.apply_bans(&[root.key.hashed()]).expect("ban");

        assert!(matches!(
            store.thread(&root.key),
            Err(StoreError::UnknownMessage(key)) if key == root.key
        ));
        store.apply_bans(&[]).expect("lift");
        assert_eq!(store.thread(&root.key).expect("thread").messages.len(), 2);
    }

    #[test]
    fn test_messages_by_author_and_hashtag() {
        let (_dir, store) = test_store();
        let base = ViewStore::now() - 10_000;
        let batch = vec![
            raw(1, json!({ "type": "post", "text": "one #Rust" }), base),
            raw(2, json!({ "type": "post", "text": "two" }), base + 1),
            raw(3, json!({ "type": "post", "text": "three #rust" }), base + 2),
        ];
        store.fill_messages(&batch, false).expect("fill");

        let by_author = store.messages_by_author(&alice(), 10, 0).expect("author");
        let sequences: Vec<_> = by_author.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![3, 2, 1]);

        let tagged = store.messages_by_hashtag("#RUST", 10, 0).expect("hashtag");
        assert_eq!(tagged.len(), 2);
        assert_eq!(tagged[0].text(), Some("three #rust"));

        assert!(matches!(
            store.messages_by_hashtag("nope", 10, 0),
            Err(StoreError::UnknownHashtag(_))
        ));
    }

    #[test]
    fn test_search_quotes_user_input() {
        let (_dir, store) = test_store();
        let post = raw(1, json!({ "type": "post", "text": "sqlite views are neat" }), ViewStore::now() - 1000);
        store.fill_messages(&[post], false).expect("fill");

        assert_eq!(store.search("views", 10).expect("search").len(), 1);
        assert!(store.search("\"unbalanced AND", 10).expect("search").is_empty());
        assert!(store.search("   ", 10).expect("search").is_empty());
    }

    #[test]
    fn test_mark_read() {
        let (_dir, store) = test_store();
        let post = raw(1, json!({ "type": "post", "text": "read me" }), ViewStore::now() - 1000);
        store.fill_messages(&[post.clone()], false).expect("fill");

        assert!(!store.is_read(&post.key).expect("is_read"));
        store.mark_read(&post.key).expect("mark");
        store.mark_read(&post.key).expect("mark twice");
        assert!(store.is_read(&post.key).expect("is_read"));
    }
}
