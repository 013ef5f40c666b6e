// SPDX-License-Identifier: MPL-2.0

//! Notifications derived once, at ingestion.

use crate::log::{Content, Identity, MessageId};
use crate::store::db::require_author;
use crate::store::ingest::Projected;
use crate::store::{Result, ViewStore};
use rusqlite::{Connection, params};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    FeedFollowed,
    PostReplied,
    FeedMentioned,
    MessageLiked,
}

impl ReportKind {
    pub fn as_i64(self) -> i64 {
        match self {
            ReportKind::FeedFollowed => 1,
            ReportKind::PostReplied => 2,
            ReportKind::FeedMentioned => 3,
            ReportKind::MessageLiked => 4,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(ReportKind::FeedFollowed),
            2 => Some(ReportKind::PostReplied),
            3 => Some(ReportKind::FeedMentioned),
            4 => Some(ReportKind::MessageLiked),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReportKind::FeedFollowed => "followed you",
            ReportKind::PostReplied => "replied to your post",
            ReportKind::FeedMentioned => "mentioned you",
            ReportKind::MessageLiked => "liked your message",
        }
    }
}

/// A notification addressed to one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub kind: ReportKind,
    /// The message that caused it
    pub key: MessageId,
    /// Author of that message
    pub by: Identity,
    pub created_at: i64,
}

/// Append the reports a freshly projected message gives rise to.
///
/// Returns how many new rows were written; a report that already exists is
/// left untouched.
pub(crate) fn derive(conn: &Connection, projected: &Projected) -> Result<usize> {
    let Projected {
        msg_ref,
        author_id,
        content,
        created_at,
    } = projected;

    let written = match content {
        Content::Contact(contact) if contact.following == Some(true) && contact.blocking != Some(true) => {
            conn.execute(
                r#"
                INSERT OR IGNORE INTO reports (msg_ref, author_id, kind, created_at)
                SELECT ?1, a.id, ?2, ?3 FROM authors a
                WHERE a.author = ?4 AND a.id != ?5
                "#,
                params![
                    msg_ref,
                    ReportKind::FeedFollowed.as_i64(),
                    created_at,
                    contact.contact.as_str(),
                    author_id
                ],
            )?
        }
        Content::Post(post) => {
            let mut written = 0;
            if let Some(root) = &post.root {
                written += conn.execute(
                    r#"
                    INSERT OR IGNORE INTO reports (msg_ref, author_id, kind, created_at)
                    SELECT ?1, m.author_id, ?2, ?3 FROM messages m
                    JOIN msgkeys k ON k.id = m.msg_id
                    WHERE k.key = ?4 AND m.author_id != ?5
                    "#,
                    params![
                        msg_ref,
                        ReportKind::PostReplied.as_i64(),
                        created_at,
                        root.as_str(),
                        author_id
                    ],
                )?;
            }
            written += conn.execute(
                r#"
                INSERT OR IGNORE INTO reports (msg_ref, author_id, kind, created_at)
                SELECT ?1, feed_id, ?2, ?3 FROM mention_feed
                WHERE msg_ref = ?1 AND feed_id != ?4
                "#,
                params![
                    msg_ref,
                    ReportKind::FeedMentioned.as_i64(),
                    created_at,
                    author_id
                ],
            )?;
            written
        }
        Content::Vote(vote) if vote.vote.value == 1 => conn.execute(
            r#"
            INSERT OR IGNORE INTO reports (msg_ref, author_id, kind, created_at)
            SELECT ?1, m.author_id, ?2, ?3 FROM messages m
            JOIN msgkeys k ON k.id = m.msg_id
            WHERE k.key = ?4 AND m.author_id != ?5
            "#,
            params![
                msg_ref,
                ReportKind::MessageLiked.as_i64(),
                created_at,
                vote.vote.link.as_str(),
                author_id
            ],
        )?,
        _ => 0,
    };

    Ok(written)
}

impl ViewStore {
    /// Reports addressed to `identity`, newest first
    pub fn reports(&self, identity: &Identity, limit: usize, offset: usize) -> Result<Vec<Report>> {
        let conn = self.reader()?;
        let target = require_author(&conn, identity)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT r.kind, k.key, a.author, r.created_at
            FROM reports r
            JOIN msgkeys k ON k.id = r.msg_ref
            JOIN messages m ON m.msg_id = r.msg_ref
            JOIN authors a ON a.id = m.author_id
            WHERE r.author_id = ?1 AND m.hidden = 0
            ORDER BY r.created_at DESC, r.id DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;

        let rows = stmt.query_map(params![target, limit as i64, offset as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut reports = Vec::new();
        for row in rows {
            let (kind, key, by, created_at) = row?;
            // Kinds this build does not know are skipped
            let Some(kind) = ReportKind::from_i64(kind) else {
                continue;
            };
            reports.push(Report {
                kind,
                key: MessageId(key),
                by: Identity(by),
                created_at,
            });
        }
        Ok(reports)
    }

    pub fn count_reports(&self, identity: &Identity) -> Result<i64> {
        let conn = self.reader()?;
        let target = require_author(&conn, identity)?;
        let count = conn.query_row(
            r#"
            SELECT COUNT(*) FROM reports r
            JOIN messages m ON m.msg_id = r.msg_ref
            WHERE r.author_id = ? AND m.hidden = 0
            "#,
            [target],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{RawMessage, compose};
    use crate::store::db::tests::test_store;
    use serde_json::{Value, json};

    fn viewer() -> Identity {
        Identity::new("@viewer.ed25519")
    }

    fn alice() -> Identity {
        Identity::new("@alice.ed25519")
    }

    fn raw(author: &Identity, seq: u64, content: Value, at: i64) -> RawMessage {
        compose(author, seq, None, content, at)
    }

    #[test]
    fn test_reports_for_follow_reply_mention_like() {
        let (_dir, store) = test_store();
        let base = ViewStore::now() - 60_000;
        let mine = raw(&viewer(), 1, json!({ "type": "post", "text": "hello" }), base);
        let batch = vec![
            mine.clone(),
            raw(
                &alice(),
                1,
                json!({ "type": "contact", "contact": "@viewer.ed25519", "following": true }),
                base + 1,
            ),
            raw(
                &alice(),
                2,
                json!({ "type": "post", "text": "reply", "root": mine.key, "branch": mine.key }),
                base + 2,
            ),
            raw(
                &alice(),
                3,
                json!({ "type": "post", "text": "hey", "mentions": [{ "link": "@viewer.ed25519" }] }),
                base + 3,
            ),
            raw(
                &alice(),
                4,
                json!({ "type": "vote", "vote": { "link": mine.key, "value": 1 } }),
                base + 4,
            ),
        ];

        let report = store.fill_messages(&batch, false).expect("fill");
        assert_eq!(report.reports, 4);

        let reports = store.reports(&viewer(), 10, 0).expect("reports");
        let kinds: Vec<_> = reports.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ReportKind::MessageLiked,
                ReportKind::FeedMentioned,
                ReportKind::PostReplied,
                ReportKind::FeedFollowed,
            ]
        );
        assert!(reports.iter().all(|r| r.by == alice()));
        assert_eq!(store.count_reports(&viewer()).expect("count"), 4);
    }

    #[test]
    fn test_failed_derivation_writes_no_reports() {
        let (_dir, store) = test_store();
        store
            .writer()
            .expect("writer")
            .execute_batch(
                "CREATE TEMP TRIGGER no_mentions BEFORE INSERT ON reports WHEN NEW.kind = 3
                 BEGIN SELECT RAISE(ABORT, 'mentions disabled'); END;",
            )
            .expect("trigger");

        let base = ViewStore::now() - 60_000;
        let mine = raw(&viewer(), 1, json!({ "type": "post", "text": "hello" }), base);
        let reply = raw(
            &alice(),
            1,
            json!({
                "type": "post",
                "text": "reply",
                "root": mine.key,
                "branch": mine.key,
                "mentions": [{ "link": "@viewer.ed25519" }]
            }),
            base + 1,
        );

        let report = store.fill_messages(&[mine, reply.clone()], false).expect("fill");
        assert_eq!(report.inserted, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.reports, 0);
        assert_eq!(store.count_reports(&viewer()).expect("count"), 0);
        assert!(store.get(&reply.key).is_ok());
    }

    #[test]
    fn test_self_actions_do_not_report() {
        let (_dir, store) = test_store();
        let now = ViewStore::now() - 1000;
        let mine = raw(&viewer(), 1, json!({ "type": "post", "text": "hello" }), now);
        let batch = vec![
            mine.clone(),
            raw(
                &viewer(),
                2,
                json!({ "type": "vote", "vote": { "link": mine.key, "value": 1 } }),
                now,
            ),
            raw(
                &viewer(),
                3,
                json!({ "type": "post", "text": "me again", "root": mine.key }),
                now,
            ),
        ];

        store.fill_messages(&batch, false).expect("fill");
        assert_eq!(store.count_reports(&viewer()).expect("count"), 0);
    }

    #[test]
    fn test_reply_to_unknown_root_reports_nothing() {
        let (_dir, store) = test_store();
        let reply = raw(
            &alice(),
            1,
            json!({ "type": "post", "text": "re", "root": "%missing.sha256" }),
            ViewStore::now() - 1000,
        );
        let report = store.fill_messages(&[reply], false).expect("fill");
        assert_eq!(report.inserted, 1);
        assert_eq!(report.reports, 0);
    }

    #[test]
    fn test_unknown_identity_has_no_reports() {
        let (_dir, store) = test_store();
        let missing = store.reports(&Identity::new("@nobody.ed25519"), 10, 0);
        assert!(matches!(
            missing,
            Err(crate::store::StoreError::UnknownAuthor(_))
        ));
    }
}
