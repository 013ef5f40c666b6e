// SPDX-License-Identifier: MPL-2.0

//! Social graph and directory reads: contacts, abouts, pubs, hashtags, forks.

use crate::log::{ContactState, Identity, MessageId};
use crate::store::db::require_author;
use crate::store::{Result, ViewStore};
use rusqlite::{OptionalExtension, params};

/// What an identity says about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AboutInfo {
    pub identity: Identity,
    pub name: Option<String>,
    pub image: Option<String>,
    pub description: Option<String>,
    pub public_web_hosting: Option<bool>,
}

/// An advertised rendezvous point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubInfo {
    pub host: String,
    pub port: u16,
    pub key: Identity,
    /// Who announced it
    pub announced_by: Identity,
}

/// A message that lost its `(author, sequence)` slot to another key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkRecord {
    pub key: MessageId,
    pub author: Identity,
    pub sequence: u64,
    pub seen_at: i64,
}

impl ViewStore {
    /// Self-description of `identity`, assembled from its latest self-authored abouts
    pub fn about(&self, identity: &Identity) -> Result<AboutInfo> {
        let conn = self.reader()?;
        let author_ref = require_author(&conn, identity)?;

        let (name, image, description): (Option<String>, Option<String>, Option<String>) = conn.query_row(
            "SELECT name, image, description FROM authors WHERE id = ?",
            [author_ref],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let public_web_hosting: Option<bool> = conn
            .query_row(
                r#"
                SELECT ab.public_web_hosting FROM abouts ab
                JOIN messages m ON m.msg_id = ab.msg_ref
                WHERE ab.about_id = ?1 AND m.author_id = ?1 AND ab.public_web_hosting IS NOT NULL
                ORDER BY m.claimed_at DESC
                LIMIT 1
                "#,
                [author_ref],
                |row| row.get(0),
            )
            .optional()?;

        Ok(AboutInfo {
            identity: identity.clone(),
            name,
            image,
            description,
            public_web_hosting,
        })
    }

    /// Identities `identity` currently follows
    pub fn follows(&self, identity: &Identity) -> Result<Vec<Identity>> {
        self.edges_from(identity, ContactState::Following)
    }

    /// Identities `identity` currently blocks
    pub fn blocks(&self, identity: &Identity) -> Result<Vec<Identity>> {
        self.edges_from(identity, ContactState::Blocking)
    }

    /// Identities currently following `identity`
    pub fn followers(&self, identity: &Identity) -> Result<Vec<Identity>> {
        let conn = self.reader()?;
        let author_ref = require_author(&conn, identity)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT a.author FROM contacts c
            JOIN authors a ON a.id = c.author_id
            WHERE c.contact_id = ?1 AND c.state = ?2
            ORDER BY a.author
            "#,
        )?;
        let identities = stmt
            .query_map(
                params![author_ref, ContactState::Following.as_i64()],
                |row| Ok(Identity(row.get(0)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(identities)
    }

    fn edges_from(&self, identity: &Identity, state: ContactState) -> Result<Vec<Identity>> {
        let conn = self.reader()?;
        let author_ref = require_author(&conn, identity)?;
        let mut stmt = conn.prepare(
            r#"
            SELECT a.author FROM contacts c
            JOIN authors a ON a.id = c.contact_id
            WHERE c.author_id = ?1 AND c.state = ?2
            ORDER BY a.author
            "#,
        )?;
        let identities = stmt
            .query_map(params![author_ref, state.as_i64()], |row| {
                Ok(Identity(row.get(0)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(identities)
    }

    /// Hashtags in use with their visible message counts, most used first
    pub fn hashtags(&self, limit: usize) -> Result<Vec<(String, i64)>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT c.name, COUNT(m.id) AS uses FROM channels c
            JOIN channel_assignments ca ON ca.chan_ref = c.id
            JOIN messages m ON m.msg_id = ca.msg_ref
            WHERE m.hidden = 0
            GROUP BY c.id
            ORDER BY uses DESC, c.name ASC
            LIMIT ?
            "#,
        )?;
        let tags = stmt
            .query_map([limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    /// Known pubs, newest announcement first, one entry per key
    pub fn pubs(&self) -> Result<Vec<PubInfo>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT p.host, p.port, p.key, a.author FROM pubs p
            JOIN messages m ON m.msg_id = p.msg_ref
            JOIN authors a ON a.id = m.author_id
            WHERE m.hidden = 0
            ORDER BY m.claimed_at DESC, m.id DESC
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PubInfo {
                    host: row.get(0)?,
                    port: row.get(1)?,
                    key: Identity(row.get(2)?),
                    announced_by: Identity(row.get(3)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut pubs: Vec<PubInfo> = Vec::new();
        for info in rows {
            if !pubs.iter().any(|p| p.key == info.key) {
                pubs.push(info);
            }
        }
        Ok(pubs)
    }

    /// Whether any pub announcement advertises `identity`
    pub fn is_pub(&self, identity: &Identity) -> Result<bool> {
        let conn = self.reader()?;
        let known = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM pubs WHERE key = ?)",
            [identity.as_str()],
            |row| row.get(0),
        )?;
        Ok(known)
    }

    /// Forked messages recorded for `author`
    pub fn forks(&self, author: &Identity) -> Result<Vec<ForkRecord>> {
        let conn = self.reader()?;
        let author_ref = require_author(&conn, author)?;
        let mut stmt = conn.prepare(
            "SELECT key, sequence, seen_at FROM forks WHERE author_id = ? ORDER BY sequence",
        )?;
        let forks = stmt
            .query_map([author_ref], |row| {
                Ok(ForkRecord {
                    key: MessageId(row.get(0)?),
                    author: author.clone(),
                    sequence: row.get::<_, i64>(1)? as u64,
                    seen_at: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(forks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{RawMessage, compose};
    use crate::store::StoreError;
    use crate::store::db::tests::test_store;
    use serde_json::{Value, json};

    fn id(name: &str) -> Identity {
        Identity::new(format!("@{name}.ed25519"))
    }

    fn raw(author: &str, seq: u64, content: Value) -> RawMessage {
        compose(&id(author), seq, None, content, ViewStore::now() - 10_000 + seq as i64)
    }

    fn contact(target: &str, following: bool, blocking: bool) -> Value {
        json!({
            "type": "contact",
            "contact": id(target),
            "following": following,
            "blocking": blocking
        })
    }

    #[test]
    fn test_follow_graph() {
        let (_dir, store) = test_store();
        let batch = vec![
            raw("alice", 1, contact("bob", true, false)),
            raw("alice", 2, contact("carol", true, false)),
            raw("alice", 3, contact("dave", false, true)),
            raw("bob", 1, contact("carol", true, false)),
            raw("alice", 4, contact("carol", false, false)),
        ];
        store.fill_messages(&batch, false).expect("fill");

        assert_eq!(store.follows(&id("alice")).expect("follows"), vec![id("bob")]);
        assert_eq!(store.blocks(&id("alice")).expect("blocks"), vec![id("dave")]);
        assert_eq!(store.followers(&id("carol")).expect("followers"), vec![id("bob")]);
        assert!(matches!(
            store.follows(&id("nobody")),
            Err(StoreError::UnknownAuthor(_))
        ));
    }

    #[test]
    fn test_about_merges_self_description() {
        let (_dir, store) = test_store();
        let batch = vec![
            raw(
                "alice",
                1,
                json!({ "type": "about", "about": id("alice"), "name": "Alice", "publicWebHosting": true }),
            ),
            raw(
                "alice",
                2,
                json!({ "type": "about", "about": id("alice"), "description": "hi there" }),
            ),
        ];
        store.fill_messages(&batch, false).expect("fill");

        let about = store.about(&id("alice")).expect("about");
        assert_eq!(about.name.as_deref(), Some("Alice"));
        assert_eq!(about.description.as_deref(), Some("hi there"));
        assert_eq!(about.public_web_hosting, Some(true));
    }

    #[test]
    fn test_pubs_and_forks() {
        let (_dir, store) = test_store();
        let announce = json!({
            "type": "pub",
            "address": { "host": "pub.example", "port": 8008, "key": id("pub") }
        });
        let batch = vec![
            raw("alice", 1, announce.clone()),
            raw("bob", 1, announce),
            raw("bob", 2, json!({ "type": "post", "text": "one" })),
            raw("bob", 2, json!({ "type": "post", "text": "two" })),
        ];
        store.fill_messages(&batch, false).expect("fill");

        let pubs = store.pubs().expect("pubs");
        assert_eq!(pubs.len(), 1);
        assert_eq!(pubs[0].port, 8008);
        assert!(store.is_pub(&id("pub")).expect("is_pub"));
        assert!(!store.is_pub(&id("alice")).expect("is_pub"));

        let forks = store.forks(&id("bob")).expect("forks");
        assert_eq!(forks.len(), 1);
        assert_eq!(forks[0].sequence, 2);
    }

    #[test]
    fn test_hashtag_counts() {
        let (_dir, store) = test_store();
        let batch = vec![
            raw("alice", 1, json!({ "type": "post", "text": "#rust #sqlite" })),
            raw("alice", 2, json!({ "type": "post", "text": "more #rust" })),
        ];
        store.fill_messages(&batch, false).expect("fill");

        let tags = store.hashtags(10).expect("hashtags");
        assert_eq!(tags[0], ("rust".to_string(), 2));
        assert_eq!(tags[1], ("sqlite".to_string(), 1));
    }
}
