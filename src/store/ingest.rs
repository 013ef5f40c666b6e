// SPDX-License-Identifier: MPL-2.0

//! Projection of raw log messages into the view.
//!
//! A batch runs in one transaction with a savepoint per message, so a message
//! that fails halfway leaves nothing behind and the rest of the batch still
//! lands.

use crate::log::facets::{self, normalize_tag};
use crate::log::{
    About, Address, Contact, Content, Decoded, DropContentRequest, Identity, MentionKind,
    MessageId, Post, Pub, RawMessage, Vote,
};
use crate::store::db::{intern_author, intern_key, key_id};
use crate::store::{Result, StoreError, ViewStore, bans, is_constraint_violation, reports};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Aggregate outcome of one `fill_messages` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillReport {
    pub inserted: usize,
    /// Encrypted rows replaced in place by their decrypted form
    pub updated: usize,
    pub duplicates: usize,
    pub forks: usize,
    pub too_old: usize,
    pub invalid: usize,
    pub unsupported: usize,
    /// Messages skipped because they were deleted or retracted earlier
    pub tombstoned: usize,
    /// Drop-content requests honored
    pub retracted: usize,
    pub failed: usize,
    pub reports: usize,
}

impl FillReport {
    pub fn skipped(&self) -> usize {
        self.duplicates
            + self.forks
            + self.too_old
            + self.invalid
            + self.tombstoned
            + self.failed
    }

    pub fn merge(&mut self, other: &FillReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.duplicates += other.duplicates;
        self.forks += other.forks;
        self.too_old += other.too_old;
        self.invalid += other.invalid;
        self.unsupported += other.unsupported;
        self.tombstoned += other.tombstoned;
        self.retracted += other.retracted;
        self.failed += other.failed;
        self.reports += other.reports;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Inserted,
    Updated,
    Duplicate,
    Fork,
    TooOld,
    Invalid,
    Unsupported,
    Tombstoned,
}

/// A message whose content reached its projection tables
pub(crate) struct Projected {
    pub msg_ref: i64,
    pub author_id: i64,
    pub content: Content,
    pub created_at: i64,
}

struct Filled {
    outcome: Outcome,
    projected: Option<Projected>,
    retracted: bool,
}

impl Filled {
    fn skip(outcome: Outcome) -> Self {
        Self {
            outcome,
            projected: None,
            retracted: false,
        }
    }
}

struct FillContext<'a> {
    viewer: &'a Identity,
    now: i64,
    horizon: Option<i64>,
    banned: HashSet<String>,
    is_private: bool,
}

impl ViewStore {
    /// Ingest a batch of log messages, in order.
    ///
    /// Per-message failures are counted and skipped. `is_private` marks
    /// decrypted private-log messages: they bypass validity checks and
    /// replace an earlier encrypted row of the same key in place.
    pub fn fill_messages(&self, batch: &[RawMessage], is_private: bool) -> Result<FillReport> {
        let viewer = self.viewer()?;
        let now = ViewStore::now();
        let horizon = self
            .config()
            .retention
            .map(|r| now - r.as_millis() as i64);
        let faults = self.config().faults.clone();

        let mut conn = self.writer()?;
        let ctx = FillContext {
            viewer: &viewer,
            now,
            horizon,
            banned: banned_hashes(&conn)?,
            is_private,
        };

        let mut report = FillReport::default();
        let mut tx = conn.transaction()?;

        for raw in batch {
            let mut sp = tx.savepoint()?;
            let filled = match fill_one(&sp, raw, &ctx) {
                Ok(filled) => filled,
                Err(e) => {
                    debug!(key = %raw.key, error = %e, "message failed to ingest");
                    report.failed += 1;
                    // Dropping the savepoint rolls it back
                    continue;
                }
            };

            if let Some(projected) = &filled.projected {
                // A failed derivation rolls back its own rows and keeps the message
                let derived = sp.savepoint()?;
                match reports::derive(&derived, projected) {
                    Ok(count) => {
                        derived.commit()?;
                        report.reports += count;
                    }
                    Err(e) => faults.report("report derivation", &e),
                }
            }
            sp.commit()?;

            if filled.retracted {
                report.retracted += 1;
            }
            match filled.outcome {
                Outcome::Inserted => report.inserted += 1,
                Outcome::Updated => report.updated += 1,
                Outcome::Duplicate => report.duplicates += 1,
                Outcome::Fork => report.forks += 1,
                Outcome::TooOld => report.too_old += 1,
                Outcome::Invalid => report.invalid += 1,
                Outcome::Unsupported => report.unsupported += 1,
                Outcome::Tombstoned => report.tombstoned += 1,
            }
        }

        tx.commit()?;

        info!(
            batch = batch.len(),
            private = is_private,
            inserted = report.inserted,
            updated = report.updated,
            duplicates = report.duplicates,
            forks = report.forks,
            too_old = report.too_old,
            invalid = report.invalid,
            unsupported = report.unsupported,
            failed = report.failed,
            reports = report.reports,
            "filled messages"
        );

        Ok(report)
    }
}

fn banned_hashes(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT hash FROM banned_content")?;
    let hashes = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<HashSet<_>, _>>()?;
    Ok(hashes)
}

fn fill_one(conn: &Connection, raw: &RawMessage, ctx: &FillContext) -> Result<Filled> {
    let decoded = Content::decode(&raw.content);

    let received_at = raw
        .received_timestamp
        .map(|t| t as i64)
        .unwrap_or(ctx.now);
    let claimed_at = (raw.claimed_timestamp as i64).min(received_at);

    let exempt = raw.author == *ctx.viewer
        || matches!(&decoded, Decoded::Known(c) if c.is_exempt_from_retention());
    if let Some(horizon) = ctx.horizon {
        if claimed_at < horizon && !exempt {
            debug!(key = %raw.key, "skipping message past retention");
            return Ok(Filled::skip(Outcome::TooOld));
        }
    }

    let valid = match &decoded {
        Decoded::Known(content) => content.is_valid(),
        Decoded::Malformed { reason, .. } => {
            debug!(key = %raw.key, reason = %reason, "malformed content");
            false
        }
        Decoded::Encrypted | Decoded::Unsupported(_) => true,
    };
    if !valid && !ctx.is_private {
        return Ok(Filled::skip(Outcome::Invalid));
    }

    if is_tombstoned(conn, &raw.key)? {
        return Ok(Filled::skip(Outcome::Tombstoned));
    }

    let content_type = decoded.content_type();
    let decrypted = !matches!(decoded, Decoded::Encrypted);
    let content_json = serde_json::to_string(&raw.content)?;
    let msg_ref = intern_key(conn, &raw.key)?;
    let author_ref = intern_author(conn, &raw.author)?;

    let existing: Option<bool> = conn
        .query_row(
            "SELECT is_decrypted FROM messages WHERE msg_id = ?",
            [msg_ref],
            |row| row.get(0),
        )
        .optional()?;

    let outcome = match existing {
        Some(false) if ctx.is_private && decrypted => {
            conn.execute(
                r#"
                UPDATE messages
                SET type = ?1, content_json = ?2, is_decrypted = 1
                WHERE msg_id = ?3
                "#,
                params![content_type.as_str(), content_json, msg_ref],
            )?;
            Outcome::Updated
        }
        Some(_) => return Ok(Filled::skip(Outcome::Duplicate)),
        None => {
            let hidden = ctx.banned.contains(&raw.key.hashed())
                || ctx.banned.contains(&raw.author.hashed());
            let row = CoreRow {
                msg_ref,
                author_ref,
                content_type: content_type.as_str(),
                content_json: &content_json,
                claimed_at,
                received_at,
                hidden,
                decrypted,
            };
            match insert_core(conn, raw, &row) {
                Ok(()) => Outcome::Inserted,
                Err(StoreError::MessageConstraintViolation { author, sequence }) => {
                    let outcome = classify_collision(conn, raw, msg_ref, author_ref, ctx.now)?;
                    if outcome == Outcome::Fork {
                        warn!(author = %author, sequence, key = %raw.key, "feed fork");
                    }
                    return Ok(Filled::skip(outcome));
                }
                Err(e) => return Err(e),
            }
        }
    };

    let content = match decoded {
        Decoded::Known(content) if valid => content,
        Decoded::Unsupported(t) => {
            debug!(key = %raw.key, content_type = %t, "unsupported content type");
            return Ok(Filled::skip(Outcome::Unsupported));
        }
        // Ciphertext, or a private message we could not make sense of
        _ => return Ok(Filled::skip(outcome)),
    };

    let mut retracted = false;
    match &content {
        Content::Post(post) => fill_post(conn, msg_ref, post)?,
        Content::Contact(contact) => {
            fill_contact(conn, msg_ref, author_ref, raw.sequence, contact)?
        }
        Content::Vote(vote) => fill_vote(conn, msg_ref, vote)?,
        Content::About(about) => fill_about(conn, msg_ref, &raw.author, claimed_at, about)?,
        Content::Pub(p) => fill_pub(conn, msg_ref, p)?,
        Content::Address(address) => fill_address(conn, msg_ref, author_ref, address)?,
        Content::DropContentRequest(dcr) => {
            retracted = fill_drop_request(conn, author_ref, dcr)?;
        }
    }

    Ok(Filled {
        outcome,
        projected: Some(Projected {
            msg_ref,
            author_id: author_ref,
            content,
            created_at: claimed_at,
        }),
        retracted,
    })
}

struct CoreRow<'a> {
    msg_ref: i64,
    author_ref: i64,
    content_type: &'a str,
    content_json: &'a str,
    claimed_at: i64,
    received_at: i64,
    hidden: bool,
    decrypted: bool,
}

fn insert_core(conn: &Connection, raw: &RawMessage, row: &CoreRow) -> Result<()> {
    let result = conn.execute(
        r#"
        INSERT INTO messages (
            msg_id, author_id, sequence, rx_seq, type, content_json,
            claimed_at, received_at, hidden, is_decrypted
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            row.msg_ref,
            row.author_ref,
            raw.sequence as i64,
            raw.receive_seq,
            row.content_type,
            row.content_json,
            row.claimed_at,
            row.received_at,
            row.hidden,
            row.decrypted,
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(e) if is_constraint_violation(&e) => Err(StoreError::MessageConstraintViolation {
            author: raw.author.clone(),
            sequence: raw.sequence,
        }),
        Err(e) => Err(e.into()),
    }
}

/// Tell a repeated delivery from a second message claiming the same slot.
fn classify_collision(
    conn: &Connection,
    raw: &RawMessage,
    msg_ref: i64,
    author_ref: i64,
    now: i64,
) -> Result<Outcome> {
    let same_key: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM messages WHERE msg_id = ?)",
        [msg_ref],
        |row| row.get(0),
    )?;
    if same_key {
        return Ok(Outcome::Duplicate);
    }

    conn.execute(
        r#"
        INSERT INTO forks (key, author_id, sequence, seen_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(key) DO NOTHING
        "#,
        params![raw.key.as_str(), author_ref, raw.sequence as i64, now],
    )?;
    Ok(Outcome::Fork)
}

fn is_tombstoned(conn: &Connection, key: &MessageId) -> Result<bool> {
    let dropped: Option<bool> = conn
        .query_row(
            "SELECT dropped FROM msgkeys WHERE key = ?",
            [key.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(dropped.unwrap_or(false))
}

fn fill_post(conn: &Connection, msg_ref: i64, post: &Post) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO posts (msg_ref, text, is_root) VALUES (?1, ?2, ?3)
        ON CONFLICT(msg_ref) DO UPDATE SET
            text = excluded.text,
            is_root = excluded.is_root
        "#,
        params![msg_ref, post.text, post.is_root()],
    )?;

    conn.execute("DELETE FROM post_search WHERE rowid = ?", [msg_ref])?;
    conn.execute(
        "INSERT INTO post_search (rowid, text) VALUES (?1, ?2)",
        params![msg_ref, post.text],
    )?;

    if let Some(root) = &post.root {
        fill_tangle(conn, msg_ref, root, &post.branch)?;
    }

    let mut tags: Vec<String> = Vec::new();
    if let Some(channel) = &post.channel {
        tags.push(normalize_tag(channel));
    }

    for mention in &post.mentions {
        match mention.kind() {
            MentionKind::Feed => {
                let feed_id = intern_author(conn, &Identity::new(mention.link.clone()))?;
                conn.execute(
                    "INSERT OR IGNORE INTO mention_feed (msg_ref, feed_id, name) VALUES (?1, ?2, ?3)",
                    params![msg_ref, feed_id, mention.name],
                )?;
            }
            MentionKind::Message => {
                let link_id = intern_key(conn, &MessageId::new(mention.link.clone()))?;
                conn.execute(
                    "INSERT OR IGNORE INTO mention_message (msg_ref, link_id, name) VALUES (?1, ?2, ?3)",
                    params![msg_ref, link_id, mention.name],
                )?;
            }
            MentionKind::Blob => {
                conn.execute(
                    "INSERT OR IGNORE INTO mention_image (msg_ref, link, name) VALUES (?1, ?2, ?3)",
                    params![msg_ref, mention.link, mention.name],
                )?;
                conn.execute(
                    "INSERT OR IGNORE INTO post_blobs (msg_ref, identifier, name) VALUES (?1, ?2, ?3)",
                    params![msg_ref, mention.link, mention.name],
                )?;
            }
            MentionKind::Hashtag => tags.push(normalize_tag(&mention.link)),
            MentionKind::Other => {}
        }
    }

    for feed in facets::mentioned_feeds(&post.text) {
        let feed_id = intern_author(conn, &Identity::new(feed))?;
        conn.execute(
            "INSERT OR IGNORE INTO mention_feed (msg_ref, feed_id) VALUES (?1, ?2)",
            params![msg_ref, feed_id],
        )?;
    }

    tags.extend(facets::hashtags(&post.text));
    tags.retain(|t| !t.is_empty());
    tags.sort();
    tags.dedup();
    for tag in &tags {
        assign_hashtag(conn, msg_ref, tag)?;
    }

    Ok(())
}

fn assign_hashtag(conn: &Connection, msg_ref: i64, name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO channels (name) VALUES (?) ON CONFLICT(name) DO NOTHING",
        [name],
    )?;
    let chan_ref: i64 =
        conn.query_row("SELECT id FROM channels WHERE name = ?", [name], |row| {
            row.get(0)
        })?;
    conn.execute(
        "INSERT OR IGNORE INTO channel_assignments (msg_ref, chan_ref) VALUES (?1, ?2)",
        params![msg_ref, chan_ref],
    )?;
    Ok(())
}

fn fill_tangle(
    conn: &Connection,
    msg_ref: i64,
    root: &MessageId,
    branches: &[MessageId],
) -> Result<()> {
    let root_ref = intern_key(conn, root)?;
    conn.execute(
        "INSERT INTO tangles (msg_ref, root) VALUES (?1, ?2) ON CONFLICT(msg_ref) DO NOTHING",
        params![msg_ref, root_ref],
    )?;
    let tangle_id: i64 = conn.query_row(
        "SELECT id FROM tangles WHERE msg_ref = ?",
        [msg_ref],
        |row| row.get(0),
    )?;

    for branch in branches {
        let branch_ref = intern_key(conn, branch)?;
        conn.execute(
            "INSERT OR IGNORE INTO branches (tangle_id, branch) VALUES (?1, ?2)",
            params![tangle_id, branch_ref],
        )?;
    }
    Ok(())
}

fn fill_contact(
    conn: &Connection,
    msg_ref: i64,
    author_ref: i64,
    sequence: u64,
    contact: &Contact,
) -> Result<()> {
    let contact_ref = intern_author(conn, &contact.contact)?;

    // Only a later message from the same author replaces the edge
    conn.execute(
        r#"
        INSERT INTO contacts (msg_ref, author_id, contact_id, state, sequence)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(author_id, contact_id) DO UPDATE SET
            msg_ref = excluded.msg_ref,
            state = excluded.state,
            sequence = excluded.sequence
        WHERE excluded.sequence > contacts.sequence
        "#,
        params![
            msg_ref,
            author_ref,
            contact_ref,
            contact.state().as_i64(),
            sequence as i64
        ],
    )?;
    Ok(())
}

fn fill_vote(conn: &Connection, msg_ref: i64, vote: &Vote) -> Result<()> {
    let link_ref = intern_key(conn, &vote.vote.link)?;
    conn.execute(
        r#"
        INSERT INTO votes (msg_ref, link_id, value, expression) VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(msg_ref) DO NOTHING
        "#,
        params![msg_ref, link_ref, vote.vote.value, vote.vote.expression],
    )?;

    // A vote without thread pointers belongs to the thread of what it votes on
    let root = vote.root.as_ref().unwrap_or(&vote.vote.link);
    let branches = if vote.branch.is_empty() {
        std::slice::from_ref(&vote.vote.link)
    } else {
        vote.branch.as_slice()
    };
    fill_tangle(conn, msg_ref, root, branches)
}

fn fill_about(
    conn: &Connection,
    msg_ref: i64,
    author: &Identity,
    claimed_at: i64,
    about: &About,
) -> Result<()> {
    let Some(subject) = about.subject() else {
        // Descriptions of messages and blobs are not projected
        return Ok(());
    };
    let about_ref = intern_author(conn, &subject)?;

    conn.execute(
        r#"
        INSERT INTO abouts (msg_ref, about_id, name, image, description, public_web_hosting)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(msg_ref) DO NOTHING
        "#,
        params![
            msg_ref,
            about_ref,
            about.name,
            about.image,
            about.description,
            about.public_web_hosting
        ],
    )?;

    if subject == *author {
        conn.execute(
            r#"
            UPDATE authors SET
                name = COALESCE(?1, name),
                image = COALESCE(?2, image),
                description = COALESCE(?3, description),
                about_at = ?4
            WHERE id = ?5 AND about_at <= ?4
            "#,
            params![
                about.name,
                about.image,
                about.description,
                claimed_at,
                about_ref
            ],
        )?;
    }
    Ok(())
}

fn fill_pub(conn: &Connection, msg_ref: i64, p: &Pub) -> Result<()> {
    intern_author(conn, &p.address.key)?;
    conn.execute(
        r#"
        INSERT INTO pubs (msg_ref, host, port, key) VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(msg_ref) DO NOTHING
        "#,
        params![
            msg_ref,
            p.address.host,
            p.address.port,
            p.address.key.as_str()
        ],
    )?;
    Ok(())
}

fn fill_address(conn: &Connection, msg_ref: i64, author_ref: i64, address: &Address) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO addresses (msg_ref, about_id, address, availability)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(address) DO UPDATE SET
            msg_ref = excluded.msg_ref,
            about_id = excluded.about_id,
            availability = excluded.availability
        "#,
        params![msg_ref, author_ref, address.address, address.availability],
    )?;
    Ok(())
}

/// Honor a retraction only when it names one of its author's own messages
/// by both key and sequence.
fn fill_drop_request(conn: &Connection, author_ref: i64, dcr: &DropContentRequest) -> Result<bool> {
    let Some(target_ref) = key_id(conn, &dcr.hash)? else {
        debug!(target = %dcr.hash, "drop-content-request for unknown message");
        return Ok(false);
    };

    let target: Option<(i64, i64)> = conn
        .query_row(
            "SELECT author_id, sequence FROM messages WHERE msg_id = ?",
            [target_ref],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match target {
        Some((target_author, sequence))
            if target_author == author_ref && sequence == dcr.sequence as i64 =>
        {
            bans::purge_message(conn, target_ref)?;
            bans::tombstone(conn, target_ref)?;
            debug!(target = %dcr.hash, "honored drop-content-request");
            Ok(true)
        }
        _ => {
            debug!(target = %dcr.hash, sequence = dcr.sequence, "ignoring mismatched drop-content-request");
            Ok(false)
        }
    }
}
