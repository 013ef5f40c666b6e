// SPDX-License-Identifier: MPL-2.0

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 3;

/// Oldest version that can be migrated in place; anything older is rebuilt
pub const MIN_MIGRATABLE_VERSION: u32 = 2;

/// Every table the schema owns, in drop order
pub const TABLES: &[&str] = &[
    "post_search",
    "read_messages",
    "reports",
    "channel_assignments",
    "channels",
    "addresses",
    "pubs",
    "abouts",
    "votes",
    "contacts",
    "mention_image",
    "mention_message",
    "mention_feed",
    "post_blobs",
    "branches",
    "tangles",
    "posts",
    "forks",
    "banned_content",
    "sync_state",
    "messages",
    "msgkeys",
    "authors",
];

/// SQL schema for the view database
pub const SCHEMA: &str = r#"
-- authors: interned feed identities plus self-declared display data
CREATE TABLE IF NOT EXISTS authors (
    id INTEGER PRIMARY KEY,
    author TEXT NOT NULL UNIQUE,
    hashed TEXT NOT NULL,
    name TEXT,
    image TEXT,
    description TEXT,
    about_at INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_authors_hashed ON authors(hashed);

-- msgkeys: interned message keys, referenced before or after the message arrives
CREATE TABLE IF NOT EXISTS msgkeys (
    id INTEGER PRIMARY KEY,
    key TEXT NOT NULL UNIQUE,
    hashed TEXT NOT NULL,
    dropped INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_msgkeys_hashed ON msgkeys(hashed);

-- messages: one core row per ingested message; id is the insertion sequence
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    msg_id INTEGER NOT NULL UNIQUE REFERENCES msgkeys(id),
    author_id INTEGER NOT NULL REFERENCES authors(id),
    sequence INTEGER NOT NULL,
    rx_seq INTEGER,
    type TEXT NOT NULL,
    content_json TEXT NOT NULL,
    claimed_at INTEGER NOT NULL,
    received_at INTEGER NOT NULL,
    hidden INTEGER NOT NULL DEFAULT 0,
    is_decrypted INTEGER NOT NULL DEFAULT 1,
    UNIQUE(author_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_messages_author ON messages(author_id, sequence);
CREATE INDEX IF NOT EXISTS idx_messages_type_claimed ON messages(type, claimed_at DESC);
CREATE INDEX IF NOT EXISTS idx_messages_rx ON messages(rx_seq);

-- posts
CREATE TABLE IF NOT EXISTS posts (
    msg_ref INTEGER PRIMARY KEY REFERENCES msgkeys(id),
    text TEXT NOT NULL,
    is_root INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_root ON posts(is_root);

CREATE VIRTUAL TABLE IF NOT EXISTS post_search USING fts5(text);

CREATE TABLE IF NOT EXISTS post_blobs (
    msg_ref INTEGER NOT NULL REFERENCES msgkeys(id),
    identifier TEXT NOT NULL,
    name TEXT,
    UNIQUE(msg_ref, identifier)
);

-- tangles: thread edges, root plus direct parents
CREATE TABLE IF NOT EXISTS tangles (
    id INTEGER PRIMARY KEY,
    msg_ref INTEGER NOT NULL UNIQUE REFERENCES msgkeys(id),
    root INTEGER NOT NULL REFERENCES msgkeys(id)
);

CREATE INDEX IF NOT EXISTS idx_tangles_root ON tangles(root);

CREATE TABLE IF NOT EXISTS branches (
    tangle_id INTEGER NOT NULL REFERENCES tangles(id),
    branch INTEGER NOT NULL REFERENCES msgkeys(id),
    UNIQUE(tangle_id, branch)
);

-- mentions
CREATE TABLE IF NOT EXISTS mention_feed (
    msg_ref INTEGER NOT NULL REFERENCES msgkeys(id),
    feed_id INTEGER NOT NULL REFERENCES authors(id),
    name TEXT,
    UNIQUE(msg_ref, feed_id)
);

CREATE INDEX IF NOT EXISTS idx_mention_feed_feed ON mention_feed(feed_id);

CREATE TABLE IF NOT EXISTS mention_message (
    msg_ref INTEGER NOT NULL REFERENCES msgkeys(id),
    link_id INTEGER NOT NULL REFERENCES msgkeys(id),
    name TEXT,
    UNIQUE(msg_ref, link_id)
);

CREATE TABLE IF NOT EXISTS mention_image (
    msg_ref INTEGER NOT NULL REFERENCES msgkeys(id),
    link TEXT NOT NULL,
    name TEXT,
    UNIQUE(msg_ref, link)
);

-- contacts: exactly one current-state row per (author, contact)
CREATE TABLE IF NOT EXISTS contacts (
    msg_ref INTEGER NOT NULL REFERENCES msgkeys(id),
    author_id INTEGER NOT NULL REFERENCES authors(id),
    contact_id INTEGER NOT NULL REFERENCES authors(id),
    state INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    UNIQUE(author_id, contact_id)
);

CREATE INDEX IF NOT EXISTS idx_contacts_contact ON contacts(contact_id, state);
CREATE INDEX IF NOT EXISTS idx_contacts_msg ON contacts(msg_ref);

CREATE TABLE IF NOT EXISTS votes (
    msg_ref INTEGER PRIMARY KEY REFERENCES msgkeys(id),
    link_id INTEGER NOT NULL REFERENCES msgkeys(id),
    value INTEGER NOT NULL,
    expression TEXT
);

CREATE INDEX IF NOT EXISTS idx_votes_link ON votes(link_id);

CREATE TABLE IF NOT EXISTS abouts (
    msg_ref INTEGER PRIMARY KEY REFERENCES msgkeys(id),
    about_id INTEGER NOT NULL REFERENCES authors(id),
    name TEXT,
    image TEXT,
    description TEXT,
    public_web_hosting INTEGER
);

CREATE INDEX IF NOT EXISTS idx_abouts_about ON abouts(about_id);

CREATE TABLE IF NOT EXISTS pubs (
    msg_ref INTEGER PRIMARY KEY REFERENCES msgkeys(id),
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    key TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pubs_key ON pubs(key);

CREATE TABLE IF NOT EXISTS addresses (
    msg_ref INTEGER NOT NULL REFERENCES msgkeys(id),
    about_id INTEGER NOT NULL REFERENCES authors(id),
    address TEXT NOT NULL UNIQUE,
    availability REAL
);

-- channels: interned hashtags and their assignment to messages
CREATE TABLE IF NOT EXISTS channels (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS channel_assignments (
    msg_ref INTEGER NOT NULL REFERENCES msgkeys(id),
    chan_ref INTEGER NOT NULL REFERENCES channels(id),
    UNIQUE(msg_ref, chan_ref)
);

CREATE INDEX IF NOT EXISTS idx_channel_assignments_chan ON channel_assignments(chan_ref);

-- reports: append-only notifications derived at ingestion
CREATE TABLE IF NOT EXISTS reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    msg_ref INTEGER NOT NULL REFERENCES msgkeys(id),
    author_id INTEGER NOT NULL REFERENCES authors(id),
    kind INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE(msg_ref, author_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_reports_author ON reports(author_id, created_at DESC);

CREATE TABLE IF NOT EXISTS read_messages (
    msg_ref INTEGER PRIMARY KEY REFERENCES msgkeys(id),
    read_at INTEGER NOT NULL
);

-- banned_content: hashed identifiers of the currently applied ban list
CREATE TABLE IF NOT EXISTS banned_content (
    hash TEXT PRIMARY KEY
);

-- forks: key-distinct messages that collided on (author, sequence)
CREATE TABLE IF NOT EXISTS forks (
    key TEXT PRIMARY KEY,
    author_id INTEGER NOT NULL REFERENCES authors(id),
    sequence INTEGER NOT NULL,
    seen_at INTEGER NOT NULL
);

-- sync_state: log cursors
CREATE TABLE IF NOT EXISTS sync_state (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
"#;
