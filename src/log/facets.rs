// SPDX-License-Identifier: MPL-2.0

//! Inline facet detection for post text.
//!
//! Finds links, feed mentions (`@<base64 key>.ed25519`) and hashtags (`#tag`)
//! in post text with their UTF-8 byte offsets. Hashtags found here are
//! assigned to the post alongside the explicit `channel` and `#` mentions.

use regex::Regex;
use std::sync::LazyLock;

/// A detected span in the post text.
#[derive(Debug, Clone, PartialEq)]
pub enum Facet {
    Link {
        byte_start: usize,
        byte_end: usize,
        uri: String,
    },
    Mention {
        byte_start: usize,
        byte_end: usize,
        feed: String,
    },
    Tag {
        byte_start: usize,
        byte_end: usize,
        tag: String,
    },
}

impl Facet {
    fn byte_range(&self) -> (usize, usize) {
        match self {
            Facet::Link {
                byte_start,
                byte_end,
                ..
            } => (*byte_start, *byte_end),
            Facet::Mention {
                byte_start,
                byte_end,
                ..
            } => (*byte_start, *byte_end),
            Facet::Tag {
                byte_start,
                byte_end,
                ..
            } => (*byte_start, *byte_end),
        }
    }
}

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[^\s<>\[\]\{}|\\^`\x00-\x1f\x7f]+").expect("url regex")
});

static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(@[A-Za-z0-9+/]{43}=\.ed25519)").expect("mention regex")
});

static HASHTAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s\(\[])#([\p{L}][\p{L}\p{N}_-]*)").expect("hashtag regex")
});

fn overlaps(byte_start: usize, byte_end: usize, existing: &[Facet]) -> bool {
    existing.iter().any(|f| {
        let (fs, fe) = f.byte_range();
        byte_start < fe && byte_end > fs
    })
}

/// Trim trailing punctuation that is likely sentence-ending, not part of the URL.
fn trim_url_trailing(url: &str) -> &str {
    url.trim_end_matches(|c| matches!(c, '.' | ',' | ';' | '!' | '?' | ')'))
}

/// Normalize a hashtag name: no leading `#`, lowercase.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_lowercase()
}

/// Parse all facets from post text.
///
/// Detection order (for overlap prevention):
/// 1. URLs
/// 2. Mentions (skipped inside a URL)
/// 3. Hashtags (skipped inside a URL or mention)
pub fn parse_facets(text: &str) -> Vec<Facet> {
    let mut facets = Vec::new();

    for m in URL_RE.find_iter(text) {
        let trimmed = trim_url_trailing(m.as_str());
        facets.push(Facet::Link {
            byte_start: m.start(),
            byte_end: m.start() + trimmed.len(),
            uri: trimmed.to_string(),
        });
    }

    for caps in MENTION_RE.captures_iter(text) {
        let Some(feed) = caps.get(1) else { continue };
        if !overlaps(feed.start(), feed.end(), &facets) {
            facets.push(Facet::Mention {
                byte_start: feed.start(),
                byte_end: feed.end(),
                feed: feed.as_str().to_string(),
            });
        }
    }

    // The regex captures a leading boundary; locate the '#' inside the match.
    for caps in HASHTAG_RE.captures_iter(text) {
        let (Some(full), Some(tag)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let hash_offset = text[full.start()..].find('#').unwrap_or(0);
        let byte_start = full.start() + hash_offset;
        let byte_end = tag.end();

        if !overlaps(byte_start, byte_end, &facets) {
            facets.push(Facet::Tag {
                byte_start,
                byte_end,
                tag: normalize_tag(tag.as_str()),
            });
        }
    }

    facets
}

/// Distinct normalized hashtags in text, in order of appearance.
pub fn hashtags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for facet in parse_facets(text) {
        if let Facet::Tag { tag, .. } = facet {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    tags
}

/// Distinct feed identities mentioned inline in text.
pub fn mentioned_feeds(text: &str) -> Vec<String> {
    let mut feeds: Vec<String> = Vec::new();
    for facet in parse_facets(text) {
        if let Facet::Mention { feed, .. } = facet {
            if !feeds.contains(&feed) {
                feeds.push(feed);
            }
        }
    }
    feeds
}
