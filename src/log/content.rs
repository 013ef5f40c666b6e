// SPDX-License-Identifier: MPL-2.0

//! Typed message content.
//!
//! Content arrives as loosely-shaped JSON written by many different clients,
//! so decoding is lenient where the ecosystem is known to vary (`branch` as a
//! string or a list, `image` as a string or a link object, votes as numbers
//! or booleans) and strict about the fields a projection needs.

use crate::log::types::{Identity, MessageId};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Discriminant stored in the `messages.type` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    Post,
    Contact,
    Vote,
    About,
    Pub,
    Address,
    DropContentRequest,
    Encrypted,
    Unsupported(String),
}

impl ContentType {
    pub fn as_str(&self) -> &str {
        match self {
            ContentType::Post => "post",
            ContentType::Contact => "contact",
            ContentType::Vote => "vote",
            ContentType::About => "about",
            ContentType::Pub => "pub",
            ContentType::Address => "address",
            ContentType::DropContentRequest => "drop-content-request",
            ContentType::Encrypted => "encrypted",
            ContentType::Unsupported(t) => t.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    #[serde(rename = "post")]
    Post(Post),
    #[serde(rename = "contact")]
    Contact(Contact),
    #[serde(rename = "vote")]
    Vote(Vote),
    #[serde(rename = "about")]
    About(About),
    #[serde(rename = "pub")]
    Pub(Pub),
    #[serde(rename = "address")]
    Address(Address),
    #[serde(rename = "drop-content-request")]
    DropContentRequest(DropContentRequest),
}

/// Result of looking at raw content.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Known(Content),
    /// Boxed ciphertext we cannot read (yet)
    Encrypted,
    /// An object whose `type` we do not project
    Unsupported(String),
    /// A known type that did not decode
    Malformed { content_type: String, reason: String },
}

impl Decoded {
    pub fn content_type(&self) -> ContentType {
        match self {
            Decoded::Known(c) => c.content_type(),
            Decoded::Encrypted => ContentType::Encrypted,
            Decoded::Unsupported(t) => ContentType::Unsupported(t.clone()),
            Decoded::Malformed { content_type, .. } => match content_type.as_str() {
                "post" => ContentType::Post,
                "contact" => ContentType::Contact,
                "vote" => ContentType::Vote,
                "about" => ContentType::About,
                "pub" => ContentType::Pub,
                "address" => ContentType::Address,
                "drop-content-request" => ContentType::DropContentRequest,
                other => ContentType::Unsupported(other.to_string()),
            },
        }
    }
}

const KNOWN_TYPES: &[&str] = &[
    "post",
    "contact",
    "vote",
    "about",
    "pub",
    "address",
    "drop-content-request",
];

impl Content {
    pub fn decode(value: &Value) -> Decoded {
        let object = match value {
            Value::String(_) => return Decoded::Encrypted,
            Value::Object(map) => map,
            _ => {
                return Decoded::Malformed {
                    content_type: String::new(),
                    reason: "content is neither an object nor ciphertext".to_string(),
                };
            }
        };

        let Some(content_type) = object.get("type").and_then(Value::as_str) else {
            return Decoded::Malformed {
                content_type: String::new(),
                reason: "missing type".to_string(),
            };
        };

        if !KNOWN_TYPES.contains(&content_type) {
            return Decoded::Unsupported(content_type.to_string());
        }

        match serde_json::from_value::<Content>(value.clone()) {
            Ok(content) => Decoded::Known(content),
            Err(e) => Decoded::Malformed {
                content_type: content_type.to_string(),
                reason: e.to_string(),
            },
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            Content::Post(_) => ContentType::Post,
            Content::Contact(_) => ContentType::Contact,
            Content::Vote(_) => ContentType::Vote,
            Content::About(_) => ContentType::About,
            Content::Pub(_) => ContentType::Pub,
            Content::Address(_) => ContentType::Address,
            Content::DropContentRequest(_) => ContentType::DropContentRequest,
        }
    }

    /// Basic semantic checks beyond what decoding enforces
    pub fn is_valid(&self) -> bool {
        match self {
            Content::Post(p) => !p.text.trim().is_empty() || !p.mentions.is_empty(),
            Content::Contact(c) => c.contact.is_valid(),
            Content::Vote(v) => v.vote.link.is_valid(),
            Content::About(a) => !a.about.is_empty(),
            Content::Pub(p) => {
                !p.address.host.is_empty() && p.address.port != 0 && p.address.key.is_valid()
            }
            Content::Address(a) => !a.address.is_empty(),
            Content::DropContentRequest(d) => d.hash.is_valid() && d.sequence > 0,
        }
    }

    /// Follows and abouts are kept regardless of age
    pub fn is_exempt_from_retention(&self) -> bool {
        match self {
            Content::Contact(c) => c.state() == ContactState::Following,
            Content::About(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<MessageId>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub branch: Vec<MessageId>,
    #[serde(default, deserialize_with = "lenient_mentions", skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<Mention>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl Post {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            root: None,
            branch: Vec::new(),
            mentions: Vec::new(),
            channel: None,
        }
    }

    pub fn reply(text: impl Into<String>, root: MessageId, branch: MessageId) -> Self {
        Self {
            root: Some(root),
            branch: vec![branch],
            ..Self::new(text)
        }
    }

    pub fn is_root(&self) -> bool {
        self.root.is_none()
    }
}

/// A link from a post to a feed (`@`), message (`%`), blob (`&`), or tag (`#`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionKind {
    Feed,
    Message,
    Blob,
    Hashtag,
    Other,
}

impl Mention {
    pub fn kind(&self) -> MentionKind {
        match self.link.chars().next() {
            Some('@') => MentionKind::Feed,
            Some('%') => MentionKind::Message,
            Some('&') => MentionKind::Blob,
            Some('#') => MentionKind::Hashtag,
            _ => MentionKind::Other,
        }
    }
}

/// Relationship state of a contact edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactState {
    Following,
    Blocking,
    Neutral,
}

impl ContactState {
    pub fn as_i64(self) -> i64 {
        match self {
            ContactState::Following => 1,
            ContactState::Blocking => -1,
            ContactState::Neutral => 0,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => ContactState::Following,
            -1 => ContactState::Blocking,
            _ => ContactState::Neutral,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub contact: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub following: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocking: Option<bool>,
}

impl Contact {
    pub fn follow(contact: Identity) -> Self {
        Self {
            contact,
            following: Some(true),
            blocking: None,
        }
    }

    pub fn state(&self) -> ContactState {
        if self.blocking == Some(true) {
            ContactState::Blocking
        } else if self.following == Some(true) {
            ContactState::Following
        } else {
            ContactState::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub vote: VoteBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<MessageId>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub branch: Vec<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteBody {
    pub link: MessageId,
    #[serde(deserialize_with = "number_or_bool")]
    pub value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl Vote {
    pub fn like(link: MessageId) -> Self {
        Self {
            vote: VoteBody {
                link,
                value: 1,
                expression: Some("Like".to_string()),
            },
            root: None,
            branch: Vec::new(),
        }
    }
}

/// Self-description (or description of someone else) keyed by subject.
///
/// `about` stays a plain string: clients describe messages and blobs too,
/// and only identities are projected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct About {
    pub about: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "image_link", skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        rename = "publicWebHosting",
        skip_serializing_if = "Option::is_none"
    )]
    pub public_web_hosting: Option<bool>,
}

impl About {
    pub fn subject(&self) -> Option<Identity> {
        let id = Identity::new(self.about.clone());
        id.is_valid().then_some(id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pub {
    pub address: PubAddress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubAddress {
    pub host: String,
    pub port: u16,
    pub key: Identity,
}

/// Multiserver address announcement (`net:host:port~shs:key`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability: Option<f64>,
}

/// Self-authored retraction of one of the author's earlier messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropContentRequest {
    pub sequence: u64,
    pub hash: MessageId,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<MessageId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => vec![MessageId(s)],
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| MessageId(s.to_string())))
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_mentions<'de, D>(deserializer: D) -> Result<Vec<Mention>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(items)) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<Mention>(item).ok())
        .collect())
}

fn image_link<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Object(map)) => map.get("link").and_then(Value::as_str).map(String::from),
        _ => None,
    })
}

fn number_or_bool<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Bool(b) => Ok(b as i64),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| serde::de::Error::custom("vote value out of range")),
        other => Err(serde::de::Error::custom(format!(
            "expected number or bool, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_content_is_encrypted() {
        let decoded = Content::decode(&json!("c2VjcmV0.box"));
        assert_eq!(decoded, Decoded::Encrypted);
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let decoded = Content::decode(&json!({ "type": "gathering", "title": "picnic" }));
        assert_eq!(decoded, Decoded::Unsupported("gathering".to_string()));
    }

    #[test]
    fn test_branch_accepts_string_or_list() {
        let single = Content::decode(&json!({
            "type": "post", "text": "re", "root": "%r.sha256", "branch": "%b.sha256"
        }));
        let many = Content::decode(&json!({
            "type": "post", "text": "re", "root": "%r.sha256",
            "branch": ["%b.sha256", "%c.sha256"]
        }));

        let Decoded::Known(Content::Post(single)) = single else {
            panic!("expected post");
        };
        let Decoded::Known(Content::Post(many)) = many else {
            panic!("expected post");
        };
        assert_eq!(single.branch.len(), 1);
        assert_eq!(many.branch.len(), 2);
        assert!(!single.is_root());
    }

    #[test]
    fn test_malformed_mentions_are_dropped() {
        let decoded = Content::decode(&json!({
            "type": "post", "text": "hi",
            "mentions": [{ "link": "@a.ed25519", "name": "a" }, 42, { "nolink": true }]
        }));
        let Decoded::Known(Content::Post(post)) = decoded else {
            panic!("expected post");
        };
        assert_eq!(post.mentions.len(), 1);
        assert_eq!(post.mentions[0].kind(), MentionKind::Feed);
    }

    #[test]
    fn test_contact_state() {
        let follow = Contact::follow(Identity::new("@b.ed25519"));
        assert_eq!(follow.state(), ContactState::Following);

        let block = Contact {
            contact: Identity::new("@b.ed25519"),
            following: Some(true),
            blocking: Some(true),
        };
        assert_eq!(block.state(), ContactState::Blocking);

        let unfollow = Contact {
            contact: Identity::new("@b.ed25519"),
            following: Some(false),
            blocking: None,
        };
        assert_eq!(unfollow.state(), ContactState::Neutral);
    }

    #[test]
    fn test_vote_value_accepts_bool() {
        let decoded = Content::decode(&json!({
            "type": "vote", "vote": { "link": "%m.sha256", "value": true }
        }));
        let Decoded::Known(Content::Vote(vote)) = decoded else {
            panic!("expected vote");
        };
        assert_eq!(vote.vote.value, 1);
    }

    #[test]
    fn test_about_image_link_object() {
        let decoded = Content::decode(&json!({
            "type": "about", "about": "@a.ed25519", "name": "alice",
            "image": { "link": "&img.sha256", "size": 10 }
        }));
        let Decoded::Known(Content::About(about)) = decoded else {
            panic!("expected about");
        };
        assert_eq!(about.image.as_deref(), Some("&img.sha256"));
        assert!(about.subject().is_some());
    }

    #[test]
    fn test_malformed_known_type() {
        let decoded = Content::decode(&json!({ "type": "contact" }));
        assert!(matches!(decoded, Decoded::Malformed { .. }));
        assert_eq!(decoded.content_type(), ContentType::Contact);
    }

    #[test]
    fn test_validity() {
        let Decoded::Known(blank) = Content::decode(&json!({ "type": "post", "text": "  " })) else {
            panic!("expected post");
        };
        assert!(!blank.is_valid());

        let Decoded::Known(dcr) = Content::decode(&json!({
            "type": "drop-content-request", "sequence": 0, "hash": "%m.sha256"
        })) else {
            panic!("expected dcr");
        };
        assert!(!dcr.is_valid());
    }
}
