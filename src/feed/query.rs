// SPDX-License-Identifier: MPL-2.0

//! Parameterized feed query builder.
//!
//! Strategies contribute fixed SQL fragments (joins, predicates, a sort
//! expression) and bind every variable part as a named parameter. The
//! builder adds the exclusions every feed shares and the insertion-sequence
//! tie-break that makes offsets stable.

use crate::log::{Message, MessageId};
use crate::store::{Result, StoreError, ViewStore};
use crate::store::{MESSAGE_COLUMNS, MESSAGE_JOINS, row_to_message};
use rusqlite::types::Value;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rusqlite::{OptionalExtension, ToSql};

/// Feed ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Order {
    /// Largest sort value first
    Newest(String),
    /// Smallest sort value first
    Oldest(String),
    /// Unread before read, each part in a permutation fixed by the seed
    Shuffled(u64),
}

#[derive(Debug, Clone)]
pub struct FeedQuery {
    joins: Vec<String>,
    predicates: Vec<String>,
    params: Vec<(&'static str, Value)>,
    order: Order,
    include_undecrypted: bool,
}

impl FeedQuery {
    pub fn new(order: Order) -> Self {
        Self {
            joins: Vec::new(),
            predicates: Vec::new(),
            params: vec![(":now", Value::Integer(ViewStore::now()))],
            order,
            include_undecrypted: false,
        }
    }

    pub fn join(mut self, clause: impl Into<String>) -> Self {
        self.joins.push(clause.into());
        self
    }

    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.predicates.push(predicate.into());
        self
    }

    /// Bind a named parameter (`:name`) used by a fragment
    pub fn bind(mut self, name: &'static str, value: impl Into<Value>) -> Self {
        self.params.retain(|(existing, _)| *existing != name);
        self.params.push((name, value.into()));
        self
    }

    /// Also return messages still waiting for decryption
    pub fn include_undecrypted(mut self, include: bool) -> Self {
        self.include_undecrypted = include;
        self
    }

    fn where_clause(&self) -> String {
        let mut clauses = vec![
            "m.hidden = 0".to_string(),
            "m.claimed_at <= :now".to_string(),
        ];
        if !self.include_undecrypted {
            clauses.push("m.is_decrypted = 1".to_string());
        }
        clauses.extend(self.predicates.iter().map(|p| format!("({p})")));
        clauses.join(" AND ")
    }

    fn order_clause(&self) -> String {
        match &self.order {
            Order::Newest(sort) => format!("{sort} DESC, m.id DESC"),
            Order::Oldest(sort) => format!("{sort} ASC, m.id ASC"),
            Order::Shuffled(_) => "m.id ASC".to_string(),
        }
    }

    fn from_clause(&self) -> String {
        format!("FROM messages m {MESSAGE_JOINS} {}", self.joins.join(" "))
    }

    pub fn count_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) {} WHERE {}",
            self.from_clause(),
            self.where_clause()
        )
    }

    pub fn fetch_sql(&self) -> String {
        format!(
            "SELECT {MESSAGE_COLUMNS} {} WHERE {} ORDER BY {} LIMIT :limit OFFSET :offset",
            self.from_clause(),
            self.where_clause(),
            self.order_clause()
        )
    }

    pub fn count(&self, store: &ViewStore) -> Result<i64> {
        let conn = store.reader()?;
        let sql = self.count_sql();
        let count = conn.query_row(&sql, bound(&sql, &self.params).as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    /// Items strictly newer than `since` under this ordering; 0 when the
    /// ordering is not chronological.
    pub fn count_since(&self, store: &ViewStore, since: &MessageId) -> Result<i64> {
        let sort = match &self.order {
            Order::Newest(sort) | Order::Oldest(sort) => sort,
            Order::Shuffled(_) => return Ok(0),
        };

        let conn = store.reader()?;
        let mut params = self.params.clone();
        params.push((":since_key", Value::Text(since.as_str().to_string())));

        let anchor_sql = format!("SELECT {sort}, m.id FROM messages m {MESSAGE_JOINS} WHERE k.key = :since_key");
        let anchor: Option<(Value, i64)> = conn
            .query_row(&anchor_sql, bound(&anchor_sql, &params).as_slice(), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        let (since_sort, since_id) =
            anchor.ok_or_else(|| StoreError::UnknownMessage(since.clone()))?;

        params.push((":since_sort", since_sort));
        params.push((":since_id", Value::Integer(since_id)));
        let sql = format!(
            "{} AND ({sort}, m.id) > (:since_sort, :since_id)",
            self.count_sql()
        );
        let count = conn.query_row(&sql, bound(&sql, &params).as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    pub fn fetch(&self, store: &ViewStore, limit: usize, offset: usize) -> Result<Vec<Message>> {
        if let Order::Shuffled(seed) = self.order {
            return self.fetch_shuffled(store, seed, limit, offset);
        }

        let conn = store.reader()?;
        let sql = self.fetch_sql();
        let mut params = self.params.clone();
        params.push((":limit", Value::Integer(limit as i64)));
        params.push((":offset", Value::Integer(offset as i64)));

        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(bound(&sql, &params).as_slice(), row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }
}

impl FeedQuery {
    /// Candidate ids in seeded order, unread first
    fn shuffled_ids(&self, store: &ViewStore, seed: u64) -> Result<Vec<i64>> {
        let conn = store.reader()?;
        let sql = format!(
            "SELECT m.id, EXISTS(SELECT 1 FROM read_messages rm WHERE rm.msg_ref = m.msg_id) {} \
             WHERE {} ORDER BY m.id ASC",
            self.from_clause(),
            self.where_clause()
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut candidates = stmt
            .query_map(bound(&sql, &self.params).as_slice(), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        candidates.shuffle(&mut StdRng::seed_from_u64(seed));
        // Stable, so each partition keeps its shuffled order
        candidates.sort_by_key(|(_, read)| *read);
        Ok(candidates.into_iter().map(|(id, _)| id).collect())
    }

    fn fetch_shuffled(
        &self,
        store: &ViewStore,
        seed: u64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>> {
        let page: Vec<i64> = self
            .shuffled_ids(store, seed)?
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect();

        let conn = store.reader()?;
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m {MESSAGE_JOINS} WHERE m.id = ?");
        let mut stmt = conn.prepare(&sql)?;
        let mut messages = Vec::with_capacity(page.len());
        for id in page {
            // Rows removed since the ids were read are skipped
            if let Some(message) = stmt.query_row([id], row_to_message).optional()? {
                messages.push(message);
            }
        }
        Ok(messages)
    }
}

/// The parameters `sql` actually names; SQLite rejects binding any other.
fn bound<'a>(sql: &str, params: &'a [(&'static str, Value)]) -> Vec<(&'a str, &'a dyn ToSql)> {
    params
        .iter()
        .filter(|(name, _)| mentions_param(sql, name))
        .map(|(name, value)| (*name, value as &dyn ToSql))
        .collect()
}

fn mentions_param(sql: &str, name: &str) -> bool {
    sql.match_indices(name).any(|(at, _)| {
        sql[at + name.len()..]
            .chars()
            .next()
            .is_none_or(|c| !(c.is_ascii_alphanumeric() || c == '_'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_detection_respects_word_boundaries() {
        assert!(mentions_param("WHERE a = :since_id", ":since_id"));
        assert!(!mentions_param("WHERE a = :since_id", ":since"));
        assert!(mentions_param("x <= :now)", ":now"));
        assert!(!mentions_param("x <= :nowhere", ":now"));
    }

    #[test]
    fn test_shared_exclusions_in_sql() {
        let query = FeedQuery::new(Order::Newest("m.claimed_at".to_string()))
            .filter("m.type = 'post'");
        let sql = query.fetch_sql();
        assert!(sql.contains("m.hidden = 0"));
        assert!(sql.contains("m.is_decrypted = 1"));
        assert!(sql.contains("m.claimed_at <= :now"));
        assert!(sql.contains("ORDER BY m.claimed_at DESC, m.id DESC"));

        let sql = query.include_undecrypted(true).count_sql();
        assert!(!sql.contains("is_decrypted"));
    }

    #[test]
    fn test_rebinding_replaces_value() {
        let query = FeedQuery::new(Order::Shuffled(0))
            .bind(":author", "one".to_string())
            .bind(":author", "two".to_string());
        let bound: Vec<_> = query.params.iter().filter(|(n, _)| *n == ":author").collect();
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].1, Value::Text("two".to_string()));
    }
}
