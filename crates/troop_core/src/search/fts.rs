//! SQLite FTS5-based search over people and groups.
//!
//! # Responsibility
//! - Provide keyword search over member and group records.
//! - Restrict people hits to an accessible-id set computed by the access
//!   layer.
//!
//! # Invariants
//! - Only non-deleted records are returned.
//! - People results never leak ids outside the given accessible set.
//! - Result ordering is deterministic.

use crate::access::{accessible_people_ids, AccessError, Viewer};
use crate::db::DbError;
use crate::model::group::GroupId;
use crate::model::person::PersonId;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const QUICKSEARCH_LIMIT: u32 = 10;

/// Result type for search APIs.
pub type SearchResult<T> = Result<T, SearchError>;

/// Search-layer error for query parsing, DB interaction and result
/// decoding.
#[derive(Debug)]
pub enum SearchError {
    /// User-provided query cannot be parsed by FTS5 syntax.
    InvalidQuery {
        query: String,
        message: String,
    },
    Db(DbError),
    Access(AccessError),
    InvalidData(String),
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuery { query, message } => {
                write!(f, "invalid full-text query `{query}`: {message}")
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::Access(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid search row: {message}"),
        }
    }
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidQuery { .. } => None,
            Self::Db(err) => Some(err),
            Self::Access(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for SearchError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<AccessError> for SearchError {
    fn from(value: AccessError) -> Self {
        Self::Access(value)
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Search options for full-text query behavior.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// User query text.
    pub text: String,
    /// Maximum number of hits to return.
    pub limit: u32,
    /// Whether to pass text directly as raw FTS5 expression.
    ///
    /// Default is `false` to protect type-as-you-search UX from syntax
    /// errors.
    pub raw_fts_syntax: bool,
}

impl SearchQuery {
    /// Creates a query with default pagination.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: 20,
            raw_fts_syntax: false,
        }
    }
}

/// Single person hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonHit {
    pub person_uuid: PersonId,
    /// `last_name first_name` display form.
    pub label: String,
    pub snippet: String,
}

/// Single group hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupHit {
    pub group_uuid: GroupId,
    pub name: String,
    pub snippet: String,
}

/// Combined typeahead result over people and groups.
#[derive(Debug, Clone, Default)]
pub struct Quicksearch {
    pub people: Vec<PersonHit>,
    pub groups: Vec<GroupHit>,
}

/// Searches people via FTS5, restricted to the accessible id set.
///
/// Returns an empty list for blank queries or an empty accessible set.
pub fn search_people(
    conn: &Connection,
    query: &SearchQuery,
    accessible: &BTreeSet<PersonId>,
) -> SearchResult<Vec<PersonHit>> {
    let Some(match_expr) = build_match_expression(query)? else {
        return Ok(Vec::new());
    };

    if query.limit == 0 || accessible.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; accessible.len()].join(", ");
    let sql = format!(
        "SELECT
            people.uuid AS uuid,
            people.first_name AS first_name,
            people.last_name AS last_name,
            snippet(people_fts, -1, '[', ']', ' ... ', 10) AS snippet
         FROM people_fts
         JOIN people ON people.rowid = people_fts.rowid
         WHERE people_fts MATCH ?
           AND people.is_deleted = 0
           AND people.uuid IN ({placeholders})
         ORDER BY
            people.last_name COLLATE NOCASE ASC,
            people.first_name COLLATE NOCASE ASC,
            bm25(people_fts),
            people.uuid ASC
         LIMIT ?"
    );

    let mut bind_values: Vec<Value> = vec![Value::Text(match_expr.clone())];
    bind_values.extend(accessible.iter().map(|id| Value::Text(id.to_string())));
    bind_values.push(Value::Integer(i64::from(query.limit)));

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query(params_from_iter(bind_values))
        .map_err(|err| map_query_error(err, &match_expr))?;
    let mut hits = Vec::new();

    while let Some(row) = rows
        .next()
        .map_err(|err| map_query_error(err, &match_expr))?
    {
        hits.push(parse_person_hit(row)?);
    }

    Ok(hits)
}

/// Searches groups via FTS5.
///
/// Returns an empty list for blank queries.
pub fn search_groups(conn: &Connection, query: &SearchQuery) -> SearchResult<Vec<GroupHit>> {
    let Some(match_expr) = build_match_expression(query)? else {
        return Ok(Vec::new());
    };

    if query.limit == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT
            groups.uuid AS uuid,
            groups.name AS name,
            snippet(groups_fts, 0, '[', ']', ' ... ', 10) AS snippet
         FROM groups_fts
         JOIN groups ON groups.rowid = groups_fts.rowid
         WHERE groups_fts MATCH ?
           AND groups.is_deleted = 0
         ORDER BY bm25(groups_fts), groups.name COLLATE NOCASE ASC, groups.uuid ASC
         LIMIT ?",
    )?;

    let bind_values = vec![
        Value::Text(match_expr.clone()),
        Value::Integer(i64::from(query.limit)),
    ];
    let mut rows = stmt
        .query(params_from_iter(bind_values))
        .map_err(|err| map_query_error(err, &match_expr))?;
    let mut hits = Vec::new();

    while let Some(row) = rows
        .next()
        .map_err(|err| map_query_error(err, &match_expr))?
    {
        hits.push(parse_group_hit(row)?);
    }

    Ok(hits)
}

/// Combined capped people + groups lookup for a typeahead field.
///
/// People hits are scoped to what `viewer` may see; group names are
/// visible to every signed-in member.
pub fn quicksearch(
    conn: &Connection,
    viewer: &Viewer,
    text: impl Into<String>,
) -> SearchResult<Quicksearch> {
    let mut query = SearchQuery::new(text);
    query.limit = QUICKSEARCH_LIMIT;

    let accessible = accessible_people_ids(conn, viewer)?;
    let people = search_people(conn, &query, &accessible)?;
    let groups = search_groups(conn, &query)?;

    Ok(Quicksearch { people, groups })
}

fn parse_person_hit(row: &Row<'_>) -> SearchResult<PersonHit> {
    let uuid_text: String = row.get("uuid")?;
    let person_uuid = Uuid::parse_str(&uuid_text)
        .map_err(|_| SearchError::InvalidData(format!("invalid uuid `{uuid_text}`")))?;

    let first_name: String = row.get("first_name")?;
    let last_name: String = row.get("last_name")?;

    Ok(PersonHit {
        person_uuid,
        label: format!("{last_name} {first_name}").trim().to_string(),
        snippet: row.get("snippet")?,
    })
}

fn parse_group_hit(row: &Row<'_>) -> SearchResult<GroupHit> {
    let uuid_text: String = row.get("uuid")?;
    let group_uuid = Uuid::parse_str(&uuid_text)
        .map_err(|_| SearchError::InvalidData(format!("invalid uuid `{uuid_text}`")))?;

    Ok(GroupHit {
        group_uuid,
        name: row.get("name")?,
        snippet: row.get("snippet")?,
    })
}

fn build_match_expression(query: &SearchQuery) -> SearchResult<Option<String>> {
    let text = query.text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    if query.raw_fts_syntax {
        return Ok(Some(text.to_string()));
    }

    let terms = text
        .split_whitespace()
        .filter(|term| !term.is_empty())
        .map(escape_fts_term)
        .collect::<Vec<_>>();

    if terms.is_empty() {
        return Ok(None);
    }

    Ok(Some(terms.join(" AND ")))
}

fn escape_fts_term(raw: &str) -> String {
    let escaped = raw.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

fn map_query_error(err: rusqlite::Error, query: &str) -> SearchError {
    if is_match_syntax_error(&err) {
        return SearchError::InvalidQuery {
            query: query.to_string(),
            message: err.to_string(),
        };
    }

    SearchError::Db(DbError::Sqlite(err))
}

fn is_match_syntax_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => {
            let msg = message.to_lowercase();
            (msg.contains("fts5") && msg.contains("syntax"))
                || msg.contains("malformed match expression")
                || msg.contains("unterminated")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{build_match_expression, escape_fts_term, SearchQuery};

    #[test]
    fn blank_text_yields_no_expression() {
        let query = SearchQuery::new("   ");
        assert!(build_match_expression(&query).unwrap().is_none());
    }

    #[test]
    fn terms_are_quoted_and_joined_with_and() {
        let query = SearchQuery::new("anna muster");
        assert_eq!(
            build_match_expression(&query).unwrap().as_deref(),
            Some("\"anna\" AND \"muster\"")
        );
    }

    #[test]
    fn raw_syntax_passes_text_through() {
        let mut query = SearchQuery::new("anna OR muster");
        query.raw_fts_syntax = true;
        assert_eq!(
            build_match_expression(&query).unwrap().as_deref(),
            Some("anna OR muster")
        );
    }

    #[test]
    fn quotes_are_doubled_in_escaped_terms() {
        assert_eq!(escape_fts_term("an\"na"), "\"an\"\"na\"");
    }
}
