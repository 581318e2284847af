//! Role-based access scoping over people and events.
//!
//! # Responsibility
//! - Declare the role vocabulary attached to group memberships.
//! - Compute the set of people a viewer may see, as an id-only
//!   projection.
//! - Gate event mutations on the viewer's position in the group tree.
//!
//! # Invariants
//! - Scoping queries fetch only the distinct identifier column, never
//!   full person rows.
//! - The viewer is explicit call input; there is no ambient current-user
//!   state.

use crate::db::DbError;
use crate::model::group::GroupId;
use crate::model::person::PersonId;
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Membership role within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// Full access to every person and event.
    Admin,
    /// Manages the group and its descendants.
    Leader,
    /// Sees fellow members of the same group.
    Member,
}

/// Storage string for the admin role.
pub const ROLE_ADMIN: &str = "admin";
/// Storage string for the leader role.
pub const ROLE_LEADER: &str = "leader";
/// Storage string for the member role.
pub const ROLE_MEMBER: &str = "member";

impl Role {
    /// Stable string id used in role rows.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => ROLE_ADMIN,
            Self::Leader => ROLE_LEADER,
            Self::Member => ROLE_MEMBER,
        }
    }

    /// Parses one role from its storage string.
    pub fn parse(value: &str) -> Result<Self, RoleParseError> {
        let normalized = value.trim();
        if normalized.is_empty() {
            return Err(RoleParseError::Empty);
        }
        match normalized {
            ROLE_ADMIN => Ok(Self::Admin),
            ROLE_LEADER => Ok(Self::Leader),
            ROLE_MEMBER => Ok(Self::Member),
            other => Err(RoleParseError::Unsupported(other.to_string())),
        }
    }
}

/// Role string parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleParseError {
    Empty,
    Unsupported(String),
}

impl Display for RoleParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "role value must not be empty"),
            Self::Unsupported(value) => write!(f, "role is unsupported: {value}"),
        }
    }
}

impl Error for RoleParseError {}

/// Explicit access context for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub person_uuid: PersonId,
}

impl Viewer {
    pub fn new(person_uuid: PersonId) -> Self {
        Self { person_uuid }
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

/// Access-layer error for scoping queries.
#[derive(Debug)]
pub enum AccessError {
    Db(DbError),
    InvalidData(String),
}

impl Display for AccessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid access row: {message}"),
        }
    }
}

impl Error for AccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for AccessError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for AccessError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Returns the distinct ids of every active person the viewer may see.
///
/// - an admin role anywhere grants every active person;
/// - a leader role grants people holding roles in the led group or any
///   of its descendants;
/// - a member role grants people holding roles in that group alone;
/// - the viewer always sees themself while active.
///
/// Only the id column is fetched; the storage layer deduplicates via
/// `SELECT DISTINCT`. No ordering is guaranteed beyond the set's own.
pub fn accessible_people_ids(
    conn: &Connection,
    viewer: &Viewer,
) -> AccessResult<BTreeSet<PersonId>> {
    let viewer_uuid = viewer.person_uuid.to_string();

    if has_admin_role(conn, &viewer_uuid)? {
        return collect_ids(
            conn,
            "SELECT DISTINCT uuid FROM people WHERE is_deleted = 0;",
            &[],
        );
    }

    collect_ids(
        conn,
        "WITH RECURSIVE led_groups(uuid) AS (
            SELECT group_uuid FROM roles
             WHERE person_uuid = ?1 AND role = 'leader'
            UNION
            SELECT g.uuid FROM groups g
             JOIN led_groups lg ON g.parent_uuid = lg.uuid
             WHERE g.is_deleted = 0
        ),
        visible_groups(uuid) AS (
            SELECT uuid FROM led_groups
            UNION
            SELECT group_uuid FROM roles
             WHERE person_uuid = ?1 AND role = 'member'
        )
        SELECT DISTINCT people.uuid
          FROM people
          JOIN roles ON roles.person_uuid = people.uuid
          JOIN visible_groups vg ON vg.uuid = roles.group_uuid
         WHERE people.is_deleted = 0
        UNION
        SELECT uuid FROM people
         WHERE uuid = ?1 AND is_deleted = 0;",
        &[&viewer_uuid],
    )
}

/// Whether the viewer may create or mutate events owned by `group_uuid`.
///
/// Granted to admins anywhere and to leaders of the owning group or any
/// of its ancestors.
pub fn can_manage_event(
    conn: &Connection,
    viewer: &Viewer,
    group_uuid: GroupId,
) -> AccessResult<bool> {
    let granted: i64 = conn.query_row(
        "WITH RECURSIVE ancestry(uuid) AS (
            SELECT ?2
            UNION
            SELECT g.parent_uuid FROM groups g
             JOIN ancestry a ON g.uuid = a.uuid
             WHERE g.parent_uuid IS NOT NULL
        )
        SELECT EXISTS(
            SELECT 1 FROM roles
             WHERE person_uuid = ?1
               AND (role = 'admin'
                    OR (role = 'leader' AND group_uuid IN (SELECT uuid FROM ancestry)))
        );",
        params![viewer.person_uuid.to_string(), group_uuid.to_string()],
        |row| row.get(0),
    )?;
    Ok(granted == 1)
}

fn has_admin_role(conn: &Connection, viewer_uuid: &str) -> AccessResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM roles WHERE person_uuid = ?1 AND role = 'admin'
        );",
        [viewer_uuid],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn collect_ids(
    conn: &Connection,
    sql: &str,
    bind: &[&dyn rusqlite::ToSql],
) -> AccessResult<BTreeSet<PersonId>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(bind)?;
    let mut ids = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        let id = Uuid::parse_str(&value)
            .map_err(|_| AccessError::InvalidData(format!("invalid uuid `{value}`")))?;
        ids.insert(id);
    }
    Ok(ids)
}
