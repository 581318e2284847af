//! Group and role repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD over the group hierarchy.
//! - Own role rows linking people to groups.
//! - Answer subtree queries used by access scoping and event listings.
//!
//! # Invariants
//! - `parent_uuid` must reference an existing group on create/update.
//! - Subtree queries only traverse active (non-deleted) groups.

use crate::access::Role;
use crate::model::group::{Group, GroupId};
use crate::model::person::PersonId;
use crate::repo::{bool_to_int, ensure_connection_ready, int_to_bool, parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

const GROUP_SELECT_SQL: &str = "SELECT
    uuid,
    name,
    parent_uuid,
    is_deleted
FROM groups";

const GROUP_COLUMNS: &[&str] = &["uuid", "name", "parent_uuid", "is_deleted", "updated_at"];
const ROLE_COLUMNS: &[&str] = &["person_uuid", "group_uuid", "role"];

/// Repository interface for group hierarchy and role operations.
pub trait GroupRepository {
    fn create_group(&self, group: &Group) -> RepoResult<GroupId>;
    fn update_group(&self, group: &Group) -> RepoResult<()>;
    fn get_group(&self, id: GroupId, include_deleted: bool) -> RepoResult<Option<Group>>;
    /// Lists direct children of `parent` (or top-level groups for `None`),
    /// sorted by name.
    fn list_children(&self, parent: Option<GroupId>, include_deleted: bool)
        -> RepoResult<Vec<Group>>;
    /// Returns `root` plus every active descendant group id.
    fn subtree_ids(&self, root: GroupId) -> RepoResult<Vec<GroupId>>;
    fn soft_delete_group(&self, id: GroupId) -> RepoResult<()>;
    fn grant_role(&self, person: PersonId, group: GroupId, role: Role) -> RepoResult<()>;
    fn revoke_role(&self, person: PersonId, group: GroupId, role: Role) -> RepoResult<()>;
    /// Lists `(group, role)` pairs held by one person.
    fn roles_for(&self, person: PersonId) -> RepoResult<Vec<(GroupId, Role)>>;
}

/// SQLite-backed group repository.
pub struct SqliteGroupRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteGroupRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &[("groups", GROUP_COLUMNS), ("roles", ROLE_COLUMNS)])?;
        Ok(Self { conn })
    }

    fn group_exists(&self, id: GroupId) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM groups WHERE uuid = ?1 AND is_deleted = 0
            );",
            [id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }
}

impl GroupRepository for SqliteGroupRepository<'_> {
    fn create_group(&self, group: &Group) -> RepoResult<GroupId> {
        group.validate()?;
        if let Some(parent_uuid) = group.parent_uuid {
            if !self.group_exists(parent_uuid)? {
                return Err(RepoError::NotFound(parent_uuid));
            }
        }

        self.conn.execute(
            "INSERT INTO groups (uuid, name, parent_uuid, is_deleted)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                group.uuid.to_string(),
                group.name.as_str(),
                group.parent_uuid.map(|id| id.to_string()),
                bool_to_int(group.is_deleted),
            ],
        )?;

        Ok(group.uuid)
    }

    fn update_group(&self, group: &Group) -> RepoResult<()> {
        group.validate()?;
        if let Some(parent_uuid) = group.parent_uuid {
            if !self.group_exists(parent_uuid)? {
                return Err(RepoError::NotFound(parent_uuid));
            }
        }

        let changed = self.conn.execute(
            "UPDATE groups
             SET
                name = ?1,
                parent_uuid = ?2,
                is_deleted = ?3,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?4;",
            params![
                group.name.as_str(),
                group.parent_uuid.map(|id| id.to_string()),
                bool_to_int(group.is_deleted),
                group.uuid.to_string(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(group.uuid));
        }

        Ok(())
    }

    fn get_group(&self, id: GroupId, include_deleted: bool) -> RepoResult<Option<Group>> {
        let mut stmt = self.conn.prepare(&format!(
            "{GROUP_SELECT_SQL}
             WHERE uuid = ?1
               AND (?2 = 1 OR is_deleted = 0);"
        ))?;

        let mut rows = stmt.query(params![id.to_string(), bool_to_int(include_deleted)])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_group_row(row)?));
        }

        Ok(None)
    }

    fn list_children(
        &self,
        parent: Option<GroupId>,
        include_deleted: bool,
    ) -> RepoResult<Vec<Group>> {
        let mut stmt = self.conn.prepare(&format!(
            "{GROUP_SELECT_SQL}
             WHERE ((?1 IS NULL AND parent_uuid IS NULL) OR parent_uuid = ?1)
               AND (?2 = 1 OR is_deleted = 0)
             ORDER BY name COLLATE NOCASE ASC, uuid ASC;"
        ))?;

        let mut rows = stmt.query(params![
            parent.map(|id| id.to_string()),
            bool_to_int(include_deleted)
        ])?;
        let mut groups = Vec::new();
        while let Some(row) = rows.next()? {
            groups.push(parse_group_row(row)?);
        }

        Ok(groups)
    }

    fn subtree_ids(&self, root: GroupId) -> RepoResult<Vec<GroupId>> {
        let mut stmt = self.conn.prepare(
            "WITH RECURSIVE subtree(uuid) AS (
                SELECT uuid FROM groups WHERE uuid = ?1 AND is_deleted = 0
                UNION
                SELECT g.uuid FROM groups g
                 JOIN subtree s ON g.parent_uuid = s.uuid
                 WHERE g.is_deleted = 0
            )
            SELECT uuid FROM subtree;",
        )?;

        let mut rows = stmt.query([root.to_string()])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let value: String = row.get(0)?;
            ids.push(parse_uuid(&value, "groups.uuid")?);
        }

        Ok(ids)
    }

    fn soft_delete_group(&self, id: GroupId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE groups
             SET
                is_deleted = 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?1;",
            [id.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }

    fn grant_role(&self, person: PersonId, group: GroupId, role: Role) -> RepoResult<()> {
        if !self.group_exists(group)? {
            return Err(RepoError::NotFound(group));
        }

        self.conn.execute(
            "INSERT OR IGNORE INTO roles (person_uuid, group_uuid, role)
             VALUES (?1, ?2, ?3);",
            params![person.to_string(), group.to_string(), role.as_str()],
        )?;

        Ok(())
    }

    fn revoke_role(&self, person: PersonId, group: GroupId, role: Role) -> RepoResult<()> {
        self.conn.execute(
            "DELETE FROM roles
             WHERE person_uuid = ?1 AND group_uuid = ?2 AND role = ?3;",
            params![person.to_string(), group.to_string(), role.as_str()],
        )?;

        Ok(())
    }

    fn roles_for(&self, person: PersonId) -> RepoResult<Vec<(GroupId, Role)>> {
        let mut stmt = self.conn.prepare(
            "SELECT group_uuid, role FROM roles
             WHERE person_uuid = ?1
             ORDER BY group_uuid ASC, role ASC;",
        )?;

        let mut rows = stmt.query([person.to_string()])?;
        let mut roles = Vec::new();
        while let Some(row) = rows.next()? {
            let group_text: String = row.get("group_uuid")?;
            let role_text: String = row.get("role")?;
            let group_uuid = parse_uuid(&group_text, "roles.group_uuid")?;
            let role = Role::parse(&role_text).map_err(|err| {
                RepoError::InvalidData(format!("invalid role value in roles.role: {err}"))
            })?;
            roles.push((group_uuid, role));
        }

        Ok(roles)
    }
}

fn parse_group_row(row: &Row<'_>) -> RepoResult<Group> {
    let uuid_text: String = row.get("uuid")?;
    let uuid = parse_uuid(&uuid_text, "groups.uuid")?;

    let parent_uuid = match row.get::<_, Option<String>>("parent_uuid")? {
        Some(value) => Some(parse_uuid(&value, "groups.parent_uuid")?),
        None => None,
    };

    let is_deleted = int_to_bool(row.get("is_deleted")?, "groups.is_deleted")?;

    let group = Group {
        uuid,
        name: row.get("name")?,
        parent_uuid,
        is_deleted,
    };
    group.validate()?;
    Ok(group)
}
