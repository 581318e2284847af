//! Person repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide stable CRUD APIs over the `people` table.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Write paths call `Person::validate()` before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.
//! - List ordering is `last_name, first_name, uuid` for stable paging.

use crate::model::person::{Person, PersonId};
use crate::repo::{bool_to_int, ensure_connection_ready, int_to_bool, parse_uuid, RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

const PERSON_SELECT_SQL: &str = "SELECT
    uuid,
    first_name,
    last_name,
    nickname,
    email,
    town,
    is_deleted
FROM people";

const PERSON_COLUMNS: &[&str] = &[
    "uuid",
    "first_name",
    "last_name",
    "nickname",
    "email",
    "town",
    "is_deleted",
    "updated_at",
];

/// Query options for listing people.
#[derive(Debug, Clone, Default)]
pub struct PersonListQuery {
    pub include_deleted: bool,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Repository interface for person CRUD operations.
pub trait PersonRepository {
    fn create_person(&self, person: &Person) -> RepoResult<PersonId>;
    fn update_person(&self, person: &Person) -> RepoResult<()>;
    fn get_person(&self, id: PersonId, include_deleted: bool) -> RepoResult<Option<Person>>;
    fn list_people(&self, query: &PersonListQuery) -> RepoResult<Vec<Person>>;
    fn soft_delete_person(&self, id: PersonId) -> RepoResult<()>;
}

/// SQLite-backed person repository.
pub struct SqlitePersonRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePersonRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &[("people", PERSON_COLUMNS)])?;
        Ok(Self { conn })
    }
}

impl PersonRepository for SqlitePersonRepository<'_> {
    fn create_person(&self, person: &Person) -> RepoResult<PersonId> {
        person.validate()?;

        self.conn.execute(
            "INSERT INTO people (
                uuid,
                first_name,
                last_name,
                nickname,
                email,
                town,
                is_deleted
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                person.uuid.to_string(),
                person.first_name.as_str(),
                person.last_name.as_str(),
                person.nickname.as_deref(),
                person.email.as_deref(),
                person.town.as_deref(),
                bool_to_int(person.is_deleted),
            ],
        )?;

        Ok(person.uuid)
    }

    fn update_person(&self, person: &Person) -> RepoResult<()> {
        person.validate()?;

        let changed = self.conn.execute(
            "UPDATE people
             SET
                first_name = ?1,
                last_name = ?2,
                nickname = ?3,
                email = ?4,
                town = ?5,
                is_deleted = ?6,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?7;",
            params![
                person.first_name.as_str(),
                person.last_name.as_str(),
                person.nickname.as_deref(),
                person.email.as_deref(),
                person.town.as_deref(),
                bool_to_int(person.is_deleted),
                person.uuid.to_string(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(person.uuid));
        }

        Ok(())
    }

    fn get_person(&self, id: PersonId, include_deleted: bool) -> RepoResult<Option<Person>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PERSON_SELECT_SQL}
             WHERE uuid = ?1
               AND (?2 = 1 OR is_deleted = 0);"
        ))?;

        let mut rows = stmt.query(params![id.to_string(), bool_to_int(include_deleted)])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_person_row(row)?));
        }

        Ok(None)
    }

    fn list_people(&self, query: &PersonListQuery) -> RepoResult<Vec<Person>> {
        let mut sql = format!("{PERSON_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_deleted {
            sql.push_str(" AND is_deleted = 0");
        }

        sql.push_str(" ORDER BY last_name COLLATE NOCASE ASC, first_name COLLATE NOCASE ASC, uuid ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut people = Vec::new();

        while let Some(row) = rows.next()? {
            people.push(parse_person_row(row)?);
        }

        Ok(people)
    }

    fn soft_delete_person(&self, id: PersonId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE people
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
}

fn parse_person_row(row: &Row<'_>) -> RepoResult<Person> {
    let uuid_text: String = row.get("uuid")?;
    let uuid = parse_uuid(&uuid_text, "people.uuid")?;
    let is_deleted = int_to_bool(row.get("is_deleted")?, "people.is_deleted")?;

    let person = Person {
        uuid,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        nickname: row.get("nickname")?,
        email: row.get("email")?,
        town: row.get("town")?,
        is_deleted,
    };
    person.validate()?;
    Ok(person)
}
