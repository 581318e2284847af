use rusqlite::Connection;
use std::collections::BTreeSet;
use troop_core::db::migrations::{apply_migrations, latest_version};
use troop_core::db::{open_db, open_db_in_memory, DbError};
use troop_core::{search_people, SearchQuery};
use uuid::Uuid;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "people");
    assert_table_exists(&conn, "groups");
    assert_table_exists(&conn, "roles");
    assert_table_exists(&conn, "events");
    assert_table_exists(&conn, "event_dates");
    assert_table_exists(&conn, "event_questions");
    assert_table_exists(&conn, "event_participations");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("troop.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "people");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn foreign_keys_are_enforced_on_opened_connections() {
    let conn = open_db_in_memory().unwrap();

    let result = conn.execute(
        "INSERT INTO roles (person_uuid, group_uuid, role)
         VALUES ('missing-person', 'missing-group', 'member');",
        [],
    );
    assert!(result.is_err());
}

#[test]
fn search_migration_backfills_existing_people() {
    let mut conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    conn.execute_batch(include_str!("../src/db/migrations/0001_people_groups.sql"))
        .unwrap();
    conn.execute_batch(include_str!("../src/db/migrations/0002_events.sql"))
        .unwrap();
    let legacy_id = Uuid::parse_str("11111111-2222-4333-8444-555555555555").unwrap();
    conn.execute_batch(
        "INSERT INTO people (uuid, first_name, last_name, is_deleted)
         VALUES ('11111111-2222-4333-8444-555555555555', 'Lena', 'Legacy', 0);",
    )
    .unwrap();
    conn.execute_batch("PRAGMA user_version = 2;").unwrap();

    apply_migrations(&mut conn).unwrap();
    assert_eq!(schema_version(&conn), latest_version());

    let hits = search_people(
        &conn,
        &SearchQuery::new("legacy"),
        &BTreeSet::from([legacy_id]),
    )
    .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].person_uuid, legacy_id);
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "expected table `{table_name}` to exist");
}
