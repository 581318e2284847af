use rusqlite::Connection;
use std::collections::HashSet;
use troop_core::db::migrations::latest_version;
use troop_core::db::open_db_in_memory;
use troop_core::{
    Person, PersonListQuery, PersonRepository, PersonService, RepoError, SqlitePersonRepository,
};
use uuid::Uuid;

#[test]
fn create_and_get_roundtrip() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePersonRepository::try_new(&conn).unwrap();

    let mut person = Person::new("Anna", "Muster");
    person.email = Some("anna@example.com".to_string());
    person.town = Some("Bern".to_string());
    let id = repo.create_person(&person).unwrap();

    let loaded = repo.get_person(id, false).unwrap().unwrap();
    assert_eq!(loaded.uuid, person.uuid);
    assert_eq!(loaded.first_name, "Anna");
    assert_eq!(loaded.last_name, "Muster");
    assert_eq!(loaded.email.as_deref(), Some("anna@example.com"));
    assert_eq!(loaded.town.as_deref(), Some("Bern"));
    assert!(!loaded.is_deleted);
}

#[test]
fn update_existing_person() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePersonRepository::try_new(&conn).unwrap();

    let mut person = Person::new("Anna", "Muster");
    repo.create_person(&person).unwrap();

    person.nickname = Some("anni".to_string());
    person.town = Some("Thun".to_string());
    repo.update_person(&person).unwrap();

    let loaded = repo.get_person(person.uuid, false).unwrap().unwrap();
    assert_eq!(loaded.nickname.as_deref(), Some("anni"));
    assert_eq!(loaded.town.as_deref(), Some("Thun"));
}

#[test]
fn update_not_found_returns_not_found() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePersonRepository::try_new(&conn).unwrap();

    let person = Person::new("Niemand", "Nirgends");
    let err = repo.update_person(&person).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(id) if id == person.uuid));
}

#[test]
fn list_excludes_deleted_by_default_and_can_include_them() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePersonRepository::try_new(&conn).unwrap();

    let active = Person::new("Anna", "Aktiv");
    let archived = Person::new("Alte", "Akte");
    repo.create_person(&active).unwrap();
    repo.create_person(&archived).unwrap();
    repo.soft_delete_person(archived.uuid).unwrap();

    let visible = repo.list_people(&PersonListQuery::default()).unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].uuid, active.uuid);

    let include_deleted = PersonListQuery {
        include_deleted: true,
        ..PersonListQuery::default()
    };
    let all = repo.list_people(&include_deleted).unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn soft_delete_is_idempotent() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePersonRepository::try_new(&conn).unwrap();

    let person = Person::new("Anna", "Muster");
    repo.create_person(&person).unwrap();

    repo.soft_delete_person(person.uuid).unwrap();
    repo.soft_delete_person(person.uuid).unwrap();

    assert!(repo.get_person(person.uuid, false).unwrap().is_none());
    let archived = repo.get_person(person.uuid, true).unwrap().unwrap();
    assert!(archived.is_deleted);
}

#[test]
fn validation_failure_blocks_create_and_update() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePersonRepository::try_new(&conn).unwrap();

    let blank = Person::new("Anna", "   ");
    let create_err = repo.create_person(&blank).unwrap_err();
    assert!(matches!(create_err, RepoError::PersonValidation(_)));

    let mut valid = Person::new("Anna", "Muster");
    repo.create_person(&valid).unwrap();

    valid.email = Some("not an address".to_string());
    let update_err = repo.update_person(&valid).unwrap_err();
    assert!(matches!(update_err, RepoError::PersonValidation(_)));
}

#[test]
fn list_orders_by_last_then_first_name() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePersonRepository::try_new(&conn).unwrap();

    for (first_name, last_name) in [("Zoe", "Abt"), ("Anna", "Zahn"), ("Ben", "Abt")] {
        repo.create_person(&Person::new(first_name, last_name)).unwrap();
    }

    let people = repo.list_people(&PersonListQuery::default()).unwrap();
    let names: Vec<_> = people.iter().map(Person::list_name).collect();
    assert_eq!(names, vec!["Abt Ben", "Abt Zoe", "Zahn Anna"]);
}

#[test]
fn list_pagination_with_limit_and_offset_is_stable() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePersonRepository::try_new(&conn).unwrap();

    for last_name in ["Alpha", "Beta", "Gamma"] {
        repo.create_person(&Person::new("Test", last_name)).unwrap();
    }

    let query = PersonListQuery {
        limit: Some(2),
        offset: 1,
        ..PersonListQuery::default()
    };
    let page = repo.list_people(&query).unwrap();

    assert_eq!(page.len(), 2);
    assert_eq!(page[0].last_name, "Beta");
    assert_eq!(page[1].last_name, "Gamma");
}

#[test]
fn service_wraps_repository_calls() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePersonRepository::try_new(&conn).unwrap();
    let service = PersonService::new(repo);

    let id = service.create_member("Anna", "Muster").unwrap();

    let fetched = service.get_person(id, false).unwrap().unwrap();
    assert_eq!(fetched.last_name, "Muster");

    let ids: HashSet<_> = service
        .list_people(&PersonListQuery::default())
        .unwrap()
        .into_iter()
        .map(|person| person.uuid)
        .collect();
    assert!(ids.contains(&id));
}

#[test]
fn repository_rejects_uninitialized_connection() {
    let conn = Connection::open_in_memory().unwrap();

    let result = SqlitePersonRepository::try_new(&conn);
    match result {
        Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version: 0,
        }) => assert!(expected_version > 0),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected uninitialized connection error"),
    }
}

#[test]
fn repository_rejects_connection_without_required_people_table() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(&format!("PRAGMA user_version = {};", latest_version()))
        .unwrap();

    let result = SqlitePersonRepository::try_new(&conn);
    assert!(matches!(
        result,
        Err(RepoError::MissingRequiredTable("people"))
    ));
}

#[test]
fn repository_rejects_connection_missing_required_people_column() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE people (
            uuid TEXT PRIMARY KEY NOT NULL,
            first_name TEXT NOT NULL DEFAULT '',
            last_name TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0
        );",
    )
    .unwrap();
    conn.execute_batch(&format!("PRAGMA user_version = {};", latest_version()))
        .unwrap();

    let result = SqlitePersonRepository::try_new(&conn);
    assert!(matches!(
        result,
        Err(RepoError::MissingRequiredColumn {
            table: "people",
            column: "nickname"
        })
    ));
}

#[test]
fn fixed_id_import_roundtrip() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqlitePersonRepository::try_new(&conn).unwrap();

    let id = Uuid::parse_str("00000000-0000-4000-8000-000000000001").unwrap();
    let person = Person::with_id(id, "Im", "Port");
    repo.create_person(&person).unwrap();

    let loaded = repo.get_person(id, false).unwrap().unwrap();
    assert_eq!(loaded.uuid, id);
}
