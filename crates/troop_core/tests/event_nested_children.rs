use chrono::NaiveDate;
use rusqlite::Connection;
use std::collections::BTreeMap;
use troop_core::db::open_db_in_memory;
use troop_core::{
    ContactAttrSets, EventAggregate, EventCreateRequest, EventDateFields, EventKind,
    EventQuestionFields, EventService, EventServiceError, EventUpdateRequest, Group,
    GroupRepository, Person, ReconcileError, Role, SqliteGroupRepository, SqlitePersonRepository,
    PersonRepository, SubmittedRecord, Viewer,
};
use uuid::Uuid;

#[test]
fn create_persists_event_with_dates_and_questions() {
    let mut conn = open_db_in_memory().unwrap();
    let (group_uuid, viewer) = seed_group_with_leader(&conn);

    let request = EventCreateRequest {
        group_uuid,
        name: "foo".to_string(),
        kind: EventKind::Course,
        contact_uuid: None,
        dates: vec![EventDateFields {
            label: "foo".to_string(),
            start_on: date(2014, 3, 1),
            finish_on: Some(date(2014, 3, 1)),
        }],
        application_questions: vec![EventQuestionFields {
            question: "foo?".to_string(),
            choices: Some("1,2,3,4".to_string()),
        }],
        admin_questions: Vec::new(),
    };

    let aggregate = EventService::new(&mut conn)
        .create_event(&viewer, &request)
        .unwrap();

    assert_eq!(aggregate.event.name, "foo");
    assert_eq!(aggregate.dates.len(), 1);
    assert_eq!(aggregate.application_questions.len(), 1);
    assert_eq!(
        aggregate.application_questions[0].choices.as_deref(),
        Some("1,2,3,4")
    );
    assert!(aggregate.admin_questions.is_empty());
}

#[test]
fn update_creates_updates_and_destroys_dates_in_one_call() {
    let mut conn = open_db_in_memory().unwrap();
    let (group_uuid, viewer) = seed_group_with_leader(&conn);
    let aggregate = create_course(&mut conn, &viewer, group_uuid);
    let event_uuid = aggregate.event.uuid;

    let pre = find_date(&aggregate, "Pre");
    let main = find_date(&aggregate, "Main");
    let rows_before = count_rows(&conn, "event_dates");

    let mut dates = BTreeMap::new();
    dates.insert(
        pre.to_string(),
        SubmittedRecord::fields(EventDateFields {
            label: "Vorweek".to_string(),
            start_on: date(2014, 1, 3),
            finish_on: Some(date(2014, 1, 4)),
        })
        .with_id(pre),
    );
    dates.insert(
        main.to_string(),
        SubmittedRecord::<EventDateFields>::deletion().with_id(main),
    );
    dates.insert(
        "999".to_string(),
        SubmittedRecord::fields(EventDateFields {
            label: "Nachweek".to_string(),
            start_on: date(2014, 2, 3),
            finish_on: Some(date(2014, 2, 5)),
        }),
    );

    let request = EventUpdateRequest {
        event_uuid,
        name: Some("testevent".to_string()),
        dates: Some(dates),
        ..EventUpdateRequest::default()
    };
    let updated = EventService::new(&mut conn)
        .update_event(&viewer, &request)
        .unwrap();

    assert_eq!(updated.event.name, "testevent");
    assert_eq!(count_rows(&conn, "event_dates"), rows_before);
    assert_eq!(updated.dates.len(), 2);

    let first = &updated.dates[0];
    assert_eq!(first.uuid, pre);
    assert_eq!(first.label, "Vorweek");
    assert_eq!(first.start_on, date(2014, 1, 3));
    assert_eq!(first.finish_on, Some(date(2014, 1, 4)));

    let second = &updated.dates[1];
    assert_eq!(second.label, "Nachweek");
    assert_eq!(second.start_on, date(2014, 2, 3));
    assert_eq!(second.finish_on, Some(date(2014, 2, 5)));

    assert!(updated.dates.iter().all(|stored| stored.uuid != main));
}

#[test]
fn update_creates_updates_and_destroys_questions_in_one_call() {
    let mut conn = open_db_in_memory().unwrap();
    let (group_uuid, viewer) = seed_group_with_leader(&conn);
    let aggregate = create_course(&mut conn, &viewer, group_uuid);
    let event_uuid = aggregate.event.uuid;

    let who = find_question(&aggregate.application_questions, "Who?");
    let what = find_question(&aggregate.application_questions, "What?");
    let payed = find_question(&aggregate.admin_questions, "Payed?");
    let rows_before = count_rows(&conn, "event_questions");

    let mut application_questions = BTreeMap::new();
    application_questions.insert(
        who.to_string(),
        SubmittedRecord::fields(EventQuestionFields {
            question: "Whoo?".to_string(),
            choices: None,
        })
        .with_id(who),
    );
    application_questions.insert(
        what.to_string(),
        SubmittedRecord::<EventQuestionFields>::deletion().with_id(what),
    );
    application_questions.insert(
        "999".to_string(),
        SubmittedRecord::fields(EventQuestionFields {
            question: "How much?".to_string(),
            choices: Some("1,2,3".to_string()),
        }),
    );

    let mut admin_questions = BTreeMap::new();
    admin_questions.insert(
        payed.to_string(),
        SubmittedRecord::<EventQuestionFields>::deletion().with_id(payed),
    );
    admin_questions.insert(
        "999".to_string(),
        SubmittedRecord::fields(EventQuestionFields {
            question: "Powned?".to_string(),
            choices: Some("ja, nein".to_string()),
        }),
    );

    let request = EventUpdateRequest {
        event_uuid,
        name: Some("testevent".to_string()),
        application_questions: Some(application_questions),
        admin_questions: Some(admin_questions),
        ..EventUpdateRequest::default()
    };
    let updated = EventService::new(&mut conn)
        .update_event(&viewer, &request)
        .unwrap();

    assert_eq!(count_rows(&conn, "event_questions"), rows_before);
    assert_eq!(updated.application_questions.len(), 2);

    let first = &updated.application_questions[0];
    assert_eq!(first.question, "How much?");
    assert_eq!(first.choices.as_deref(), Some("1,2,3"));
    assert!(!first.admin);

    let second = &updated.application_questions[1];
    assert_eq!(second.uuid, who);
    assert_eq!(second.question, "Whoo?");

    assert_eq!(updated.admin_questions.len(), 1);
    let admin = &updated.admin_questions[0];
    assert_eq!(admin.question, "Powned?");
    assert_eq!(admin.choices.as_deref(), Some("ja, nein"));
    assert!(admin.admin);
}

#[test]
fn empty_change_set_leaves_collection_untouched() {
    let mut conn = open_db_in_memory().unwrap();
    let (group_uuid, viewer) = seed_group_with_leader(&conn);
    let aggregate = create_course(&mut conn, &viewer, group_uuid);

    let request = EventUpdateRequest {
        event_uuid: aggregate.event.uuid,
        dates: Some(BTreeMap::new()),
        ..EventUpdateRequest::default()
    };
    let updated = EventService::new(&mut conn)
        .update_event(&viewer, &request)
        .unwrap();

    assert_eq!(updated.dates, aggregate.dates);
    assert_eq!(updated.application_questions, aggregate.application_questions);
}

#[test]
fn absent_collection_fields_leave_collections_untouched() {
    let mut conn = open_db_in_memory().unwrap();
    let (group_uuid, viewer) = seed_group_with_leader(&conn);
    let aggregate = create_course(&mut conn, &viewer, group_uuid);

    let request = EventUpdateRequest {
        event_uuid: aggregate.event.uuid,
        name: Some("renamed only".to_string()),
        ..EventUpdateRequest::default()
    };
    let updated = EventService::new(&mut conn)
        .update_event(&viewer, &request)
        .unwrap();

    assert_eq!(updated.event.name, "renamed only");
    assert_eq!(updated.dates, aggregate.dates);
    assert_eq!(updated.application_questions, aggregate.application_questions);
    assert_eq!(updated.admin_questions, aggregate.admin_questions);
}

#[test]
fn unmentioned_children_survive_partial_change_set() {
    let mut conn = open_db_in_memory().unwrap();
    let (group_uuid, viewer) = seed_group_with_leader(&conn);
    let aggregate = create_course(&mut conn, &viewer, group_uuid);
    let pre = find_date(&aggregate, "Pre");
    let main_date = aggregate
        .dates
        .iter()
        .find(|stored| stored.label == "Main")
        .unwrap()
        .clone();

    let mut dates = BTreeMap::new();
    dates.insert(
        pre.to_string(),
        SubmittedRecord::fields(EventDateFields {
            label: "Pre updated".to_string(),
            start_on: date(2014, 1, 1),
            finish_on: Some(date(2014, 1, 3)),
        })
        .with_id(pre),
    );

    let request = EventUpdateRequest {
        event_uuid: aggregate.event.uuid,
        dates: Some(dates),
        ..EventUpdateRequest::default()
    };
    let updated = EventService::new(&mut conn)
        .update_event(&viewer, &request)
        .unwrap();

    let untouched = updated
        .dates
        .iter()
        .find(|stored| stored.uuid == main_date.uuid)
        .unwrap();
    assert_eq!(untouched, &main_date);
}

#[test]
fn deletion_entry_ignores_field_edits() {
    let mut conn = open_db_in_memory().unwrap();
    let (group_uuid, viewer) = seed_group_with_leader(&conn);
    let aggregate = create_course(&mut conn, &viewer, group_uuid);
    let pre = find_date(&aggregate, "Pre");

    let mut dates = BTreeMap::new();
    dates.insert(
        pre.to_string(),
        SubmittedRecord {
            id: Some(pre),
            fields: Some(EventDateFields {
                label: "Ghost".to_string(),
                start_on: date(2014, 1, 1),
                finish_on: None,
            }),
            delete: true,
        },
    );

    let request = EventUpdateRequest {
        event_uuid: aggregate.event.uuid,
        dates: Some(dates),
        ..EventUpdateRequest::default()
    };
    let updated = EventService::new(&mut conn)
        .update_event(&viewer, &request)
        .unwrap();

    assert_eq!(updated.dates.len(), 1);
    assert!(updated.dates.iter().all(|stored| stored.uuid != pre));
    assert!(updated.dates.iter().all(|stored| stored.label != "Ghost"));
}

#[test]
fn validation_failure_aborts_whole_update() {
    let mut conn = open_db_in_memory().unwrap();
    let (group_uuid, viewer) = seed_group_with_leader(&conn);
    let aggregate = create_course(&mut conn, &viewer, group_uuid);
    let pre = find_date(&aggregate, "Pre");

    let mut dates = BTreeMap::new();
    dates.insert(
        pre.to_string(),
        SubmittedRecord::fields(EventDateFields {
            label: "Valid change".to_string(),
            start_on: date(2014, 1, 1),
            finish_on: Some(date(2014, 1, 3)),
        })
        .with_id(pre),
    );
    dates.insert(
        "new1".to_string(),
        SubmittedRecord::fields(EventDateFields {
            label: "   ".to_string(),
            start_on: date(2014, 5, 1),
            finish_on: None,
        }),
    );

    let request = EventUpdateRequest {
        event_uuid: aggregate.event.uuid,
        name: Some("should not stick".to_string()),
        dates: Some(dates),
        ..EventUpdateRequest::default()
    };
    let err = EventService::new(&mut conn)
        .update_event(&viewer, &request)
        .unwrap_err();

    match err {
        EventServiceError::Reconcile(ReconcileError::Validation(errors)) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].key, "new1");
            assert_eq!(errors[0].violations[0].field, "label");
        }
        other => panic!("unexpected error: {other}"),
    }

    let unchanged = EventService::new(&mut conn)
        .get_event(aggregate.event.uuid)
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.event.name, aggregate.event.name);
    assert_eq!(unchanged.dates, aggregate.dates);
}

#[test]
fn foreign_child_reference_is_rejected_before_mutation() {
    let mut conn = open_db_in_memory().unwrap();
    let (group_uuid, viewer) = seed_group_with_leader(&conn);
    let aggregate = create_course(&mut conn, &viewer, group_uuid);
    let other = create_course(&mut conn, &viewer, group_uuid);
    let foreign_date = other.dates[0].uuid;

    let mut dates = BTreeMap::new();
    dates.insert(
        foreign_date.to_string(),
        SubmittedRecord::fields(EventDateFields {
            label: "Takeover".to_string(),
            start_on: date(2014, 6, 1),
            finish_on: None,
        })
        .with_id(foreign_date),
    );

    let request = EventUpdateRequest {
        event_uuid: aggregate.event.uuid,
        dates: Some(dates),
        ..EventUpdateRequest::default()
    };
    let err = EventService::new(&mut conn)
        .update_event(&viewer, &request)
        .unwrap_err();

    assert!(matches!(
        err,
        EventServiceError::Reconcile(ReconcileError::UnresolvedReference { id, .. })
            if id == foreign_date
    ));

    let unchanged = EventService::new(&mut conn)
        .get_event(other.event.uuid)
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.dates, other.dates);
}

#[test]
fn unknown_identifier_is_never_downgraded_to_insert() {
    let mut conn = open_db_in_memory().unwrap();
    let (group_uuid, viewer) = seed_group_with_leader(&conn);
    let aggregate = create_course(&mut conn, &viewer, group_uuid);
    let rows_before = count_rows(&conn, "event_dates");
    let bogus = Uuid::new_v4();

    let mut dates = BTreeMap::new();
    dates.insert(
        bogus.to_string(),
        SubmittedRecord::fields(EventDateFields {
            label: "Phantom".to_string(),
            start_on: date(2014, 7, 1),
            finish_on: None,
        }),
    );

    let request = EventUpdateRequest {
        event_uuid: aggregate.event.uuid,
        dates: Some(dates),
        ..EventUpdateRequest::default()
    };
    let err = EventService::new(&mut conn)
        .update_event(&viewer, &request)
        .unwrap_err();

    assert!(matches!(
        err,
        EventServiceError::Reconcile(ReconcileError::UnresolvedReference { id, .. }) if id == bogus
    ));
    assert_eq!(count_rows(&conn, "event_dates"), rows_before);
}

#[test]
fn reapplying_resolved_change_set_yields_no_further_changes() {
    let mut conn = open_db_in_memory().unwrap();
    let (group_uuid, viewer) = seed_group_with_leader(&conn);
    let aggregate = create_course(&mut conn, &viewer, group_uuid);
    let pre = find_date(&aggregate, "Pre");
    let main = find_date(&aggregate, "Main");

    let mut dates = BTreeMap::new();
    dates.insert(
        pre.to_string(),
        SubmittedRecord::fields(EventDateFields {
            label: "Updated".to_string(),
            start_on: date(2014, 1, 3),
            finish_on: Some(date(2014, 1, 4)),
        })
        .with_id(pre),
    );
    dates.insert(
        main.to_string(),
        SubmittedRecord::<EventDateFields>::deletion().with_id(main),
    );
    dates.insert(
        "999".to_string(),
        SubmittedRecord::fields(EventDateFields {
            label: "Added".to_string(),
            start_on: date(2014, 2, 3),
            finish_on: Some(date(2014, 2, 5)),
        }),
    );

    let request = EventUpdateRequest {
        event_uuid: aggregate.event.uuid,
        dates: Some(dates),
        ..EventUpdateRequest::default()
    };
    let first_pass = EventService::new(&mut conn)
        .update_event(&viewer, &request)
        .unwrap();

    // Re-resolve the change set against the applied state: the insert is
    // re-keyed to its assigned id, the delete target is gone and omitted.
    let mut resolved = BTreeMap::new();
    for stored in &first_pass.dates {
        resolved.insert(
            stored.uuid.to_string(),
            SubmittedRecord::fields(EventDateFields {
                label: stored.label.clone(),
                start_on: stored.start_on,
                finish_on: stored.finish_on,
            })
            .with_id(stored.uuid),
        );
    }

    let second_request = EventUpdateRequest {
        event_uuid: aggregate.event.uuid,
        dates: Some(resolved),
        ..EventUpdateRequest::default()
    };
    let second_pass = EventService::new(&mut conn)
        .update_event(&viewer, &second_request)
        .unwrap();

    assert_eq!(second_pass.dates, first_pass.dates);
    assert_eq!(second_pass.event.name, first_pass.event.name);
}

#[test]
fn contact_attr_sets_are_replaced_as_a_whole() {
    let mut conn = open_db_in_memory().unwrap();
    let (group_uuid, viewer) = seed_group_with_leader(&conn);
    let aggregate = create_course(&mut conn, &viewer, group_uuid);

    let mut attrs = ContactAttrSets::default();
    attrs.required.insert("nickname".to_string());
    attrs.hidden.insert("address".to_string());
    attrs.hidden.insert("social_accounts".to_string());

    let request = EventUpdateRequest {
        event_uuid: aggregate.event.uuid,
        contact_attrs: Some(attrs),
        ..EventUpdateRequest::default()
    };
    let updated = EventService::new(&mut conn)
        .update_event(&viewer, &request)
        .unwrap();
    assert!(updated.event.required_contact_attrs.contains("nickname"));
    assert!(updated.event.hidden_contact_attrs.contains("address"));
    assert!(updated
        .event
        .hidden_contact_attrs
        .contains("social_accounts"));

    let mut replacement = ContactAttrSets::default();
    replacement.hidden.insert("nickname".to_string());

    let request = EventUpdateRequest {
        event_uuid: aggregate.event.uuid,
        contact_attrs: Some(replacement),
        ..EventUpdateRequest::default()
    };
    let replaced = EventService::new(&mut conn)
        .update_event(&viewer, &request)
        .unwrap();
    assert!(replaced.event.required_contact_attrs.is_empty());
    assert!(replaced.event.hidden_contact_attrs.contains("nickname"));
    assert!(!replaced.event.hidden_contact_attrs.contains("address"));
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })
    .unwrap()
}

fn seed_group_with_leader(conn: &Connection) -> (Uuid, Viewer) {
    let person_repo = SqlitePersonRepository::try_new(conn).unwrap();
    let leader = Person::new("Lea", "Leitner");
    person_repo.create_person(&leader).unwrap();

    let group_repo = SqliteGroupRepository::try_new(conn).unwrap();
    let group = Group::new("Top", None);
    group_repo.create_group(&group).unwrap();
    group_repo
        .grant_role(leader.uuid, group.uuid, Role::Leader)
        .unwrap();

    (group.uuid, Viewer::new(leader.uuid))
}

fn create_course(conn: &mut Connection, viewer: &Viewer, group_uuid: Uuid) -> EventAggregate {
    let request = EventCreateRequest {
        group_uuid,
        name: "Course".to_string(),
        kind: EventKind::Course,
        contact_uuid: None,
        dates: vec![
            EventDateFields {
                label: "Pre".to_string(),
                start_on: date(2014, 1, 1),
                finish_on: Some(date(2014, 1, 3)),
            },
            EventDateFields {
                label: "Main".to_string(),
                start_on: date(2014, 2, 1),
                finish_on: Some(date(2014, 2, 7)),
            },
        ],
        application_questions: vec![
            EventQuestionFields {
                question: "Who?".to_string(),
                choices: None,
            },
            EventQuestionFields {
                question: "What?".to_string(),
                choices: None,
            },
        ],
        admin_questions: vec![EventQuestionFields {
            question: "Payed?".to_string(),
            choices: None,
        }],
    };
    EventService::new(conn).create_event(viewer, &request).unwrap()
}

fn find_date(aggregate: &EventAggregate, label: &str) -> Uuid {
    aggregate
        .dates
        .iter()
        .find(|stored| stored.label == label)
        .unwrap()
        .uuid
}

fn find_question(questions: &[troop_core::EventQuestion], text: &str) -> Uuid {
    questions
        .iter()
        .find(|stored| stored.question == text)
        .unwrap()
        .uuid
}
