use crmock::batch::MAX_RECORD_BATCH;
use crmock::database::Database;
use crmock::error::ErrorKind;
use crmock::persist::PersistenceMode;
use crmock::record::{ListOptions, PropertyMap, ReadOptions, RecordInput, UpdateInput, UpsertInput};

fn properties(pairs: &[(&str, &str)]) -> PropertyMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn oversized_batch_create_writes_nothing() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let inputs: Vec<RecordInput> = (0..=MAX_RECORD_BATCH)
        .map(|n| RecordInput::new([("email", format!("c{n}@x.com"))]))
        .collect();
    assert_eq!(inputs.len(), 101);
    let err = db.records().batch_create("contacts", inputs).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(db.records().count("contacts", false).unwrap(), 0);
    assert_eq!(db.records().count("contacts", true).unwrap(), 0);
}

#[test]
fn batch_create_isolates_failing_items() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let inputs = vec![
        RecordInput::new([("dealname", "Good"), ("amount", "100")]),
        RecordInput::new([("dealname", "Bad"), ("amount", "a hundred")]),
        RecordInput::new([("dealname", "Also good")]),
    ];
    let response = db.records().batch_create("deals", inputs).expect("batch");
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.num_errors(), 1);
    assert_eq!(response.errors[0].index, 1);
    assert_eq!(response.errors[0].kind, ErrorKind::Validation);
    assert_eq!(db.records().count("deals", false).unwrap(), 2);
    let names: Vec<_> = db
        .records()
        .list("deals", &ListOptions { properties: vec!["dealname".into()], ..Default::default() })
        .unwrap()
        .results
        .iter()
        .map(|r| r.property("dealname").unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, vec!["Good", "Also good"]);
}

#[test]
fn duplicates_within_a_batch_conflict() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let inputs = vec![
        RecordInput::new([("email", "same@x.com")]),
        RecordInput::new([("email", "same@x.com")]),
    ];
    let response = db.records().batch_create("contacts", inputs).expect("batch");
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.errors[0].kind, ErrorKind::Conflict);
}

#[test]
fn batch_read_reports_missing_ids() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let a = db
        .records()
        .create("contacts", RecordInput::new([("email", "a@x.com")]))
        .expect("create");
    let response = db
        .records()
        .batch_read(
            "contacts",
            vec![a.id.to_string(), "987654".into()],
            &ReadOptions::properties(["email"]),
        )
        .expect("batch read");
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].property("email"), Some("a@x.com"));
    assert_eq!(response.errors[0].id.as_deref(), Some("987654"));
    assert_eq!(response.errors[0].kind, ErrorKind::NotFound);
}

#[test]
fn batch_update_by_email() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    db.records()
        .create("contacts", RecordInput::new([("email", "a@x.com")]))
        .expect("create");
    let response = db
        .records()
        .batch_update(
            "contacts",
            vec![
                UpdateInput {
                    id: "a@x.com".into(),
                    properties: properties(&[("firstname", "Alice")]),
                },
                UpdateInput {
                    id: "z@x.com".into(),
                    properties: properties(&[("firstname", "Zed")]),
                },
            ],
            Some("email"),
        )
        .expect("batch update");
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].property("firstname"), Some("Alice"));
    assert_eq!(response.errors[0].kind, ErrorKind::NotFound);
}

#[test]
fn upsert_updates_or_creates() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let existing = db
        .records()
        .create("contacts", RecordInput::new([("email", "known@x.com")]))
        .expect("create");
    let response = db
        .records()
        .batch_upsert(
            "contacts",
            vec![
                UpsertInput {
                    id: "known@x.com".into(),
                    id_property: None,
                    properties: properties(&[("lastname", "Known")]),
                },
                UpsertInput {
                    id: "fresh@x.com".into(),
                    id_property: Some("email".into()),
                    properties: properties(&[("lastname", "Fresh")]),
                },
            ],
        )
        .expect("upsert");
    assert!(!response.has_errors());
    assert_eq!(response.results[0].record.id, existing.id);
    assert!(!response.results[0].new);
    assert!(response.results[1].new);
    assert_eq!(response.results[1].record.property("email"), Some("fresh@x.com"));
    assert_eq!(db.records().count("contacts", false).unwrap(), 2);

    let response = db
        .records()
        .batch_upsert(
            "contacts",
            vec![UpsertInput {
                id: "Bob".into(),
                id_property: Some("firstname".into()),
                properties: PropertyMap::new(),
            }],
        )
        .expect("upsert");
    assert_eq!(response.errors[0].kind, ErrorKind::Validation);
}

#[test]
fn batch_archive_is_idempotent_per_item() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let a = db.records().create("tickets", RecordInput::default()).expect("create");
    let ids = vec![a.id.to_string(), a.id.to_string(), "31337".into()];
    let response = db.records().batch_archive("tickets", ids).expect("batch archive");
    assert_eq!(response.results, vec![a.id, a.id]);
    assert_eq!(response.num_errors(), 1);
    assert_eq!(db.records().count("tickets", true).unwrap(), 1);
}
