use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use crmock::clock::{Clock, ManualClock};
use crmock::database::Database;
use crmock::datatype::format_timestamp;
use crmock::error::ErrorKind;
use crmock::persist::PersistenceMode;
use crmock::record::{ChangeSource, ListOptions, PropertyMap, ReadOptions, RecordInput};

fn properties(pairs: &[(&str, &str)]) -> PropertyMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn clocked() -> (Database, Arc<ManualClock>) {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let db = Database::with_clock(PersistenceMode::InMemory, clock.clone()).expect("db");
    (db, clock)
}

#[test]
fn create_sets_system_properties() {
    let (db, clock) = clocked();
    let record = db
        .records()
        .create("contacts", RecordInput::new([("email", "ada@example.com"), ("firstname", "Ada")]))
        .expect("create");
    let stamp = format_timestamp(&clock.now());
    assert_eq!(record.property("hs_object_id"), Some(record.id.to_string().as_str()));
    assert_eq!(record.property("hs_createdate"), Some(stamp.as_str()));
    assert_eq!(record.property("hs_lastmodifieddate"), Some(stamp.as_str()));
    assert_eq!(record.property("email"), Some("ada@example.com"));
    assert_eq!(record.created_at, record.updated_at);
    assert!(!record.archived);
}

#[test]
fn get_returns_only_the_default_projection() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let record = db
        .records()
        .create("contacts", RecordInput::new([("email", "a@x.com"), ("lastname", "Lovelace")]))
        .expect("create");
    let read = db
        .records()
        .get("contacts", &record.id.to_string(), &ReadOptions::default())
        .expect("get");
    let keys: Vec<&str> = read.properties.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["hs_createdate", "hs_lastmodifieddate", "hs_object_id"]);

    let read = db
        .records()
        .get("contacts", &record.id.to_string(), &ReadOptions::properties(["lastname", "phone"]))
        .expect("get");
    assert_eq!(read.property("lastname"), Some("Lovelace"));
    // requested but never set
    assert_eq!(read.properties.get("phone"), Some(&None));
    assert!(read.properties.get("email").is_none());
}

#[test]
fn get_by_unique_property() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let record = db
        .records()
        .create("contacts", RecordInput::new([("email", "grace@example.com")]))
        .expect("create");
    let options = ReadOptions {
        id_property: Some("email".into()),
        ..Default::default()
    };
    let found = db
        .records()
        .get("contacts", "grace@example.com", &options)
        .expect("by email");
    assert_eq!(found.id, record.id);
    assert_eq!(
        db.records().get("contacts", "nobody@example.com", &options).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    let options = ReadOptions {
        id_property: Some("firstname".into()),
        ..Default::default()
    };
    assert_eq!(
        db.records().get("contacts", "Grace", &options).unwrap_err().kind(),
        ErrorKind::Validation
    );
}

#[test]
fn unique_values_conflict() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    db.records()
        .create("contacts", RecordInput::new([("email", "dup@example.com")]))
        .expect("create");
    let err = db
        .records()
        .create("contacts", RecordInput::new([("email", "dup@example.com")]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(db.records().count("contacts", false).unwrap(), 1);
}

#[test]
fn mismatched_values_are_rejected() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let err = db
        .records()
        .create("deals", RecordInput::new([("amount", "lots")]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("amount"));
    for not_finite in ["NaN", "inf", "Infinity"] {
        let err = db
            .records()
            .create("deals", RecordInput::new([("amount", not_finite)]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    assert_eq!(db.records().count("deals", false).unwrap(), 0);
}

#[test]
fn update_bumps_timestamps_and_history() {
    let (db, clock) = clocked();
    let record = db
        .records()
        .create("contacts", RecordInput::new([("email", "old@example.com")]))
        .expect("create");
    clock.advance(Duration::minutes(5));
    let updated = db
        .records()
        .update(
            "contacts",
            &record.id.to_string(),
            None,
            properties(&[("email", "new@example.com")]),
        )
        .expect("update");
    assert_eq!(updated.property("email"), Some("new@example.com"));
    assert_eq!(updated.updated_at - record.created_at, Duration::minutes(5));
    assert_eq!(updated.created_at, record.created_at);

    let options = ReadOptions {
        properties_with_history: vec!["email".into()],
        ..Default::default()
    };
    let read = db
        .records()
        .get("contacts", &record.id.to_string(), &options)
        .expect("get");
    let history = &read.properties_with_history["email"];
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].value, "new@example.com");
    assert_eq!(history[1].value, "old@example.com");
    assert_eq!(history[0].source_type, ChangeSource::Api);
}

#[test]
fn empty_values_clear_properties() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let record = db
        .records()
        .create("contacts", RecordInput::new([("phone", "555-0100")]))
        .expect("create");
    db.records()
        .update("contacts", &record.id.to_string(), None, properties(&[("phone", "")]))
        .expect("clear");
    let read = db
        .records()
        .get("contacts", &record.id.to_string(), &ReadOptions::properties(["phone"]))
        .expect("get");
    assert_eq!(read.properties.get("phone"), Some(&None));
}

#[test]
fn archive_is_idempotent() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let record = db.records().create("tickets", RecordInput::default()).expect("create");
    let id = record.id.to_string();
    db.records().archive("tickets", &id).expect("archive");
    let first = db
        .records()
        .get("tickets", &id, &ReadOptions { archived: true, ..Default::default() })
        .expect("archived read");
    db.records().archive("tickets", &id).expect("archive twice");
    let second = db
        .records()
        .get("tickets", &id, &ReadOptions { archived: true, ..Default::default() })
        .expect("archived read");
    assert_eq!(first, second);
    assert!(second.archived);
    assert!(second.archived_at.is_some());

    assert_eq!(
        db.records().get("tickets", &id, &ReadOptions::default()).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        db.records()
            .update("tickets", &id, None, properties(&[("subject", "x")]))
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        db.records().archive("tickets", "424242").unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn list_walks_ascending_ids() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let mut ids = Vec::new();
    for n in 0..7 {
        let record = db
            .records()
            .create("companies", RecordInput::new([("name", format!("Company {n}"))]))
            .expect("create");
        ids.push(record.id);
    }
    let mut seen = Vec::new();
    let mut after = None;
    loop {
        let page = db
            .records()
            .list(
                "companies",
                &ListOptions {
                    limit: Some(3),
                    after: after.clone(),
                    properties: vec!["name".into()],
                    ..Default::default()
                },
            )
            .expect("list");
        assert!(page.len() <= 3);
        seen.extend(page.results.iter().map(|r| r.id));
        match page.next_cursor() {
            Some(next) => after = Some(next.to_string()),
            None => break,
        }
    }
    assert_eq!(seen, ids);

    // a page that ends exactly at the last row carries no cursor
    let page = db
        .records()
        .list("companies", &ListOptions { limit: Some(7), ..Default::default() })
        .expect("list");
    assert_eq!(page.len(), 7);
    assert!(page.next_cursor().is_none());
}

#[test]
fn list_archived_shows_only_archived() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let keep = db.records().create("deals", RecordInput::default()).expect("create");
    let gone = db.records().create("deals", RecordInput::default()).expect("create");
    db.records().archive("deals", &gone.id.to_string()).expect("archive");
    let live = db.records().list("deals", &ListOptions::default()).expect("live");
    assert_eq!(live.results.iter().map(|r| r.id).collect::<Vec<_>>(), vec![keep.id]);
    let archived = db
        .records()
        .list("deals", &ListOptions { archived: true, ..Default::default() })
        .expect("archived");
    assert_eq!(archived.results.iter().map(|r| r.id).collect::<Vec<_>>(), vec![gone.id]);
}

#[test]
fn list_limits_are_enforced() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    for limit in [0, 101] {
        let err = db
            .records()
            .list("contacts", &ListOptions { limit: Some(limit), ..Default::default() })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    let err = db
        .records()
        .list("contacts", &ListOptions { after: Some("not-a-cursor".into()), ..Default::default() })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        db.records().list("planets", &ListOptions::default()).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}
