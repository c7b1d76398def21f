use crmock::database::Database;
use crmock::datatype::PropertyType;
use crmock::error::{CrmockError, ErrorKind};
use crmock::persist::PersistenceMode;
use crmock::property::{PropertyGroup, PropertyInput, PropertyUpdate};
use crmock::record::{PropertyMap, RecordInput};

fn db() -> Database {
    Database::new(PersistenceMode::InMemory).expect("db")
}

#[test]
fn declared_properties_are_listed_by_display_order() {
    let db = db();
    let mut shoe_size = PropertyInput::new("shoe_size", "Shoe size", PropertyType::Number, "number");
    shoe_size.display_order = Some(-5);
    db.properties().declare("contacts", shoe_size).expect("declare");
    let listed = db.properties().list("contacts", false).expect("list");
    assert_eq!(listed[0].name, "shoe_size");
    assert!(listed.iter().any(|p| p.name == "email"));
    let email = db.properties().get("contacts", "email").expect("email");
    assert!(email.has_unique_value);
    assert_eq!(email.group_name, "contactinformation");
}

#[test]
fn redeclaring_a_live_property_conflicts() {
    let db = db();
    let input = PropertyInput::new("favourite_colour", "Colour", PropertyType::String, "text");
    db.properties().declare("contacts", input.clone()).expect("declare");
    let err = db.properties().declare("contacts", input.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    // other types are independent
    db.properties().declare("companies", input).expect("declare on companies");
}

#[test]
fn declaring_into_a_missing_group_fails() {
    let db = db();
    let input = PropertyInput::new("nickname", "Nickname", PropertyType::String, "text").in_group("nope");
    assert_eq!(
        db.properties().declare("contacts", input.clone()).unwrap_err().kind(),
        ErrorKind::Validation
    );
    db.properties()
        .create_group("contacts", PropertyGroup::new("nope", "Now it exists"))
        .expect("group");
    db.properties().declare("contacts", input).expect("declare");
    let err = db
        .properties()
        .create_group("contacts", PropertyGroup::new("nope", "Again"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn archive_is_idempotent_and_frees_the_name() {
    let db = db();
    let input = PropertyInput::new("legacy_code", "Legacy code", PropertyType::String, "text");
    db.properties().declare("deals", input.clone()).expect("declare");
    db.properties().archive("deals", "legacy_code").expect("archive");
    db.properties().archive("deals", "legacy_code").expect("archive twice");
    assert_eq!(
        db.properties().get("deals", "legacy_code").unwrap_err().kind(),
        ErrorKind::NotFound
    );
    let archived = db.properties().list("deals", true).expect("archived");
    assert_eq!(archived.len(), 1);
    assert!(archived[0].archived);
    assert!(archived[0].archived_at.is_some());

    // writes to an archived property are refused
    let err = db
        .records()
        .create("deals", RecordInput::new([("legacy_code", "X1")]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    db.properties().declare("deals", input).expect("declare again");
    assert_eq!(
        db.properties().archive("deals", "never_there").unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        db.properties().archive("deals", "hs_createdate").unwrap_err().kind(),
        ErrorKind::Validation
    );
}

#[test]
fn numeric_values_must_parse() {
    let db = db();
    assert_eq!(db.properties().validate("companies", "numberofemployees", " 12 ").unwrap(), "12");
    let err = db
        .properties()
        .validate("companies", "numberofemployees", "a dozen")
        .unwrap_err();
    match err {
        CrmockError::PropertyValue { property, value, .. } => {
            assert_eq!(property, "numberofemployees");
            assert_eq!(value, "a dozen");
        }
        other => panic!("unexpected error {other}"),
    }
    // unknown properties are accepted as they are
    assert_eq!(
        db.properties().validate("companies", "whatever", "anything").unwrap(),
        "anything"
    );
}

#[test]
fn enumerations_check_their_options() {
    let db = db();
    assert_eq!(
        db.properties().validate("tickets", "hs_ticket_priority", "HIGH").unwrap(),
        "HIGH"
    );
    assert_eq!(
        db.properties()
            .validate("tickets", "hs_ticket_priority", "CATASTROPHIC")
            .unwrap_err()
            .kind(),
        ErrorKind::Validation
    );
    let toppings = PropertyInput::new("toppings", "Toppings", PropertyType::Enumeration, "checkbox")
        .with_options(["cheese", "ham", "pineapple"]);
    db.properties().declare("deals", toppings).expect("declare");
    assert_eq!(
        db.properties().validate("deals", "toppings", "cheese;ham").unwrap(),
        "cheese;ham"
    );
    assert!(db.properties().validate("deals", "toppings", "cheese;anchovies").is_err());
}

#[test]
fn read_only_properties_cannot_be_written() {
    let db = db();
    let record = db.records().create("contacts", RecordInput::default()).expect("create");
    let mut properties = PropertyMap::new();
    properties.insert("hs_object_id".into(), "999".into());
    let err = db
        .records()
        .update("contacts", &record.id.to_string(), None, properties)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn update_keeps_unspecified_fields() {
    let db = db();
    let updated = db
        .properties()
        .update(
            "contacts",
            "jobtitle",
            PropertyUpdate {
                label: Some("Role".into()),
                ..Default::default()
            },
        )
        .expect("update");
    assert_eq!(updated.label, "Role");
    assert_eq!(updated.property_type, PropertyType::String);
    assert_eq!(updated.group_name, "contactinformation");
    assert_eq!(
        db.properties()
            .update("contacts", "hs_object_id", PropertyUpdate::default())
            .unwrap_err()
            .kind(),
        ErrorKind::Validation
    );
}

#[test]
fn default_id_property_prefers_unique_properties() {
    let db = db();
    assert_eq!(db.properties().default_id_property("contacts").unwrap(), "email");
    assert_eq!(db.properties().default_id_property("deals").unwrap(), "hs_object_id");
}
