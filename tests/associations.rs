use crmock::association::{
    ArchiveInput, AssociationCategory, AssociationPair, AssociationSpec, LabelInput,
};
use crmock::database::Database;
use crmock::error::ErrorKind;
use crmock::persist::PersistenceMode;
use crmock::record::{RecordId, RecordInput};

// contact to company, seeded
const PRIMARY: i64 = 1;
const UNLABELED: i64 = 279;

fn create(db: &Database, object_type: &str) -> String {
    db.records()
        .create(object_type, RecordInput::default())
        .expect("create")
        .id
        .to_string()
}

#[test]
fn associations_are_directional() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let contact = create(&db, "contacts");
    let company = create(&db, "companies");
    let link = db
        .associations()
        .associate_default("contacts", &contact, "companies", &company)
        .expect("associate");
    assert!(link.labels.is_empty());

    let forward = db
        .associations()
        .get("contacts", &contact, "companies", None, None)
        .expect("forward");
    assert_eq!(forward.results.len(), 1);
    assert_eq!(forward.results[0].association_types[0].type_id, UNLABELED);

    let backward = db
        .associations()
        .get("companies", &company, "contacts", None, None)
        .expect("backward");
    assert!(backward.results.is_empty());

    // associating twice keeps a single edge
    db.associations()
        .associate_default("contacts", &contact, "companies", &company)
        .expect("again");
    let forward = db
        .associations()
        .get("contacts", &contact, "companies", None, None)
        .expect("forward");
    assert_eq!(forward.results[0].association_types.len(), 1);
}

#[test]
fn labels_imply_the_unlabeled_edge() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let contact = create(&db, "contacts");
    let company = create(&db, "companies");
    let link = db
        .associations()
        .associate(
            "contacts",
            &contact,
            "companies",
            &company,
            &[AssociationSpec::new(AssociationCategory::HubspotDefined, PRIMARY)],
        )
        .expect("associate");
    assert_eq!(link.labels, vec!["Primary"]);

    let page = db
        .associations()
        .get("contacts", &contact, "companies", None, None)
        .expect("get");
    let types: Vec<(i64, Option<&str>)> = page.results[0]
        .association_types
        .iter()
        .map(|t| (t.type_id, t.label.as_deref()))
        .collect();
    assert_eq!(types, vec![(PRIMARY, Some("Primary")), (UNLABELED, None)]);

    // dropping the label leaves the plain association
    db.associations()
        .remove_labels(
            "contacts",
            &contact,
            "companies",
            &company,
            &[AssociationSpec::new(AssociationCategory::HubspotDefined, PRIMARY)],
        )
        .expect("remove label");
    let page = db
        .associations()
        .get("contacts", &contact, "companies", None, None)
        .expect("get");
    assert_eq!(page.results[0].association_types.len(), 1);
    assert_eq!(page.results[0].association_types[0].type_id, UNLABELED);
}

#[test]
fn mismatched_specs_are_rejected() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let contact = create(&db, "contacts");
    let deal = create(&db, "deals");
    // type 1 links contacts to companies, not deals
    let err = db
        .associations()
        .associate(
            "contacts",
            &contact,
            "deals",
            &deal,
            &[AssociationSpec::new(AssociationCategory::HubspotDefined, PRIMARY)],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let company = create(&db, "companies");
    let err = db
        .associations()
        .associate(
            "contacts",
            &contact,
            "companies",
            &company,
            &[AssociationSpec::new(AssociationCategory::UserDefined, PRIMARY)],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(
        db.associations()
            .get("contacts", &contact, "companies", None, None)
            .unwrap()
            .results
            .is_empty()
    );
}

#[test]
fn remove_clears_only_one_direction() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let contact = create(&db, "contacts");
    let company = create(&db, "companies");
    let graph = db.associations();
    graph
        .associate(
            "contacts",
            &contact,
            "companies",
            &company,
            &[AssociationSpec::new(AssociationCategory::HubspotDefined, PRIMARY)],
        )
        .expect("forward");
    graph
        .associate_default("companies", &company, "contacts", &contact)
        .expect("backward");
    graph
        .remove("contacts", &contact, "companies", &company)
        .expect("remove");
    assert!(graph.get("contacts", &contact, "companies", None, None).unwrap().is_empty());
    assert_eq!(graph.get("companies", &company, "contacts", None, None).unwrap().len(), 1);
}

#[test]
fn archived_targets_are_hidden() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let contact = create(&db, "contacts");
    let company = create(&db, "companies");
    db.associations()
        .associate_default("contacts", &contact, "companies", &company)
        .expect("associate");
    db.records().archive("companies", &company).expect("archive");
    assert!(
        db.associations()
            .get("contacts", &contact, "companies", None, None)
            .unwrap()
            .is_empty()
    );
    let err = db
        .associations()
        .associate_default("contacts", &contact, "companies", &company)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn association_pages_use_offsets() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let deal = create(&db, "deals");
    let mut contacts = Vec::new();
    for _ in 0..5 {
        let contact = create(&db, "contacts");
        db.associations()
            .associate_default("deals", &deal, "contacts", &contact)
            .expect("associate");
        contacts.push(contact);
    }
    let first = db
        .associations()
        .get("deals", &deal, "contacts", None, Some(2))
        .expect("first");
    assert_eq!(first.next_cursor(), Some("2"));
    let second = db
        .associations()
        .get("deals", &deal, "contacts", first.next_cursor(), Some(2))
        .expect("second");
    let third = db
        .associations()
        .get("deals", &deal, "contacts", second.next_cursor(), Some(2))
        .expect("third");
    assert!(third.next_cursor().is_none());
    let seen: Vec<String> = [first, second, third]
        .iter()
        .flat_map(|p| p.results.iter().map(|a| a.to_object_id.to_string()))
        .collect();
    assert_eq!(seen, contacts);
}

#[test]
fn targets_come_back_in_link_order() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let contact = create(&db, "contacts");
    let early = create(&db, "companies");
    let late = create(&db, "companies");
    let graph = db.associations();
    graph
        .associate_default("contacts", &contact, "companies", &late)
        .expect("late first");
    graph
        .associate_default("contacts", &contact, "companies", &early)
        .expect("early second");
    // a later label keeps the target where it was first linked
    graph
        .associate(
            "contacts",
            &contact,
            "companies",
            &late,
            &[AssociationSpec::new(AssociationCategory::HubspotDefined, PRIMARY)],
        )
        .expect("label");

    let first = graph
        .get("contacts", &contact, "companies", None, Some(1))
        .expect("first");
    let second = graph
        .get("contacts", &contact, "companies", first.next_cursor(), Some(1))
        .expect("second");
    assert!(second.next_cursor().is_none());
    assert_eq!(first.results[0].to_object_id.to_string(), late);
    assert_eq!(first.results[0].association_types.len(), 2);
    assert_eq!(second.results[0].to_object_id.to_string(), early);
}

#[test]
fn user_labels_round_trip() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let graph = db.associations();
    let created = graph
        .create_label("contacts", "companies", LabelInput::new("Founder").with_inverse("Founded by"))
        .expect("create label");
    assert_eq!(created.len(), 2);
    let founder = created[0].clone();
    assert_eq!(founder.category, AssociationCategory::UserDefined);
    assert_eq!(founder.label.as_deref(), Some("Founder"));
    assert_eq!(created[1].from_object_type_id, "0-2");
    assert_eq!(created[1].label.as_deref(), Some("Founded by"));

    let err = graph
        .create_label("contacts", "companies", LabelInput::new("Founder"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let renamed = graph
        .update_label("contacts", "companies", founder.type_id, LabelInput::new("Co-founder"))
        .expect("update");
    assert_eq!(renamed.label.as_deref(), Some("Co-founder"));
    assert_eq!(renamed.inverse_label.as_deref(), Some("Founded by"));

    // seeded types cannot be edited
    assert_eq!(
        graph
            .update_label("contacts", "companies", PRIMARY, LabelInput::new("Main"))
            .unwrap_err()
            .kind(),
        ErrorKind::Validation
    );
    assert!(
        graph
            .labels("contacts", "companies")
            .unwrap()
            .iter()
            .any(|d| d.label.as_deref() == Some("Co-founder"))
    );
}

#[test]
fn deleted_labels_leave_orphaned_edges() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let contact = create(&db, "contacts");
    let company = create(&db, "companies");
    let graph = db.associations();
    let label = graph
        .create_label("contacts", "companies", LabelInput::new("Advisor"))
        .expect("label")
        .remove(0);
    graph
        .associate(
            "contacts",
            &contact,
            "companies",
            &company,
            &[AssociationSpec::new(AssociationCategory::UserDefined, label.type_id)],
        )
        .expect("associate");
    graph
        .delete_label("contacts", "companies", label.type_id)
        .expect("delete label");

    let page = graph
        .get("contacts", &contact, "companies", None, None)
        .expect("get");
    let orphan = page.results[0]
        .association_types
        .iter()
        .find(|t| t.type_id == label.type_id)
        .expect("edge survives its label");
    assert!(orphan.label.is_none());
    assert_eq!(
        graph
            .delete_label("contacts", "companies", label.type_id)
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn batches_report_per_item() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let contact: RecordId = create(&db, "contacts").parse().unwrap();
    let company: RecordId = create(&db, "companies").parse().unwrap();
    let graph = db.associations();
    let response = graph
        .batch_create(
            "contacts",
            "companies",
            vec![
                AssociationPair {
                    from: contact,
                    to: company,
                    types: vec![],
                },
                AssociationPair {
                    from: RecordId(999_999),
                    to: company,
                    types: vec![],
                },
            ],
        )
        .expect("batch create");
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.errors[0].kind, ErrorKind::NotFound);

    let read = graph
        .batch_read("contacts", "companies", vec![contact, RecordId(999_999)])
        .expect("batch read");
    assert_eq!(read.results[0].to[0].to_object_id, company);
    assert_eq!(read.num_errors(), 1);

    let archived = graph
        .batch_archive(
            "contacts",
            "companies",
            vec![ArchiveInput {
                from: contact,
                to: vec![company],
            }],
        )
        .expect("batch archive");
    assert!(!archived.has_errors());
    assert!(
        graph
            .get("contacts", &contact.to_string(), "companies", None, None)
            .unwrap()
            .is_empty()
    );

    let too_many: Vec<RecordId> = (0..1001).map(RecordId).collect();
    assert_eq!(
        graph.batch_read("contacts", "companies", too_many).unwrap_err().kind(),
        ErrorKind::Validation
    );
}

#[test]
fn associations_can_be_created_with_records() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let company: RecordId = create(&db, "companies").parse().unwrap();
    let input = RecordInput::new([("email", "new@x.com")]).with_association(
        crmock::association::AssociationInput {
            to: company,
            types: vec![AssociationSpec::new(AssociationCategory::HubspotDefined, UNLABELED)],
        },
    );
    let contact = db.records().create("contacts", input).expect("create");
    let page = db
        .associations()
        .get("contacts", &contact.id.to_string(), "companies", None, None)
        .expect("get");
    assert_eq!(page.results[0].to_object_id, company);
}

#[test]
fn default_batches_link_the_good_pairs() {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let contact: RecordId = create(&db, "contacts").parse().unwrap();
    let acme: RecordId = create(&db, "companies").parse().unwrap();
    let globex: RecordId = create(&db, "companies").parse().unwrap();
    let response = db
        .associations()
        .batch_associate_default(
            "contacts",
            "companies",
            vec![(contact, acme), (contact, RecordId(424_242)), (contact, globex)],
        )
        .expect("batch");
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.num_errors(), 1);
    assert_eq!(response.errors[0].index, 1);
    assert_eq!(response.errors[0].kind, ErrorKind::NotFound);

    let page = db
        .associations()
        .get("contacts", &contact.to_string(), "companies", None, None)
        .expect("get");
    let linked: Vec<(RecordId, i64)> = page
        .results
        .iter()
        .map(|a| (a.to_object_id, a.association_types[0].type_id))
        .collect();
    assert_eq!(linked, vec![(acme, UNLABELED), (globex, UNLABELED)]);
}
