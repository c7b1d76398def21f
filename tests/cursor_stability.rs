use proptest::prelude::*;

use crmock::database::Database;
use crmock::persist::PersistenceMode;
use crmock::record::{ListOptions, RecordId, RecordInput};
use crmock::search::{Filter, SearchRequest};

fn seeded(count: usize, archived_every: usize) -> (Database, Vec<RecordId>) {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    let mut live = Vec::new();
    for n in 0..count {
        let record = db
            .records()
            .create("deals", RecordInput::new([("amount", (n % 3).to_string())]))
            .expect("create");
        if archived_every > 0 && n % archived_every == 0 {
            db.records().archive("deals", &record.id.to_string()).expect("archive");
        } else {
            live.push(record.id);
        }
    }
    (db, live)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn list_pages_cover_live_records_once(count in 0usize..40, limit in 1usize..12, archived_every in 0usize..5) {
        let (db, live) = seeded(count, archived_every);
        let mut seen = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = db
                .records()
                .list("deals", &ListOptions { limit: Some(limit), after: after.clone(), ..Default::default() })
                .expect("list");
            prop_assert!(page.len() <= limit);
            seen.extend(page.results.iter().map(|r| r.id));
            match page.next_cursor() {
                Some(next) => after = Some(next.to_string()),
                None => break,
            }
        }
        prop_assert_eq!(seen, live);
    }

    #[test]
    fn search_pages_cover_matches_once(count in 0usize..40, limit in 1usize..12) {
        let (db, _) = seeded(count, 0);
        let request = SearchRequest::new()
            .filter_group(vec![Filter::new("amount", "LTE").with_value("1")])
            .limit(limit);
        let total = db.search().execute("deals", &request).expect("search").total;
        prop_assert_eq!(total, (0..count).filter(|n| n % 3 <= 1).count());

        let mut seen = Vec::new();
        let mut request = request;
        loop {
            let response = db.search().execute("deals", &request).expect("search");
            prop_assert_eq!(response.total, total);
            seen.extend(response.results().iter().map(|r| r.id));
            match response.next_cursor() {
                Some(next) => request = request.after(next),
                None => break,
            }
        }
        let mut sorted = seen.clone();
        sorted.sort_by_key(|id| id.0);
        sorted.dedup();
        prop_assert_eq!(seen.len(), total);
        prop_assert_eq!(sorted, seen);
    }

    #[test]
    fn inserts_during_a_walk_are_never_replayed(count in 1usize..30, limit in 1usize..8, inserted in 1usize..6) {
        let (db, live) = seeded(count, 0);
        let mut seen = Vec::new();
        let mut after: Option<String> = None;
        let mut added = Vec::new();
        loop {
            let page = db
                .records()
                .list("deals", &ListOptions { limit: Some(limit), after: after.clone(), ..Default::default() })
                .expect("list");
            seen.extend(page.results.iter().map(|r| r.id));
            if added.len() < inserted {
                added.push(db.records().create("deals", RecordInput::default()).expect("create").id);
            }
            match page.next_cursor() {
                Some(next) => after = Some(next.to_string()),
                None => break,
            }
        }
        // strictly ascending, so nothing was seen twice
        prop_assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
        prop_assert_eq!(&seen[..live.len()], &live[..]);
        prop_assert!(seen[live.len()..].iter().all(|id| added.contains(id)));
    }
}
