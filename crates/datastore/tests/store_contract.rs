//! Behaviour every engine must share.  Each check is written once against [RecordStore] and instantiated per engine
//! at the bottom of the file.
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use tabula_records::{
    new_id, now, parse_cursor, Cells, CellsWrite, Error, Field, FieldType, Filter, FilterLogic,
    ListOpts, NewLink, NewRecord, Operator, Record, RecordStore, SortSpec,
};

fn new_record(table_id: &str, cells: Value) -> NewRecord {
    NewRecord {
        id: new_id(),
        table_id: table_id.to_string(),
        cells: serde_json::from_value::<Cells>(cells).unwrap(),
        created_by: "u1".into(),
        created_at: now(),
    }
}

fn fields() -> Vec<Field> {
    vec![
        Field::new("name", "Name", FieldType::SingleLineText),
        Field::new("f1", "Amount", FieldType::Number),
        Field::new("done", "Done", FieldType::Checkbox),
        Field::new("due", "Due", FieldType::Date),
    ]
}

fn create(store: &impl RecordStore, cells: Value) -> Record {
    store.create(new_record("t1", cells)).unwrap()
}

fn list_ids(store: &impl RecordStore, opts: &ListOpts) -> Vec<String> {
    store
        .list("t1", &fields(), opts)
        .unwrap()
        .records
        .into_iter()
        .map(|r| r.id)
        .collect()
}

fn filtered(filter: Filter) -> ListOpts {
    ListOpts {
        filters: vec![filter],
        ..Default::default()
    }
}

fn searching(text: &str) -> ListOpts {
    ListOpts {
        search: text.to_string(),
        ..Default::default()
    }
}

fn ids(records: &[&Record]) -> Vec<String> {
    records.iter().map(|r| r.id.clone()).collect()
}

fn positions_are_monotonic(store: &impl RecordStore) {
    let a = create(store, json!({}));
    let b = create(store, json!({}));
    let other = store.create(new_record("t2", json!({}))).unwrap();
    assert_eq!((a.position, b.position, other.position), (1, 2, 1));

    let batch = store
        .create_batch((0..3).map(|_| new_record("t1", json!({}))).collect())
        .unwrap();
    assert_eq!(
        batch.iter().map(|r| r.position).collect::<Vec<_>>(),
        vec![3, 4, 5]
    );
}

fn cells_round_trip(store: &impl RecordStore) {
    let cells = json!({
        "name": "Widget \"deluxe\"",
        "f1": 12.5,
        "done": true,
        "tags": ["a", "b"],
        "meta": {"nested": [1, null]},
    });
    let created = create(store, cells.clone());
    let got = store.get_by_id(&created.id).unwrap();
    assert_eq!(got, created);
    assert_eq!(serde_json::to_value(&got.cells).unwrap(), cells);
}

fn get_by_ids_is_partial(store: &impl RecordStore) {
    let a = create(store, json!({}));
    let found = store
        .get_by_ids(&[a.id.clone(), "missing".into(), a.id.clone()])
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(found.contains_key(&a.id));
    assert!(store.get_by_id("missing").unwrap_err().is_not_found());
}

fn update_batches_are_atomic(store: &impl RecordStore) {
    let a = create(store, json!({"f1": 1}));
    let b = create(store, json!({"f1": 2}));
    let later = now();

    let write = |id: &str, cells: Value| CellsWrite {
        id: id.to_string(),
        cells: serde_json::from_value(cells).unwrap(),
        updated_by: "u2".into(),
        updated_at: later,
    };

    let updated = store.update(write(&a.id, json!({"f1": 10}))).unwrap();
    assert_eq!(updated.cells["f1"], json!(10));
    assert_eq!(updated.updated_by, "u2");
    assert_eq!(updated.created_by, "u1");
    assert_eq!(updated.position, a.position);

    let batch = store
        .update_batch(vec![
            write(&b.id, json!({"f1": 20})),
            write(&a.id, json!({"f1": 30})),
        ])
        .unwrap();
    assert_eq!(
        batch.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
        vec![b.id.clone(), a.id.clone()]
    );

    let err = store
        .update_batch(vec![
            write(&a.id, json!({"f1": 99})),
            write("missing", json!({})),
        ])
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.get_by_id(&a.id).unwrap().cells["f1"], json!(30));
}

fn single_cell_writes(store: &impl RecordStore) {
    let a = create(store, json!({"f1": 1, "name": "x"}));
    let at = now();

    store.update_cell(&a.id, "f1", &json!([1, 2]), "u2", at).unwrap();
    store.clear_cell(&a.id, "name", "u3", at).unwrap();
    let got = store.get_by_id(&a.id).unwrap();
    assert_eq!(serde_json::to_value(&got.cells).unwrap(), json!({"f1": [1, 2]}));
    assert_eq!(got.updated_by, "u3");

    // Null is removal, not a stored null.
    store.update_cell(&a.id, "f1", &Value::Null, "u2", at).unwrap();
    assert!(store.get_by_id(&a.id).unwrap().cells.is_empty());

    assert!(store
        .update_cell("missing", "f1", &json!(1), "u2", at)
        .unwrap_err()
        .is_not_found());
    assert!(matches!(
        store.update_cell(&a.id, "f\"1", &json!(1), "u2", at),
        Err(Error::InvalidArgument(_))
    ));
}

fn numeric_filters_skip_text_that_is_not_a_number(store: &impl RecordStore) {
    let phone = create(store, json!({"f1": "555-1234"}));
    let version = create(store, json!({"f1": "1.2.3"}));
    let dashes = create(store, json!({"f1": "--5"}));
    let fifty = create(store, json!({"f1": 50}));
    let seven = create(store, json!({"f1": " 7 "}));
    let na = create(store, json!({"f1": "n/a"}));

    let gt = |x: i64| filtered(Filter::new("f1", Operator::GreaterThan, x));
    assert_eq!(list_ids(store, &gt(100)), Vec::<String>::new());
    assert_eq!(list_ids(store, &gt(7)), ids(&[&fifty]));
    assert_eq!(
        list_ids(store, &filtered(Filter::new("f1", Operator::LessThan, 10))),
        ids(&[&seven])
    );

    // Values which aren't numbers sort last, in position order.
    let sorted = ListOpts {
        sorts: vec![SortSpec::asc("f1")],
        ..Default::default()
    };
    assert_eq!(
        list_ids(store, &sorted),
        ids(&[&seven, &fifty, &phone, &version, &dashes, &na])
    );
}

fn greater_than(store: &impl RecordStore) {
    for x in [5, 10, 15] {
        create(store, json!({ "f1": x }));
    }

    let list = store
        .list("t1", &fields(), &filtered(Filter::new("f1", Operator::GreaterThan, 7)))
        .unwrap();
    assert_eq!(list.total, 2);
    assert_eq!(
        list.records
            .iter()
            .map(|r| r.cells["f1"].clone())
            .collect::<Vec<_>>(),
        vec![json!(10), json!(15)]
    );
}

fn numeric_in_lists_compare_values(store: &impl RecordStore) {
    let int = create(store, json!({"f1": 3}));
    let real = create(store, json!({"f1": 3.0}));
    let text = create(store, json!({"f1": "3"}));
    let four = create(store, json!({"f1": 4}));
    let empty = create(store, json!({}));

    assert_eq!(
        list_ids(store, &filtered(Filter::new("f1", Operator::In, json!([3])))),
        ids(&[&int, &real, &text])
    );
    assert_eq!(
        list_ids(store, &filtered(Filter::new("f1", Operator::In, json!([3.0, 4])))),
        ids(&[&int, &real, &text, &four])
    );
    assert_eq!(
        list_ids(store, &filtered(Filter::new("f1", Operator::NotIn, json!(["3"])))),
        ids(&[&four, &empty])
    );
}

fn booleans_read_as_true_and_false(store: &impl RecordStore) {
    let flag = create(store, json!({"name": true, "done": true}));
    let one = create(store, json!({"name": "1", "done": false}));
    let word = create(store, json!({"name": "true"}));

    assert_eq!(
        list_ids(store, &filtered(Filter::new("name", Operator::In, json!(["true"])))),
        ids(&[&flag, &word])
    );
    assert_eq!(
        list_ids(store, &filtered(Filter::new("name", Operator::Equals, "true"))),
        ids(&[&flag, &word])
    );
    assert_eq!(list_ids(store, &searching("true")), ids(&[&flag, &word]));
    assert_eq!(list_ids(store, &searching("1")), ids(&[&one]));

    assert_eq!(
        list_ids(store, &filtered(Filter::new("done", Operator::IsChecked, Value::Null))),
        ids(&[&flag])
    );
    assert_eq!(
        list_ids(store, &filtered(Filter::new("done", Operator::IsUnchecked, Value::Null))),
        ids(&[&one, &word])
    );
}

fn unicode_text_matches_in_any_case(store: &impl RecordStore) {
    let accented = create(store, json!({"name": "École primaire"}));
    let plain = create(store, json!({"name": "ecole"}));

    for needle in ["école", "ÉCOLE", "École"] {
        assert_eq!(list_ids(store, &searching(needle)), ids(&[&accented]), "{}", needle);
    }
    assert_eq!(
        list_ids(store, &filtered(Filter::new("name", Operator::Contains, "ÉCOLE"))),
        ids(&[&accented])
    );
    assert_eq!(
        list_ids(store, &filtered(Filter::new("name", Operator::StartsWith, "éC"))),
        ids(&[&accented])
    );
    assert_eq!(
        list_ids(store, &filtered(Filter::new("name", Operator::EndsWith, "PRIMAIRE"))),
        ids(&[&accented])
    );
    assert_eq!(
        list_ids(store, &filtered(Filter::new("name", Operator::NotContains, "École"))),
        ids(&[&plain])
    );
}

fn sorts_filters_and_search(store: &impl RecordStore) {
    let apple = create(
        store,
        json!({"name": "Apple pie", "f1": 3, "done": true, "due": "2024-03-01"}),
    );
    let banana = create(
        store,
        json!({"name": "banana", "f1": 1, "done": false, "due": "2024-01-15"}),
    );
    let pine = create(store, json!({"name": "Pineapple", "f1": "2"}));
    let sale = create(store, json!({"name": "50% off", "f1": 10}));
    store.create(new_record("t2", json!({"name": "apple"}))).unwrap();

    assert_eq!(list_ids(store, &searching("APPLE")), ids(&[&apple, &pine]));
    assert_eq!(list_ids(store, &searching("50%")), ids(&[&sale]));

    let sorted = ListOpts {
        sorts: vec![SortSpec::desc("f1")],
        ..Default::default()
    };
    assert_eq!(
        list_ids(store, &sorted),
        ids(&[&sale, &apple, &pine, &banana])
    );

    let either = ListOpts {
        filters: vec![
            Filter::new("due", Operator::IsBefore, "2024-02-01"),
            Filter::new("name", Operator::StartsWith, "pine"),
        ],
        filter_logic: FilterLogic::Or,
        ..Default::default()
    };
    assert_eq!(list_ids(store, &either), ids(&[&banana, &pine]));

    let excluded = ListOpts {
        filters: vec![Filter::new("name", Operator::NotEquals, "banana")],
        search: "a".into(),
        ..Default::default()
    };
    assert_eq!(list_ids(store, &excluded), ids(&[&apple, &pine]));

    // Filters on unknown fields are dropped rather than matching nothing.
    assert_eq!(
        list_ids(store, &filtered(Filter::new("nope", Operator::Equals, "x"))).len(),
        4
    );
}

fn pagination_visits_everything_once(store: &impl RecordStore) {
    let created = store
        .create_batch((0..10).map(|i| new_record("t1", json!({ "f1": i }))).collect())
        .unwrap();

    let mut seen = vec![];
    let mut opts = ListOpts {
        limit: 3,
        ..Default::default()
    };
    loop {
        let page = store.list("t1", &fields(), &opts).unwrap();
        assert_eq!(page.total, 10);
        seen.extend(page.records.iter().map(|r| r.id.clone()));
        match page.next_cursor() {
            Some(c) => opts.offset = parse_cursor(Some(&c)).unwrap(),
            None => break,
        }
    }
    assert_eq!(seen, created.into_iter().map(|r| r.id).collect::<Vec<_>>());

    opts.offset = 10;
    let past_the_end = store.list("t1", &fields(), &opts).unwrap();
    assert!(past_the_end.records.is_empty());
    assert_eq!(past_the_end.total, 10);
}

fn offsets_beyond_the_engine_are_rejected(store: &impl RecordStore) {
    create(store, json!({}));
    let opts = ListOpts {
        offset: usize::MAX,
        ..Default::default()
    };
    let result = store.list("t1", &fields(), &opts);
    if i64::try_from(usize::MAX).is_err() {
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}

fn deletes_cascade_to_links(store: &impl RecordStore) {
    let a = create(store, json!({}));
    let b = create(store, json!({}));
    let keep = create(store, json!({}));

    for (source, target) in [(&a, &keep), (&keep, &b), (&keep, &a)] {
        store
            .create_link(NewLink {
                id: new_id(),
                source_record_id: source.id.clone(),
                source_field_id: "link".into(),
                target_record_id: target.id.clone(),
                created_at: now(),
            })
            .unwrap();
    }

    store
        .delete_batch(&[a.id.clone(), b.id.clone(), "missing".into()])
        .unwrap();
    assert!(store.list_links_by_source(&keep.id, None).unwrap().is_empty());
    assert!(store.list_links_by_target(&keep.id).unwrap().is_empty());
    assert_eq!(
        store
            .get_by_ids(&[a.id.clone(), b.id.clone(), keep.id.clone()])
            .unwrap()
            .len(),
        1
    );

    assert!(store.delete(&a.id).unwrap_err().is_not_found());
    store.delete(&keep.id).unwrap();
    assert_eq!(store.list("t1", &fields(), &ListOpts::default()).unwrap().total, 0);
}

fn links(store: &impl RecordStore) {
    let a = create(store, json!({}));
    let b = store.create(new_record("t2", json!({}))).unwrap();
    let c = store.create(new_record("t2", json!({}))).unwrap();

    let link = |target: &Record, field: &str| NewLink {
        id: new_id(),
        source_record_id: a.id.clone(),
        source_field_id: field.to_string(),
        target_record_id: target.id.clone(),
        created_at: now(),
    };

    assert_eq!(store.create_link(link(&b, "l1")).unwrap().position, 1);
    assert_eq!(store.create_link(link(&c, "l1")).unwrap().position, 2);
    assert_eq!(store.create_link(link(&b, "l2")).unwrap().position, 1);

    let mut dangling = link(&b, "l1");
    dangling.target_record_id = "missing".into();
    assert!(store.create_link(dangling).unwrap_err().is_not_found());

    let by_field = store.list_links_by_source(&a.id, Some("l1")).unwrap();
    assert_eq!(
        by_field.iter().map(|l| l.target_record_id.clone()).collect::<Vec<_>>(),
        vec![b.id.clone(), c.id.clone()]
    );
    assert_eq!(store.list_links_by_source(&a.id, None).unwrap().len(), 3);
    assert_eq!(store.list_links_by_target(&b.id).unwrap().len(), 2);

    store.delete_link(&a.id, "l1", &b.id).unwrap();
    store.delete_link(&a.id, "l1", &b.id).unwrap();
    assert_eq!(store.list_links_by_target(&b.id).unwrap().len(), 1);
}

macro_rules! engine_tests {
    ($engine:ident, $open:expr) => {
        mod $engine {
            use tabula_records::RecordStore;

            fn store() -> impl RecordStore {
                tabula_logging::log_to_stderr();
                $open
            }

            engine_tests!(@each
                positions_are_monotonic,
                cells_round_trip,
                get_by_ids_is_partial,
                update_batches_are_atomic,
                single_cell_writes,
                numeric_filters_skip_text_that_is_not_a_number,
                greater_than,
                numeric_in_lists_compare_values,
                booleans_read_as_true_and_false,
                unicode_text_matches_in_any_case,
                sorts_filters_and_search,
                pagination_visits_everything_once,
                offsets_beyond_the_engine_are_rejected,
                deletes_cascade_to_links,
                links
            );
        }
    };
    (@each $($name:ident),*) => {
        $(
            #[test]
            fn $name() {
                super::$name(&store());
            }
        )*
    };
}

engine_tests!(sqlite, tabula_datastore::SqliteStore::open_in_memory().unwrap());

#[cfg(feature = "duckdb")]
engine_tests!(duckdb_store, tabula_datastore::DuckDbStore::open_in_memory().unwrap());
