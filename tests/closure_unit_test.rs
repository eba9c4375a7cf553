//! Unit tests for the keep set and referential closure.

mod common;

use common::CountingStore;
use db_subsetter::error::SubsetError;
use db_subsetter::schema::{declare_foreign_key, SchemaGraph};
use db_subsetter::store::{RowId, Store, Value};
use db_subsetter::subset::{ClosureResolver, KeepSet};
use smallvec::smallvec;

fn text_id(s: &str) -> RowId {
    smallvec![Value::from(s)]
}

fn kept_names(keep: &KeepSet, graph: &SchemaGraph, table: &str) -> Vec<String> {
    let id = graph.schema.get_table_id(table).unwrap();
    keep.sorted_ids(id)
        .into_iter()
        .map(|row| match &row[0] {
            Value::Text(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

fn travel() -> (CountingStore, SchemaGraph) {
    let store = common::memory_store(common::TRAVEL_DDL);
    store.execute_batch(common::TRAVEL_DATA).unwrap();
    let store = CountingStore::new(store);
    let graph = SchemaGraph::build(store.introspect().unwrap()).unwrap();
    (store, graph)
}

#[test]
fn test_keep_set_basics() {
    let mut keep = KeepSet::new(2);
    let t = db_subsetter::schema::TableId(1);

    assert!(keep.is_empty());
    assert!(keep.insert(t, text_id("b")));
    assert!(keep.insert(t, text_id("a")));
    assert!(!keep.insert(t, text_id("a")));

    assert!(keep.contains(t, &text_id("a")));
    assert!(!keep.contains(db_subsetter::schema::TableId(0), &text_id("a")));
    assert_eq!(keep.len(t), 2);
    assert_eq!(keep.total(), 2);
    assert_eq!(keep.sorted_ids(t), vec![text_id("a"), text_id("b")]);
}

#[test]
fn test_closure_adds_parents_transitively() {
    let (store, graph) = travel();
    let mut keep = KeepSet::new(graph.len());
    let landmarks = graph.schema.get_table_id("landmarks").unwrap();
    keep.insert(landmarks, text_id("Lift Bridge"));

    let stats = ClosureResolver::new(&graph, &store, 500)
        .resolve(&mut keep)
        .unwrap();

    assert_eq!(kept_names(&keep, &graph, "cities"), vec!["Duluth"]);
    assert_eq!(kept_names(&keep, &graph, "states"), vec!["MN"]);
    assert_eq!(stats.rows_added, 2);
    assert_eq!(keep.total(), 3);
}

#[test]
fn test_closure_reaches_fixed_point_without_repeat_lookups() {
    let (store, graph) = travel();
    let mut keep = KeepSet::new(graph.len());
    let landmarks = graph.schema.get_table_id("landmarks").unwrap();
    let cities = graph.schema.get_table_id("cities").unwrap();

    // Two children share Duluth; Duluth is also already kept
    keep.insert(landmarks, text_id("Lift Bridge"));
    keep.insert(landmarks, text_id("Trinity Church"));
    keep.insert(cities, text_id("Duluth"));

    let resolver = ClosureResolver::new(&graph, &store, 500);
    let stats = resolver.resolve(&mut keep).unwrap();

    assert_eq!(kept_names(&keep, &graph, "cities"), vec!["Boston", "Duluth"]);
    assert_eq!(kept_names(&keep, &graph, "states"), vec!["MA", "MN"]);
    assert_eq!(stats.rows_added, 3); // Boston, MA, MN

    // A second pass over the closed set adds nothing
    let before = keep.total();
    let again = resolver.resolve(&mut keep).unwrap();
    assert_eq!(again.rows_added, 0);
    assert_eq!(keep.total(), before);
}

#[test]
fn test_null_foreign_keys_need_no_parent() {
    let (store, graph) = travel();
    let mut keep = KeepSet::new(graph.len());
    let zeppelins = graph.schema.get_table_id("zeppelins").unwrap();
    keep.insert(zeppelins, text_id("Graf Zeppelin"));
    keep.insert(zeppelins, text_id("USS Los Angeles"));

    let stats = ClosureResolver::new(&graph, &store, 500)
        .resolve(&mut keep)
        .unwrap();

    assert_eq!(stats.rows_added, 0);
    assert_eq!(stats.null_references, 2);
    assert_eq!(store.lookups(), 0);
    assert_eq!(keep.total(), 2);
}

#[test]
fn test_partially_null_composite_key_is_skipped() {
    let source = common::memory_store(common::COMPOSITE_DDL);
    source.execute_batch(common::COMPOSITE_DATA).unwrap();
    let store = CountingStore::new(source);
    let graph = SchemaGraph::build(store.introspect().unwrap()).unwrap();

    let shipments = graph.schema.get_table_id("shipments").unwrap();
    let bins = graph.schema.get_table_id("bins").unwrap();
    let warehouses = graph.schema.get_table_id("warehouses").unwrap();

    let mut keep = KeepSet::new(graph.len());
    for id in [1, 3, 4] {
        keep.insert(shipments, smallvec![Value::Int(id)]);
    }

    let stats = ClosureResolver::new(&graph, &store, 500)
        .resolve(&mut keep)
        .unwrap();

    // Shipment 1 pulls bin (OSL, 2) and warehouse OSL; 3 and 4 have a NULL component
    let expected: Vec<RowId> = vec![smallvec![Value::from("OSL"), Value::Int(2)]];
    assert_eq!(keep.sorted_ids(bins), expected);
    assert_eq!(keep.sorted_ids(warehouses), vec![text_id("OSL")]);
    assert_eq!(stats.null_references, 2);
    assert_eq!(store.keys_looked_up(), 2);
}

#[test]
fn test_small_batches_give_same_closure() {
    let (store, graph) = travel();
    let landmarks = graph.schema.get_table_id("landmarks").unwrap();

    let mut wide = KeepSet::new(graph.len());
    let mut narrow = KeepSet::new(graph.len());
    for name in ["Lift Bridge", "Mendelson's", "Michigan Tech"] {
        wide.insert(landmarks, text_id(name));
        narrow.insert(landmarks, text_id(name));
    }

    ClosureResolver::new(&graph, &store, 500)
        .resolve(&mut wide)
        .unwrap();
    let lookups_wide = store.lookups();
    ClosureResolver::new(&graph, &store, 1)
        .resolve(&mut narrow)
        .unwrap();
    let lookups_narrow = store.lookups() - lookups_wide;

    for table in ["cities", "states"] {
        assert_eq!(
            kept_names(&wide, &graph, table),
            kept_names(&narrow, &graph, table)
        );
    }
    assert_eq!(kept_names(&wide, &graph, "states"), vec!["MI", "MN", "OH"]);
    assert!(lookups_narrow > lookups_wide);
}

#[test]
fn test_dangling_reference_is_reported() {
    // The database does not enforce this foreign key; it is declared on top
    let store = common::memory_store(
        "CREATE TABLE authors (id INTEGER PRIMARY KEY);
         CREATE TABLE books (id INTEGER PRIMARY KEY, author_id INTEGER);
         INSERT INTO authors VALUES (1);
         INSERT INTO books VALUES (10, 1), (11, 99);",
    );
    let mut schema = store.introspect().unwrap();
    declare_foreign_key(
        &mut schema,
        "books",
        "FOREIGN KEY (author_id) REFERENCES authors(id)",
    )
    .unwrap();
    let graph = SchemaGraph::build(schema).unwrap();
    let books = graph.schema.get_table_id("books").unwrap();

    let mut keep = KeepSet::new(graph.len());
    keep.insert(books, smallvec![Value::Int(10)]);
    keep.insert(books, smallvec![Value::Int(11)]);

    let err = ClosureResolver::new(&graph, &store, 500)
        .resolve(&mut keep)
        .unwrap_err();

    match err {
        SubsetError::DanglingReference {
            table,
            row,
            columns,
            parent_table,
            value,
        } => {
            assert_eq!(table, "books");
            assert_eq!(row, "11");
            assert_eq!(columns, "author_id");
            assert_eq!(parent_table, "authors");
            assert_eq!(value, "99");
        }
        other => panic!("expected dangling reference, got {}", other),
    }
}
