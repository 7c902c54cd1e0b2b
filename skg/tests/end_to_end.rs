//! Literal end-to-end scenarios and boundary behaviors exercised through the
//! public `Database` facade, against a fresh `tempfile` database per test.

use skg::{Budget, ColumnDescriptor, ColumnType, Database, EnvelopeCode, Error};

fn open_fresh() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    (dir, db)
}

#[test]
fn create_insert_query() {
    let (_dir, db) = open_fresh();
    db.create_vertex_label("v").unwrap();
    db.create_edge_label("e", "v", "v").unwrap();

    db.add_edge("a", "v", "b", "v", "e", 1.0, Vec::new(), true).unwrap();
    db.add_edge("a", "v", "c", "v", "e", 1.0, Vec::new(), true).unwrap();
    db.add_edge("c", "v", "a", "v", "e", 1.0, Vec::new(), true).unwrap();

    let mut out = db.get_out_vertices("a", None).unwrap();
    out.sort();
    assert_eq!(out, vec!["b".to_string(), "c".to_string()]);

    let inn = db.get_in_vertices("a", None).unwrap();
    assert_eq!(inn, vec!["c".to_string()]);

    assert_eq!(db.num_edges(), 3);
}

#[test]
fn self_loop_rejected_and_edge_count_unchanged() {
    let (_dir, db) = open_fresh();
    db.create_vertex_label("v").unwrap();
    db.create_edge_label("e", "v", "v").unwrap();

    let err = db
        .add_edge("x", "v", "x", "v", "e", 1.0, Vec::new(), true)
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedSelfLoop));
    assert_eq!(db.num_edges(), 0);
}

#[test]
fn duplicate_edge_add_updates_in_place() {
    let (_dir, db) = open_fresh();
    db.create_vertex_label("v").unwrap();
    db.create_edge_label("e", "v", "v").unwrap();

    db.add_edge("a", "v", "b", "v", "e", 1.0, Vec::new(), true).unwrap();
    db.add_edge("a", "v", "b", "v", "e", 2.5, Vec::new(), true).unwrap();

    let edge = db.get_edge_attr("a", "b", "e", "v", "v").unwrap().unwrap();
    assert_eq!(edge.weight, 2.5);
    assert_eq!(db.num_edges(), 1);
}

#[test]
fn shortest_path_finds_direct_edge() {
    let (_dir, db) = open_fresh();
    db.create_vertex_label("v").unwrap();
    db.create_edge_label("e", "v", "v").unwrap();

    for (src, dst) in [("a", "b"), ("b", "c"), ("c", "d"), ("a", "d")] {
        db.add_edge(src, "v", dst, "v", "e", 1.0, Vec::new(), true).unwrap();
    }

    let envelope = db.shortest_path("a", "d", 10, None, Budget::default()).unwrap();
    assert_eq!(envelope.code, EnvelopeCode::Ok);
    assert_eq!(envelope.data, vec!["v:a -e-> v:d".to_string()]);
}

#[test]
fn get_out_edges_respects_nlimit() {
    let (_dir, db) = open_fresh();
    db.create_vertex_label("v").unwrap();
    db.create_edge_label("e", "v", "v").unwrap();

    for i in 0..100 {
        db.add_edge("s", "v", &format!("t{i}"), "v", "e", 1.0, Vec::new(), true)
            .unwrap();
    }

    let edges = db.get_out_edges("s", Some(10)).unwrap();
    assert_eq!(edges.len(), 10);
}

#[test]
fn flush_close_open_round_trip_preserves_counts() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.create_vertex_label("v").unwrap();
        db.create_edge_label("e", "v", "v").unwrap();
        db.add_edge("a", "v", "b", "v", "e", 1.0, Vec::new(), true).unwrap();
        db.add_edge("a", "v", "c", "v", "e", 1.0, Vec::new(), true).unwrap();
        db.add_edge("c", "v", "a", "v", "e", 1.0, Vec::new(), true).unwrap();
        db.close().unwrap();
    }

    let reopened = Database::open(dir.path()).unwrap();
    assert_eq!(reopened.num_edges(), 3);
    assert_eq!(reopened.num_vertices(), 3);
    let mut out = reopened.get_out_vertices("a", None).unwrap();
    out.sort();
    assert_eq!(out, vec!["b".to_string(), "c".to_string()]);
}

#[test]
fn delete_then_readd_restores_edge() {
    let (_dir, db) = open_fresh();
    db.create_vertex_label("v").unwrap();
    db.create_edge_label("e", "v", "v").unwrap();
    db.add_edge("a", "v", "b", "v", "e", 1.0, Vec::new(), true).unwrap();

    db.delete_edge("a", "b", "e", "v", "v").unwrap();
    assert!(matches!(
        db.get_edge_attr("a", "b", "e", "v", "v").unwrap(),
        None
    ));

    db.add_edge("a", "v", "b", "v", "e", 1.0, Vec::new(), true).unwrap();
    assert!(db.get_edge_attr("a", "b", "e", "v", "v").unwrap().is_some());
}

#[test]
fn delete_after_flush_is_not_lost() {
    let (_dir, db) = open_fresh();
    db.create_vertex_label("v").unwrap();
    db.create_edge_label("e", "v", "v").unwrap();
    db.add_edge("a", "v", "b", "v", "e", 1.0, Vec::new(), true).unwrap();
    db.flush().unwrap();
    assert!(db.get_edge_attr("a", "b", "e", "v", "v").unwrap().is_some());

    db.delete_edge("a", "b", "e", "v", "v").unwrap();
    assert!(matches!(
        db.get_edge_attr("a", "b", "e", "v", "v").unwrap(),
        None
    ));
    assert_eq!(db.num_edges(), 0);
}

#[test]
fn column_count_over_max_is_rejected() {
    let (_dir, db) = open_fresh();
    db.create_edge_label("e", "v", "v").unwrap();
    for i in 0..64 {
        db.add_edge_column("e", "v", "v", ColumnDescriptor::new(format!("c{i}"), ColumnType::Tag))
            .unwrap();
    }
    let err = db
        .add_edge_column("e", "v", "v", ColumnDescriptor::new("overflow", ColumnType::Tag))
        .unwrap_err();
    assert!(matches!(err, Error::NotSupported(_)));
}

#[test]
fn edge_label_rejects_varchar_column() {
    let (_dir, db) = open_fresh();
    db.create_edge_label("e", "v", "v").unwrap();
    let err = db
        .add_edge_column("e", "v", "v", ColumnDescriptor::new("notes", ColumnType::Varchar))
        .unwrap_err();
    assert!(matches!(err, Error::NotSupported(_)));
}

#[test]
fn vid_beyond_existing_intervals_extends_the_tree() {
    let dir = tempfile::tempdir().unwrap();
    let options = skg::SkgOptions {
        max_interval_length: 4,
        ..skg::SkgOptions::default()
    };
    let db = Database::open_with_options(dir.path(), options).unwrap();
    db.create_vertex_label("v").unwrap();
    db.create_edge_label("e", "v", "v").unwrap();
    for i in 0..10 {
        db.add_edge("s", "v", &format!("t{i}"), "v", "e", 1.0, Vec::new(), true)
            .unwrap();
    }
    let out = db.get_out_vertices("s", None).unwrap();
    assert_eq!(out.len(), 10);
}

#[test]
fn delete_vertex_removes_incident_edges() {
    let (_dir, db) = open_fresh();
    db.create_vertex_label("v").unwrap();
    db.create_edge_label("e", "v", "v").unwrap();
    db.add_edge("a", "v", "b", "v", "e", 1.0, Vec::new(), true).unwrap();
    db.add_edge("b", "v", "c", "v", "e", 1.0, Vec::new(), true).unwrap();
    assert_eq!(db.num_edges(), 2);

    db.delete_vertex("b").unwrap();
    assert_eq!(db.num_edges(), 0);
    assert!(!db.has_vertex("b"));
}
