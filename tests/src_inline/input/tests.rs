use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;

static DIR_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn make_temp_dir() -> PathBuf {
    let mut dir = std::env::temp_dir();
    let id = DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
    dir.push(format!("foldscore_input_{}_{}", std::process::id(), id));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn sample_table() -> Table {
    Table::new(vec![
        Column::new("met_pt", vec![100.0, 200.0, 300.0, 400.0, 500.0]),
        Column::new("jet1_pt", vec![1.0, 2.0, 3.0, 4.0, 5.0]),
        Column::new("weight", vec![0.5, -0.5, 1.0, 1.5, 2.0]),
    ])
    .unwrap()
}

#[test]
fn test_table_rejects_ragged_columns() {
    let err = Table::new(vec![
        Column::new("a", vec![1.0, 2.0]),
        Column::new("b", vec![1.0]),
    ])
    .unwrap_err();
    assert!(matches!(err, InputError::InvalidInput(_)));
}

#[test]
fn test_table_rejects_duplicate_columns() {
    let err = Table::new(vec![
        Column::new("a", vec![1.0]),
        Column::new("a", vec![2.0]),
    ])
    .unwrap_err();
    assert!(matches!(err, InputError::InvalidInput(_)));
}

#[test]
fn test_project_orders_and_reports_missing() {
    let t = sample_table();
    let p = t
        .project(&["weight".to_string(), "met_pt".to_string()], "t")
        .unwrap();
    assert_eq!(p.column_names().collect::<Vec<_>>(), vec!["weight", "met_pt"]);
    assert_eq!(p.n_rows(), 5);

    let err = t.project(&["mjj".to_string()], "sample/sel_tree").unwrap_err();
    match err {
        InputError::MissingField { context, field } => {
            assert_eq!(context, "sample/sel_tree");
            assert_eq!(field, "mjj");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_select_ranges_preserves_order() {
    let t = sample_table();
    let s = t.select_ranges(&[0..1, 3..5]);
    assert_eq!(s.column("jet1_pt").unwrap(), &[1.0, 4.0, 5.0]);
    assert_eq!(s.column("weight").unwrap(), &[0.5, 1.5, 2.0]);
    let empty = t.select_ranges(&[]);
    assert_eq!(empty.n_rows(), 0);
    assert_eq!(empty.n_columns(), 3);
}

#[test]
fn test_concat_appends_in_order() {
    let a = sample_table().select_ranges(&[0..2]);
    let b = sample_table().select_ranges(&[4..5]);
    let c = Table::concat(&[a, Table::default(), b]).unwrap();
    assert_eq!(c.column("met_pt").unwrap(), &[100.0, 200.0, 500.0]);
}

#[test]
fn test_concat_rejects_schema_drift() {
    let a = sample_table();
    let b = a
        .project(&["jet1_pt".to_string(), "met_pt".to_string(), "weight".to_string()], "b")
        .unwrap();
    assert!(Table::concat(&[a, b]).is_err());
}

#[test]
fn test_store_roundtrip_plain_and_gz() {
    for compress in [false, true] {
        let dir = make_temp_dir();
        let store = JsonStore::new(&dir).compressed(compress);
        let table = sample_table();
        let path = store
            .write_container("ttbar", &[NamedTable::new("sel_tree", table.clone())])
            .unwrap();
        assert!(path.exists());
        assert_eq!(path.to_string_lossy().ends_with(".gz"), compress);
        assert!(store.container_exists("ttbar"));
        assert_eq!(store.read_table("ttbar", "sel_tree").unwrap(), table);
    }
}

#[test]
fn test_store_rewrite_switches_encoding() {
    let dir = make_temp_dir();
    JsonStore::new(&dir)
        .write_container("zll", &[NamedTable::new("t", sample_table())])
        .unwrap();
    JsonStore::new(&dir)
        .compressed(true)
        .write_container("zll", &[NamedTable::new("t", sample_table().select_ranges(&[0..1]))])
        .unwrap();
    assert!(!dir.join("zll.json").exists());
    assert_eq!(JsonStore::new(&dir).read_table("zll", "t").unwrap().n_rows(), 1);
}

#[test]
fn test_store_missing_container_and_table() {
    let dir = make_temp_dir();
    let store = JsonStore::new(&dir);
    let err = store.read_table("nothing", "sel_tree").unwrap_err();
    assert!(matches!(err, InputError::MissingContainer(_)));
    assert_eq!(err.kind(), "missing_source");

    store
        .write_container("wlnu", &[NamedTable::new("b_tagged", sample_table())])
        .unwrap();
    let err = store.read_table("wlnu", "untagged").unwrap_err();
    assert!(matches!(err, InputError::MissingTable { .. }));
}

#[test]
fn test_store_leaves_no_temp_files() {
    let dir = make_temp_dir();
    let store = JsonStore::new(&dir);
    store
        .write_container("diboson", &[NamedTable::new("t", sample_table())])
        .unwrap();
    let names: Vec<String> = fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["diboson.json".to_string()]);
}

#[test]
fn test_store_rejects_corrupt_container() {
    let dir = make_temp_dir();
    fs::write(dir.join("bad.json"), "{\"tables\": [").unwrap();
    let err = JsonStore::new(&dir).read_table("bad", "t").unwrap_err();
    assert!(matches!(err, InputError::Json(_)));
}
