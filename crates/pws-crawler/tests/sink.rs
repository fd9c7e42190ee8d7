use std::fs;

use indexmap::IndexMap;
use pws_crawler::{sink_for, CsvSink, JsonSink, Record, Sink, Value};

fn widget() -> Record {
    let mut record = Record::new();
    record.insert("name", "Widget");
    record.insert("price", Value::Missing);
    record
}

#[test]
fn json_sink_overwrites_destination() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("products.json");
    fs::write(&dest, "stale content that is longer than the new one").unwrap();

    JsonSink.write(&[widget()], &dest).unwrap();

    let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&dest).unwrap()).unwrap();
    assert_eq!(
        written,
        serde_json::json!([{ "name": "Widget", "price": null }])
    );
}

#[test]
fn second_write_replaces_first() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("news.json");

    JsonSink.write(&[widget(), widget()], &dest).unwrap();
    JsonSink.write(&[], &dest).unwrap();

    let written: Vec<Record> = serde_json::from_str(&fs::read_to_string(&dest).unwrap()).unwrap();
    assert!(written.is_empty());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn csv_flattens_nested_groups() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("products.csv");

    let mut specs = IndexMap::new();
    specs.insert("cpu".to_string(), Value::from("8 cores"));
    specs.insert("ram".to_string(), Value::Integer(16));
    let mut full = widget();
    full.insert("specs", Value::Map(specs));
    let mut bare = Record::new();
    bare.insert("name", "Gadget");

    CsvSink::default().write(&[full, bare], &dest).unwrap();

    assert_eq!(
        fs::read_to_string(&dest).unwrap(),
        "name,price,specs.cpu,specs.ram\nWidget,,8 cores,16\nGadget,,,\n"
    );
}

#[test]
fn sink_follows_extension() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("products.tsv");

    sink_for(&dest).write(&[widget()], &dest).unwrap();

    assert_eq!(fs::read_to_string(&dest).unwrap(), "name\tprice\nWidget\t\n");
}
