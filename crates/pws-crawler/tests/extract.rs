use pws_crawler::{
    extract, from_fn, ExtractorSchema, FieldError, Fragment, Integer, LabeledText, Value,
};

fn product() -> Fragment {
    Fragment::from_text("Widget\n类别: 工具 | 价格: ¥99\n库存: 12 件")
}

fn schema() -> ExtractorSchema {
    ExtractorSchema::new()
        .field(
            "name",
            from_fn(|f| {
                f.text()
                    .lines()
                    .next()
                    .map(Value::from)
                    .ok_or_else(|| FieldError::NotFound("first line".into()))
            }),
        )
        .field("category", LabeledText::new("类别:", "|"))
        .field("price", LabeledText::new("价格:", "|"))
        .field("stock", Integer(LabeledText::new("库存:", "件")))
        .field("rating", LabeledText::new("评分:", "|"))
}

#[test]
fn widget_product() {
    let extracted = schema().apply(&product());

    assert_eq!(extracted.record.get("name"), Some(&Value::from("Widget")));
    assert_eq!(extracted.record.get("category"), Some(&Value::from("工具")));
    assert_eq!(extracted.record.get("price"), Some(&Value::from("¥99")));
    assert_eq!(extracted.record.get("stock"), Some(&Value::Integer(12)));
    assert_eq!(extracted.record.get("rating"), Some(&Value::Missing));
    assert_eq!(extracted.failed, 1);
}

#[test]
fn every_schema_field_is_present() {
    let schema = schema().field(
        "boom",
        from_fn(|_| -> Result<Value, FieldError> { panic!("broken extractor") }),
    );
    let names = schema.names().map(String::from).collect::<Vec<_>>();

    for fragment in [product(), Fragment::from_text(""), Fragment::new("<li></li>", "")] {
        let record = extract(&schema, &fragment);
        assert_eq!(record.keys().collect::<Vec<_>>(), names);
    }
}

#[test]
fn nested_schema_is_a_map() {
    let schema = ExtractorSchema::new().field(
        "specs",
        ExtractorSchema::new().field("price", LabeledText::new("价格:", "|")),
    );

    let record = extract(&schema, &product());

    match record.get("specs") {
        Some(Value::Map(map)) => assert_eq!(map.get("price"), Some(&Value::from("¥99"))),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn nested_failures_are_counted() {
    let schema = ExtractorSchema::new()
        .field("name", from_fn(|_| Ok(Value::from("Widget"))))
        .field(
            "specs",
            ExtractorSchema::new()
                .field("CPU", LabeledText::new("CPU", ","))
                .field(
                    "boom",
                    from_fn(|_| Err(FieldError::Invalid("boom".into()))),
                ),
        );

    let extracted = schema.apply(&Fragment::from_text("nothing here"));

    assert_eq!(extracted.failed, 2);
    match extracted.record.get("specs") {
        Some(Value::Map(specs)) => {
            assert_eq!(specs.get("CPU"), Some(&Value::Missing));
            assert_eq!(specs.get("boom"), Some(&Value::Missing));
        }
        other => panic!("unexpected {other:?}"),
    }
}
