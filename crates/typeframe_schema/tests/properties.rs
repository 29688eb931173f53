use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use proptest::prelude::*;
use typeframe_schema::{ColumnSpec, SchemaBuilder, SchemaRegistry, Source, Validity, Value};

fn schema() -> Arc<SchemaRegistry> {
    SchemaBuilder::new("Sample")
        .column(ColumnSpec::string("label"))
        .column(ColumnSpec::integer("count"))
        .column(ColumnSpec::float("ratio"))
        .column(ColumnSpec::date("seen").format("%d/%m/%Y"))
        .column(ColumnSpec::boolean("flag").tokens("Y", "N"))
        .compile()
        .unwrap()
}

fn row() -> impl Strategy<Value = Vec<Value>> {
    (
        proptest::option::of("[a-z]{0,8}"),
        proptest::option::of(-1000i64..1000),
        proptest::option::of(-1.0e6f64..1.0e6),
        proptest::option::of((1u32..28, 1u32..13, 1970i32..2100)),
        proptest::option::of(any::<bool>()),
    )
        .prop_map(|(label, count, ratio, seen, flag)| {
            vec![
                Value::from(label),
                // Text on purpose: coercion has to parse it.
                count.map_or(Value::Null, |c| Value::Text(c.to_string())),
                Value::from(ratio),
                seen.map_or(Value::Null, |(d, m, y)| {
                    Value::Text(format!("{:02}/{:02}/{}", d, m, y))
                }),
                flag.map_or(Value::Null, |f| Value::from(if f { "Y" } else { "N" })),
            ]
        })
}

/// The rows as an all-text batch, nulls kept.
fn raw_batch(rows: &[Vec<Value>]) -> RecordBatch {
    let names = ["label", "count", "ratio", "seen", "flag"];
    let columns = names.iter().enumerate().map(|(i, name)| {
        let text: Vec<Option<String>> = rows.iter().map(|row| row[i].text_form()).collect();
        (*name, Arc::new(StringArray::from(text)) as ArrayRef)
    });
    RecordBatch::try_from_iter(columns).unwrap()
}

proptest! {
    #[test]
    fn is_valid_is_pure_and_repeatable(rows in proptest::collection::vec(row(), 0..20)) {
        let mut table = schema()
            .new_table(Source::rows(rows))
            .unwrap()
            .into_table()
            .unwrap();
        let before = table.batch().clone();
        let first = table.is_valid();
        let second = table.is_valid();
        prop_assert_eq!(first, second);
        prop_assert_eq!(table.batch(), &before);
        prop_assert_eq!(table.validity(), Validity::Valid);
    }

    #[test]
    fn validate_is_idempotent(rows in proptest::collection::vec(row(), 0..20)) {
        // Literal batches are taken as-is, so every column starts as text.
        let mut table = schema()
            .new_table(raw_batch(&rows))
            .unwrap()
            .into_table()
            .unwrap();
        prop_assert!(!table.is_valid());

        table.validate(None).unwrap();
        prop_assert_eq!(table.validity(), Validity::Valid);
        let types: Vec<DataType> = table
            .batch()
            .schema()
            .fields()
            .iter()
            .map(|f| f.data_type().clone())
            .collect();
        prop_assert_eq!(
            types,
            vec![
                DataType::Utf8,
                DataType::Int64,
                DataType::Float64,
                DataType::Date32,
                DataType::Boolean,
            ]
        );
        let once = table.batch().clone();

        table.validate(None).unwrap();
        prop_assert_eq!(table.batch(), &once);
        prop_assert_eq!(table.validity(), Validity::Valid);
    }

    #[test]
    fn ingested_columns_follow_declaration(rows in proptest::collection::vec(row(), 0..5)) {
        let table = schema()
            .new_table(Source::rows(rows))
            .unwrap()
            .into_table()
            .unwrap();
        prop_assert_eq!(
            table.column_names(),
            vec!["label", "count", "ratio", "seen", "flag"]
        );
    }
}
