use std::io::Write;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use tempfile::NamedTempFile;
use typeframe_db::{DbConnection, DbError};
use typeframe_schema::{
    ColumnSpec, DelimitedSource, FrameError, IfExists, IfRowExists, SaveOptions, SchemaBuilder,
    SchemaRegistry, Source, SqlSource, Validity, Value,
};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn people_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::string("name"),
        ColumnSpec::integer("age"),
        ColumnSpec::float("money"),
        ColumnSpec::date("insertion_date").format("%d-%m-%Y"),
        ColumnSpec::boolean("is_staff").tokens("yes", "no"),
    ]
}

fn people(conn: &DbConnection) -> Arc<SchemaRegistry> {
    SchemaBuilder::new("People")
        .columns(people_columns())
        .persist("people", conn.clone())
        .compile()
        .unwrap()
}

fn cars(conn: &DbConnection) -> Arc<SchemaRegistry> {
    SchemaBuilder::new("Cars")
        .column(ColumnSpec::string("name").unique())
        .column(ColumnSpec::string("model").unique())
        .column(ColumnSpec::string("note"))
        .persist("cars", conn.clone())
        .compile()
        .unwrap()
}

fn people_csv() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        "name;age;money;insertion_date;is_staff\n\
         John;15;13.6;25-02-2005;yes\n\
         Snow;40;6.7;25-02-2005;no\n"
    )
    .unwrap();
    file
}

fn car_rows(rows: &[(&str, &str, &str)]) -> Source {
    let rows: Vec<Vec<Value>> = rows
        .iter()
        .map(|(name, model, note)| vec![Value::from(*name), Value::from(*model), Value::from(*note)])
        .collect();
    Source::rows(rows)
}

#[test]
fn people_csv_scenario() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let file = people_csv();
    let mut table = people(&conn)
        .new_table(DelimitedSource::new(file.path()).delimiter(b';'))
        .unwrap()
        .into_table()
        .unwrap();

    assert_eq!(
        table.column_names(),
        vec!["name", "age", "money", "insertion_date", "is_staff"]
    );
    assert_eq!(
        table.to_columns(),
        vec![
            ("name".to_string(), vec![Value::from("John"), Value::from("Snow")]),
            ("age".to_string(), vec![Value::Int(15), Value::Int(40)]),
            ("money".to_string(), vec![Value::Float(13.6), Value::Float(6.7)]),
            (
                "insertion_date".to_string(),
                vec![Value::Date(day(2005, 2, 25)), Value::Date(day(2005, 2, 25))]
            ),
            ("is_staff".to_string(), vec![Value::Bool(true), Value::Bool(false)]),
        ]
    );
    assert!(table.is_valid());
    assert_eq!(table.record_name(), Some("People"));
}

#[test]
fn saved_table_reads_back_equal() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let schema = people(&conn);
    let file = people_csv();
    let mut table = schema
        .new_table(DelimitedSource::new(file.path()).delimiter(b';'))
        .unwrap()
        .into_table()
        .unwrap();

    let written = table.save(&SaveOptions::default()).unwrap();
    assert_eq!(written, 2);

    let mut read = schema
        .new_table(SqlSource::new("SELECT * FROM people ORDER BY id;"))
        .unwrap()
        .into_table()
        .unwrap();
    assert!(read.is_valid());
    assert_eq!(read.to_rows(), table.to_rows());
}

#[test]
fn chunked_query_pages_through_rows() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let schema = cars(&conn);
    let rows: Vec<(String, String, String)> = (0..10)
        .map(|i| (format!("brand{i}"), format!("model{i}"), "n".to_string()))
        .collect();
    let borrowed: Vec<(&str, &str, &str)> = rows
        .iter()
        .map(|(a, b, c)| (a.as_str(), b.as_str(), c.as_str()))
        .collect();
    schema
        .new_table(car_rows(&borrowed))
        .unwrap()
        .into_table()
        .unwrap()
        .save(&SaveOptions::default())
        .unwrap();

    let chunks = schema
        .new_table(SqlSource::new("SELECT * FROM cars ORDER BY name").chunk_size(4))
        .unwrap()
        .into_chunks()
        .unwrap();
    let tables: Vec<_> = chunks.map(|c| c.unwrap()).collect();
    let sizes: Vec<usize> = tables.iter().map(|t| t.num_rows()).collect();
    assert_eq!(sizes, vec![4, 4, 2]);
    let names: std::collections::BTreeSet<String> = tables
        .iter()
        .flat_map(|t| t.column_values("name").unwrap())
        .filter_map(|v| v.text_form())
        .collect();
    assert_eq!(names.len(), 10);

    let whole = schema
        .new_table(SqlSource::new("SELECT * FROM cars").chunk_size(3))
        .unwrap()
        .into_table()
        .unwrap();
    assert_eq!(whole.num_rows(), 10);
}

#[test]
fn chunked_query_without_order_yields_each_row_once() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    // Larger than one DuckDB vector (2048 rows).
    conn.execute_batch("CREATE TABLE numbers AS SELECT range AS n FROM range(5000)")
        .unwrap();
    let schema = SchemaBuilder::new("Numbers")
        .column(ColumnSpec::integer("n"))
        .persist("numbers", conn.clone())
        .compile()
        .unwrap();

    let mut chunks = schema
        .new_table(SqlSource::new("SELECT n FROM numbers").chunk_size(1000))
        .unwrap()
        .into_chunks()
        .unwrap();
    let first = chunks.next().unwrap().unwrap();

    // Rows written after the query started are not picked up by later chunks.
    conn.execute("INSERT INTO numbers SELECT range FROM range(5000, 5100)", &[])
        .unwrap();

    let mut tables = vec![first];
    tables.extend(chunks.map(|c| c.unwrap()));
    let sizes: Vec<usize> = tables.iter().map(|t| t.num_rows()).collect();
    assert_eq!(sizes, vec![1000; 5]);

    let seen: std::collections::BTreeSet<i64> = tables
        .iter()
        .flat_map(|t| t.column_values("n").unwrap())
        .map(|v| match v {
            Value::Int(n) => n,
            other => panic!("unexpected value {:?}", other),
        })
        .collect();
    assert_eq!(seen.len(), 5000);
    assert_eq!(seen.iter().next_back(), Some(&4999));
}

#[test]
fn dropping_chunked_query_early_releases_connection() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    conn.execute_batch("CREATE TABLE numbers AS SELECT range AS n FROM range(5000)")
        .unwrap();
    let schema = SchemaBuilder::new("Numbers")
        .column(ColumnSpec::integer("n"))
        .persist("numbers", conn.clone())
        .compile()
        .unwrap();

    let mut chunks = schema
        .new_table(SqlSource::new("SELECT n FROM numbers").chunk_size(10))
        .unwrap()
        .into_chunks()
        .unwrap();
    assert_eq!(chunks.next().unwrap().unwrap().num_rows(), 10);
    drop(chunks);

    let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM numbers", &[]).unwrap();
    assert_eq!(count, 5000);
}

#[test]
fn decimal_query_results_fill_float_columns() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let schema = SchemaBuilder::new("Wallet")
        .column(ColumnSpec::string("name"))
        .column(ColumnSpec::float("money"))
        .column(ColumnSpec::integer("total"))
        .persist("wallet", conn.clone())
        .compile()
        .unwrap();

    let mut table = schema
        .new_table(SqlSource::new(
            "SELECT 'John' AS name, 13.6 AS money, SUM(x) AS total FROM (VALUES (40), (2)) t(x)",
        ))
        .unwrap()
        .into_table()
        .unwrap();
    assert!(table.is_valid());
    let rows = table.to_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Value::from("John"));
    match rows[0][1] {
        Value::Float(money) => assert!((money - 13.6).abs() < 1e-9, "{}", money),
        ref other => panic!("unexpected value {:?}", other),
    }
    assert_eq!(rows[0][2], Value::Int(42));
}

#[test]
fn upsert_update_overwrites_and_inserts() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let schema = cars(&conn);
    schema
        .new_table(car_rows(&[("renault", "clio", "old"), ("fiat", "panda", "keep")]))
        .unwrap()
        .into_table()
        .unwrap()
        .save(&SaveOptions::default())
        .unwrap();

    let mut changes = schema
        .new_table(car_rows(&[("renault", "clio", "new"), ("peugeot", "208", "fresh")]))
        .unwrap()
        .into_table()
        .unwrap();
    changes
        .save(&SaveOptions::upsert(IfRowExists::Update))
        .unwrap();

    let note: String = conn
        .query_scalar("SELECT note FROM cars WHERE name = 'renault'", &[])
        .unwrap();
    assert_eq!(note, "new");
    let note: String = conn
        .query_scalar("SELECT note FROM cars WHERE name = 'fiat'", &[])
        .unwrap();
    assert_eq!(note, "keep");
    let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM cars", &[]).unwrap();
    assert_eq!(count, 3);
}

#[test]
fn upsert_ignore_leaves_existing_rows() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let schema = cars(&conn);

    // Upsert creates the backing table when absent.
    schema
        .new_table(car_rows(&[("renault", "clio", "old")]))
        .unwrap()
        .into_table()
        .unwrap()
        .save(&SaveOptions::upsert(IfRowExists::Ignore))
        .unwrap();

    schema
        .new_table(car_rows(&[("renault", "clio", "new"), ("renault", "megane", "other")]))
        .unwrap()
        .into_table()
        .unwrap()
        .save(&SaveOptions::upsert(IfRowExists::Ignore))
        .unwrap();

    let note: String = conn
        .query_scalar(
            "SELECT note FROM cars WHERE name = 'renault' AND model = 'clio'",
            &[],
        )
        .unwrap();
    assert_eq!(note, "old");
    let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM cars", &[]).unwrap();
    assert_eq!(count, 2);
}

#[test]
fn duplicate_keys_on_plain_append_roll_back() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let schema = cars(&conn);
    let mut table = schema
        .new_table(car_rows(&[("renault", "clio", "old")]))
        .unwrap()
        .into_table()
        .unwrap();
    table.save(&SaveOptions::default().index(true)).unwrap();

    let err = table.save(&SaveOptions::default()).unwrap_err();
    assert!(matches!(err, FrameError::Db(DbError::DuckDb(_))));
    let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM cars", &[]).unwrap();
    assert_eq!(count, 1);
}

#[test]
fn renamed_columns_read_target_and_expose_name() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE staff (full_name VARCHAR, years BIGINT);
         INSERT INTO staff VALUES ('Arya', 11);",
    )
    .unwrap();
    let schema = SchemaBuilder::new("Staff")
        .column(ColumnSpec::string("name").target_name("full_name"))
        .column(ColumnSpec::integer("age").target_name("years"))
        .persist("staff_copy", conn.clone())
        .compile()
        .unwrap();

    let table = schema
        .new_table(SqlSource::new("SELECT years, full_name FROM staff"))
        .unwrap()
        .into_table()
        .unwrap();
    assert_eq!(table.column_names(), vec!["name", "age"]);
    assert_eq!(table.to_rows(), vec![vec![Value::from("Arya"), Value::Int(11)]]);
}

#[test]
fn iterator_source_materializes_every_row() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let schema = people(&conn);
    let rows = (0..1000).map(|i: i64| {
        vec![
            Value::from(format!("person{i}")),
            Value::Int(i),
            Value::Float(i as f64 / 2.0),
            Value::from("01-01-2020"),
            Value::from(if i % 2 == 0 { "yes" } else { "no" }),
        ]
    });
    let mut table = schema
        .new_table(Source::rows(rows))
        .unwrap()
        .into_table()
        .unwrap();
    assert_eq!(table.num_rows(), 1000);
    assert!(table.is_valid());
    assert_eq!(table.save(&SaveOptions::default()).unwrap(), 1000);

    let max_id: i64 = conn.query_scalar("SELECT MAX(id) FROM people", &[]).unwrap();
    assert_eq!(max_id, 1000);
}

#[test]
fn merged_tables_validate_against_wider_schema() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let file = people_csv();
    let people_table = people(&conn)
        .new_table(DelimitedSource::new(file.path()).delimiter(b';'))
        .unwrap()
        .into_table()
        .unwrap();

    let jobs = SchemaBuilder::new("Jobs")
        .column(ColumnSpec::string("name"))
        .column(ColumnSpec::string("job"))
        .compile()
        .unwrap();
    let jobs_table = jobs
        .new_table(Source::rows(vec![
            vec![Value::from("Snow"), Value::from("guard")],
            vec![Value::from("John"), Value::from("student")],
        ]))
        .unwrap()
        .into_table()
        .unwrap();

    let mut merged = people_table.merge(&jobs_table, "name").unwrap();
    assert_eq!(merged.record_name(), Some("People"));
    assert!(!merged.is_valid());

    let wider = SchemaBuilder::new("MergedPeople")
        .columns(people_columns())
        .column(ColumnSpec::string("job"))
        .compile()
        .unwrap();
    merged.validate(Some(wider)).unwrap();
    assert_eq!(merged.validity(), Validity::Valid);
    assert_eq!(merged.record_name(), Some("MergedPeople"));
    assert_eq!(
        merged.column_values("job").unwrap(),
        vec![Value::from("student"), Value::from("guard")]
    );
}

#[test]
fn mutation_resets_validity() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let file = people_csv();
    let mut table = people(&conn)
        .new_table(DelimitedSource::new(file.path()).delimiter(b';'))
        .unwrap()
        .into_table()
        .unwrap();
    assert!(table.is_valid());

    table
        .set_column("age", Arc::new(StringArray::from(vec!["16", "41"])) as ArrayRef)
        .unwrap();
    assert_eq!(table.validity(), Validity::Unchecked);
    assert!(!table.is_valid());

    table.validate(None).unwrap();
    assert_eq!(table.validity(), Validity::Valid);
    assert_eq!(
        table.column_values("age").unwrap(),
        vec![Value::Int(16), Value::Int(41)]
    );
}

#[test]
fn empty_table_accepts_column_assignment() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let mut table = cars(&conn).new_table(Source::Empty).unwrap().into_table().unwrap();
    table
        .set_column("name", Arc::new(StringArray::from(vec!["a", "b"])) as ArrayRef)
        .unwrap();
    assert_eq!(table.num_rows(), 2);
    assert_eq!(table.column_values("model").unwrap(), vec![Value::Null, Value::Null]);
    assert!(table.is_valid());
}

#[test]
fn literal_batch_is_taken_as_is() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let batch = RecordBatch::try_from_iter(vec![
        ("model", Arc::new(StringArray::from(vec!["clio"])) as ArrayRef),
        ("name", Arc::new(StringArray::from(vec!["renault"])) as ArrayRef),
        ("note", Arc::new(Int64Array::from(vec![7])) as ArrayRef),
    ])
    .unwrap();
    let mut table = cars(&conn).new_table(batch).unwrap().into_table().unwrap();
    assert_eq!(table.column_names(), vec!["name", "model", "note"]);
    assert!(!table.is_valid());
    table.validate(None).unwrap();
    assert_eq!(table.column_values("note").unwrap(), vec![Value::from("7")]);
}

#[test]
fn save_without_persistence_is_missing_decorator() {
    let schema = SchemaBuilder::new("Loose")
        .columns(people_columns())
        .compile()
        .unwrap();
    let mut table = schema.new_table(Source::Empty).unwrap().into_table().unwrap();
    let err = table.save(&SaveOptions::default()).unwrap_err();
    assert!(matches!(err, FrameError::MissingDecorator { .. }));
}

#[test]
fn upsert_without_unique_columns_is_missing_unique_field() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let mut table = people(&conn)
        .new_table(Source::Empty)
        .unwrap()
        .into_table()
        .unwrap();
    let err = table
        .save(&SaveOptions::upsert(IfRowExists::Update))
        .unwrap_err();
    assert!(matches!(err, FrameError::MissingUniqueField { .. }));

    let err = table.save(&SaveOptions::default().index(true)).unwrap_err();
    assert!(matches!(err, FrameError::MissingUniqueField { .. }));
    assert!(!conn.table_exists("people").unwrap());
}

#[test]
fn replace_is_rejected_before_writing() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let file = people_csv();
    let mut table = people(&conn)
        .new_table(DelimitedSource::new(file.path()).delimiter(b';'))
        .unwrap()
        .into_table()
        .unwrap();
    let err = table
        .save(&SaveOptions::default().if_exists(IfExists::Replace))
        .unwrap_err();
    assert!(matches!(err, FrameError::ReplaceRejected { ref table } if table == "people"));
    assert!(!conn.table_exists("people").unwrap());
}

#[test]
fn replace_is_rejected_for_upserts_too() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let schema = cars(&conn);
    schema
        .new_table(car_rows(&[("renault", "clio", "old")]))
        .unwrap()
        .into_table()
        .unwrap()
        .save(&SaveOptions::default())
        .unwrap();

    let mut changes = schema
        .new_table(car_rows(&[("renault", "clio", "new"), ("fiat", "panda", "x")]))
        .unwrap()
        .into_table()
        .unwrap();
    for mode in [IfRowExists::Update, IfRowExists::Ignore] {
        let err = changes
            .save(&SaveOptions::upsert(mode).if_exists(IfExists::Replace))
            .unwrap_err();
        assert!(matches!(err, FrameError::ReplaceRejected { ref table } if table == "cars"));
    }

    let note: String = conn
        .query_scalar("SELECT note FROM cars WHERE name = 'renault'", &[])
        .unwrap();
    assert_eq!(note, "old");
    let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM cars", &[]).unwrap();
    assert_eq!(count, 1);
}

#[test]
fn filter_keeps_schema_binding() {
    let conn = DbConnection::open_duckdb_memory().unwrap();
    let file = people_csv();
    let table = people(&conn)
        .new_table(DelimitedSource::new(file.path()).delimiter(b';'))
        .unwrap()
        .into_table()
        .unwrap();
    let mut staff = table
        .filter(&BooleanArray::from(vec![true, false]))
        .unwrap();
    assert_eq!(staff.record_name(), Some("People"));
    assert!(staff.is_valid());
    assert_eq!(staff.save(&SaveOptions::default()).unwrap(), 1);
}
