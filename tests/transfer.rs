//! End-to-end transfers against the in-memory session.

use flatbridge::memory::InsertCall;
use flatbridge::prelude::*;
use pretty_assertions::assert_eq;
use std::io::Cursor;

fn customers() -> MemorySession {
    MemorySession::new().with_table(
        "customers",
        &[("id", "UInt64"), ("name", "String"), ("note", "String")],
        vec![
            vec!["1", "Alice", "likes, commas"],
            vec!["2", "Bob", "says \"hi\""],
            vec!["3", "Carol", ""],
            vec!["4", "Dan", "multi\nline"],
        ],
    )
}

fn full_plan(session: &MemorySession, table: &str) -> ReadPlan {
    build_plan(&[session.descriptor(table).unwrap()], &ProjectionSpec::new(), None, None).unwrap()
}

fn csv_file(lines: &[&str]) -> Cursor<Vec<u8>> {
    Cursor::new(format!("{}\n", lines.join("\n")).into_bytes())
}

#[tokio::test]
async fn export_then_import_round_trips_every_cell() {
    let session = customers();
    let engine = TransferEngine::new().with_batch_size(3);
    let format = FileFormat::default();

    let mut file = Vec::new();
    let exported = engine
        .export_to_file(&session, &full_plan(&session, "customers"), &mut file, &format)
        .await
        .unwrap();

    let mut source = Cursor::new(file);
    let imported = engine
        .import_from_file(&mut source, &session, "customers_copy", &[], &format)
        .await
        .unwrap();

    assert_eq!(exported, 4);
    assert_eq!(imported, exported);
    assert_eq!(session.rows("customers_copy"), session.rows("customers"));
    assert_eq!(
        session.descriptor("customers_copy").unwrap().column_names(),
        vec!["id", "name", "note"]
    );
}

#[tokio::test]
async fn round_trip_with_tab_delimiter_and_no_header() {
    let session = customers();
    let engine = TransferEngine::new();
    let export_format = FileFormat::new("tab", true);

    let mut file = Vec::new();
    engine
        .export_to_file(&session, &full_plan(&session, "customers"), &mut file, &export_format)
        .await
        .unwrap();

    // Drop the header line and read the rest positionally.
    let text = String::from_utf8(file).unwrap();
    let body = text.split_once('\n').unwrap().1.to_string();
    let mut source = Cursor::new(body.into_bytes());
    let count = engine
        .import_from_file(&mut source, &session, "positional", &[], &FileFormat::new("\\t", false))
        .await
        .unwrap();

    assert_eq!(count, 4);
    assert_eq!(
        session.descriptor("positional").unwrap().column_names(),
        vec!["col_0", "col_1", "col_2"]
    );
    assert_eq!(session.rows("positional"), session.rows("customers"));
}

#[tokio::test]
async fn batch_boundaries() {
    for (n, batch_size, expected) in [
        (5usize, 2usize, vec![2usize, 2, 1]),
        (4, 2, vec![2, 2]),
        (3, 10, vec![3]),
        (1, 1, vec![1]),
    ] {
        let session = MemorySession::new();
        let mut lines = vec!["id".to_string()];
        lines.extend((0..n).map(|i| i.to_string()));
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let mut source = csv_file(&refs);

        let count = TransferEngine::new()
            .with_batch_size(batch_size)
            .import_from_file(&mut source, &session, "t", &[], &FileFormat::default())
            .await
            .unwrap();

        let sizes: Vec<usize> = session.insert_calls().iter().map(|c| c.rows).collect();
        assert_eq!(count, n as u64);
        assert_eq!(sizes, expected, "n={} batch_size={}", n, batch_size);
        assert_eq!(sizes.len(), n.div_ceil(batch_size));
    }
}

#[tokio::test]
async fn empty_file_body_inserts_nothing() {
    let session = MemorySession::new();
    let mut source = csv_file(&["id,name"]);
    let count = TransferEngine::new()
        .import_from_file(&mut source, &session, "t", &[], &FileFormat::default())
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert!(session.insert_calls().is_empty());
    assert_eq!(session.descriptor("t").unwrap().column_names(), vec!["id", "name"]);
}

#[tokio::test]
async fn import_id_name_with_batch_size_one() {
    let session = MemorySession::new();
    let mut source = csv_file(&["id,name", "1,Alice", "2,Bob"]);

    let count = TransferEngine::new()
        .with_batch_size(1)
        .import_from_file(&mut source, &session, "T", &[], &FileFormat::default())
        .await
        .unwrap();

    assert_eq!(count, 2);
    let call = InsertCall {
        table: "T".to_string(),
        columns: vec!["id".to_string(), "name".to_string()],
        rows: 1,
    };
    assert_eq!(session.insert_calls(), vec![call.clone(), call]);

    let desc = session.descriptor("T").unwrap();
    assert_eq!(desc.column_names(), vec!["id", "name"]);
    assert!(desc.columns.iter().all(|c| c.data_type == "String"));
}

#[tokio::test]
async fn failed_insert_keeps_earlier_batches() {
    let session = MemorySession::new().fail_inserts_after(2);
    let mut source = csv_file(&["id", "1", "2", "3", "4", "5"]);

    let err = TransferEngine::new()
        .with_batch_size(2)
        .import_from_file(&mut source, &session, "t", &[], &FileFormat::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "transfer");
    assert_eq!(session.insert_calls().len(), 2);
    assert_eq!(session.rows("t").unwrap().len(), 4);
}

#[tokio::test]
async fn join_export_uses_qualified_headers() {
    let session = MemorySession::new()
        .with_table(
            "orders",
            &[("id", "UInt32"), ("cust_id", "UInt32")],
            vec![vec!["100", "1"], vec!["101", "2"], vec!["102", "1"]],
        )
        .with_table(
            "customers",
            &[("id", "UInt32"), ("name", "String")],
            vec![vec!["1", "Alice"], vec!["2", "Bob"]],
        );
    let tables = describe_tables(&session, &["orders".to_string(), "customers".to_string()])
        .await
        .unwrap();
    let projection: ProjectionSpec = [
        ("orders".to_string(), vec!["id".to_string()]),
        ("customers".to_string(), vec!["name".to_string()]),
    ]
    .into_iter()
    .collect();
    let join = JoinSpec::new(JoinType::Inner).on("orders.cust_id = customers.id");
    let plan = build_plan(&tables, &projection, Some(&join), None).unwrap();

    let mut file = Vec::new();
    let count = TransferEngine::new()
        .export_to_file(&session, &plan, &mut file, &FileFormat::default())
        .await
        .unwrap();

    assert_eq!(count, 3);
    assert_eq!(
        String::from_utf8(file).unwrap(),
        "orders.id,customers.name\n100,Alice\n101,Bob\n102,Alice\n"
    );
}

#[tokio::test]
async fn preview_respects_limit_and_default_cap() {
    let mut rows = Vec::new();
    for i in 0..150 {
        rows.push(vec![i.to_string()]);
    }
    let session = MemorySession::new().with_table(
        "big",
        &[("n", "UInt32")],
        rows.iter().map(|r| r.iter().map(String::as_str).collect()).collect(),
    );
    let plan = full_plan(&session, "big");
    let engine = TransferEngine::new();

    assert_eq!(engine.stream_preview(&session, &plan, None).await.unwrap().len(), 100);
    assert_eq!(engine.stream_preview(&session, &plan, Some(7)).await.unwrap().len(), 7);
    assert_eq!(engine.stream_preview(&session, &plan, Some(500)).await.unwrap().len(), 150);
}
