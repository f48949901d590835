//! End-to-end retrieval scenarios over in-memory, file and SQLite sources

use std::fs;

use proptest::prelude::*;
use rusqlite::Connection;
use tempfile::TempDir;

use record_search::core::paths::IndexPaths;
use record_search::search::embedding::HTP_MODEL;
use record_search::search::{build_corpus, BackendKind, OutcomeKind};
use record_search::{
    Clause, Condition, FileRecordSource, HybridRetriever, IndexBuilder, IndexError, MemorySource,
    Record, RecordSource, SemanticIndex, SharedIndex, SqlFilter, SqliteRecordSource,
    VectorizerBackend,
};

fn three_records() -> MemorySource {
    MemorySource::new(vec![
        Record::new(1).with_text("国家", "中国").with_text("型号", "A1"),
        Record::new(2).with_text("国家", "美国").with_text("型号", "B2"),
        Record::new(3).with_text("国家", "中国").with_text("型号", "A2"),
    ])
}

#[test]
fn chinese_query_ranks_exact_record_first() {
    let source = three_records();
    let corpus = build_corpus(source.records());
    assert_eq!(corpus[0].text, "国家: 中国 | 型号: A1");

    let index = IndexBuilder::new(VectorizerBackend::sparse())
        .build_from_source(&source)
        .unwrap()
        .unwrap();
    assert_eq!(index.search("中国 A1", 2).unwrap(), vec![1, 3]);
}

#[test]
fn dense_backend_ranks_full_blob_first() {
    let source = three_records();
    let index = IndexBuilder::new(VectorizerBackend::select(Some(HTP_MODEL)))
        .build_from_source(&source)
        .unwrap()
        .unwrap();
    assert_eq!(index.backend(), BackendKind::Dense);

    let hits = index.search("国家: 中国 | 型号: A1", 2).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0], 1);
}

#[test]
fn dense_backend_self_retrieves_cjk_names() {
    let source = MemorySource::new(vec![
        Record::new(1).with_text("am_name", "甲型航爆弹"),
        Record::new(2).with_text("am_name", "乙型航爆弹"),
        Record::new(3).with_text("am_name", "丙型航爆弹"),
        Record::new(4).with_text("am_name", "甲型制导炸弹"),
    ]);
    let index = IndexBuilder::new(VectorizerBackend::select(Some(HTP_MODEL)))
        .build_from_source(&source)
        .unwrap()
        .unwrap();
    assert_eq!(index.backend(), BackendKind::Dense);

    for entry in build_corpus(source.records()) {
        assert_eq!(index.search(&entry.text, 1).unwrap(), vec![entry.id], "{}", entry.text);
    }
}

#[test]
fn truncated_artifact_then_rebuild() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("models/targets");
    let source = three_records();
    let backend = VectorizerBackend::sparse();

    let original = IndexBuilder::new(backend.clone())
        .persist_to(&prefix)
        .build_from_source(&source)
        .unwrap()
        .unwrap();

    let paths = IndexPaths::from_prefix(&prefix);
    let bytes = fs::read(&paths.sparse).unwrap();
    fs::write(&paths.sparse, &bytes[..bytes.len() - 7]).unwrap();

    let err = SemanticIndex::load(&prefix, &backend).unwrap_err();
    assert!(matches!(err, IndexError::Corrupt { .. }), "{err}");

    let outcome = IndexBuilder::new(backend.clone())
        .load_or_build(&source, &prefix, false)
        .unwrap();
    assert_eq!(outcome.kind(), OutcomeKind::Built);
    let rebuilt = SemanticIndex::load(&prefix, &backend).unwrap();
    assert_eq!(
        rebuilt.search("中国 A1", 3).unwrap(),
        original.search("中国 A1", 3).unwrap()
    );
}

#[test]
fn deleted_artifact_is_not_found() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("idx");
    let backend = VectorizerBackend::sparse();
    IndexBuilder::new(backend.clone())
        .persist_to(&prefix)
        .build_from_source(&three_records())
        .unwrap();

    fs::remove_file(IndexPaths::from_prefix(&prefix).sparse).unwrap();
    assert!(matches!(
        SemanticIndex::load(&prefix, &backend),
        Err(IndexError::NotFound(_))
    ));
}

#[test]
fn unavailable_dense_backend_still_self_retrieves() {
    let backend = VectorizerBackend::select(Some("not-an-installed-model"));
    assert_eq!(backend.kind(), BackendKind::Sparse);

    let source = MemorySource::new(vec![
        Record::new(11).with_text("runway_name", "北跑道").with_text("surface", "沥青"),
        Record::new(12).with_text("runway_name", "南跑道").with_text("surface", "混凝土"),
        Record::new(13).with_text("shelter_name", "加固机库").with_text("material", "钢板"),
    ]);
    let index = IndexBuilder::new(backend)
        .build_from_source(&source)
        .unwrap()
        .unwrap();

    for entry in build_corpus(source.records()) {
        assert_eq!(index.search(&entry.text, 1).unwrap(), vec![entry.id]);
    }
}

#[test]
fn empty_source_is_not_ready() {
    let dir = TempDir::new().unwrap();
    let empty = MemorySource::new(Vec::new());
    let builder = IndexBuilder::new(VectorizerBackend::sparse());

    assert!(builder.build_from_source(&empty).unwrap().is_none());

    let shared = SharedIndex::new();
    let kind = shared
        .refresh(&builder, &empty, &dir.path().join("idx"), false)
        .unwrap();
    assert_eq!(kind, OutcomeKind::Empty);
    assert!(matches!(shared.search("中国", 5), Err(IndexError::NotReady)));
}

#[test]
fn file_source_end_to_end() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("records");
    fs::create_dir_all(&data).unwrap();
    fs::write(
        data.join("ammunition.json"),
        r#"[
            {"am_id": 101, "am_name": "250-3航爆弹", "country": "中国", "weight": 250},
            {"am_id": 102, "am_name": "GBU-31", "country": "美国", "weight": 907}
        ]"#,
    )
    .unwrap();
    fs::write(
        data.join("more.yaml"),
        "records:\n  - am_id: 103\n    am_name: KAB-500\n    country: 俄罗斯\n    weight: 500\n",
    )
    .unwrap();

    let source = FileRecordSource::new(&data, "am_id");
    let index = IndexBuilder::new(VectorizerBackend::sparse())
        .build_from_source(&source)
        .unwrap()
        .unwrap();
    assert_eq!(index.len(), 3);

    let heavy = Condition::new().and(Clause::Range {
        field: "weight".into(),
        min: Some(400.0),
        max: None,
    });
    let ids = HybridRetriever::new(&source)
        .query_ids(&index, "航爆弹", Some(&heavy), 5)
        .unwrap();
    let ranking = index.search("航爆弹", 15).unwrap();
    let expected: Vec<i64> = ranking.into_iter().filter(|id| *id != 101).collect();
    assert_eq!(ids, expected);
}

#[test]
fn sqlite_filter_matches_memory_filter() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("targets.db");
    let conn = Connection::open(&db).unwrap();
    conn.execute_batch(
        "CREATE TABLE runway (
            id INTEGER PRIMARY KEY,
            runway_name TEXT,
            country TEXT,
            r_length REAL,
            runway_picture BLOB
        );
        INSERT INTO runway VALUES (1, '北跑道', '中国', 3200.0, x'00FF');
        INSERT INTO runway VALUES (2, '南跑道', '中国', 2400.0, NULL);
        INSERT INTO runway VALUES (3, '主跑道', '美国', 3600.0, NULL);",
    )
    .unwrap();
    drop(conn);

    let source = SqliteRecordSource::new(&db, "runway", "id");
    let records = source.list_all().unwrap();
    assert!(build_corpus(&records)
        .iter()
        .all(|e| !e.text.contains("runway_picture")));

    let index = IndexBuilder::new(VectorizerBackend::sparse())
        .build_from_source(&source)
        .unwrap()
        .unwrap();
    let condition = Condition::new()
        .and(Clause::Eq {
            field: "country".into(),
            value: "中国".into(),
        })
        .and(Clause::Range {
            field: "r_length".into(),
            min: Some(3000.0),
            max: None,
        });

    let retriever = HybridRetriever::new(&source);
    let sql = SqlFilter::new(&source, condition.clone());
    let via_sql = retriever.query_ids(&index, "跑道", Some(&sql), 3).unwrap();
    let in_memory = retriever
        .query_ids(&index, "跑道", Some(&condition), 3)
        .unwrap();
    assert_eq!(via_sql, vec![1]);
    assert_eq!(via_sql, in_memory);
}

proptest! {
    #[test]
    fn blank_query_returns_build_order(
        names in prop::collection::vec("[a-z中国跑道 ]{1,10}", 1..15),
        k in 0usize..20,
        spaces in "[ \t]{0,3}",
    ) {
        let source = MemorySource::new(
            names
                .iter()
                .enumerate()
                .map(|(i, n)| Record::new(100 + i as i64).with_text("name", n.clone()))
                .collect(),
        );
        let index = IndexBuilder::new(VectorizerBackend::sparse())
            .build_from_source(&source)
            .unwrap()
            .unwrap();

        let expected: Vec<i64> = index.ids().iter().copied().take(k).collect();
        prop_assert_eq!(index.search(&spaces, k).unwrap(), expected);
    }
}
