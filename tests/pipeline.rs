//! Full pipeline over files on disk: load shards, build, persist, reload,
//! evaluate and serve.
//!
//! Run with: cargo test --test pipeline

use item_matcher::evaluation::{BLESSED_FILE, METRICS_FILE, NOT_BLESSED_FILE};
use item_matcher::persistence::{self, INDEX_FILE, VOCABULARY_FILE};
use item_matcher::serving::Query;
use item_matcher::{
    ApproximateMatcher, IndexBuilder, IndexEvaluator, LoadError, MatchRequest, MatchService, Matcher,
    PersistenceError, RowId, Settings, VectorStore,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const DIM: usize = 8;

/// Write `rows` random embeddings split over one CSV and one JSON-lines
/// shard, with `item-0` repeated in the JSON shard.
fn write_shards(dir: &Path, rows: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut csv = String::from("item_Id,embedding\n");
    let mut jsonl = String::new();

    for i in 0..rows {
        let v: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();
        if i % 2 == 0 {
            let fields: Vec<String> = v.iter().map(|x| x.to_string()).collect();
            writeln!(csv, "item-{i},{}", fields.join(",")).unwrap();
        } else {
            let line = serde_json::json!({ "identifier": format!("item-{i}"), "embedding": v });
            writeln!(jsonl, "{line}").unwrap();
        }
    }
    let repeat = serde_json::json!({ "id": "item-0", "embedding": vec![0.5f32; DIM] });
    writeln!(jsonl, "{repeat}").unwrap();

    fs::write(dir.join("embeddings-00.csv"), csv).unwrap();
    fs::write(dir.join("embeddings-01.jsonl"), jsonl).unwrap();
}

fn settings() -> Settings {
    Settings::from_toml_str(
        r#"
        [index]
        num_leaves = 12
        num_leaves_to_search = 12
        reorder_num_neighbors = 400

        [evaluation]
        sample_ratio = 0.1
        max_latency_secs = 1.0e9
        min_recall = 0.99

        [serving]
        default_num_matches = 5
        max_num_matches = 50
        "#,
    )
    .unwrap()
}

#[test]
fn test_build_save_load_evaluate_serve() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_shards(input.path(), 400, 1);
    let settings = settings();

    let corpus = VectorStore::from_config(&settings.loader)
        .load(input.path().join("embeddings-*"))
        .unwrap();
    assert_eq!(corpus.len(), 400);
    assert_eq!(corpus.dimension(), DIM);
    assert_eq!(corpus.vocabulary.get(RowId::new(0)), Some("item-0"));

    let index = IndexBuilder::from_config(&settings.index)
        .build(&corpus.matrix)
        .unwrap();
    let model_dir = output.path().join("model");
    persistence::save(&index, &corpus.vocabulary, &model_dir).unwrap();
    assert!(model_dir.join(INDEX_FILE).exists());
    assert!(model_dir.join(VOCABULARY_FILE).exists());

    // A reloaded index answers exactly as the built one
    let (loaded, vocabulary) = persistence::load(&model_dir).unwrap();
    assert_eq!(loaded, index);
    assert_eq!(vocabulary, corpus.vocabulary);
    let matcher = persistence::load_artifacts(&model_dir)
        .unwrap()
        .into_matcher()
        .unwrap();
    for row in [0, 17, 399] {
        let query = corpus.matrix.row(row);
        assert_eq!(
            matcher.search(query, 10).unwrap(),
            ApproximateMatcher::new(index.clone(), corpus.vocabulary.clone())
                .unwrap()
                .search(query, 10)
                .unwrap()
        );
    }

    let record = IndexEvaluator::new(settings.evaluation.clone())
        .evaluate(&corpus, &matcher)
        .unwrap();
    assert_eq!(record.num_queries, 40);
    assert_eq!(record.recall, 1.0);
    assert!(record.blessed);

    let eval_dir = output.path().join("evaluation");
    record.write_to(&eval_dir).unwrap();
    assert!(eval_dir.join(METRICS_FILE).exists());
    assert!(eval_dir.join(BLESSED_FILE).exists());
    assert!(!eval_dir.join(NOT_BLESSED_FILE).exists());

    let mut serving = settings.serving.clone();
    serving.index_dir = model_dir;
    let service = MatchService::open(serving).unwrap();

    let response = service
        .handle(&MatchRequest::identifier("item-3", None))
        .unwrap();
    assert_eq!(response.k, 5);
    assert_eq!(response.matches.len(), 5);
    assert_eq!(response.matches[0], "item-3");

    let error = service
        .handle(&MatchRequest::identifier("item-3", Some(51)))
        .unwrap_err();
    assert_eq!(error.query, Query::Identifier("item-3".into()));
    assert_eq!(error.k, Some(51));
}

#[test]
fn test_loader_reports_malformed_shards() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.csv"), "x,1.0,2.0\ny,1.0\n").unwrap();

    match VectorStore::default().load(dir.path()) {
        Err(LoadError::DimensionMismatch {
            identifier,
            expected,
            actual,
        }) => {
            assert_eq!(identifier, "y");
            assert_eq!((expected, actual), (2, 1));
        }
        other => panic!("expected dimension mismatch, got {other:?}"),
    }

    fs::write(dir.path().join("a.csv"), "x,1.0,oops\n").unwrap();
    assert!(matches!(
        VectorStore::default().load(dir.path()),
        Err(LoadError::Malformed { line: 1, .. })
    ));

    assert!(matches!(
        VectorStore::default().load(dir.path().join("missing-*.csv")),
        Err(LoadError::NoShards { .. })
    ));
}

#[test]
fn test_corrupt_artifacts_fail_to_load() {
    let input = TempDir::new().unwrap();
    let model = TempDir::new().unwrap();
    write_shards(input.path(), 60, 2);

    let corpus = VectorStore::default().load(input.path()).unwrap();
    let index = IndexBuilder::new().num_leaves(4).build(&corpus.matrix).unwrap();
    persistence::save(&index, &corpus.vocabulary, model.path()).unwrap();

    let path = model.path().join(INDEX_FILE);
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        persistence::load(model.path()),
        Err(PersistenceError::ChecksumMismatch(_))
    ));

    fs::remove_file(&path).unwrap();
    assert!(matches!(
        persistence::load(model.path()),
        Err(PersistenceError::MissingArtifact(_))
    ));
}

#[test]
fn test_service_reload_switches_index() {
    let input_a = TempDir::new().unwrap();
    let input_b = TempDir::new().unwrap();
    let models = TempDir::new().unwrap();
    write_shards(input_a.path(), 50, 3);
    write_shards(input_b.path(), 80, 4);

    for (input, name) in [(&input_a, "v1"), (&input_b, "v2")] {
        let corpus = VectorStore::default().load(input.path()).unwrap();
        let index = IndexBuilder::new().build(&corpus.matrix).unwrap();
        persistence::save(&index, &corpus.vocabulary, models.path().join(name)).unwrap();
    }

    let mut serving = settings().serving;
    serving.index_dir = models.path().join("v1");
    let service = MatchService::open(serving).unwrap();
    assert_eq!(service.snapshot().matcher().len(), 50);

    let version = service.reload(models.path().join("v2")).unwrap();
    assert_eq!(service.version(), version);
    assert_eq!(service.snapshot().matcher().len(), 80);
    assert!(service
        .handle(&MatchRequest::identifier("item-79", Some(3)))
        .is_ok());
}
