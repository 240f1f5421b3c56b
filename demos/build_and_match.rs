//! Build, evaluate, persist and query an item-matcher index.
//!
//! Run with: cargo run --release --example build_and_match -- [SOURCE] [CONFIG]
//!
//! SOURCE is a file, directory or glob of CSV / JSON-lines embedding shards.
//! Without it, a synthetic clustered corpus is generated. CONFIG is an
//! optional TOML settings file; `ITEM_MATCHER_*` environment variables
//! override it.

use item_matcher::config::Settings;
use item_matcher::{
    persistence, IndexBuilder, IndexEvaluator, MatchRequest, MatchService, VectorStore,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;

/// Write `clusters` groups of noisy copies of random centers as CSV shards.
fn write_synthetic(dir: &Path, clusters: usize, per_cluster: usize, dim: usize) -> std::io::Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    for shard in 0..4 {
        let mut out = String::new();
        for c in (shard..clusters).step_by(4) {
            let center: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            for i in 0..per_cluster {
                let _ = write!(out, "item-{c}-{i}");
                for x in &center {
                    let _ = write!(out, ",{}", x + rng.gen_range(-0.15..0.15));
                }
                out.push('\n');
            }
        }
        std::fs::write(dir.join(format!("embeddings-{shard:02}.csv")), out)?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== item-matcher: build and match ===\n");

    let mut args = std::env::args().skip(1);
    let workspace = TempDir::new()?;
    let source = match args.next() {
        Some(source) => PathBuf::from(source),
        None => {
            println!("No source given, generating 200 clusters x 50 items (dim 64)");
            write_synthetic(workspace.path(), 200, 50, 64)?;
            workspace.path().join("embeddings-*.csv")
        }
    };
    let settings = match args.next() {
        Some(config) => Settings::load_from(config)?,
        None => Settings::from_toml_str("")?,
    };

    // Load
    let start = Instant::now();
    let corpus = VectorStore::from_config(&settings.loader).load(&source)?;
    println!(
        "Loaded {} items of dimension {} in {:.2?}",
        corpus.len(),
        corpus.dimension(),
        start.elapsed()
    );

    // Build
    let start = Instant::now();
    let index = IndexBuilder::from_config(&settings.index).build(&corpus.matrix)?;
    println!("Built index in {:.2?}", start.elapsed());
    println!("{}", index.statistics().summary());
    let (_, search_stats) = index.search_with_stats(corpus.matrix.row(0), 10);
    println!("{}", search_stats.summary());

    // Persist and reload through the serving path
    let model_dir = workspace.path().join("model");
    persistence::save(&index, &corpus.vocabulary, &model_dir)?;
    let mut serving = settings.serving.clone();
    serving.index_dir = model_dir.clone();
    let service = MatchService::open(serving)?;
    println!("Serving {}", service.version());

    // Evaluate
    let evaluator = IndexEvaluator::new(settings.evaluation.clone());
    let snapshot = service.snapshot();
    let record = evaluator.evaluate(&corpus, snapshot.matcher())?;
    record.write_to(workspace.path().join("evaluation"))?;
    println!(
        "\nRecall@{}: {:.4} over {} queries, mean latency {:.3} ms, blessed: {}",
        record.num_neighbors,
        record.recall,
        record.num_queries,
        record.latency * 1000.0,
        record.blessed
    );

    // Query by identifier
    if let Some(first) = corpus.vocabulary.iter().next() {
        let request = MatchRequest::identifier(first, Some(5));
        println!("\nRequest:  {}", serde_json::to_string(&request)?);
        match service.handle(&request) {
            Ok(response) => println!("Response: {}", serde_json::to_string(&response)?),
            Err(error) => println!("Error:    {}", serde_json::to_string(&error)?),
        }
    }

    let request = MatchRequest::identifier("no-such-item", None);
    if let Err(error) = service.handle(&request) {
        println!("Error:    {}", serde_json::to_string(&error)?);
    }

    Ok(())
}
