//! Random hyperparameter search for the factorization model.
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::Parser;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use projrec::data::{user_based_split, Ratings};
use projrec::datasets::{generate_ratings, load_ratings_csv};
use projrec::evaluation::rmse_score;
use projrec::models::factorization::Hyperparameters;

#[derive(Parser)]
#[command(name = "factorization_hyperopt")]
#[command(about = "Random search over factorization hyperparameters", long_about = None)]
struct Args {
    /// CSV file with `user_id,project_id,rating` rows; synthetic ratings
    /// are generated when omitted.
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Number of hyperparameter draws.
    #[arg(short, long, default_value_t = 100)]
    iterations: usize,

    /// JSON file results are merged into.
    #[arg(short, long, default_value = "factorization_results.json")]
    results: PathBuf,

    /// Fraction of users held out for testing.
    #[arg(long, default_value_t = 0.2)]
    test_fraction: f32,

    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SearchResult {
    test_rmse: f32,
    train_rmse: f32,
    train_loss: f32,
    elapsed: Duration,
    hyperparameters: Hyperparameters,
}

fn read_results(path: &Path) -> Result<Vec<SearchResult>, failure::Error> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    Ok(serde_json::from_reader(File::open(path)?)?)
}

fn main() -> Result<(), failure::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut rng = match args.seed {
        Some(seed) => XorShiftRng::seed_from_u64(seed),
        None => XorShiftRng::from_entropy(),
    };

    let mut data = Ratings::from(match args.data {
        Some(ref path) => load_ratings_csv(path)?,
        None => generate_ratings(500, 200, 10_000, &mut rng)?,
    });

    let (train, test) = user_based_split(&mut data, &mut rng, args.test_fraction);
    if train.is_empty() || test.is_empty() {
        failure::bail!("Split left no ratings to train or test on.");
    }
    let trainset = train.to_trainset();

    info!(
        users = trainset.num_users(),
        projects = trainset.num_projects(),
        train = train.len(),
        test = test.len(),
        "loaded ratings"
    );

    for iteration in 0..args.iterations {
        let hyper = Hyperparameters::random(&mut rng);
        info!(iteration, ?hyper, "fitting");

        let start = Instant::now();
        let (model, train_loss) = match hyper.fit(&trainset) {
            Ok(fitted) => fitted,
            Err(err) => {
                warn!(iteration, %err, "fit failed");
                continue;
            }
        };

        let result = SearchResult {
            train_rmse: rmse_score(&model, train.data())?,
            test_rmse: rmse_score(&model, test.data())?,
            train_loss,
            elapsed: start.elapsed(),
            hyperparameters: hyper,
        };

        info!(
            iteration,
            train_rmse = result.train_rmse,
            test_rmse = result.test_rmse,
            "evaluated"
        );

        let mut results = read_results(&args.results)?;
        if result.test_rmse.is_finite() {
            results.push(result);
            results.sort_by(|a, b| a.test_rmse.total_cmp(&b.test_rmse));
        }

        if let Some(best) = results.first() {
            info!(test_rmse = best.test_rmse, hyper = ?best.hyperparameters, "best so far");
        }

        serde_json::to_writer_pretty(File::create(&args.results)?, &results)?;
    }

    Ok(())
}
