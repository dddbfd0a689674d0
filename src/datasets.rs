//! Rating datasets for testing and experimentation.
use std::path::Path;

use failure::Fail;
use rand::seq::index;
use rand::Rng;

use crate::data::Rating;
use crate::MAX_SCORE;

/// Largest synthetic dataset `generate_ratings` will produce.
pub const MAX_GENERATED_RATINGS: usize = 10_000;

/// Dataset error types.
#[derive(Debug, Fail, PartialEq)]
pub enum DatasetError {
    /// Requested number of generated ratings is out of bounds.
    #[fail(
        display = "Cannot generate {} ratings: must be between 1 and {}.",
        requested, max
    )]
    InvalidSize {
        /// Number of ratings asked for.
        requested: usize,
        /// Largest number that could be generated.
        max: usize,
    },
    /// A row in a rating file carries a score above the scale.
    #[fail(display = "Rating {} on line {} is outside the 0-5 scale.", score, line)]
    ScoreOutOfRange {
        /// One-based line number in the file.
        line: usize,
        /// The offending score.
        score: u8,
    },
}

/// Read ratings from a CSV file with a `user_id,project_id,rating` header.
pub fn load_ratings_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Rating>, failure::Error> {
    let mut reader = csv::Reader::from_path(path)?;
    let ratings: Vec<Rating> = reader.deserialize().collect::<Result<Vec<_>, _>>()?;

    if let Some((idx, rating)) = ratings.iter().enumerate().find(|(_, x)| !x.is_valid()) {
        return Err(DatasetError::ScoreOutOfRange {
            // Header is line 1.
            line: idx + 2,
            score: rating.score,
        }
        .into());
    }

    Ok(ratings)
}

/// Generate `k` random ratings over users `0..num_users` and projects
/// `0..num_projects`, no two for the same pair.
///
/// Half the ratings are good (4 or 5). The rest are 0 with probability
/// 1/8 and otherwise uniform between 1 and 3.
pub fn generate_ratings<R: Rng + ?Sized>(
    num_users: usize,
    num_projects: usize,
    k: usize,
    rng: &mut R,
) -> Result<Vec<Rating>, DatasetError> {
    let max = MAX_GENERATED_RATINGS.min(num_users.saturating_mul(num_projects));

    if k == 0 || k > max {
        return Err(DatasetError::InvalidSize { requested: k, max });
    }

    let pairs = index::sample(rng, num_users * num_projects, k);

    let ratings = pairs
        .into_iter()
        .map(|pair| {
            let score = if rng.gen_bool(0.5) {
                rng.gen_range(4..=MAX_SCORE)
            } else if rng.gen_range(0..8) == 0 {
                0
            } else {
                rng.gen_range(1..=3)
            };

            Rating::new(pair / num_projects, pair % num_projects, score)
        })
        .collect();

    Ok(ratings)
}
