#![deny(missing_docs)]
//! # projrec
//!
//! `projrec` recommends projects to users from the ratings they have given
//! to other projects. Ratings are factorized into user and project latent
//! factors with a biased SVD-style model fitted by stochastic gradient
//! descent; the fitted model is cached against a fingerprint of the rating
//! data, so it is only retrained when the data changes.
//!
//! ## Example
//!
//! ```rust
//! # use std::collections::HashMap;
//! # use std::sync::Arc;
//! use projrec::cache::ModelCache;
//! use projrec::models::factorization::Hyperparameters;
//! use projrec::ranking::{ProjectInfo, ProjectStatus, RankingConfig};
//! use projrec::recommender::Recommender;
//! use projrec::store::InMemoryRatingStore;
//!
//! let store = Arc::new(InMemoryRatingStore::new());
//! store.set_rating(1, 10, 5).unwrap();
//! store.set_rating(1, 11, 4).unwrap();
//! store.set_rating(2, 10, 5).unwrap();
//!
//! let mut catalog = HashMap::new();
//! catalog.insert(10, ProjectInfo::new(ProjectStatus::Vacant, 1));
//! catalog.insert(11, ProjectInfo::new(ProjectStatus::Active, 2));
//!
//! let recommender = Recommender::new(
//!     store.clone(),
//!     catalog,
//!     Hyperparameters::new().latent_dim(8).seed(42),
//!     Arc::new(ModelCache::new()),
//! )
//! .ranking(RankingConfig::default().min_score(0.0));
//!
//! for recommendation in recommender.recommend_projects(2).unwrap() {
//!     println!("{} -> {:.2}", recommendation.project_id, recommendation.score);
//! }
//! ```
use failure::Fail;

pub mod cache;
pub mod config;
pub mod data;
pub mod datasets;
pub mod evaluation;
pub mod interests;
pub mod models;
pub mod prediction;
pub mod ranking;
pub mod recommender;
pub mod store;

/// Alias for user ids.
pub type UserId = usize;
/// Alias for project ids.
pub type ProjectId = usize;
/// Alias for interest tag ids.
pub type TagId = usize;

/// Lowest score a rating can carry.
pub const MIN_SCORE: u8 = 0;
/// Highest score a rating can carry.
pub const MAX_SCORE: u8 = 5;

/// Prediction error types.
#[derive(Debug, Fail, PartialEq)]
pub enum PredictionError {
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
}

/// Fitting error types.
#[derive(Debug, Fail, PartialEq)]
pub enum FittingError {
    /// No ratings were given to fit on.
    #[fail(display = "No ratings provided.")]
    NoRatings,
    /// A hyperparameter is out of its valid range.
    #[fail(display = "Invalid hyperparameter: {}.", _0)]
    InvalidHyperparameter(&'static str),
    /// The loss stopped being finite during training.
    #[fail(display = "Training diverged at epoch {}.", epoch)]
    Diverged {
        /// Epoch at which the loss became non-finite.
        epoch: usize,
    },
    /// Training ran past its configured time budget.
    #[fail(
        display = "Training timed out after {} of {} epochs.",
        completed_epochs, num_epochs
    )]
    Timeout {
        /// Epochs completed before giving up.
        completed_epochs: usize,
        /// Epochs requested.
        num_epochs: usize,
    },
}

/// Trait describing models that can estimate the score a user would
/// give to projects.
pub trait RatingModel {
    /// Estimate the scores `user_id` would give to `project_ids`.
    ///
    /// Users and projects the model has never seen must still receive an
    /// estimate.
    fn predict(
        &self,
        user_id: UserId,
        project_ids: &[ProjectId],
    ) -> Result<Vec<f32>, PredictionError>;
}
