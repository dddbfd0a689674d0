//! The rating store the recommender reads its training data from.
//!
//! The store enforces the invariants the rest of the crate relies on:
//! scores lie on the 0-5 scale and a user rates a project at most once.
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use failure::Fail;

use crate::data::Rating;
use crate::{ProjectId, UserId, MAX_SCORE};

/// Rating store error types.
#[derive(Debug, Fail, PartialEq)]
pub enum StoreError {
    /// The score is outside the 0-5 rating scale.
    #[fail(display = "Score {} is outside the 0-5 rating scale.", _0)]
    ScoreOutOfRange(u8),
    /// A rating form value that is neither a score nor the clear marker.
    #[fail(display = "Invalid rating value: {:?}.", _0)]
    InvalidValue(String),
    /// The backing storage could not be read.
    #[fail(display = "Rating storage unavailable: {}.", _0)]
    Unavailable(String),
}

/// Source of the full rating snapshot.
pub trait RatingStore {
    /// Every rating currently stored.
    fn all_ratings(&self) -> Result<Vec<Rating>, StoreError>;
}

impl<'a, T: RatingStore + ?Sized> RatingStore for &'a T {
    fn all_ratings(&self) -> Result<Vec<Rating>, StoreError> {
        (**self).all_ratings()
    }
}

impl<T: RatingStore + ?Sized> RatingStore for Arc<T> {
    fn all_ratings(&self) -> Result<Vec<Rating>, StoreError> {
        (**self).all_ratings()
    }
}

/// A value submitted through the rating form: a score, or `-` to clear.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RatingValue {
    /// Set the rating to this score.
    Score(u8),
    /// Remove the rating.
    Cleared,
}

impl FromStr for RatingValue {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();

        if value == "-" {
            return Ok(RatingValue::Cleared);
        }

        let score: u8 = value
            .parse()
            .map_err(|_| StoreError::InvalidValue(value.to_owned()))?;

        if score > MAX_SCORE {
            return Err(StoreError::ScoreOutOfRange(score));
        }

        Ok(RatingValue::Score(score))
    }
}

/// What a write did to the stored row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RatingChange {
    /// A new rating was stored.
    Created,
    /// An existing rating changed.
    Updated {
        /// The score before the write.
        previous: u8,
    },
    /// The rating already had this score.
    Unchanged,
    /// The rating was removed.
    Deleted {
        /// The score before the write.
        previous: u8,
    },
    /// There was no rating to remove.
    Absent,
}

/// Thread-safe in-memory rating store.
#[derive(Debug, Default)]
pub struct InMemoryRatingStore {
    ratings: RwLock<BTreeMap<(UserId, ProjectId), u8>>,
}

impl InMemoryRatingStore {
    /// An empty store.
    pub fn new() -> Self {
        InMemoryRatingStore::default()
    }

    /// Rate `project_id` as `user_id`, replacing any previous rating.
    pub fn set_rating(
        &self,
        user_id: UserId,
        project_id: ProjectId,
        score: u8,
    ) -> Result<RatingChange, StoreError> {
        if score > MAX_SCORE {
            return Err(StoreError::ScoreOutOfRange(score));
        }

        let mut ratings = self.ratings.write().unwrap_or_else(PoisonError::into_inner);

        Ok(match ratings.insert((user_id, project_id), score) {
            None => RatingChange::Created,
            Some(previous) if previous == score => RatingChange::Unchanged,
            Some(previous) => RatingChange::Updated { previous },
        })
    }

    /// Remove `user_id`'s rating of `project_id`, if any.
    pub fn clear_rating(&self, user_id: UserId, project_id: ProjectId) -> RatingChange {
        let mut ratings = self.ratings.write().unwrap_or_else(PoisonError::into_inner);

        match ratings.remove(&(user_id, project_id)) {
            Some(previous) => RatingChange::Deleted { previous },
            None => RatingChange::Absent,
        }
    }

    /// Apply a rating form value.
    pub fn apply(
        &self,
        user_id: UserId,
        project_id: ProjectId,
        value: RatingValue,
    ) -> Result<RatingChange, StoreError> {
        match value {
            RatingValue::Score(score) => self.set_rating(user_id, project_id, score),
            RatingValue::Cleared => Ok(self.clear_rating(user_id, project_id)),
        }
    }

    /// The stored score, if any.
    pub fn get(&self, user_id: UserId, project_id: ProjectId) -> Option<u8> {
        let ratings = self.ratings.read().unwrap_or_else(PoisonError::into_inner);
        ratings.get(&(user_id, project_id)).cloned()
    }

    /// Number of stored ratings.
    pub fn len(&self) -> usize {
        self.ratings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no ratings are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert many ratings at once; stops at the first invalid score.
    pub fn extend<I: IntoIterator<Item = Rating>>(&self, ratings: I) -> Result<(), StoreError> {
        for rating in ratings {
            self.set_rating(rating.user_id, rating.project_id, rating.score)?;
        }

        Ok(())
    }
}

impl RatingStore for InMemoryRatingStore {
    fn all_ratings(&self) -> Result<Vec<Rating>, StoreError> {
        let ratings = self.ratings.read().unwrap_or_else(PoisonError::into_inner);

        Ok(ratings
            .iter()
            .map(|(&(user_id, project_id), &score)| Rating::new(user_id, project_id, score))
            .collect())
    }
}
