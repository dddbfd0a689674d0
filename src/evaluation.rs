//! Accuracy of rating models on held-out ratings.
use std::collections::BTreeMap;

use failure::Fail;
use itertools::izip;
use rayon::prelude::*;

use crate::data::Rating;
use crate::{PredictionError, ProjectId, RatingModel, UserId};

/// Evaluation error types.
#[derive(Debug, Fail, PartialEq)]
pub enum EvaluationError {
    /// The test set is empty.
    #[fail(display = "No ratings to evaluate on.")]
    NoRatings,
    /// The model failed to predict.
    #[fail(display = "{}", _0)]
    Prediction(#[cause] PredictionError),
}

impl From<PredictionError> for EvaluationError {
    fn from(err: PredictionError) -> Self {
        EvaluationError::Prediction(err)
    }
}

fn errors<T: RatingModel + Sync>(model: &T, test: &[Rating]) -> Result<Vec<f32>, EvaluationError> {
    if test.is_empty() {
        return Err(EvaluationError::NoRatings);
    }

    let mut by_user: BTreeMap<UserId, (Vec<ProjectId>, Vec<u8>)> = BTreeMap::new();
    for rating in test {
        let (project_ids, scores) = by_user.entry(rating.user_id).or_default();
        project_ids.push(rating.project_id);
        scores.push(rating.score);
    }

    let users: Vec<_> = by_user.into_iter().collect();

    let errors: Vec<Vec<f32>> = users
        .par_iter()
        .map(|(user_id, (project_ids, scores))| -> Result<Vec<f32>, PredictionError> {
            let estimates = model.predict(*user_id, project_ids)?;

            Ok(izip!(estimates, scores)
                .map(|(estimate, &score)| estimate - f32::from(score))
                .collect())
        })
        .collect::<Result<_, PredictionError>>()?;

    Ok(errors.concat())
}

/// Root mean squared error of `model` on `test`.
pub fn rmse_score<T: RatingModel + Sync>(model: &T, test: &[Rating]) -> Result<f32, EvaluationError> {
    let errors = errors(model, test)?;
    let squared: f32 = errors.iter().map(|x| x * x).sum();

    Ok((squared / errors.len() as f32).sqrt())
}

/// Mean absolute error of `model` on `test`.
pub fn mae_score<T: RatingModel + Sync>(model: &T, test: &[Rating]) -> Result<f32, EvaluationError> {
    let errors = errors(model, test)?;
    let absolute: f32 = errors.iter().map(|x| x.abs()).sum();

    Ok(absolute / errors.len() as f32)
}
