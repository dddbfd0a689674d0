//! Per-user prediction over the projects the user has not rated yet.
use serde::{Deserialize, Serialize};

use crate::data::Trainset;
use crate::{PredictionError, ProjectId, RatingModel, UserId};

/// Estimated score of a user for a project they have not rated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// The user the estimate is for.
    pub user_id: UserId,
    /// The estimated project.
    pub project_id: ProjectId,
    /// Estimated score, clipped to the rating scale.
    pub score: f32,
}

/// Predict scores for every project in `user_id`'s anti-testset.
///
/// Only the target user's candidates are scored, so this is linear in the
/// number of projects. Users absent from the trainset get predictions for
/// every project, backed by the model's cold-start fallback.
pub fn predict_unrated<T: RatingModel>(
    model: &T,
    trainset: &Trainset,
    user_id: UserId,
) -> Result<Vec<Prediction>, PredictionError> {
    let project_ids: Vec<ProjectId> = trainset
        .anti_testset_for(user_id)
        .into_iter()
        .map(|(project_id, _)| project_id)
        .collect();

    let scores = model.predict(user_id, &project_ids)?;

    Ok(project_ids
        .into_iter()
        .zip(scores)
        .map(|(project_id, score)| Prediction {
            user_id,
            project_id,
            score,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Rating;

    struct ConstantModel(f32);

    impl RatingModel for ConstantModel {
        fn predict(
            &self,
            _user_id: UserId,
            project_ids: &[ProjectId],
        ) -> Result<Vec<f32>, PredictionError> {
            Ok(vec![self.0; project_ids.len()])
        }
    }

    fn trainset() -> Trainset {
        let ratings = vec![
            Rating::new(1, 10, 5),
            Rating::new(1, 11, 2),
            Rating::new(2, 12, 4),
        ];
        Trainset::from(ratings.as_slice())
    }

    #[test]
    fn predicts_only_unrated_projects() {
        let predictions = predict_unrated(&ConstantModel(4.0), &trainset(), 1).unwrap();

        assert_eq!(
            predictions,
            vec![Prediction {
                user_id: 1,
                project_id: 12,
                score: 4.0
            }]
        );
    }

    #[test]
    fn cold_start_user_gets_every_project() {
        let predictions = predict_unrated(&ConstantModel(3.0), &trainset(), 99).unwrap();
        let projects: Vec<ProjectId> = predictions.iter().map(|x| x.project_id).collect();

        assert_eq!(projects, vec![10, 11, 12]);
        assert!(predictions.iter().all(|x| x.user_id == 99));
    }

    #[test]
    fn empty_trainset_predicts_nothing() {
        let empty = Trainset::from(&Vec::<Rating>::new()[..]);

        assert!(predict_unrated(&ConstantModel(5.0), &empty, 1)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn propagates_prediction_errors() {
        struct BrokenModel;

        impl RatingModel for BrokenModel {
            fn predict(&self, _: UserId, _: &[ProjectId]) -> Result<Vec<f32>, PredictionError> {
                Err(PredictionError::InvalidPredictionValue)
            }
        }

        assert_eq!(
            predict_unrated(&BrokenModel, &trainset(), 2),
            Err(PredictionError::InvalidPredictionValue)
        );
    }
}
