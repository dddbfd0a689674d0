//! The recommendation pipeline: rating snapshot, cached model, per-user
//! predictions, ranking.
use std::sync::Arc;

use failure::Fail;
use tracing::debug;

use crate::cache::{Fingerprint, ModelCache};
use crate::data::Trainset;
use crate::models::Trainer;
use crate::prediction::predict_unrated;
use crate::ranking::{rank, ProjectCatalog, RankingConfig, Recommendation};
use crate::store::{RatingStore, StoreError};
use crate::{FittingError, PredictionError, UserId};

/// Recommendation error types.
#[derive(Debug, Fail, PartialEq)]
pub enum RecommendError {
    /// The rating snapshot could not be read.
    #[fail(display = "Failed to read ratings: {}", _0)]
    Store(#[cause] StoreError),
    /// Fitting a new model failed; nothing was cached.
    #[fail(display = "Failed to train the recommendation model: {}", _0)]
    Fitting(#[cause] FittingError),
    /// The model produced an unusable prediction.
    #[fail(display = "Failed to predict ratings: {}", _0)]
    Prediction(#[cause] PredictionError),
}

impl From<StoreError> for RecommendError {
    fn from(err: StoreError) -> Self {
        RecommendError::Store(err)
    }
}

impl From<FittingError> for RecommendError {
    fn from(err: FittingError) -> Self {
        RecommendError::Fitting(err)
    }
}

impl From<PredictionError> for RecommendError {
    fn from(err: PredictionError) -> Self {
        RecommendError::Prediction(err)
    }
}

/// Recommends projects from a rating store, retraining through a shared
/// [`ModelCache`] whenever the ratings change.
pub struct Recommender<S, C, T> {
    store: S,
    catalog: C,
    trainer: T,
    cache: Arc<ModelCache>,
    ranking: RankingConfig,
}

impl<S, C, T> Recommender<S, C, T>
where
    S: RatingStore,
    C: ProjectCatalog,
    T: Trainer,
{
    /// Build a recommender with the default ranking thresholds.
    pub fn new(store: S, catalog: C, trainer: T, cache: Arc<ModelCache>) -> Self {
        Recommender {
            store,
            catalog,
            trainer,
            cache,
            ranking: RankingConfig::default(),
        }
    }

    /// Set the ranking thresholds.
    pub fn ranking(mut self, ranking: RankingConfig) -> Self {
        self.ranking = ranking;
        self
    }

    /// The shared model cache.
    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// The trainer used on cache misses.
    pub fn trainer(&self) -> &T {
        &self.trainer
    }

    /// Ranked projects for `user_id`, best first.
    ///
    /// Retrains synchronously when the ratings changed since the cached
    /// model was fitted. Projects the user already rated are never
    /// returned; users without ratings get cold-start estimates.
    pub fn recommend_projects(&self, user_id: UserId) -> Result<Vec<Recommendation>, RecommendError> {
        let ratings = self.store.all_ratings()?;

        if ratings.is_empty() {
            debug!(user_id, "no ratings, nothing to recommend");
            return Ok(Vec::new());
        }

        let fingerprint = Fingerprint::of(&ratings);
        let trainset = Trainset::from(ratings.as_slice());

        let model = self
            .cache
            .get_or_train(fingerprint, || self.trainer.train(&trainset))?;

        let predictions = predict_unrated(model.as_ref(), &trainset, user_id)?;
        let num_predictions = predictions.len();

        let recommendations = rank(predictions, &self.catalog, &self.ranking);

        debug!(
            user_id,
            num_predictions,
            num_recommendations = recommendations.len(),
            "ranked recommendations"
        );

        Ok(recommendations)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use proptest::prelude::*;

    use super::*;
    use crate::data::Rating;
    use crate::models::{FactorizationModel, Hyperparameters};
    use crate::ranking::{ProjectInfo, ProjectStatus};
    use crate::store::InMemoryRatingStore;
    use crate::ProjectId;

    /// Wraps a trainer, counting how often it runs.
    struct CountingTrainer {
        inner: Hyperparameters,
        calls: AtomicUsize,
    }

    impl CountingTrainer {
        fn new(inner: Hyperparameters) -> Self {
            CountingTrainer {
                inner,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Trainer for CountingTrainer {
        fn train(&self, trainset: &Trainset) -> Result<FactorizationModel, FittingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.train(trainset)
        }
    }

    fn hyper() -> Hyperparameters {
        Hyperparameters::new().latent_dim(8).num_epochs(30).seed(7)
    }

    fn open_catalog(projects: impl IntoIterator<Item = ProjectId>) -> BTreeMap<ProjectId, ProjectInfo> {
        projects
            .into_iter()
            .map(|id| (id, ProjectInfo::new(ProjectStatus::Vacant, 1)))
            .collect()
    }

    type TestRecommender =
        Recommender<Arc<InMemoryRatingStore>, BTreeMap<ProjectId, ProjectInfo>, CountingTrainer>;

    fn recommender(
        store: &Arc<InMemoryRatingStore>,
        catalog: BTreeMap<ProjectId, ProjectInfo>,
    ) -> TestRecommender {
        Recommender::new(
            store.clone(),
            catalog,
            CountingTrainer::new(hyper()),
            Arc::new(ModelCache::new()),
        )
    }

    #[test]
    fn empty_store_recommends_nothing() {
        let store = Arc::new(InMemoryRatingStore::new());
        let recommender = recommender(&store, open_catalog(0..10));

        assert_eq!(recommender.recommend_projects(1), Ok(Vec::new()));
        assert_eq!(recommender.trainer().calls(), 0);
    }

    #[test]
    fn cold_start_user_gets_global_mean() {
        let store = Arc::new(InMemoryRatingStore::new());
        store.set_rating(1, 10, 5).unwrap();
        let recommender = recommender(&store, open_catalog(vec![10]));

        let recommendations = recommender.recommend_projects(2).unwrap();

        assert_eq!(recommendations.len(), 1);
        assert_eq!(recommendations[0].project_id, 10);
        assert!(recommendations[0].score > 3.5);
        assert!((recommendations[0].score - 5.0).abs() < 0.2);

        // The only project is already rated by user 1.
        assert!(recommender.recommend_projects(1).unwrap().is_empty());
    }

    #[test]
    fn trains_once_while_data_is_unchanged() {
        let store = Arc::new(InMemoryRatingStore::new());
        store
            .extend(vec![
                Rating::new(1, 10, 5),
                Rating::new(1, 11, 4),
                Rating::new(2, 10, 4),
                Rating::new(3, 12, 5),
            ])
            .unwrap();
        let recommender = recommender(&store, open_catalog(10..13));

        let first = recommender.recommend_projects(2).unwrap();
        let second = recommender.recommend_projects(2).unwrap();
        recommender.recommend_projects(3).unwrap();

        assert_eq!(first, second);
        assert_eq!(recommender.trainer().calls(), 1);
    }

    #[test]
    fn rating_change_retrains() {
        let store = Arc::new(InMemoryRatingStore::new());
        store.set_rating(1, 10, 5).unwrap();
        store.set_rating(2, 11, 3).unwrap();
        let recommender = recommender(&store, open_catalog(10..12));

        recommender.recommend_projects(1).unwrap();
        let before = recommender.cache().fingerprint();

        // Rewriting the same score leaves the data, and the model, as is.
        store.set_rating(2, 11, 3).unwrap();
        recommender.recommend_projects(1).unwrap();
        assert_eq!(recommender.trainer().calls(), 1);

        store.set_rating(2, 11, 4).unwrap();
        assert_eq!(store.len(), 2);
        recommender.recommend_projects(1).unwrap();

        assert_eq!(recommender.trainer().calls(), 2);
        assert_ne!(recommender.cache().fingerprint(), before);
    }

    #[test]
    fn clearing_a_rating_makes_the_project_a_candidate_again() {
        let store = Arc::new(InMemoryRatingStore::new());
        store
            .extend(vec![
                Rating::new(1, 10, 5),
                Rating::new(1, 11, 5),
                Rating::new(2, 10, 5),
            ])
            .unwrap();
        let recommender = recommender(&store, open_catalog(10..12))
            .ranking(RankingConfig::default().min_score(0.0));

        assert!(recommender
            .recommend_projects(1)
            .unwrap()
            .iter()
            .all(|x| x.project_id != 11));

        store.clear_rating(1, 11);
        store.set_rating(2, 11, 5).unwrap();

        let projects: Vec<ProjectId> = recommender
            .recommend_projects(1)
            .unwrap()
            .into_iter()
            .map(|x| x.project_id)
            .collect();
        assert_eq!(projects, vec![11]);
    }

    #[test]
    fn training_failure_propagates() {
        let store = Arc::new(InMemoryRatingStore::new());
        store.set_rating(1, 10, 5).unwrap();
        store.set_rating(2, 10, 0).unwrap();

        let recommender = Recommender::new(
            store,
            open_catalog(vec![10]),
            Hyperparameters::new().learning_rate(1e10).num_epochs(50).seed(1),
            Arc::new(ModelCache::new()),
        );

        match recommender.recommend_projects(3) {
            Err(RecommendError::Fitting(FittingError::Diverged { .. })) => {}
            other => panic!("expected divergence, got {:?}", other),
        }
        assert!(recommender.cache().get().is_none());
    }

    #[test]
    fn store_failure_propagates() {
        struct BrokenStore;

        impl RatingStore for BrokenStore {
            fn all_ratings(&self) -> Result<Vec<Rating>, StoreError> {
                Err(StoreError::Unavailable("connection refused".to_owned()))
            }
        }

        let recommender = Recommender::new(
            BrokenStore,
            open_catalog(vec![1]),
            hyper(),
            Arc::new(ModelCache::new()),
        );

        assert_eq!(
            recommender.recommend_projects(1),
            Err(RecommendError::Store(StoreError::Unavailable(
                "connection refused".to_owned()
            )))
        );
    }

    #[test]
    fn recommenders_share_a_cache() {
        let store = Arc::new(InMemoryRatingStore::new());
        store.set_rating(1, 10, 5).unwrap();
        store.set_rating(2, 11, 4).unwrap();
        let cache = Arc::new(ModelCache::new());

        let handles: Vec<_> = (0..4)
            .map(|user_id| {
                let store = store.clone();
                let cache = cache.clone();
                thread::spawn(move || {
                    let trainer = CountingTrainer::new(hyper());
                    let recommender =
                        Recommender::new(store, open_catalog(10..12), &trainer, cache);
                    recommender.recommend_projects(user_id).map(|_| trainer.calls())
                })
            })
            .collect();

        let calls: usize = handles
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .sum();

        assert_eq!(calls, 1);
    }

    fn snapshot() -> impl Strategy<Value = Vec<(usize, usize, u8)>> {
        prop::collection::vec((0..8_usize, 0..12_usize, 0..=5_u8), 1..40)
    }

    fn statuses() -> impl Strategy<Value = Vec<(u8, usize)>> {
        prop::collection::vec((0..3_u8, 0..3_usize), 12)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn recommendations_are_open_unrated_and_sorted(
            ratings in snapshot(),
            project_states in statuses(),
            user_id in 0..10_usize,
        ) {
            let store = Arc::new(InMemoryRatingStore::new());
            for &(user, project, score) in &ratings {
                store.set_rating(user, project, score).unwrap();
            }

            let catalog: BTreeMap<ProjectId, ProjectInfo> = project_states
                .iter()
                .enumerate()
                .map(|(project_id, &(status, vacancies))| {
                    let status = match status {
                        0 => ProjectStatus::Active,
                        1 => ProjectStatus::Completed,
                        _ => ProjectStatus::Vacant,
                    };
                    (project_id, ProjectInfo::new(status, vacancies))
                })
                .collect();

            let recommender = recommender(&store, catalog.clone())
                .ranking(RankingConfig::default().min_score(0.0).max_results(None));

            let first = recommender.recommend_projects(user_id).unwrap();
            let second = recommender.recommend_projects(user_id).unwrap();

            prop_assert_eq!(&first, &second);
            prop_assert_eq!(recommender.trainer().calls(), 1);

            let rated: HashSet<ProjectId> = store
                .all_ratings()
                .unwrap()
                .into_iter()
                .filter(|x| x.user_id == user_id)
                .map(|x| x.project_id)
                .collect();

            for recommendation in &first {
                prop_assert!(!rated.contains(&recommendation.project_id));
                prop_assert!(catalog[&recommendation.project_id].is_open());
                prop_assert!(recommendation.score > 0.0 && recommendation.score <= 5.0);
            }

            for pair in first.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }
}
