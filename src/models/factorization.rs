//! Biased matrix factorization for explicit ratings.
//!
//! The model estimates
//!
//! - a bias per user and per project,
//! - n-dimensional latent factors per user and per project,
//!
//! and predicts the score of user `u` for project `i` as
//! ```text
//! r_ui = mean + b_u + b_i + p_u · q_i
//! ```
//! clipped to the 0-5 rating scale. Parameters are fitted by plain SGD on
//! the squared error with an L2 penalty on factors and biases.
//!
//! Factors are initialised randomly and ratings are visited in a random
//! order every epoch, so two fits on the same data are not bit-identical
//! unless a seed is set.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use ndarray::{Array1, Array2};
use rand::distributions::{Distribution, Uniform};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::Trainer;
use crate::data::Trainset;
use crate::{FittingError, PredictionError, ProjectId, RatingModel, UserId, MAX_SCORE, MIN_SCORE};

fn factor_init<R: Rng>(rows: usize, cols: usize, normal: &Normal<f32>, rng: &mut R) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |_| normal.sample(rng))
}

/// Hyperparameters describing the factorization model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    latent_dim: usize,
    num_epochs: usize,
    learning_rate: f32,
    l2_penalty: f32,
    init_std_dev: f32,
    seed: Option<u64>,
    timeout: Option<Duration>,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters::new()
    }
}

impl Hyperparameters {
    /// Build new hyperparameters.
    pub fn new() -> Self {
        Hyperparameters {
            latent_dim: 100,
            num_epochs: 20,
            learning_rate: 0.005,
            l2_penalty: 0.02,
            init_std_dev: 0.1,
            seed: None,
            timeout: None,
        }
    }

    /// Set the number of latent factors.
    pub fn latent_dim(mut self, latent_dim: usize) -> Self {
        self.latent_dim = latent_dim;
        self
    }

    /// Set the number of passes over the ratings per fit.
    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the L2 penalty.
    pub fn l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    /// Set the standard deviation of the initial factors.
    pub fn init_std_dev(mut self, init_std_dev: f32) -> Self {
        self.init_std_dev = init_std_dev;
        self
    }

    /// Seed the random number generator, making fits reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Give up fitting once `timeout` has elapsed. Checked between epochs.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of latent factors.
    pub fn get_latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// Passes over the ratings per fit.
    pub fn get_num_epochs(&self) -> usize {
        self.num_epochs
    }

    /// Set hyperparameters randomly: useful for hyperparameter search.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Hyperparameters {
            latent_dim: 2_usize.pow(Uniform::new(2, 8).sample(rng)),
            num_epochs: Uniform::new(10, 80).sample(rng),
            learning_rate: (10.0_f32).powf(Uniform::new(-3.5, -1.5).sample(rng)),
            l2_penalty: (10.0_f32).powf(Uniform::new(-4.0, -0.5).sample(rng)),
            init_std_dev: (10.0_f32).powf(Uniform::new(-2.0, -0.5).sample(rng)),
            seed: None,
            timeout: None,
        }
    }

    fn rng(&self) -> XorShiftRng {
        match self.seed {
            Some(seed) => XorShiftRng::seed_from_u64(seed),
            None => XorShiftRng::seed_from_u64(rand::thread_rng().gen()),
        }
    }

    fn validate(&self) -> Result<Normal<f32>, FittingError> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(FittingError::InvalidHyperparameter("learning rate"));
        }
        if !self.l2_penalty.is_finite() || self.l2_penalty < 0.0 {
            return Err(FittingError::InvalidHyperparameter("l2 penalty"));
        }

        Normal::new(0.0, self.init_std_dev)
            .map_err(|_| FittingError::InvalidHyperparameter("initial standard deviation"))
    }

    /// Fit a model on `trainset`, returning it with the mean squared
    /// error of the final epoch.
    pub fn fit(&self, trainset: &Trainset) -> Result<(FactorizationModel, f32), FittingError> {
        if trainset.is_empty() {
            return Err(FittingError::NoRatings);
        }

        let normal = self.validate()?;
        let start = Instant::now();
        let mut rng = self.rng();

        let (num_users, num_projects) = trainset.shape();
        let global_mean = trainset.global_mean();
        let learning_rate = self.learning_rate;
        let l2_penalty = self.l2_penalty;

        let mut user_factors = factor_init(num_users, self.latent_dim, &normal, &mut rng);
        let mut project_factors = factor_init(num_projects, self.latent_dim, &normal, &mut rng);
        let mut user_biases = Array1::<f32>::zeros(num_users);
        let mut project_biases = Array1::<f32>::zeros(num_projects);

        let mut ratings = trainset.all_ratings();
        let mut loss = 0.0;

        for epoch in 0..self.num_epochs {
            ratings.shuffle(&mut rng);

            let mut squared_error = 0.0_f64;

            for &(user_idx, project_idx, score) in &ratings {
                let mut user_vector = user_factors.row_mut(user_idx);
                let mut project_vector = project_factors.row_mut(project_idx);

                let estimate = global_mean
                    + user_biases[user_idx]
                    + project_biases[project_idx]
                    + user_vector.dot(&project_vector);
                let err = score - estimate;

                squared_error += f64::from(err * err);

                user_biases[user_idx] += learning_rate * (err - l2_penalty * user_biases[user_idx]);
                project_biases[project_idx] +=
                    learning_rate * (err - l2_penalty * project_biases[project_idx]);

                for (user_factor, project_factor) in
                    user_vector.iter_mut().zip(project_vector.iter_mut())
                {
                    let (p, q) = (*user_factor, *project_factor);
                    *user_factor += learning_rate * (err * q - l2_penalty * p);
                    *project_factor += learning_rate * (err * p - l2_penalty * q);
                }
            }

            loss = (squared_error / ratings.len() as f64) as f32;

            // The last updates of an epoch are not reflected in its loss.
            if !loss.is_finite()
                || !all_finite(user_factors.iter())
                || !all_finite(project_factors.iter())
                || !all_finite(user_biases.iter())
                || !all_finite(project_biases.iter())
            {
                return Err(FittingError::Diverged { epoch });
            }

            trace!(epoch, loss, "finished epoch");

            if let Some(timeout) = self.timeout {
                if epoch + 1 < self.num_epochs && start.elapsed() >= timeout {
                    return Err(FittingError::Timeout {
                        completed_epochs: epoch + 1,
                        num_epochs: self.num_epochs,
                    });
                }
            }
        }

        debug!(
            num_users,
            num_projects,
            num_ratings = ratings.len(),
            loss,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "fitted factorization model"
        );

        let model = FactorizationModel {
            global_mean,
            user_index: index_of(trainset.user_ids()),
            project_index: index_of(trainset.project_ids()),
            user_factors,
            project_factors,
            user_biases,
            project_biases,
        };

        Ok((model, loss))
    }
}

fn all_finite<'a, I: IntoIterator<Item = &'a f32>>(values: I) -> bool {
    values.into_iter().all(|x| x.is_finite())
}

fn index_of(ids: &[usize]) -> HashMap<usize, usize> {
    ids.iter().enumerate().map(|(idx, &id)| (id, idx)).collect()
}

impl Trainer for Hyperparameters {
    fn train(&self, trainset: &Trainset) -> Result<FactorizationModel, FittingError> {
        self.fit(trainset).map(|(model, _)| model)
    }
}

/// A fitted factorization model.
#[derive(Clone, Debug)]
pub struct FactorizationModel {
    global_mean: f32,
    user_index: HashMap<UserId, usize>,
    project_index: HashMap<ProjectId, usize>,
    user_factors: Array2<f32>,
    project_factors: Array2<f32>,
    user_biases: Array1<f32>,
    project_biases: Array1<f32>,
}

impl FactorizationModel {
    /// Mean score of the ratings the model was fitted on.
    pub fn global_mean(&self) -> f32 {
        self.global_mean
    }

    /// Number of users seen during fitting.
    pub fn num_users(&self) -> usize {
        self.user_index.len()
    }

    /// Number of projects seen during fitting.
    pub fn num_projects(&self) -> usize {
        self.project_index.len()
    }

    /// Number of latent factors.
    pub fn latent_dim(&self) -> usize {
        self.user_factors.ncols()
    }

    /// Whether `user_id` was seen during fitting.
    pub fn knows_user(&self, user_id: UserId) -> bool {
        self.user_index.contains_key(&user_id)
    }

    /// Whether `project_id` was seen during fitting.
    pub fn knows_project(&self, project_id: ProjectId) -> bool {
        self.project_index.contains_key(&project_id)
    }

    /// Estimated score of `user_id` for `project_id`.
    ///
    /// Falls back on whatever is known: an unseen user contributes no bias
    /// or factors, same for an unseen project, leaving the global mean when
    /// neither was seen.
    ///
    /// Finite estimates are clipped to the rating scale; a non-finite one
    /// is returned as is.
    pub fn estimate(&self, user_id: UserId, project_id: ProjectId) -> f32 {
        let user_idx = self.user_index.get(&user_id);
        let project_idx = self.project_index.get(&project_id);

        let mut estimate = self.global_mean;

        if let Some(&user_idx) = user_idx {
            estimate += self.user_biases[user_idx];
        }
        if let Some(&project_idx) = project_idx {
            estimate += self.project_biases[project_idx];
        }
        if let (Some(&user_idx), Some(&project_idx)) = (user_idx, project_idx) {
            estimate += self
                .user_factors
                .row(user_idx)
                .dot(&self.project_factors.row(project_idx));
        }

        if estimate.is_finite() {
            estimate.max(f32::from(MIN_SCORE)).min(f32::from(MAX_SCORE))
        } else {
            estimate
        }
    }
}

impl RatingModel for FactorizationModel {
    fn predict(
        &self,
        user_id: UserId,
        project_ids: &[ProjectId],
    ) -> Result<Vec<f32>, PredictionError> {
        project_ids
            .iter()
            .map(|&project_id| {
                let estimate = self.estimate(user_id, project_id);

                if estimate.is_finite() {
                    Ok(estimate)
                } else {
                    Err(PredictionError::InvalidPredictionValue)
                }
            })
            .collect()
    }
}
