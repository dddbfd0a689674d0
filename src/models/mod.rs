//! Models module.
pub mod factorization;

use crate::data::Trainset;
use crate::FittingError;

pub use self::factorization::{FactorizationModel, Hyperparameters};

/// Something that can fit a [`FactorizationModel`] to a trainset.
///
/// The recommender only talks to this trait, so training can be wrapped
/// (counted, delayed, replaced) without touching the pipeline.
pub trait Trainer {
    /// Fit a fresh model on `trainset`.
    fn train(&self, trainset: &Trainset) -> Result<FactorizationModel, FittingError>;
}

impl<'a, T: Trainer + ?Sized> Trainer for &'a T {
    fn train(&self, trainset: &Trainset) -> Result<FactorizationModel, FittingError> {
        (**self).train(trainset)
    }
}
