//! Single-slot cache of the most recently fitted model.
//!
//! The cached model is valid exactly when its fingerprint equals the
//! fingerprint of the current rating snapshot. There is no expiry.
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::data::Rating;
use crate::models::FactorizationModel;
use crate::FittingError;

/// SHA-256 digest of a rating snapshot.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint `ratings`, independently of their order.
    pub fn of(ratings: &[Rating]) -> Self {
        let mut sorted = ratings.to_owned();
        sorted.sort();

        let mut hasher = Sha256::new();
        hasher.update((sorted.len() as u64).to_le_bytes());

        for rating in &sorted {
            hasher.update((rating.user_id as u64).to_le_bytes());
            hasher.update((rating.project_id as u64).to_le_bytes());
            hasher.update([rating.score]);
        }

        let mut digest = [0; 32];
        digest.copy_from_slice(&hasher.finalize());

        Fingerprint(digest)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// Cache policy.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve the previous model instead of waiting while another request
    /// retrains.
    pub serve_stale: bool,
}

#[derive(Debug)]
struct CacheEntry {
    fingerprint: Fingerprint,
    model: Arc<FactorizationModel>,
}

/// Process-wide model cache.
///
/// Construct one per process and share it through an `Arc`. Training is
/// serialised by an internal lock, so concurrent misses on the same data
/// train once.
#[derive(Debug, Default)]
pub struct ModelCache {
    config: CacheConfig,
    entry: RwLock<Option<CacheEntry>>,
    training: Mutex<()>,
}

impl ModelCache {
    /// An empty cache with the default policy.
    pub fn new() -> Self {
        ModelCache::default()
    }

    /// An empty cache with the given policy.
    pub fn with_config(config: CacheConfig) -> Self {
        ModelCache {
            config,
            ..ModelCache::default()
        }
    }

    /// The cached model, whatever data it was trained on.
    pub fn get(&self) -> Option<Arc<FactorizationModel>> {
        self.read_entry(|entry| entry.model.clone())
    }

    /// Fingerprint of the data the cached model was trained on.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.read_entry(|entry| entry.fingerprint)
    }

    /// Whether the cached model was fitted on data with this fingerprint.
    pub fn is_valid(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprint().as_ref() == Some(fingerprint)
    }

    /// Replace the cached model.
    pub fn put(&self, fingerprint: Fingerprint, model: FactorizationModel) -> Arc<FactorizationModel> {
        let model = Arc::new(model);

        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        *entry = Some(CacheEntry {
            fingerprint,
            model: model.clone(),
        });

        model
    }

    /// Drop the cached model.
    pub fn clear(&self) {
        *self.entry.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Return the model cached for `fingerprint`, calling `train` to fit
    /// and cache one on a miss.
    ///
    /// Only one `train` runs at a time. Callers that miss while a training
    /// run is in progress wait for it and then re-check the cache, unless
    /// `serve_stale` is set and a previous model exists, in which case that
    /// model is returned straight away. A failed `train` leaves the cache
    /// untouched.
    pub fn get_or_train<F>(
        &self,
        fingerprint: Fingerprint,
        train: F,
    ) -> Result<Arc<FactorizationModel>, FittingError>
    where
        F: FnOnce() -> Result<FactorizationModel, FittingError>,
    {
        if let Some(model) = self.get_valid(&fingerprint) {
            debug!(%fingerprint, "model cache hit");
            return Ok(model);
        }

        let _guard = match self.training.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                if self.config.serve_stale {
                    if let Some(stale) = self.get() {
                        warn!(%fingerprint, "serving stale model while retraining");
                        return Ok(stale);
                    }
                }

                self.training.lock().unwrap_or_else(PoisonError::into_inner)
            }
        };

        // Somebody else may have trained while we waited for the lock.
        if let Some(model) = self.get_valid(&fingerprint) {
            debug!(%fingerprint, "model cache filled while waiting");
            return Ok(model);
        }

        info!(
            %fingerprint,
            previous = ?self.fingerprint(),
            "rating data changed, retraining"
        );

        let model = train()?;

        Ok(self.put(fingerprint, model))
    }

    fn get_valid(&self, fingerprint: &Fingerprint) -> Option<Arc<FactorizationModel>> {
        self.read_entry(|entry| {
            if &entry.fingerprint == fingerprint {
                Some(entry.model.clone())
            } else {
                None
            }
        })
        .flatten()
    }

    fn read_entry<T, F: FnOnce(&CacheEntry) -> T>(&self, func: F) -> Option<T> {
        let entry = self.entry.read().unwrap_or_else(PoisonError::into_inner);
        entry.as_ref().map(func)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::data::Trainset;
    use crate::models::Hyperparameters;

    fn ratings() -> Vec<Rating> {
        vec![
            Rating::new(1, 10, 5),
            Rating::new(2, 10, 3),
            Rating::new(2, 11, 4),
        ]
    }

    fn fit(ratings: &[Rating]) -> Result<FactorizationModel, FittingError> {
        Hyperparameters::new()
            .latent_dim(4)
            .seed(1)
            .fit(&Trainset::from(ratings))
            .map(|(model, _)| model)
    }

    #[test]
    fn fingerprint_ignores_order() {
        let mut reversed = ratings();
        reversed.reverse();

        assert_eq!(Fingerprint::of(&ratings()), Fingerprint::of(&reversed));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let mut changed = ratings();
        changed[1].score = 4;

        assert_ne!(Fingerprint::of(&ratings()), Fingerprint::of(&changed));
        assert_ne!(Fingerprint::of(&ratings()), Fingerprint::of(&ratings()[..2]));
        assert_eq!(Fingerprint::of(&[]).to_string().len(), 64);
    }

    #[test]
    fn put_get_and_validity() {
        let cache = ModelCache::new();
        let fingerprint = Fingerprint::of(&ratings());

        assert!(cache.get().is_none());
        assert!(!cache.is_valid(&fingerprint));

        cache.put(fingerprint, fit(&ratings()).unwrap());

        assert!(cache.get().is_some());
        assert!(cache.is_valid(&fingerprint));
        assert!(!cache.is_valid(&Fingerprint::of(&ratings()[..1])));

        cache.clear();
        assert!(cache.get().is_none());
    }

    #[test]
    fn get_or_train_trains_once_per_fingerprint() {
        let cache = ModelCache::new();
        let calls = AtomicUsize::new(0);
        let fingerprint = Fingerprint::of(&ratings());

        for _ in 0..3 {
            cache
                .get_or_train(fingerprint, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    fit(&ratings())
                })
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let changed = ratings()[..2].to_owned();
        cache
            .get_or_train(Fingerprint::of(&changed), || {
                calls.fetch_add(1, Ordering::SeqCst);
                fit(&changed)
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_valid(&Fingerprint::of(&changed)));
    }

    #[test]
    fn failed_training_is_not_cached() {
        let cache = ModelCache::new();
        let fingerprint = Fingerprint::of(&ratings());

        let result = cache.get_or_train(fingerprint, || Err(FittingError::Diverged { epoch: 3 }));

        assert_eq!(result.err(), Some(FittingError::Diverged { epoch: 3 }));
        assert!(cache.get().is_none());
    }

    #[test]
    fn concurrent_misses_train_once() {
        let cache = Arc::new(ModelCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));
        let fingerprint = Fingerprint::of(&ratings());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_train(fingerprint, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            fit(&ratings())
                        })
                        .map(|_| ())
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn serves_stale_model_while_retraining() {
        let cache = Arc::new(ModelCache::with_config(CacheConfig { serve_stale: true }));
        let old = Fingerprint::of(&ratings()[..1]);
        let new = Fingerprint::of(&ratings());
        cache.put(old, fit(&ratings()[..1]).unwrap());

        let started = Arc::new(Barrier::new(2));
        let trainer = {
            let cache = cache.clone();
            let started = started.clone();
            thread::spawn(move || {
                cache
                    .get_or_train(new, || {
                        started.wait();
                        thread::sleep(Duration::from_millis(100));
                        fit(&ratings())
                    })
                    .map(|_| ())
            })
        };

        started.wait();
        let served = cache
            .get_or_train(new, || panic!("second trainer must not run"))
            .unwrap();
        assert_eq!(served.num_projects(), 1);

        trainer.join().unwrap().unwrap();
        assert!(cache.is_valid(&new));
    }
}
