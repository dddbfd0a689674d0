//! Rating collections and the compressed trainset the factorization model
//! is fitted on.
use std::collections::BTreeMap;
use std::hash::Hasher;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher;

use super::{ProjectId, UserId, MAX_SCORE};

/// A single (user, project, score) triple.
///
/// The serialized field names match the `user_id,project_id,rating`
/// columns of rating exports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rating {
    /// The rating user.
    pub user_id: UserId,
    /// The rated project.
    pub project_id: ProjectId,
    /// Score on the 0-5 scale.
    #[serde(rename = "rating")]
    pub score: u8,
}

impl Rating {
    /// Create a rating.
    pub fn new(user_id: UserId, project_id: ProjectId, score: u8) -> Self {
        Rating {
            user_id,
            project_id,
            score,
        }
    }

    /// Whether the score lies on the 0-5 rating scale.
    pub fn is_valid(&self) -> bool {
        self.score <= MAX_SCORE
    }
}

/// An owned collection of ratings, used for evaluation splits.
#[derive(Clone, Debug, Default)]
pub struct Ratings {
    ratings: Vec<Rating>,
}

impl Ratings {
    /// The ratings as a slice.
    pub fn data(&self) -> &[Rating] {
        &self.ratings
    }

    /// Number of ratings.
    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    /// Whether there are no ratings.
    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    /// Shuffle the ratings in place.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        self.ratings.shuffle(rng);
    }

    /// Split into the ratings before and from `idx`.
    pub fn split_at(&self, idx: usize) -> (Self, Self) {
        let head = Ratings {
            ratings: self.ratings[..idx].to_owned(),
        };
        let tail = Ratings {
            ratings: self.ratings[idx..].to_owned(),
        };

        (head, tail)
    }

    /// Split into the ratings `func` accepts and the rest.
    pub fn split_by<F: Fn(&Rating) -> bool>(&self, func: F) -> (Self, Self) {
        let (head, tail): (Vec<Rating>, Vec<Rating>) =
            self.ratings.iter().cloned().partition(|rating| func(rating));

        (Ratings { ratings: head }, Ratings { ratings: tail })
    }

    /// Compress into a [`Trainset`].
    pub fn to_trainset(&self) -> Trainset {
        Trainset::from(self.data())
    }
}

impl From<Vec<Rating>> for Ratings {
    fn from(ratings: Vec<Rating>) -> Ratings {
        Ratings { ratings }
    }
}

/// Randomly split ratings into `(train, test)`, with `test_fraction`
/// of the ratings going to the test set.
///
/// `test_fraction` is clamped to `[0, 1]`.
pub fn train_test_split<R: Rng>(
    ratings: &mut Ratings,
    rng: &mut R,
    test_fraction: f32,
) -> (Ratings, Ratings) {
    let test_fraction = test_fraction.max(0.0).min(1.0);
    ratings.shuffle(rng);

    let (test, train) = ratings.split_at((test_fraction * ratings.len() as f32) as usize);

    (train, test)
}

/// Split ratings into `(train, test)` so that all ratings of a given user
/// end up on the same side.
pub fn user_based_split<R: Rng>(
    ratings: &mut Ratings,
    rng: &mut R,
    test_fraction: f32,
) -> (Ratings, Ratings) {
    let denominator = 100_000;
    let test_cutoff = (test_fraction * denominator as f32) as u64;

    let (key_0, key_1): (u64, u64) = (rng.gen(), rng.gen());

    let is_train = |x: &Rating| {
        let mut hasher = SipHasher::new_with_keys(key_0, key_1);
        hasher.write_usize(x.user_id);
        hasher.finish() % denominator >= test_cutoff
    };

    ratings.split_by(is_train)
}

/// Ratings compressed by user, with raw ids mapped to dense inner indices.
///
/// Inner indices are assigned in ascending raw-id order, so two trainsets
/// built from the same ratings are identical regardless of input order.
#[derive(Clone, Debug)]
pub struct Trainset {
    user_ids: Vec<UserId>,
    project_ids: Vec<ProjectId>,
    user_index: BTreeMap<UserId, usize>,
    project_index: BTreeMap<ProjectId, usize>,
    user_pointers: Vec<usize>,
    project_idxs: Vec<usize>,
    scores: Vec<f32>,
    global_mean: f32,
}

impl<'a> From<&'a [Rating]> for Trainset {
    fn from(ratings: &'a [Rating]) -> Trainset {
        let mut data = ratings.to_owned();
        data.sort();
        data.dedup_by_key(|rating| (rating.user_id, rating.project_id));

        let user_ids: Vec<UserId> = {
            let mut ids: Vec<UserId> = data.iter().map(|x| x.user_id).collect();
            ids.dedup();
            ids
        };
        let project_ids: Vec<ProjectId> = {
            let mut ids: Vec<ProjectId> = data.iter().map(|x| x.project_id).collect();
            ids.sort();
            ids.dedup();
            ids
        };

        let user_index: BTreeMap<UserId, usize> =
            user_ids.iter().enumerate().map(|(idx, &id)| (id, idx)).collect();
        let project_index: BTreeMap<ProjectId, usize> = project_ids
            .iter()
            .enumerate()
            .map(|(idx, &id)| (id, idx))
            .collect();

        let mut user_pointers = vec![0; user_ids.len() + 1];
        let mut project_idxs = Vec::with_capacity(data.len());
        let mut scores = Vec::with_capacity(data.len());

        for datum in &data {
            project_idxs.push(project_index[&datum.project_id]);
            scores.push(f32::from(datum.score));

            user_pointers[user_index[&datum.user_id] + 1] += 1;
        }

        for idx in 1..user_pointers.len() {
            user_pointers[idx] += user_pointers[idx - 1];
        }

        let global_mean = if scores.is_empty() {
            0.0
        } else {
            scores.iter().map(|&x| f64::from(x)).sum::<f64>() as f32 / scores.len() as f32
        };

        Trainset {
            user_ids,
            project_ids,
            user_index,
            project_index,
            user_pointers,
            project_idxs,
            scores,
            global_mean,
        }
    }
}

impl Trainset {
    /// Number of distinct users.
    pub fn num_users(&self) -> usize {
        self.user_ids.len()
    }

    /// Number of distinct projects.
    pub fn num_projects(&self) -> usize {
        self.project_ids.len()
    }

    /// Number of ratings.
    pub fn num_ratings(&self) -> usize {
        self.scores.len()
    }

    /// Whether the trainset holds no ratings.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// `(num_users, num_projects)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users(), self.num_projects())
    }

    /// Mean of all scores; zero for an empty trainset.
    pub fn global_mean(&self) -> f32 {
        self.global_mean
    }

    /// Raw user ids, in inner-index order.
    pub fn user_ids(&self) -> &[UserId] {
        &self.user_ids
    }

    /// Raw project ids, in inner-index order.
    pub fn project_ids(&self) -> &[ProjectId] {
        &self.project_ids
    }

    /// Inner index of a raw user id.
    pub fn inner_user(&self, user_id: UserId) -> Option<usize> {
        self.user_index.get(&user_id).cloned()
    }

    /// Inner index of a raw project id.
    pub fn inner_project(&self, project_id: ProjectId) -> Option<usize> {
        self.project_index.get(&project_id).cloned()
    }

    /// Iterate over users in inner-index order.
    pub fn iter_users(&self) -> TrainsetUserIterator<'_> {
        TrainsetUserIterator {
            trainset: self,
            idx: 0,
        }
    }

    /// Ratings of the user at inner index `user_idx`.
    pub fn get_user(&self, user_idx: usize) -> Option<TrainsetUser<'_>> {
        if user_idx >= self.num_users() {
            return None;
        }

        let start = self.user_pointers[user_idx];
        let stop = self.user_pointers[user_idx + 1];

        Some(TrainsetUser {
            user_idx,
            user_id: self.user_ids[user_idx],
            project_idxs: &self.project_idxs[start..stop],
            scores: &self.scores[start..stop],
        })
    }

    /// All ratings as `(inner user, inner project, score)`.
    pub fn all_ratings(&self) -> Vec<(usize, usize, f32)> {
        self.iter_users()
            .flat_map(|user| {
                let TrainsetUser {
                    user_idx,
                    project_idxs,
                    scores,
                    ..
                } = user;

                project_idxs
                    .iter()
                    .zip(scores.iter())
                    .map(move |(&project_idx, &score)| (user_idx, project_idx, score))
            })
            .collect()
    }

    /// The projects `user_id` has not rated, each paired with the global
    /// mean as its fill value.
    ///
    /// A user absent from the trainset has rated nothing, so every project
    /// is returned.
    pub fn anti_testset_for(&self, user_id: UserId) -> Vec<(ProjectId, f32)> {
        let mut rated = vec![false; self.num_projects()];

        if let Some(user) = self.inner_user(user_id).and_then(|idx| self.get_user(idx)) {
            for &project_idx in user.project_idxs {
                rated[project_idx] = true;
            }
        }

        self.project_ids
            .iter()
            .zip(rated)
            .filter(|&(_, is_rated)| !is_rated)
            .map(|(&project_id, _)| (project_id, self.global_mean))
            .collect()
    }
}

/// Iterator over the users of a [`Trainset`].
pub struct TrainsetUserIterator<'a> {
    trainset: &'a Trainset,
    idx: usize,
}

/// The ratings of a single user.
#[derive(Debug)]
pub struct TrainsetUser<'a> {
    /// Inner user index.
    pub user_idx: usize,
    /// Raw user id.
    pub user_id: UserId,
    /// Inner indices of the rated projects.
    pub project_idxs: &'a [usize],
    /// Scores, aligned with `project_idxs`.
    pub scores: &'a [f32],
}

impl<'a> TrainsetUser<'a> {
    /// Number of ratings by this user.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether the user has no ratings.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

impl<'a> Iterator for TrainsetUserIterator<'a> {
    type Item = TrainsetUser<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let value = self.trainset.get_user(self.idx);

        self.idx += 1;

        value
    }
}
