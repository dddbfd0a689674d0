//! Turning raw predictions into a bounded, ordered recommendation list.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use failure::Fail;
use serde::{Deserialize, Serialize};

use crate::prediction::Prediction;
use crate::{ProjectId, TagId, UserId};

/// Lifecycle status of a project.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectStatus {
    /// Running, possibly with open slots.
    #[serde(rename = "AC")]
    Active,
    /// Finished; never recommended.
    #[serde(rename = "CO")]
    Completed,
    /// Looking for participants.
    #[serde(rename = "VA")]
    Vacant,
}

/// A status code that is not `AC`, `CO` or `VA`.
#[derive(Debug, Fail, PartialEq)]
#[fail(display = "Unknown project status: {:?}.", _0)]
pub struct UnknownStatus(pub String);

impl ProjectStatus {
    /// Two-letter code used by the project tables.
    pub fn code(self) -> &'static str {
        match self {
            ProjectStatus::Active => "AC",
            ProjectStatus::Completed => "CO",
            ProjectStatus::Vacant => "VA",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = UnknownStatus;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        match code {
            "AC" => Ok(ProjectStatus::Active),
            "CO" => Ok(ProjectStatus::Completed),
            "VA" => Ok(ProjectStatus::Vacant),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// What the ranking needs to know about a project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Lifecycle status.
    pub status: ProjectStatus,
    /// Participant slots nobody fills yet.
    pub open_vacancies: usize,
    /// Interest tags attached to the project.
    #[serde(default)]
    pub tags: BTreeSet<TagId>,
}

impl ProjectInfo {
    /// Project info without tags.
    pub fn new(status: ProjectStatus, open_vacancies: usize) -> Self {
        ProjectInfo {
            status,
            open_vacancies,
            tags: BTreeSet::new(),
        }
    }

    /// Build from the project's participant slots, where `None` marks a
    /// slot nobody fills yet.
    pub fn from_slots(status: ProjectStatus, slots: &[Option<UserId>]) -> Self {
        ProjectInfo::new(status, slots.iter().filter(|slot| slot.is_none()).count())
    }

    /// Replace the project tags.
    pub fn tags<I: IntoIterator<Item = TagId>>(mut self, tags: I) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    /// Whether the project can still take people on.
    pub fn is_open(&self) -> bool {
        self.status != ProjectStatus::Completed && self.open_vacancies > 0
    }
}

/// Lookup of project metadata owned by the surrounding application.
pub trait ProjectCatalog {
    /// Metadata of `project_id`, if the project exists.
    fn project(&self, project_id: ProjectId) -> Option<ProjectInfo>;
}

impl ProjectCatalog for HashMap<ProjectId, ProjectInfo> {
    fn project(&self, project_id: ProjectId) -> Option<ProjectInfo> {
        self.get(&project_id).cloned()
    }
}

impl ProjectCatalog for BTreeMap<ProjectId, ProjectInfo> {
    fn project(&self, project_id: ProjectId) -> Option<ProjectInfo> {
        self.get(&project_id).cloned()
    }
}

impl<'a, T: ProjectCatalog + ?Sized> ProjectCatalog for &'a T {
    fn project(&self, project_id: ProjectId) -> Option<ProjectInfo> {
        (**self).project(project_id)
    }
}

impl<T: ProjectCatalog + ?Sized> ProjectCatalog for std::sync::Arc<T> {
    fn project(&self, project_id: ProjectId) -> Option<ProjectInfo> {
        (**self).project(project_id)
    }
}

/// Ranking thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Predictions at or below this score are dropped.
    pub min_score: f32,
    /// Maximum number of recommendations; `None` keeps everything.
    pub max_results: Option<usize>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        RankingConfig {
            min_score: 3.5,
            max_results: Some(10),
        }
    }
}

impl RankingConfig {
    /// Set the exclusive score threshold.
    pub fn min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    /// Set the maximum number of recommendations.
    pub fn max_results(mut self, max_results: Option<usize>) -> Self {
        self.max_results = max_results;
        self
    }
}

/// A ranked project with its estimated score.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// The recommended project.
    pub project_id: ProjectId,
    /// Its estimated score.
    pub score: f32,
}

/// Filter, order and truncate `predictions`.
///
/// Completed projects, projects without open vacancies and projects
/// missing from `catalog` are dropped, as are scores at or below
/// `config.min_score`. The rest is sorted by score, highest first, with
/// ties going to the lower project id.
pub fn rank<C: ProjectCatalog + ?Sized>(
    predictions: Vec<Prediction>,
    catalog: &C,
    config: &RankingConfig,
) -> Vec<Recommendation> {
    let mut recommendations: Vec<Recommendation> = predictions
        .into_iter()
        .filter(|prediction| prediction.score > config.min_score)
        .filter(|prediction| {
            catalog
                .project(prediction.project_id)
                .map_or(false, |project| project.is_open())
        })
        .map(|prediction| Recommendation {
            project_id: prediction.project_id,
            score: prediction.score,
        })
        .collect();

    recommendations.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.project_id.cmp(&b.project_id))
    });

    if let Some(max_results) = config.max_results {
        recommendations.truncate(max_results);
    }

    recommendations
}
