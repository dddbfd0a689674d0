//! Tag-overlap recommendations, for users the rating model says little about.
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ranking::ProjectInfo;
use crate::{ProjectId, TagId};

/// A project sharing interest tags with a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestMatch {
    /// The matching project.
    pub project_id: ProjectId,
    /// Number of tags shared with the user.
    pub common_tags: usize,
}

/// Rank open projects by how many tags they share with `user_interests`.
///
/// Projects sharing no tags are dropped. Ties go to the lower project id.
pub fn rank_by_common_interests<'a, I>(
    user_interests: &BTreeSet<TagId>,
    projects: I,
    max_results: Option<usize>,
) -> Vec<InterestMatch>
where
    I: IntoIterator<Item = (ProjectId, &'a ProjectInfo)>,
{
    let mut matches: Vec<InterestMatch> = projects
        .into_iter()
        .filter(|(_, project)| project.is_open())
        .map(|(project_id, project)| InterestMatch {
            project_id,
            common_tags: project.tags.intersection(user_interests).count(),
        })
        .filter(|x| x.common_tags > 0)
        .collect();

    matches.sort_by(|a, b| {
        b.common_tags
            .cmp(&a.common_tags)
            .then_with(|| a.project_id.cmp(&b.project_id))
    });

    if let Some(max_results) = max_results {
        matches.truncate(max_results);
    }

    matches
}
