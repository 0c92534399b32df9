//! Target audience evaluation.
//!
//! Pure function of its inputs: explicit exclusion list first, then
//! explicit inclusion list, then attribute filters with AND semantics
//! across filter categories. An empty audience matches everyone.

use courseflow_core::types::{UserProfile, UserType};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Targeting criteria attached to a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetAudience {
    /// Users rejected unconditionally.
    #[serde(default)]
    pub exclude_user_ids: Vec<String>,
    /// If non-empty, only these users match (after exclusion).
    #[serde(default)]
    pub include_user_ids: Vec<String>,
    /// If non-empty, the user's type must be one of these.
    #[serde(default)]
    pub user_types: Vec<UserType>,
    /// Every listed tag must be present on the user.
    #[serde(default)]
    pub required_tags: Vec<String>,
    /// Any listed tag present on the user rejects the match.
    #[serde(default)]
    pub excluded_tags: Vec<String>,
}

impl TargetAudience {
    /// True when no criterion is set, i.e. the audience is everyone.
    pub fn is_unrestricted(&self) -> bool {
        self.exclude_user_ids.is_empty()
            && self.include_user_ids.is_empty()
            && self.user_types.is_empty()
            && self.required_tags.is_empty()
            && self.excluded_tags.is_empty()
    }
}

/// Stateless audience matcher.
#[derive(Debug, Clone, Default)]
pub struct AudienceMatcher;

impl AudienceMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Evaluates whether `user` belongs to `audience`.
    pub fn matches(&self, user: &UserProfile, audience: &TargetAudience) -> bool {
        if audience.is_unrestricted() {
            return true;
        }

        // Explicit exclusion wins over everything.
        if audience
            .exclude_user_ids
            .iter()
            .any(|id| id == &user.user_id)
        {
            debug!(user_id = %user.user_id, "audience: user on exclusion list");
            return false;
        }

        // Explicit inclusion accepts immediately.
        if !audience.include_user_ids.is_empty() {
            let included = audience
                .include_user_ids
                .iter()
                .any(|id| id == &user.user_id);
            if included {
                return true;
            }
            debug!(user_id = %user.user_id, "audience: user not on inclusion list");
            return false;
        }

        // Attribute filters, AND across categories.
        if !audience.user_types.is_empty() && !audience.user_types.contains(&user.user_type) {
            return false;
        }
        if !audience
            .required_tags
            .iter()
            .all(|t| user.tags.contains(t))
        {
            return false;
        }
        if audience.excluded_tags.iter().any(|t| user.tags.contains(t)) {
            return false;
        }

        true
    }
}
