//! Audience targeting — decides whether a user satisfies a workflow's
//! targeting criteria (inclusion/exclusion lists, user type, tags).

pub mod matcher;

pub use matcher::{AudienceMatcher, TargetAudience};
