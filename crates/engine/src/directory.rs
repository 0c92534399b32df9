//! In-process implementations of the executor's lookup and side-effect
//! seams, used by tests and single-node deployments.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::bail;
use dashmap::DashMap;
use serde_json::Value;
use tracing::info;

use courseflow_core::types::UserProfile;

use crate::executor::{ActionGateway, UserStore};

/// DashMap-backed user directory.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<String, UserProfile>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: UserProfile) {
        self.users.insert(profile.user_id.clone(), profile);
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl UserStore for InMemoryUserDirectory {
    fn get_user(&self, user_id: &str) -> Option<UserProfile> {
        self.users.get(user_id).map(|u| u.clone())
    }
}

/// Action gateway that records each operation and can be toggled to fail,
/// for exercising step-failure paths.
#[derive(Default)]
pub struct RecordingActionGateway {
    log: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingActionGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn performed(&self) -> Vec<String> {
        self.log.lock().expect("action log mutex poisoned").clone()
    }

    fn record(&self, entry: String) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("action gateway unavailable");
        }
        info!(action = %entry, "action performed");
        self.log.lock().expect("action log mutex poisoned").push(entry);
        Ok(())
    }
}

impl ActionGateway for RecordingActionGateway {
    fn add_tag(&self, user_id: &str, tag: &str) -> anyhow::Result<()> {
        self.record(format!("add_tag:{user_id}:{tag}"))
    }

    fn remove_tag(&self, user_id: &str, tag: &str) -> anyhow::Result<()> {
        self.record(format!("remove_tag:{user_id}:{tag}"))
    }

    fn update_field(&self, user_id: &str, field: &str, value: &Value) -> anyhow::Result<()> {
        self.record(format!("update_field:{user_id}:{field}={value}"))
    }

    fn call_webhook(&self, user_id: &str, url: &str, _payload: &Value) -> anyhow::Result<()> {
        self.record(format!("webhook:{user_id}:{url}"))
    }

    fn enroll(&self, user_id: &str, course_id: &str) -> anyhow::Result<()> {
        self.record(format!("enroll:{user_id}:{course_id}"))
    }

    fn unenroll(&self, user_id: &str, course_id: &str) -> anyhow::Result<()> {
        self.record(format!("unenroll:{user_id}:{course_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_lookup() {
        let directory = InMemoryUserDirectory::new();
        assert!(directory.get_user("u1").is_none());

        let profile = UserProfile {
            user_id: "u1".into(),
            ..Default::default()
        };
        directory.insert(profile);
        assert!(directory.get_user("u1").is_some());
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_gateway_records_and_fails() {
        let gateway = RecordingActionGateway::new();
        gateway.add_tag("u1", "vip").unwrap();
        assert_eq!(gateway.performed(), vec!["add_tag:u1:vip".to_string()]);

        gateway.set_failing(true);
        assert!(gateway.remove_tag("u1", "vip").is_err());
        assert_eq!(gateway.performed().len(), 1);
    }
}
