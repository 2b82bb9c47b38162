//! The current user and their permissions.

use std::collections::HashMap;

/// Permission value granting every value of a policy type.
pub const WILDCARD: &str = "*";

/// Identity and permission lookup supplied by the surrounding application.
pub trait Principal: Send + Sync {
    fn user_id(&self) -> Option<&str>;

    /// Permitted values for `policy_type`, in a stable order.
    fn permissions(&self, policy_type: &str) -> Vec<String>;
}

/// A principal with a fixed permission table.
#[derive(Debug, Clone, Default)]
pub struct StaticPrincipal {
    user_id: Option<String>,
    permissions: HashMap<String, Vec<String>>,
}

impl StaticPrincipal {
    pub fn new(user_id: &str) -> Self {
        StaticPrincipal {
            user_id: Some(user_id.to_string()),
            permissions: HashMap::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn grant(mut self, policy_type: &str, values: &[&str]) -> Self {
        self.permissions
            .entry(policy_type.to_string())
            .or_default()
            .extend(values.iter().map(|v| v.to_string()));
        self
    }
}

impl Principal for StaticPrincipal {
    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn permissions(&self, policy_type: &str) -> Vec<String> {
        self.permissions.get(policy_type).cloned().unwrap_or_default()
    }
}
