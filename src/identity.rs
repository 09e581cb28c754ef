//! Resolved caller identity shared between the auth layer and the cache layer.

/// Caller resolved by the authentication layer in front of the cache.
///
/// Inserted as a request extension. User-scoped cache keys are derived from `id`, and the admin
/// surface checks `roles`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub id: String,
    pub roles: Vec<String>,
}

impl CallerIdentity {
    pub fn new<I, R>(id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            id: id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|candidate| candidate.eq_ignore_ascii_case(role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_check_ignores_case() {
        let caller = CallerIdentity::new("u1", ["Admin", "editor"]);
        assert!(caller.has_role("admin"));
        assert!(caller.has_role("EDITOR"));
        assert!(!caller.has_role("owner"));
    }
}
