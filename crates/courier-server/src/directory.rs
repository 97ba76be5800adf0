//! In-memory user directory.
//!
//! Stand-in for the external identity collaborator: profiles are seeded
//! from `Join` frames and looked up when rendering conversation rows or
//! validating a message recipient. Account management proper lives
//! outside this server.

use courier_core::{UserDirectory, UserProfile};
use dashmap::DashMap;

/// Profile registry keyed by user id.
#[derive(Default)]
pub struct InMemoryDirectory {
    profiles: DashMap<String, UserProfile>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or refresh a user's profile.
    ///
    /// Fields the caller left out keep their previous values, so a bare
    /// rejoin does not erase a known display name.
    pub fn upsert(
        &self,
        user_id: &str,
        display_name: Option<String>,
        avatar_url: Option<String>,
    ) {
        let mut entry = self
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile::bare(user_id));

        if let Some(name) = display_name {
            entry.display_name = name;
        }
        if let Some(avatar) = avatar_url {
            entry.avatar_url = Some(avatar);
        }
    }

    /// Whether the directory has ever seen this user.
    #[must_use]
    pub fn knows(&self, user_id: &str) -> bool {
        self.profiles.contains_key(user_id)
    }
}

impl UserDirectory for InMemoryDirectory {
    fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.profiles.get(user_id).map(|p| p.value().clone())
    }
}
