//! Agent profile directory.
//!
//! Profiles are per-agent `profile.json` files in the workspace. The
//! lifecycle engine only reads them; a short-TTL cache keeps the hot
//! notification path from re-reading the file on every send. `invalidate`
//! drops a cached entry after an external update.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use cadre_core::{
    error::{Result, TaskError},
    models::{AgentProfile, CommunicationPreferences},
    paths::PathResolver,
};

struct CachedProfile {
    fetched_at: Instant,
    profile: AgentProfile,
}

/// Read-through cache over on-disk agent profiles.
pub struct AgentDirectory {
    resolver: PathResolver,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedProfile>>,
}

impl AgentDirectory {
    pub fn new(resolver: PathResolver, ttl: Duration) -> Self {
        Self {
            resolver,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load an agent's profile, from cache when fresh.
    ///
    /// # Errors
    /// * `TaskError::AgentNotFound` - no `profile.json` for the agent
    /// * `TaskError::Configuration` - the profile exists but does not parse
    pub async fn profile(&self, agent_id: &str) -> Result<AgentProfile> {
        if let Some(profile) = self.cached(agent_id) {
            return Ok(profile);
        }

        let path = self.resolver.agent_profile(agent_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TaskError::agent_not_found(agent_id));
            }
            Err(e) => {
                return Err(TaskError::Configuration(format!(
                    "failed to read profile '{}': {e}",
                    path.display()
                )));
            }
        };

        let profile: AgentProfile = serde_json::from_slice(&bytes).map_err(|e| {
            TaskError::Configuration(format!("invalid profile '{}': {e}", path.display()))
        })?;

        self.cache.lock().expect("profile cache poisoned").insert(
            agent_id.to_string(),
            CachedProfile {
                fetched_at: Instant::now(),
                profile: profile.clone(),
            },
        );
        Ok(profile)
    }

    /// Communication preferences for an agent; an agent without a profile
    /// gets the all-opt-in defaults so notifications are never silently
    /// lost on a missing file.
    pub async fn preferences(&self, agent_id: &str) -> CommunicationPreferences {
        match self.profile(agent_id).await {
            Ok(profile) => profile.communication_preferences,
            Err(_) => CommunicationPreferences::default(),
        }
    }

    /// Display name for rendering message bodies; falls back to the id.
    pub async fn display_name(&self, agent_id: &str) -> String {
        match self.profile(agent_id).await {
            Ok(profile) => profile.display_name,
            Err(_) => agent_id.to_string(),
        }
    }

    /// Drop the cached entry after an external profile update.
    pub fn invalidate(&self, agent_id: &str) {
        self.cache
            .lock()
            .expect("profile cache poisoned")
            .remove(agent_id);
    }

    fn cached(&self, agent_id: &str) -> Option<AgentProfile> {
        let cache = self.cache.lock().expect("profile cache poisoned");
        cache.get(agent_id).and_then(|entry| {
            (entry.fetched_at.elapsed() < self.ttl).then(|| entry.profile.clone())
        })
    }
}
