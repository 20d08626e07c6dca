use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::errors::AppResult;
use crate::models::role::{fetch_role_by_name, Role};

#[derive(Debug, Default)]
struct CacheInner {
    map: HashMap<String, Role>,
    /// Bumped on every invalidation. A fetch started before an invalidation
    /// must not populate the cache with its (possibly stale) result.
    generation: u64,
}

/// Read-through role cache keyed by normalized role name. Lives in `AppState`
/// and is passed through explicitly; every role write must call `invalidate`.
#[derive(Debug, Clone, Default)]
pub struct RoleCache {
    inner: Arc<RwLock<CacheInner>>,
}

impl RoleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a role by name, hitting the database on a cache miss. A miss in
    /// the database is NOT cached, so a role created later is picked up.
    pub async fn get(&self, pool: &SqlitePool, name: &str) -> AppResult<Option<Role>> {
        let key = name.trim().to_lowercase();

        let generation = {
            let inner = self.inner.read().await;
            if let Some(role) = inner.map.get(&key) {
                return Ok(Some(role.clone()));
            }
            inner.generation
        };

        let role = fetch_role_by_name(pool, &key).await?;
        if let Some(ref role) = role {
            self.store_if_current(key, role.clone(), generation).await;
        }

        Ok(role)
    }

    /// Insert a fetched role only if no invalidation happened since the fetch
    /// began; otherwise the row may predate a concurrent role write and must
    /// not be cached.
    async fn store_if_current(&self, key: String, role: Role, generation: u64) {
        let mut inner = self.inner.write().await;
        if inner.generation == generation {
            inner.map.insert(key, role);
        }
    }

    pub async fn invalidate(&self, name: &str) {
        let key = name.trim().to_lowercase();
        let mut inner = self.inner.write().await;
        inner.map.remove(&key);
        inner.generation = inner.generation.wrapping_add(1);
    }
}
