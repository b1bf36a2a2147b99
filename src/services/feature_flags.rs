use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::ports::{FeatureFlags, FlagError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub name: String,
    pub enabled: bool,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Postgres-backed kill switches with an in-process cache. Flags without a row resolve
/// to `default_enabled`.
#[derive(Clone)]
pub struct FeatureFlagService {
    pool: PgPool,
    cache: Arc<RwLock<HashMap<String, bool>>>,
    default_enabled: bool,
}

impl FeatureFlagService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: Arc::new(RwLock::new(HashMap::new())),
            default_enabled: true,
        }
    }

    pub fn with_default(mut self, default_enabled: bool) -> Self {
        self.default_enabled = default_enabled;
        self
    }

    pub fn start(&self, refresh_interval: Duration) {
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = service.refresh_cache().await {
                    tracing::error!("Failed to refresh feature flags cache: {}", e);
                }
                tokio::time::sleep(refresh_interval).await;
            }
        });
    }

    pub async fn refresh_cache(&self) -> Result<(), FlagError> {
        let flags = sqlx::query_as::<_, (String, bool)>("SELECT name, enabled FROM feature_flags")
            .fetch_all(&self.pool)
            .await?;

        let mut cache = self.cache.write().await;
        cache.clear();
        for (name, enabled) in flags {
            cache.insert(name, enabled);
        }
        tracing::debug!("Feature flags cache refreshed with {} flags", cache.len());
        Ok(())
    }

    pub async fn get_all(&self) -> Result<Vec<FeatureFlag>, FlagError> {
        let flags = sqlx::query_as::<_, (String, bool, Option<String>, DateTime<Utc>)>(
            "SELECT name, enabled, description, updated_at FROM feature_flags ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(name, enabled, description, updated_at)| FeatureFlag {
            name,
            enabled,
            description,
            updated_at,
        })
        .collect();

        Ok(flags)
    }

    /// Creates the row when missing.
    pub async fn set(&self, name: &str, enabled: bool) -> Result<FeatureFlag, FlagError> {
        let flag = sqlx::query_as::<_, (String, bool, Option<String>, DateTime<Utc>)>(
            "INSERT INTO feature_flags (name, enabled) VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET enabled = EXCLUDED.enabled, updated_at = NOW()
             RETURNING name, enabled, description, updated_at",
        )
        .bind(name)
        .bind(enabled)
        .fetch_one(&self.pool)
        .await?;

        self.cache.write().await.insert(name.to_string(), enabled);
        tracing::info!("Feature flag '{}' set to {}", name, enabled);

        Ok(FeatureFlag {
            name: flag.0,
            enabled: flag.1,
            description: flag.2,
            updated_at: flag.3,
        })
    }
}

#[async_trait]
impl FeatureFlags for FeatureFlagService {
    async fn is_enabled(&self, flag: &str) -> bool {
        self.cache
            .read()
            .await
            .get(flag)
            .copied()
            .unwrap_or(self.default_enabled)
    }

    async fn disable(&self, flag: &str) -> Result<(), FlagError> {
        self.set(flag, false).await.map(|_| ())
    }
}
