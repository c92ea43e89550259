// Postgres-backed graph store adapter.
//
// The compare-and-set is a single conditional statement, so the version check
// and the increment can never be split by another writer.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::PgPool;
use teamgraph_common::types::{Entity, Version};

use super::{CasOutcome, CasWrite, GraphStore};
use crate::error::StoreError;

pub static MIGRATOR: Migrator = sqlx::migrate!("./src/store/migrations");

const DEFAULT_MIN_CONNECTIONS: u32 = 2;
const DEFAULT_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

type EntityRow = (String, String, i64, Json<serde_json::Value>, DateTime<Utc>, String);

#[derive(Debug, Clone)]
pub struct PgGraphStore {
    pool: PgPool,
}

impl PgGraphStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, then apply pending migrations.
    pub async fn connect(database_url: &str, config: PoolConfig) -> Result<Self> {
        let connect_options = database_url
            .parse::<PgConnectOptions>()
            .context("failed to parse graph store PostgreSQL connection options")?;

        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(connect_options)
            .await
            .context("failed to connect to graph store PostgreSQL")?;

        MIGRATOR.run(&pool).await.context("failed to apply graph store migrations")?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl GraphStore for PgGraphStore {
    async fn get_version(&self, entity_id: &str) -> Result<Version, StoreError> {
        let version = sqlx::query_scalar::<_, i64>(
            "SELECT version FROM graph_entities WHERE entity_id = $1",
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        version.map(to_version).transpose().map(|version| version.unwrap_or(0))
    }

    async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>, StoreError> {
        let row = sqlx::query_as::<_, EntityRow>(
            r#"
SELECT entity_id, team_id, version, content, last_modified, last_modified_by
FROM graph_entities
WHERE entity_id = $1
            "#,
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(entity_from_row).transpose()
    }

    async fn compare_and_set(&self, write: CasWrite<'_>) -> Result<CasOutcome, StoreError> {
        let content = Json(write.content);
        let applied = if write.expected_version == 0 {
            sqlx::query_scalar::<_, i64>(
                r#"
INSERT INTO graph_entities (entity_id, team_id, version, content, last_modified, last_modified_by)
VALUES ($1, $2, 1, $3, $4, $5)
ON CONFLICT (entity_id) DO NOTHING
RETURNING version
                "#,
            )
            .bind(write.entity_id)
            .bind(write.team_id)
            .bind(content)
            .bind(write.at)
            .bind(write.author_id)
            .fetch_optional(&self.pool)
            .await?
        } else {
            let expected = i64::try_from(write.expected_version).map_err(|_| {
                StoreError::Corrupt(format!("version {} exceeds i64", write.expected_version))
            })?;
            sqlx::query_scalar::<_, i64>(
                r#"
UPDATE graph_entities
SET version = version + 1,
    content = $3,
    last_modified = $4,
    last_modified_by = $5
WHERE entity_id = $1
  AND version = $2
  AND team_id = $6
RETURNING version
                "#,
            )
            .bind(write.entity_id)
            .bind(expected)
            .bind(content)
            .bind(write.at)
            .bind(write.author_id)
            .bind(write.team_id)
            .fetch_optional(&self.pool)
            .await?
        };

        match applied {
            Some(new_version) => Ok(CasOutcome::Applied {
                new_version: to_version(new_version)?,
                committed_at: write.at,
            }),
            None => match self.get_entity(write.entity_id).await? {
                Some(current) if current.team_id != write.team_id => {
                    Err(StoreError::team_mismatch(&current, write.team_id))
                }
                current => Ok(CasOutcome::Rejected { current }),
            },
        }
    }

    async fn get_latest_change_time(
        &self,
        team_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let latest = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MAX(last_modified) FROM graph_entities WHERE team_id = $1",
        )
        .bind(team_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(latest)
    }
}

fn to_version(raw: i64) -> Result<Version, StoreError> {
    Version::try_from(raw).map_err(|_| StoreError::Corrupt(format!("negative version `{raw}`")))
}

fn entity_from_row(row: EntityRow) -> Result<Entity, StoreError> {
    let (entity_id, team_id, version, Json(content), last_modified, last_modified_by) = row;
    Ok(Entity {
        entity_id,
        team_id,
        version: to_version(version)?,
        content,
        last_modified,
        last_modified_by,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use sqlx::types::Json;
    use uuid::Uuid;

    use super::{entity_from_row, to_version, PgGraphStore, PoolConfig};
    use crate::error::StoreError;
    use crate::store::{CasOutcome, CasWrite, GraphStore};

    const WRITERS: i64 = 16;

    async fn test_store() -> Option<PgGraphStore> {
        let Some(database_url) = std::env::var("TEAMGRAPH_COORD_TEST_DATABASE_URL").ok() else {
            eprintln!("skipping graph store postgres test: set TEAMGRAPH_COORD_TEST_DATABASE_URL");
            return None;
        };

        let store = PgGraphStore::connect(&database_url, PoolConfig::default())
            .await
            .expect("test postgres store should connect");
        Some(store)
    }

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().expect("timestamp should be valid")
    }

    /// Races `WRITERS` commits from `expected_version`; returns every outcome
    /// with the body its writer sent.
    async fn race(
        store: &PgGraphStore,
        entity_id: &str,
        expected_version: u64,
    ) -> Vec<(serde_json::Value, CasOutcome)> {
        let mut handles = Vec::new();
        for writer in 0..WRITERS {
            let store = store.clone();
            let entity_id = entity_id.to_owned();
            handles.push(tokio::spawn(async move {
                let body = json!({ "writer": writer, "from": expected_version });
                let outcome = store
                    .compare_and_set(CasWrite {
                        team_id: "team-1",
                        entity_id: &entity_id,
                        expected_version,
                        content: &body,
                        author_id: "writer",
                        at: ts(1_700_000_000 + writer),
                    })
                    .await
                    .expect("cas should run");
                (body, outcome)
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.expect("writer task should not panic"));
        }
        outcomes
    }

    fn single_winner(outcomes: &[(serde_json::Value, CasOutcome)], version: u64) -> serde_json::Value {
        let winners: Vec<_> = outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, CasOutcome::Applied { .. }))
            .collect();
        assert_eq!(winners.len(), 1, "exactly one writer should commit");
        let (body, outcome) = winners[0];
        assert!(matches!(outcome, CasOutcome::Applied { new_version, .. } if *new_version == version));

        for (_, outcome) in outcomes {
            if let CasOutcome::Rejected { current } = outcome {
                let current = current.as_ref().expect("rejection should carry the stored entity");
                assert!(current.version >= version);
                if current.version == version {
                    assert_eq!(&current.content, body);
                }
            }
        }
        body.clone()
    }

    #[test]
    fn pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.acquire_timeout.as_secs(), 10);
    }

    #[test]
    fn negative_versions_are_corrupt() {
        assert_eq!(to_version(7), Ok(7));
        assert!(matches!(to_version(-1), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn rows_map_to_entities() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).single().expect("valid timestamp");
        let entity = entity_from_row((
            "E1".into(),
            "team-1".into(),
            3,
            Json(serde_json::json!({ "title": "Cache invalidation" })),
            at,
            "ana".into(),
        ))
        .expect("row should map");

        assert_eq!(entity.version, 3);
        assert_eq!(entity.content["title"], "Cache invalidation");
        assert_eq!(entity.last_modified, at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_creates_and_updates_each_commit_once() {
        let Some(store) = test_store().await else {
            return;
        };
        let entity_id = format!("E-{}", Uuid::new_v4());

        let created = single_winner(&race(&store, &entity_id, 0).await, 1);
        let updated = single_winner(&race(&store, &entity_id, 1).await, 2);

        let stored = store.get_entity(&entity_id).await.expect("read").expect("entity exists");
        assert_eq!(stored.version, 2);
        assert_eq!(stored.content, updated);
        assert_ne!(created, updated);
    }

    #[tokio::test]
    async fn rejected_write_returns_stored_snapshot_without_mutation() {
        let Some(store) = test_store().await else {
            return;
        };
        let entity_id = format!("E-{}", Uuid::new_v4());
        let first = json!({ "title": "Cache policy" });
        let stale = json!({ "title": "Stale edit" });
        let write = |expected_version, content| CasWrite {
            team_id: "team-1",
            entity_id: &entity_id,
            expected_version,
            content,
            author_id: "ana",
            at: ts(1_700_000_000),
        };

        store.compare_and_set(write(0, &first)).await.expect("create");
        let outcome = store.compare_and_set(write(0, &stale)).await.expect("cas should run");

        let CasOutcome::Rejected { current: Some(current) } = outcome else {
            panic!("expected rejection with the stored entity, got {outcome:?}");
        };
        assert_eq!((current.version, current.content), (1, first));
        assert_eq!(current.last_modified, ts(1_700_000_000));
        assert_eq!(store.get_version(&entity_id).await.expect("read"), 1);
    }

    #[tokio::test]
    async fn write_from_another_team_is_refused() {
        let Some(store) = test_store().await else {
            return;
        };
        let entity_id = format!("E-{}", Uuid::new_v4());
        let body = json!("v1");
        let mut write = CasWrite {
            team_id: "team-1",
            entity_id: &entity_id,
            expected_version: 0,
            content: &body,
            author_id: "ana",
            at: ts(1_700_000_000),
        };
        store.compare_and_set(write).await.expect("create");

        write.team_id = "team-2";
        for expected_version in [0, 1] {
            write.expected_version = expected_version;
            let err = store.compare_and_set(write).await.expect_err("foreign write should fail");
            assert!(matches!(err, StoreError::TeamMismatch { ref owner_team_id, .. } if owner_team_id == "team-1"));
        }
        assert_eq!(store.get_version(&entity_id).await.expect("read"), 1);
    }
}
