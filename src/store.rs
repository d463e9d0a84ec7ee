use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{AttendanceRecord, Dataset, GradeRecord, ImportBatch};

/// Where the last imported dataset lives between runs. Saving replaces everything.
pub trait DatasetStore {
    async fn load(&self) -> anyhow::Result<Option<Dataset>>;
    async fn save(&self, dataset: &Dataset) -> anyhow::Result<ImportBatch>;
    async fn last_batch(&self) -> anyhow::Result<Option<ImportBatch>>;
}

const GRADES_FILE: &str = "grades.json";
const ATTENDANCE_FILE: &str = "attendance.json";
const BATCH_FILE: &str = "batch.json";

pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read_json<T: DeserializeOwned>(&self, file: &str) -> anyhow::Result<Option<T>> {
        let path = self.root.join(file);
        let exists = tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("failed to check {}", path.display()))?;
        if !exists {
            return Ok(None);
        }
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("corrupt store file {}", path.display()))?;
        Ok(Some(value))
    }

    async fn write_json<T: Serialize>(&self, file: &str, value: &T) -> anyhow::Result<()> {
        let path = self.root.join(file);
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DatasetStore for DirStore {
    #[tracing::instrument(skip_all, fields(root = %self.root.display()))]
    async fn load(&self) -> anyhow::Result<Option<Dataset>> {
        let grades: Option<Vec<GradeRecord>> = self.read_json(GRADES_FILE).await?;
        let attendance: Option<Vec<AttendanceRecord>> = self.read_json(ATTENDANCE_FILE).await?;

        match (grades, attendance) {
            (Some(grades), Some(attendance)) => {
                tracing::debug!(grades = grades.len(), attendance = attendance.len(), "loaded dataset");
                Ok(Some(Dataset { grades, attendance }))
            }
            _ => Ok(None),
        }
    }

    #[tracing::instrument(skip_all, fields(root = %self.root.display()))]
    async fn save(&self, dataset: &Dataset) -> anyhow::Result<ImportBatch> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create {}", self.root.display()))?;

        let batch = ImportBatch::for_dataset(dataset);
        self.write_json(GRADES_FILE, &dataset.grades).await?;
        self.write_json(ATTENDANCE_FILE, &dataset.attendance).await?;
        self.write_json(BATCH_FILE, &batch).await?;

        tracing::info!(batch_id = %batch.batch_id, "dataset saved");
        Ok(batch)
    }

    async fn last_batch(&self) -> anyhow::Result<Option<ImportBatch>> {
        self.read_json(BATCH_FILE).await
    }
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn upsert_slot<T: Serialize + Sync>(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        slot: &str,
        batch: &ImportBatch,
        records: &[T],
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dashboard.dataset_slots
            (slot, batch_id, imported_at, record_count, payload)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (slot) DO UPDATE
            SET batch_id = EXCLUDED.batch_id,
                imported_at = EXCLUDED.imported_at,
                record_count = EXCLUDED.record_count,
                payload = EXCLUDED.payload
            "#,
        )
        .bind(slot)
        .bind(batch.batch_id)
        .bind(batch.imported_at)
        .bind(records.len() as i64)
        .bind(Json(records))
        .execute(&mut **tx)
        .await
        .with_context(|| format!("failed to store {slot} slot"))?;
        Ok(())
    }
}

impl DatasetStore for PgStore {
    #[tracing::instrument(skip_all)]
    async fn load(&self) -> anyhow::Result<Option<Dataset>> {
        let rows = sqlx::query(
            "SELECT slot, payload FROM dashboard.dataset_slots WHERE slot IN ('grades', 'attendance')",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grades = None;
        let mut attendance = None;

        for row in rows {
            let slot: String = row.get("slot");
            match slot.as_str() {
                "grades" => {
                    let Json(records): Json<Vec<GradeRecord>> = row.try_get("payload")?;
                    grades = Some(records);
                }
                "attendance" => {
                    let Json(records): Json<Vec<AttendanceRecord>> = row.try_get("payload")?;
                    attendance = Some(records);
                }
                _ => {}
            }
        }

        Ok(match (grades, attendance) {
            (Some(grades), Some(attendance)) => Some(Dataset { grades, attendance }),
            _ => None,
        })
    }

    #[tracing::instrument(skip_all)]
    async fn save(&self, dataset: &Dataset) -> anyhow::Result<ImportBatch> {
        let batch = ImportBatch::for_dataset(dataset);
        let mut tx = self.pool.begin().await?;
        Self::upsert_slot(&mut tx, "grades", &batch, &dataset.grades).await?;
        Self::upsert_slot(&mut tx, "attendance", &batch, &dataset.attendance).await?;
        tx.commit().await?;

        tracing::info!(batch_id = %batch.batch_id, "dataset saved");
        Ok(batch)
    }

    async fn last_batch(&self) -> anyhow::Result<Option<ImportBatch>> {
        let rows = sqlx::query(
            "SELECT slot, batch_id, imported_at, record_count FROM dashboard.dataset_slots",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grades: Option<(Uuid, chrono::DateTime<chrono::Utc>, i64)> = None;
        let mut attendance_count = None;

        for row in rows {
            let slot: String = row.get("slot");
            let count: i64 = row.get("record_count");
            match slot.as_str() {
                "grades" => grades = Some((row.get("batch_id"), row.get("imported_at"), count)),
                "attendance" => attendance_count = Some(count),
                _ => {}
            }
        }

        Ok(match (grades, attendance_count) {
            (Some((batch_id, imported_at, grade_count)), Some(attendance_count)) => {
                Some(ImportBatch {
                    batch_id,
                    imported_at,
                    grade_count: grade_count as usize,
                    attendance_count: attendance_count as usize,
                })
            }
            _ => None,
        })
    }
}
