//! SQLite storage layer for Proximity.
//!
//! Implements both the [`RecordStore`] and [`SurveySource`] collaborators.
//!
//! # Schema
//!
//! - `contact_days`: one row per `(user_id, day)`. Counters are columns so
//!   they can be queried; the device maps are stored as JSON.
//! - `users`: registered users, counted for population reporting.
//! - `survey_submissions`: one row per health survey, with the reported
//!   symptoms as a JSON array.
//!
//! Days are stored as `YYYY-MM-DD` text.

use chrono::{NaiveDate, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::collaborators::{RecordStore, SurveySource};
use crate::model::{ContactDayRecord, RecordKey, UnhealthySubmission};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

fn day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:proximity.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Every connection to an in-memory database sees its own database,
        // so those pools are pinned to a single long-lived connection.
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options.connect(database_url).await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contact_days (
                user_id TEXT NOT NULL,
                day TEXT NOT NULL,
                all_contacts TEXT NOT NULL,
                contact_device_info TEXT NOT NULL,
                close_contact_device_info TEXT NOT NULL,
                total_count_two INTEGER NOT NULL,
                total_count_ten INTEGER NOT NULL,
                unresolved_cc INTEGER NOT NULL,
                unresolved_cc_duration REAL NOT NULL,
                version INTEGER NOT NULL,
                PRIMARY KEY (user_id, day)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                registered_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS survey_submissions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                day TEXT NOT NULL,
                healthy INTEGER NOT NULL,
                symptoms TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Daily survey rollups scan by day
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_survey_submissions_day
            ON survey_submissions(day, healthy)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Register a user. Registering an existing user is a no-op.
    pub async fn register_user(&self, user_id: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO users (user_id, registered_at)
            VALUES (?, ?)
            "#,
        )
        .bind(user_id)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a health survey submission.
    ///
    /// A submission with no symptoms is stored as healthy.
    pub async fn insert_submission(
        &self,
        user_id: &str,
        date: NaiveDate,
        symptoms: &[String],
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO survey_submissions (user_id, day, healthy, symptoms)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(day(date))
        .bind(symptoms.is_empty())
        .bind(serde_json::to_string(symptoms)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_submissions(&self, date: NaiveDate, healthy_only: bool) -> anyhow::Result<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as total
            FROM survey_submissions
            WHERE day = ? AND (? = 0 OR healthy = 1)
            "#,
        )
        .bind(day(date))
        .bind(healthy_only)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.get("total");
        Ok(u64::try_from(total)?)
    }
}

fn record_from_row(row: &SqliteRow) -> anyhow::Result<ContactDayRecord> {
    let day: String = row.get("day");
    let two: i64 = row.get("total_count_two");
    let ten: i64 = row.get("total_count_ten");
    let unresolved: i64 = row.get("unresolved_cc");
    let version: i64 = row.get("version");

    Ok(ContactDayRecord {
        user_id: row.get("user_id"),
        date: NaiveDate::parse_from_str(&day, "%Y-%m-%d")?,
        all_contacts: serde_json::from_str(row.get::<&str, _>("all_contacts"))?,
        contact_device_info: serde_json::from_str(row.get::<&str, _>("contact_device_info"))?,
        close_contact_device_info: serde_json::from_str(row.get::<&str, _>("close_contact_device_info"))?,
        total_count_two: u32::try_from(two)?,
        total_count_ten: u32::try_from(ten)?,
        unresolved_close_contact_count: u32::try_from(unresolved)?,
        unresolved_close_contact_duration: row.get("unresolved_cc_duration"),
        version: u64::try_from(version)?,
    })
}

impl RecordStore for Storage {
    async fn get_record(&self, key: &RecordKey) -> anyhow::Result<Option<ContactDayRecord>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM contact_days
            WHERE user_id = ? AND day = ?
            "#,
        )
        .bind(&key.user_id)
        .bind(day(key.date))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn put_record(&self, record: &ContactDayRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO contact_days (
                user_id, day, all_contacts, contact_device_info,
                close_contact_device_info, total_count_two, total_count_ten,
                unresolved_cc, unresolved_cc_duration, version
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.user_id)
        .bind(day(record.date))
        .bind(serde_json::to_string(&record.all_contacts)?)
        .bind(serde_json::to_string(&record.contact_device_info)?)
        .bind(serde_json::to_string(&record.close_contact_device_info)?)
        .bind(record.total_count_two)
        .bind(record.total_count_ten)
        .bind(record.unresolved_close_contact_count)
        .bind(record.unresolved_close_contact_duration)
        .bind(i64::try_from(record.version)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_user_count(&self) -> anyhow::Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) as total FROM users")
            .fetch_one(&self.pool)
            .await?;

        let total: i64 = row.get("total");
        Ok(u64::try_from(total)?)
    }

    async fn unresolved_keys(&self) -> anyhow::Result<Vec<RecordKey>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, day FROM contact_days
            WHERE unresolved_cc > 0
            ORDER BY day, user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> anyhow::Result<RecordKey> {
                let day: String = r.get("day");
                Ok(RecordKey::new(
                    r.get::<String, _>("user_id"),
                    NaiveDate::parse_from_str(&day, "%Y-%m-%d")?,
                ))
            })
            .collect()
    }
}

impl SurveySource for Storage {
    async fn get_healthy_count(&self, date: NaiveDate) -> anyhow::Result<u64> {
        self.count_submissions(date, true).await
    }

    async fn get_total_filled(&self, date: NaiveDate) -> anyhow::Result<u64> {
        self.count_submissions(date, false).await
    }

    async fn get_unhealthy_submissions(
        &self,
        date: NaiveDate,
    ) -> anyhow::Result<Option<Vec<UnhealthySubmission>>> {
        let rows = sqlx::query(
            r#"
            SELECT symptoms FROM survey_submissions
            WHERE day = ? AND healthy = 0
            ORDER BY id
            "#,
        )
        .bind(day(date))
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let submissions = rows
            .iter()
            .map(|r| -> anyhow::Result<UnhealthySubmission> {
                let symptoms: String = r.get("symptoms");
                Ok(UnhealthySubmission {
                    symptoms: serde_json::from_str(&symptoms)?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Some(submissions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EncounterInfo;

    fn june(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 6, d).unwrap()
    }

    #[tokio::test]
    async fn test_missing_record_is_none() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();

        let record = storage
            .get_record(&RecordKey::new("user-a", june(1)))
            .await
            .unwrap();

        assert!(record.is_none());
    }

    #[tokio::test]
    async fn test_put_and_get_record() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let key = RecordKey::new("user-a", june(1));

        let mut record = ContactDayRecord::empty(&key);
        let info = EncounterInfo {
            duration_secs: 650.0,
            ..EncounterInfo::baseline("dev-1", Utc::now())
        };
        record.all_contacts.insert("dev-1".to_string());
        record.contact_device_info.insert("dev-1".to_string(), info.clone());
        record.close_contact_device_info.insert("dev-1".to_string(), info);
        record.total_count_two = 1;
        record.total_count_ten = 1;
        record.unresolved_close_contact_count = 1;
        record.unresolved_close_contact_duration = 650.0;
        record.version = 3;

        storage.put_record(&record).await.unwrap();
        let loaded = storage.get_record(&key).await.unwrap().unwrap();

        assert_eq!(loaded, record);
        assert_eq!(storage.unresolved_keys().await.unwrap(), vec![key]);
    }

    #[tokio::test]
    async fn test_user_count() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();

        storage.register_user("user-a").await.unwrap();
        storage.register_user("user-b").await.unwrap();
        storage.register_user("user-a").await.unwrap();

        assert_eq!(storage.get_user_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_survey_counts() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();

        storage.insert_submission("user-a", june(1), &[]).await.unwrap();
        storage
            .insert_submission("user-b", june(1), &["fever".to_string(), "cough".to_string()])
            .await
            .unwrap();
        storage.insert_submission("user-c", june(2), &[]).await.unwrap();

        assert_eq!(storage.get_total_filled(june(1)).await.unwrap(), 2);
        assert_eq!(storage.get_healthy_count(june(1)).await.unwrap(), 1);

        let unhealthy = storage.get_unhealthy_submissions(june(1)).await.unwrap();
        assert_eq!(
            unhealthy,
            Some(vec![UnhealthySubmission {
                symptoms: vec!["fever".to_string(), "cough".to_string()],
            }])
        );

        assert!(storage.get_unhealthy_submissions(june(2)).await.unwrap().is_none());
        assert_eq!(storage.get_total_filled(june(3)).await.unwrap(), 0);
    }
}
