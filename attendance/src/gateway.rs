//! The single boundary between the coordinator and durable attendance storage.

use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::DatabaseConnection;

use db::models::attendance_record::{self as record_model, NewRecord};

use crate::error::PersistenceError;
use crate::types::{AttendanceRecord, AttendanceStatus, CourseId, RecordSource};

/// Commits attendance batches.
///
/// Implementations must be idempotent: committing the same
/// student/date/status twice is a no-op on the backing store.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn commit(
        &self,
        course_id: CourseId,
        date: NaiveDate,
        records: &[AttendanceRecord],
    ) -> Result<(), PersistenceError>;

    /// Records already committed for `date`, used to seed a recovered session.
    async fn existing(
        &self,
        _course_id: CourseId,
        _date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, PersistenceError> {
        Ok(Vec::new())
    }
}

impl From<AttendanceStatus> for record_model::Status {
    fn from(s: AttendanceStatus) -> Self {
        match s {
            AttendanceStatus::NotSet => record_model::Status::NotSet,
            AttendanceStatus::Present => record_model::Status::Present,
            AttendanceStatus::Late => record_model::Status::Late,
            AttendanceStatus::Absent => record_model::Status::Absent,
            AttendanceStatus::Excused => record_model::Status::Excused,
        }
    }
}

impl From<record_model::Status> for AttendanceStatus {
    fn from(s: record_model::Status) -> Self {
        match s {
            record_model::Status::NotSet => AttendanceStatus::NotSet,
            record_model::Status::Present => AttendanceStatus::Present,
            record_model::Status::Late => AttendanceStatus::Late,
            record_model::Status::Absent => AttendanceStatus::Absent,
            record_model::Status::Excused => AttendanceStatus::Excused,
        }
    }
}

impl From<RecordSource> for record_model::Source {
    fn from(s: RecordSource) -> Self {
        match s {
            RecordSource::Scan => record_model::Source::Scan,
            RecordSource::Timeout => record_model::Source::Timeout,
            RecordSource::Manual => record_model::Source::Manual,
        }
    }
}

impl From<record_model::Source> for RecordSource {
    fn from(s: record_model::Source) -> Self {
        match s {
            record_model::Source::Scan => RecordSource::Scan,
            record_model::Source::Timeout => RecordSource::Timeout,
            record_model::Source::Manual => RecordSource::Manual,
        }
    }
}

/// Gateway writing to the `attendance_records` table, one transaction per batch.
#[derive(Clone)]
pub struct DbPersistenceGateway {
    db: DatabaseConnection,
}

impl DbPersistenceGateway {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PersistenceGateway for DbPersistenceGateway {
    async fn commit(
        &self,
        course_id: CourseId,
        date: NaiveDate,
        records: &[AttendanceRecord],
    ) -> Result<(), PersistenceError> {
        let rows: Vec<NewRecord> = records
            .iter()
            .map(|r| NewRecord {
                student_id: r.student_id,
                status: r.status.into(),
                source: r.source.into(),
                classified_at: r.classified_at,
            })
            .collect();
        record_model::Model::upsert_batch(&self.db, course_id, date, &rows).await?;
        tracing::debug!(course_id, %date, count = rows.len(), "attendance batch committed");
        Ok(())
    }

    async fn existing(
        &self,
        course_id: CourseId,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, PersistenceError> {
        let rows = record_model::Model::find_for_date(&self.db, course_id, date).await?;
        Ok(rows
            .into_iter()
            .map(|r| AttendanceRecord {
                student_id: r.student_id,
                status: r.status.into(),
                classified_at: r.classified_at,
                source: r.source.into(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use db::models::student;

    #[tokio::test]
    async fn commit_is_idempotent_and_last_status_wins() {
        let db = db::test_utils::setup_test_db().await;
        let alice = student::Model::create(&db, 1, "Alice", "0012345").await.unwrap();
        let bob = student::Model::create(&db, 1, "Bob", "98765").await.unwrap();
        let gateway = DbPersistenceGateway::new(db.clone());
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 2, 0).unwrap();

        let batch = vec![
            AttendanceRecord {
                student_id: alice.id,
                status: AttendanceStatus::Present,
                classified_at: at,
                source: RecordSource::Scan,
            },
            AttendanceRecord {
                student_id: bob.id,
                status: AttendanceStatus::Late,
                classified_at: at,
                source: RecordSource::Scan,
            },
        ];
        gateway.commit(1, date, &batch).await.unwrap();
        gateway.commit(1, date, &batch).await.unwrap();

        let stored = gateway.existing(1, date).await.unwrap();
        assert_eq!(stored.len(), 2);

        let excused = vec![AttendanceRecord {
            status: AttendanceStatus::Excused,
            source: RecordSource::Manual,
            ..batch[1].clone()
        }];
        gateway.commit(1, date, &excused).await.unwrap();
        let stored = gateway.existing(1, date).await.unwrap();
        let bob_row = stored.iter().find(|r| r.student_id == bob.id).unwrap();
        assert_eq!(bob_row.status, AttendanceStatus::Excused);
        assert_eq!(bob_row.source, RecordSource::Manual);
    }

    #[tokio::test]
    async fn empty_commit_is_a_no_op() {
        let db = db::test_utils::setup_test_db().await;
        let gateway = DbPersistenceGateway::new(db);
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        gateway.commit(1, date, &[]).await.unwrap();
        assert!(gateway.existing(1, date).await.unwrap().is_empty());
    }
}
