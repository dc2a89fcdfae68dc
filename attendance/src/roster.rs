//! Roster collaborator: who may be scanned in a session.

use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::DatabaseConnection;

use crate::error::{AttendanceError, AttendanceResult};
use crate::types::{CourseId, StudentIdentity};

#[async_trait]
pub trait RosterProvider: Send + Sync {
    async fn load(&self, course_id: CourseId, date: NaiveDate) -> AttendanceResult<Vec<StudentIdentity>>;
}

/// Fixed roster, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    students: Vec<StudentIdentity>,
}

impl StaticRoster {
    pub fn new(students: Vec<StudentIdentity>) -> Self {
        Self { students }
    }
}

#[async_trait]
impl RosterProvider for StaticRoster {
    async fn load(&self, _course_id: CourseId, _date: NaiveDate) -> AttendanceResult<Vec<StudentIdentity>> {
        Ok(self.students.clone())
    }
}

/// Reads the `students` table. The roster does not vary by date.
#[derive(Clone)]
pub struct DbRosterProvider {
    db: DatabaseConnection,
}

impl DbRosterProvider {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RosterProvider for DbRosterProvider {
    async fn load(&self, course_id: CourseId, _date: NaiveDate) -> AttendanceResult<Vec<StudentIdentity>> {
        let rows = db::models::student::Model::find_by_course(&self.db, course_id)
            .await
            .map_err(|e| AttendanceError::Roster(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|s| StudentIdentity {
                id: s.id,
                display_name: s.display_name,
                rfid_code: s.rfid_code,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::student;

    #[tokio::test]
    async fn db_roster_only_returns_the_course() {
        let db = db::test_utils::setup_test_db().await;
        student::Model::create(&db, 1, "Alice", "0012345").await.unwrap();
        student::Model::create(&db, 2, "Other", "111").await.unwrap();
        student::Model::create(&db, 1, "Bob", "98765").await.unwrap();

        let roster = DbRosterProvider::new(db)
            .load(1, NaiveDate::from_ymd_opt(2026, 3, 2).unwrap())
            .await
            .unwrap();
        let names: Vec<_> = roster.iter().map(|s| s.display_name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }
}
