//! Fixtures for tests that need a migrated database.

use migration::Migrator;
use sea_orm::{DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;

use crate::models::student;

/// Fresh in-memory SQLite with every migration applied.
pub async fn setup_test_db() -> DatabaseConnection {
    let db = crate::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");
    Migrator::up(&db, None)
        .await
        .expect("Failed to migrate in-memory database");
    db
}

/// Inserts `(display_name, rfid_code)` pairs for `course_id` in order.
pub async fn seed_students(
    db: &DatabaseConnection,
    course_id: i64,
    students: &[(&str, &str)],
) -> Result<Vec<student::Model>, DbErr> {
    let mut created = Vec::with_capacity(students.len());
    for (name, code) in students {
        created.push(student::Model::create(db, course_id, name, code).await?);
    }
    Ok(created)
}
