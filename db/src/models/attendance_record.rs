use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, QueryOrder, TransactionTrait};
use serde::{Deserialize, Serialize};

/// Committed attendance for one student on one course date.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "attendance_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub course_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub date: NaiveDate,
    #[sea_orm(primary_key, auto_increment = false)]
    pub student_id: i64,

    pub status: Status,
    pub source: Source,
    pub classified_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    sea_orm::strum::Display,
    sea_orm::strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[sea_orm(string_value = "not_set")]
    NotSet,
    #[sea_orm(string_value = "present")]
    Present,
    #[sea_orm(string_value = "late")]
    Late,
    #[sea_orm(string_value = "absent")]
    Absent,
    #[sea_orm(string_value = "excused")]
    Excused,
}

/// What produced the record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    sea_orm::strum::Display,
    sea_orm::strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    #[sea_orm(string_value = "scan")]
    Scan,
    #[sea_orm(string_value = "timeout")]
    Timeout,
    #[sea_orm(string_value = "manual")]
    Manual,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::student::Entity",
        from = "Column::StudentId",
        to = "super::student::Column::Id"
    )]
    Student,
}

impl Related<super::student::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Student.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// One row of a batch commit.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub student_id: i64,
    pub status: Status,
    pub source: Source,
    pub classified_at: DateTime<Utc>,
}

impl Model {
    /// Writes a whole batch in one transaction.
    ///
    /// Rows are upserted on `(course_id, date, student_id)`, so replaying the same
    /// batch leaves the table unchanged apart from `updated_at`.
    pub async fn upsert_batch(
        db: &DbConn,
        course_id: i64,
        date: NaiveDate,
        records: &[NewRecord],
    ) -> Result<(), DbErr> {
        if records.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let txn = db.begin().await?;
        for rec in records {
            let active = ActiveModel {
                course_id: Set(course_id),
                date: Set(date),
                student_id: Set(rec.student_id),
                status: Set(rec.status),
                source: Set(rec.source),
                classified_at: Set(rec.classified_at),
                updated_at: Set(now),
            };
            Entity::insert(active)
                .on_conflict(
                    OnConflict::columns([Column::CourseId, Column::Date, Column::StudentId])
                        .update_columns([
                            Column::Status,
                            Column::Source,
                            Column::ClassifiedAt,
                            Column::UpdatedAt,
                        ])
                        .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;
        }
        txn.commit().await
    }

    pub async fn find_for_date(
        db: &DbConn,
        course_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::CourseId.eq(course_id))
            .filter(Column::Date.eq(date))
            .order_by_asc(Column::StudentId)
            .all(db)
            .await
    }
}
