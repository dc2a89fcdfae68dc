use chrono::{DateTime, Utc};
use sea_orm::{entity::prelude::*, ActiveValue::Set, QueryOrder};
use serde::{Deserialize, Serialize};

/// A student enrolled in a course, as seen by the attendance scanner.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "students")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub course_id: i64,
    pub display_name: String,
    /// Card code exactly as issued; normalization happens at scan time.
    pub rfid_code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::attendance_record::Entity")]
    Records,
}

impl Related<super::attendance_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Records.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DbConn,
        course_id: i64,
        display_name: &str,
        rfid_code: &str,
    ) -> Result<Model, DbErr> {
        let active = ActiveModel {
            course_id: Set(course_id),
            display_name: Set(display_name.to_owned()),
            rfid_code: Set(rfid_code.to_owned()),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        active.insert(db).await
    }

    /// Roster for a course in insertion order, which is also the matcher's
    /// tie-break order for duplicate codes.
    pub async fn find_by_course(db: &DbConn, course_id: i64) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::CourseId.eq(course_id))
            .order_by_asc(Column::Id)
            .all(db)
            .await
    }
}
