use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, QuerySelect};

/// Durable per-course copy of the live session's clock parameters.
///
/// `payload` is opaque JSON owned by the attendance service.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "attendance_session_snapshots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub course_id: i64,
    pub payload: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn put(db: &DbConn, course_id: i64, payload: &str) -> Result<(), DbErr> {
        let active = ActiveModel {
            course_id: Set(course_id),
            payload: Set(payload.to_owned()),
            updated_at: Set(Utc::now()),
        };
        Entity::insert(active)
            .on_conflict(
                OnConflict::column(Column::CourseId)
                    .update_columns([Column::Payload, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        Ok(())
    }

    pub async fn get(db: &DbConn, course_id: i64) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(course_id).one(db).await
    }

    /// Courses that currently have a snapshot, i.e. sessions that were live
    /// when the process last stopped.
    pub async fn course_ids(db: &DbConn) -> Result<Vec<i64>, DbErr> {
        Entity::find()
            .select_only()
            .column(Column::CourseId)
            .into_tuple::<i64>()
            .all(db)
            .await
    }

    pub async fn delete(db: &DbConn, course_id: i64) -> Result<(), DbErr> {
        Entity::delete_by_id(course_id).exec(db).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::setup_test_db;

    #[tokio::test]
    async fn put_overwrites_and_delete_clears() {
        let db = setup_test_db().await;

        Model::put(&db, 3, r#"{"a":1}"#).await.unwrap();
        Model::put(&db, 3, r#"{"a":2}"#).await.unwrap();
        let row = Model::get(&db, 3).await.unwrap().unwrap();
        assert_eq!(row.payload, r#"{"a":2}"#);

        Model::put(&db, 8, "{}").await.unwrap();
        let mut ids = Model::course_ids(&db).await.unwrap();
        ids.sort();
        assert_eq!(ids, vec![3, 8]);

        Model::delete(&db, 3).await.unwrap();
        assert!(Model::get(&db, 3).await.unwrap().is_none());
        // Deleting again is harmless.
        Model::delete(&db, 3).await.unwrap();
    }
}
