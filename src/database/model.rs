use chrono::Utc;

use super::{get_connection, DbResult};
use crate::controller::BaseError;
use crate::utils::ID_GENERATOR;
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Insertable, Selectable, AsChangeset, Debug)]
    #[diesel(table_name = models)]
    pub struct Model {
        pub id: i64,
        pub name: String,
        pub created_at: i64,
        pub updated_at: i64,
    }
}

impl Model {
    pub fn create(name: &str) -> DbResult<Model> {
        let now = Utc::now().timestamp_millis();
        let model = Model {
            id: ID_GENERATOR.generate_id(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };

        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::insert_into(models::table)
                .values(ModelDb::to_db(&model))
                .execute(conn)
                .map_err(BaseError::from)?;
        });
        Ok(model)
    }

    pub fn get_by_id(id: i64) -> DbResult<Option<Model>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let row = models::table
                .filter(models::dsl::id.eq(id))
                .select(ModelDb::as_select())
                .first::<ModelDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("failed to get model {}: {}", id, e)))
                })?;
            Ok(row.map(|db| db.from_db()))
        })
    }

    pub fn get_by_name(name: &str) -> DbResult<Option<Model>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let row = models::table
                .filter(models::dsl::name.eq(name))
                .select(ModelDb::as_select())
                .first::<ModelDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "failed to get model '{}': {}",
                        name, e
                    )))
                })?;
            Ok(row.map(|db| db.from_db()))
        })
    }

    pub fn list() -> DbResult<Vec<Model>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = models::table
                .order(models::dsl::name.asc())
                .select(ModelDb::as_select())
                .load::<ModelDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("failed to list models: {}", e)))
                })?;
            Ok(rows.into_iter().map(|db| db.from_db()).collect())
        })
    }

    pub fn rename(id: i64, name: &str) -> DbResult<Model> {
        let now = Utc::now().timestamp_millis();
        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::update(models::table.filter(models::dsl::id.eq(id)))
                .set((
                    models::dsl::name.eq(name),
                    models::dsl::updated_at.eq(now),
                ))
                .execute(conn)
                .map_err(BaseError::from)?;
        });
        Model::get_by_id(id)?
            .ok_or_else(|| BaseError::NotFound(Some(format!("model {} not found", id))))
    }

    /// Removes the model and all of its channel bindings in one transaction.
    pub fn delete(id: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            conn.transaction::<usize, diesel::result::Error, _>(|conn| {
                diesel::delete(model_channels::table.filter(model_channels::dsl::model_id.eq(id)))
                    .execute(conn)?;
                diesel::delete(models::table.filter(models::dsl::id.eq(id))).execute(conn)
            })
            .map_err(|e| {
                BaseError::DatabaseFatal(Some(format!("failed to delete model {}: {}", id, e)))
            })
        })
    }
}
