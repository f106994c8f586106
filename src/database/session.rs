use chrono::Utc;

use super::{get_connection, DbResult};
use crate::controller::BaseError;
use crate::utils::ID_GENERATOR;
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Insertable, Selectable, Debug)]
    #[diesel(table_name = sessions)]
    pub struct Session {
        pub id: i64,
        pub user_id: i64,
        pub channel_id: i64,
        pub last_used_at: i64,
        pub created_at: i64,
    }
}

impl Session {
    /// Pins a user to a channel. Concurrent routes that pick the same channel
    /// race on the (user_id, channel_id) uniqueness constraint, so creation is
    /// an insert-or-touch: an existing pin just gets its last_used_at bumped.
    pub fn upsert(user_id: i64, channel_id: i64) -> DbResult<Session> {
        let now = Utc::now().timestamp_millis();
        let session = Session {
            id: ID_GENERATOR.generate_id(),
            user_id,
            channel_id,
            last_used_at: now,
            created_at: now,
        };

        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::insert_into(sessions::table)
                .values(SessionDb::to_db(&session))
                .on_conflict((sessions::dsl::user_id, sessions::dsl::channel_id))
                .do_update()
                .set(sessions::dsl::last_used_at.eq(now))
                .execute(conn)
                .map_err(BaseError::from)?;

            let row = sessions::table
                .filter(
                    sessions::dsl::user_id
                        .eq(user_id)
                        .and(sessions::dsl::channel_id.eq(channel_id)),
                )
                .select(SessionDb::as_select())
                .first::<SessionDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "failed to read back session for user {}: {}",
                        user_id, e
                    )))
                })?;
            Ok(row.from_db())
        })
    }

    pub fn get_by_id(id: i64) -> DbResult<Option<Session>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let row = sessions::table
                .filter(sessions::dsl::id.eq(id))
                .select(SessionDb::as_select())
                .first::<SessionDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("failed to get session {}: {}", id, e)))
                })?;
            Ok(row.map(|db| db.from_db()))
        })
    }

    /// The most recently used pin for a user, if any.
    pub fn get_by_user(user_id: i64) -> DbResult<Option<Session>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let row = sessions::table
                .filter(sessions::dsl::user_id.eq(user_id))
                .order(sessions::dsl::last_used_at.desc())
                .select(SessionDb::as_select())
                .first::<SessionDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "failed to get session for user {}: {}",
                        user_id, e
                    )))
                })?;
            Ok(row.map(|db| db.from_db()))
        })
    }

    pub fn list() -> DbResult<Vec<Session>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = sessions::table
                .order(sessions::dsl::last_used_at.desc())
                .select(SessionDb::as_select())
                .load::<SessionDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("failed to list sessions: {}", e)))
                })?;
            Ok(rows.into_iter().map(|db| db.from_db()).collect())
        })
    }

    pub fn touch(id: i64) -> DbResult<()> {
        let now = Utc::now().timestamp_millis();
        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::update(sessions::table.filter(sessions::dsl::id.eq(id)))
                .set(sessions::dsl::last_used_at.eq(now))
                .execute(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "failed to touch session {}: {}",
                        id, e
                    )))
                })?;
            Ok(())
        })
    }

    pub fn delete(id: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::delete(sessions::table.filter(sessions::dsl::id.eq(id)))
                .execute(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "failed to delete session {}: {}",
                        id, e
                    )))
                })
        })
    }

    /// Drops every session idle for longer than the given number of minutes.
    pub fn delete_expired(idle_timeout_minutes: u64) -> DbResult<usize> {
        let cutoff = Utc::now().timestamp_millis() - (idle_timeout_minutes as i64) * 60_000;
        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::delete(sessions::table.filter(sessions::dsl::last_used_at.lt(cutoff)))
                .execute(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "failed to delete expired sessions: {}",
                        e
                    )))
                })
        })
    }

    #[cfg(test)]
    fn backdate(id: i64, last_used_at: i64) -> DbResult<()> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::update(sessions::table.filter(sessions::dsl::id.eq(id)))
                .set(sessions::dsl::last_used_at.eq(last_used_at))
                .execute(conn)
                .map_err(BaseError::from)?;
            Ok(())
        })
    }
}
