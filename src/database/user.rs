use chrono::Utc;

use super::{get_connection, DbResult};
use crate::controller::BaseError;
use crate::utils::ID_GENERATOR;
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Insertable, Selectable, AsChangeset, Debug)]
    #[diesel(table_name = users)]
    pub struct User {
        pub id: i64,
        pub api_key: String,
        pub name: String,
        pub created_at: i64,
        pub updated_at: i64,
    }
}

impl User {
    pub fn new(api_key: &str, name: &str) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: ID_GENERATOR.generate_id(),
            api_key: api_key.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn create(user: &User) -> DbResult<()> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::insert_into(users::table)
                .values(UserDb::to_db(user))
                .execute(conn)
                .map_err(BaseError::from)?;
            Ok(())
        })
    }

    pub fn get_by_id(id: i64) -> DbResult<Option<User>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let row = users::table
                .filter(users::dsl::id.eq(id))
                .select(UserDb::as_select())
                .first::<UserDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("failed to get user {}: {}", id, e)))
                })?;
            Ok(row.map(|db| db.from_db()))
        })
    }

    pub fn get_by_api_key(api_key: &str) -> DbResult<Option<User>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let row = users::table
                .filter(users::dsl::api_key.eq(api_key))
                .select(UserDb::as_select())
                .first::<UserDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("failed to get user by api key: {}", e)))
                })?;
            Ok(row.map(|db| db.from_db()))
        })
    }

    pub fn list() -> DbResult<Vec<User>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = users::table
                .order(users::dsl::created_at.asc())
                .select(UserDb::as_select())
                .load::<UserDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("failed to list users: {}", e)))
                })?;
            Ok(rows.into_iter().map(|db| db.from_db()).collect())
        })
    }

    pub fn delete(id: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::delete(users::table.filter(users::dsl::id.eq(id)))
                .execute(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("failed to delete user {}: {}", id, e)))
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::init_test_store;

    #[test]
    fn test_create_and_lookup_by_key() {
        init_test_store();

        let user = User::new("uk-lookup", "alice");
        User::create(&user).unwrap();

        let fetched = User::get_by_api_key("uk-lookup").unwrap().unwrap();
        assert_eq!(fetched.id, user.id);
        assert_eq!(fetched.name, "alice");

        assert!(User::get_by_api_key("uk-nonesuch").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_api_key_rejected() {
        init_test_store();

        let user = User::new("uk-dup", "bob");
        User::create(&user).unwrap();

        let clash = User::new("uk-dup", "mallory");
        assert!(User::create(&clash).is_err());
    }

    #[test]
    fn test_delete() {
        init_test_store();

        let user = User::new("uk-delete", "carol");
        User::create(&user).unwrap();
        assert_eq!(User::delete(user.id).unwrap(), 1);
        assert!(User::get_by_id(user.id).unwrap().is_none());
    }
}
