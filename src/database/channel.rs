use chrono::Utc;

use super::{get_connection, DbResult};
use crate::controller::BaseError;
use crate::utils::ID_GENERATOR;
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Insertable, Selectable, AsChangeset, Debug)]
    #[diesel(table_name = channels)]
    pub struct Channel {
        pub id: i64,
        pub name: String,
        pub base_url: String,
        pub api_key: String,
        pub weight: i32,
        pub is_enabled: bool,
        pub created_at: i64,
        pub updated_at: i64,
    }
}

impl Channel {
    pub fn new(name: &str, base_url: &str, api_key: &str, weight: i32, is_enabled: bool) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: ID_GENERATOR.generate_id(),
            name: name.to_string(),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            weight,
            is_enabled,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn create(channel: &Channel) -> DbResult<()> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::insert_into(channels::table)
                .values(ChannelDb::to_db(channel))
                .execute(conn)
                .map_err(BaseError::from)?;
            Ok(())
        })
    }

    pub fn get_by_id(id: i64) -> DbResult<Option<Channel>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let row = channels::table
                .filter(channels::dsl::id.eq(id))
                .select(ChannelDb::as_select())
                .first::<ChannelDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("failed to get channel {}: {}", id, e)))
                })?;
            Ok(row.map(|db| db.from_db()))
        })
    }

    pub fn get_by_name(name: &str) -> DbResult<Option<Channel>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let row = channels::table
                .filter(channels::dsl::name.eq(name))
                .select(ChannelDb::as_select())
                .first::<ChannelDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "failed to get channel '{}': {}",
                        name, e
                    )))
                })?;
            Ok(row.map(|db| db.from_db()))
        })
    }

    pub fn list() -> DbResult<Vec<Channel>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = channels::table
                .order(channels::dsl::created_at.asc())
                .select(ChannelDb::as_select())
                .load::<ChannelDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!("failed to list channels: {}", e)))
                })?;
            Ok(rows.into_iter().map(|db| db.from_db()).collect())
        })
    }

    pub fn update(channel: &Channel) -> DbResult<Channel> {
        let mut updated = channel.clone();
        updated.updated_at = Utc::now().timestamp_millis();

        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::update(channels::table.filter(channels::dsl::id.eq(updated.id)))
                .set(ChannelDb::to_db(&updated))
                .execute(conn)
                .map_err(BaseError::from)?;
        });
        Ok(updated)
    }

    /// Removes the channel along with every binding, session and metrics row
    /// pointing at it, in one transaction.
    pub fn delete(id: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            conn.transaction::<usize, diesel::result::Error, _>(|conn| {
                diesel::delete(
                    model_channels::table.filter(model_channels::dsl::channel_id.eq(id)),
                )
                .execute(conn)?;
                diesel::delete(sessions::table.filter(sessions::dsl::channel_id.eq(id)))
                    .execute(conn)?;
                diesel::delete(
                    channel_metrics::table.filter(channel_metrics::dsl::channel_id.eq(id)),
                )
                .execute(conn)?;
                diesel::delete(channels::table.filter(channels::dsl::id.eq(id))).execute(conn)
            })
            .map_err(|e| {
                BaseError::DatabaseFatal(Some(format!("failed to delete channel {}: {}", id, e)))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::metrics::ChannelMetrics;
    use crate::database::model::Model;
    use crate::database::model_channel::ModelChannel;
    use crate::database::session::Session;
    use crate::database::test_support::init_test_store;

    #[test]
    fn test_create_and_get() {
        init_test_store();

        let channel = Channel::new("chan-create", "http://localhost:9", "sk-x", 10, true);
        Channel::create(&channel).unwrap();

        let fetched = Channel::get_by_id(channel.id).unwrap().unwrap();
        assert_eq!(fetched.name, "chan-create");
        assert_eq!(fetched.weight, 10);
        assert!(fetched.is_enabled);

        let by_name = Channel::get_by_name("chan-create").unwrap().unwrap();
        assert_eq!(by_name.id, channel.id);

        assert!(Channel::get_by_id(-1).unwrap().is_none());
    }

    #[test]
    fn test_update() {
        init_test_store();

        let mut channel = Channel::new("chan-update", "http://localhost:9", "sk-x", 10, true);
        Channel::create(&channel).unwrap();

        channel.weight = 3;
        channel.is_enabled = false;
        let updated = Channel::update(&channel).unwrap();
        assert!(updated.updated_at >= channel.created_at);

        let fetched = Channel::get_by_id(channel.id).unwrap().unwrap();
        assert_eq!(fetched.weight, 3);
        assert!(!fetched.is_enabled);
    }

    #[test]
    fn test_delete_cascades() {
        init_test_store();

        let channel = Channel::new("chan-cascade", "http://localhost:9", "sk-x", 10, true);
        Channel::create(&channel).unwrap();
        let model = Model::create("model-chan-cascade").unwrap();
        ModelChannel::add(model.id, channel.id, "backend-x", 10).unwrap();
        Session::upsert(424242, channel.id).unwrap();
        ChannelMetrics::update(channel.id, 0.5, true).unwrap();

        Channel::delete(channel.id).unwrap();

        assert!(Channel::get_by_id(channel.id).unwrap().is_none());
        assert!(ModelChannel::list_by_channel(channel.id).unwrap().is_empty());
        assert!(Session::get_by_user(424242).unwrap().is_none());
        assert!(ChannelMetrics::get(channel.id).unwrap().is_none());
    }
}
