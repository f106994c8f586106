use chrono::Utc;

use super::{get_connection, DbResult};
use crate::controller::BaseError;
use crate::utils::ID_GENERATOR;
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Insertable, Selectable, Debug)]
    #[diesel(table_name = model_channels)]
    pub struct ModelChannel {
        pub id: i64,
        pub model_id: i64,
        pub channel_id: i64,
        pub backend_model_name: String,
        pub weight: i32,
        pub created_at: i64,
    }
}

impl ModelChannel {
    /// Binds a logical model to a channel. A non-positive weight falls back
    /// to the default of 10.
    pub fn add(
        model_id: i64,
        channel_id: i64,
        backend_model_name: &str,
        weight: i32,
    ) -> DbResult<ModelChannel> {
        let binding = ModelChannel {
            id: ID_GENERATOR.generate_id(),
            model_id,
            channel_id,
            backend_model_name: backend_model_name.to_string(),
            weight: if weight > 0 { weight } else { 10 },
            created_at: Utc::now().timestamp_millis(),
        };

        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::insert_into(model_channels::table)
                .values(ModelChannelDb::to_db(&binding))
                .execute(conn)
                .map_err(BaseError::from)?;
        });
        Ok(binding)
    }

    pub fn list_by_model(model_id: i64) -> DbResult<Vec<ModelChannel>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = model_channels::table
                .filter(model_channels::dsl::model_id.eq(model_id))
                .order(model_channels::dsl::created_at.asc())
                .select(ModelChannelDb::as_select())
                .load::<ModelChannelDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "failed to list bindings for model {}: {}",
                        model_id, e
                    )))
                })?;
            Ok(rows.into_iter().map(|db| db.from_db()).collect())
        })
    }

    pub fn list_by_channel(channel_id: i64) -> DbResult<Vec<ModelChannel>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let rows = model_channels::table
                .filter(model_channels::dsl::channel_id.eq(channel_id))
                .order(model_channels::dsl::created_at.asc())
                .select(ModelChannelDb::as_select())
                .load::<ModelChannelDb>(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "failed to list bindings for channel {}: {}",
                        channel_id, e
                    )))
                })?;
            Ok(rows.into_iter().map(|db| db.from_db()).collect())
        })
    }

    pub fn remove(model_id: i64, channel_id: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::delete(
                model_channels::table
                    .filter(model_channels::dsl::model_id.eq(model_id))
                    .filter(model_channels::dsl::channel_id.eq(channel_id)),
            )
            .execute(conn)
            .map_err(|e| {
                BaseError::DatabaseFatal(Some(format!(
                    "failed to remove binding {}:{}: {}",
                    model_id, channel_id, e
                )))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::channel::Channel;
    use crate::database::model::Model;
    use crate::database::test_support::init_test_store;

    #[test]
    fn test_add_and_list() {
        init_test_store();

        let channel = Channel::new("chan-binding", "http://localhost:9", "sk-x", 10, true);
        Channel::create(&channel).unwrap();
        let model = Model::create("model-binding").unwrap();

        let binding = ModelChannel::add(model.id, channel.id, "backend-z", 0).unwrap();
        // Non-positive weights fall back to the default.
        assert_eq!(binding.weight, 10);

        let by_model = ModelChannel::list_by_model(model.id).unwrap();
        assert_eq!(by_model.len(), 1);
        assert_eq!(by_model[0].backend_model_name, "backend-z");

        let by_channel = ModelChannel::list_by_channel(channel.id).unwrap();
        assert_eq!(by_channel.len(), 1);
        assert_eq!(by_channel[0].model_id, model.id);
    }

    #[test]
    fn test_duplicate_pair_rejected() {
        init_test_store();

        let channel = Channel::new("chan-binding-dup", "http://localhost:9", "sk-x", 10, true);
        Channel::create(&channel).unwrap();
        let model = Model::create("model-binding-dup").unwrap();

        ModelChannel::add(model.id, channel.id, "backend-a", 10).unwrap();
        assert!(ModelChannel::add(model.id, channel.id, "backend-b", 10).is_err());
    }

    #[test]
    fn test_remove() {
        init_test_store();

        let channel = Channel::new("chan-binding-rm", "http://localhost:9", "sk-x", 10, true);
        Channel::create(&channel).unwrap();
        let model = Model::create("model-binding-rm").unwrap();

        ModelChannel::add(model.id, channel.id, "backend-a", 10).unwrap();
        assert_eq!(ModelChannel::remove(model.id, channel.id).unwrap(), 1);
        assert!(ModelChannel::list_by_model(model.id).unwrap().is_empty());
    }
}
