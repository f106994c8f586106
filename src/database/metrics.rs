use chrono::Utc;
use diesel::dsl::sql;
use diesel::sql_types::Double;

use super::{get_connection, DbResult};
use crate::controller::BaseError;
use crate::{db_execute, db_object};

db_object! {
    #[derive(Queryable, Insertable, Selectable, Debug)]
    #[diesel(table_name = channel_metrics)]
    pub struct ChannelMetrics {
        pub channel_id: i64,
        pub latency_avg: f64,
        pub error_rate: f64,
        pub request_count: i64,
        pub success_count: i64,
        pub last_updated_at: i64,
    }
}

impl ChannelMetrics {
    pub fn get(channel_id: i64) -> DbResult<Option<ChannelMetrics>> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            let row = channel_metrics::table
                .filter(channel_metrics::dsl::channel_id.eq(channel_id))
                .select(ChannelMetricsDb::as_select())
                .first::<ChannelMetricsDb>(conn)
                .optional()
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "failed to get metrics for channel {}: {}",
                        channel_id, e
                    )))
                })?;
            Ok(row.map(|db| db.from_db()))
        })
    }

    /// Folds one observation into the channel's running averages. The whole
    /// update is a single upsert whose arithmetic runs against the stored row,
    /// so interleaved writers cannot lose each other's observations.
    pub fn update(channel_id: i64, latency_seconds: f64, success: bool) -> DbResult<()> {
        let error = if success { 0.0_f64 } else { 1.0 };
        let succ: i64 = if success { 1 } else { 0 };
        let now = Utc::now().timestamp_millis();

        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::insert_into(channel_metrics::table)
                .values((
                    channel_metrics::dsl::channel_id.eq(channel_id),
                    channel_metrics::dsl::latency_avg.eq(latency_seconds),
                    channel_metrics::dsl::error_rate.eq(error),
                    channel_metrics::dsl::request_count.eq(1_i64),
                    channel_metrics::dsl::success_count.eq(succ),
                    channel_metrics::dsl::last_updated_at.eq(now),
                ))
                .on_conflict(channel_metrics::dsl::channel_id)
                .do_update()
                .set((
                    channel_metrics::dsl::latency_avg.eq(sql::<Double>(
                        "(latency_avg * request_count + ",
                    )
                    .bind::<Double, _>(latency_seconds)
                    .sql(") / (request_count + 1)")),
                    channel_metrics::dsl::error_rate.eq(sql::<Double>(
                        "(error_rate * request_count + ",
                    )
                    .bind::<Double, _>(error)
                    .sql(") / (request_count + 1)")),
                    channel_metrics::dsl::request_count
                        .eq(channel_metrics::dsl::request_count + 1_i64),
                    channel_metrics::dsl::success_count
                        .eq(channel_metrics::dsl::success_count + succ),
                    channel_metrics::dsl::last_updated_at.eq(now),
                ))
                .execute(conn)
                .map_err(|e| {
                    BaseError::DatabaseFatal(Some(format!(
                        "failed to update metrics for channel {}: {}",
                        channel_id, e
                    )))
                })?;
            Ok(())
        })
    }

    /// Drops the row; the next observation starts a fresh average.
    pub fn reset(channel_id: i64) -> DbResult<usize> {
        let conn = &mut get_connection();
        db_execute!(conn, {
            diesel::delete(
                channel_metrics::table.filter(channel_metrics::dsl::channel_id.eq(channel_id)),
            )
            .execute(conn)
            .map_err(|e| {
                BaseError::DatabaseFatal(Some(format!(
                    "failed to reset metrics for channel {}: {}",
                    channel_id, e
                )))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::init_test_store;

    #[test]
    fn test_first_observation_seeds_the_row() {
        init_test_store();

        ChannelMetrics::update(3001, 0.8, true).unwrap();
        let m = ChannelMetrics::get(3001).unwrap().unwrap();
        assert_eq!(m.request_count, 1);
        assert_eq!(m.success_count, 1);
        assert!((m.latency_avg - 0.8).abs() < 1e-9);
        assert_eq!(m.error_rate, 0.0);
    }

    #[test]
    fn test_repeated_failures_converge_to_full_error_rate() {
        init_test_store();

        for _ in 0..5 {
            ChannelMetrics::update(3002, 0.25, false).unwrap();
        }
        let m = ChannelMetrics::get(3002).unwrap().unwrap();
        assert_eq!(m.request_count, 5);
        assert_eq!(m.success_count, 0);
        assert!((m.error_rate - 1.0).abs() < 1e-9);
        assert!((m.latency_avg - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_running_mean() {
        init_test_store();

        ChannelMetrics::update(3003, 1.0, true).unwrap();
        ChannelMetrics::update(3003, 3.0, false).unwrap();
        let m = ChannelMetrics::get(3003).unwrap().unwrap();
        assert_eq!(m.request_count, 2);
        assert_eq!(m.success_count, 1);
        assert!((m.latency_avg - 2.0).abs() < 1e-9);
        assert!((m.error_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reset_starts_over() {
        init_test_store();

        ChannelMetrics::update(3004, 1.0, true).unwrap();
        ChannelMetrics::reset(3004).unwrap();
        assert!(ChannelMetrics::get(3004).unwrap().is_none());

        ChannelMetrics::update(3004, 2.0, true).unwrap();
        let m = ChannelMetrics::get(3004).unwrap().unwrap();
        assert_eq!(m.request_count, 1);
        assert!((m.latency_avg - 2.0).abs() < 1e-9);
        assert_eq!(m.error_rate, 0.0);
    }
}
