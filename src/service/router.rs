use rand::{rng, Rng};
use thiserror::Error;
use tracing::debug;

use super::health::HEALTH;
use crate::config::CONFIG;
use crate::controller::BaseError;
use crate::database::channel::Channel;
use crate::database::metrics::ChannelMetrics;
use crate::database::model::Model;
use crate::database::model_channel::ModelChannel;
use crate::database::session::Session;

// Floor on the error-rate factor so a flapping channel is throttled, never
// starved to a zero score.
const MIN_ERROR_FACTOR: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct RouteResult {
    pub channel: Channel,
    pub backend_model_name: String,
    pub session_id: i64,
    pub is_new: bool,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("no channels configured for model: {0}")]
    NoBindings(String),
    #[error("no suitable channel found for model: {0}")]
    NoHealthyChannel(String),
    #[error("store error: {0}")]
    Store(String),
}

impl From<BaseError> for RouteError {
    fn from(err: BaseError) -> Self {
        RouteError::Store(format!("{:?}", err))
    }
}

struct Candidate {
    channel: Channel,
    backend_model_name: String,
    weight: i32,
}

/// Picks the channel for a `(user, logical model)` pair.
///
/// A still-valid pin wins outright: the user stays on the channel they were
/// last served by, which keeps any backend-side caching warm. Otherwise a
/// weighted random draw over the model's bindings chooses a channel and pins
/// the user to it.
pub fn route(user_id: i64, model_name: &str) -> Result<RouteResult, RouteError> {
    // Sticky phase: the most recently used pin, validated against the world
    // as it is now. A stale pin is left for the sweeper; routing just falls
    // through to a fresh selection.
    if let Some(session) = Session::get_by_user(user_id)? {
        if let Some(channel) = Channel::get_by_id(session.channel_id)? {
            if channel.is_enabled {
                if let Some(model) = Model::get_by_name(model_name)? {
                    let bindings = ModelChannel::list_by_channel(channel.id)?;
                    if let Some(binding) = bindings.into_iter().find(|b| b.model_id == model.id) {
                        Session::touch(session.id)?;
                        debug!(
                            "sticky route: user {} -> channel {} for {}",
                            user_id, channel.name, model_name
                        );
                        return Ok(RouteResult {
                            channel,
                            backend_model_name: binding.backend_model_name,
                            session_id: session.id,
                            is_new: false,
                        });
                    }
                }
            }
        }
    }

    // Selection phase.
    let model = Model::get_by_name(model_name)?
        .ok_or_else(|| RouteError::ModelNotFound(model_name.to_string()))?;

    let bindings = ModelChannel::list_by_model(model.id)?;
    if bindings.is_empty() {
        return Err(RouteError::NoBindings(model_name.to_string()));
    }

    let mut candidates = Vec::new();
    for binding in bindings {
        let channel = match Channel::get_by_id(binding.channel_id)? {
            Some(channel) => channel,
            None => continue,
        };
        if !channel.is_enabled {
            continue;
        }
        if CONFIG.health_check.exclude_unhealthy && HEALTH.is_unhealthy(channel.id) {
            continue;
        }
        candidates.push(Candidate {
            channel,
            backend_model_name: binding.backend_model_name,
            weight: binding.weight,
        });
    }

    if candidates.is_empty() {
        return Err(RouteError::NoHealthyChannel(model_name.to_string()));
    }

    let index = if candidates.len() == 1 {
        0
    } else {
        let scores: Vec<f64> = candidates
            .iter()
            .map(|c| {
                // A failed metrics read degrades to weight-only scoring
                // rather than failing the request.
                let metrics = ChannelMetrics::get(c.channel.id).ok().flatten();
                composite_score(&c.channel, metrics.as_ref()) * c.weight as f64
            })
            .collect();
        let total: f64 = scores.iter().sum();
        let r = rng().random::<f64>() * total;
        pick_index(&scores, r)
    };

    let chosen = candidates.swap_remove(index);
    let session = Session::upsert(user_id, chosen.channel.id)?;
    debug!(
        "new route: user {} -> channel {} for {}",
        user_id, chosen.channel.name, model_name
    );

    Ok(RouteResult {
        channel: chosen.channel,
        backend_model_name: chosen.backend_model_name,
        session_id: session.id,
        is_new: true,
    })
}

/// The per-channel part of the composite score: base weight, discounted by
/// observed latency and error rate when metrics exist.
fn composite_score(channel: &Channel, metrics: Option<&ChannelMetrics>) -> f64 {
    let mut score = channel.weight as f64;

    let metrics = match metrics {
        Some(metrics) => metrics,
        None => return score,
    };

    if metrics.latency_avg > 0.0 {
        score *= 1.0 / (1.0 + metrics.latency_avg);
    }

    let error_factor = (1.0 - metrics.error_rate).max(MIN_ERROR_FACTOR);
    score *= error_factor;

    score
}

/// Cumulative weighted draw: the first candidate whose running sum reaches
/// `r`. Falls back to the last candidate when floating-point rounding lets
/// `r` slip past the total.
fn pick_index(scores: &[f64], r: f64) -> usize {
    let mut cumulative = 0.0;
    for (index, score) in scores.iter().enumerate() {
        cumulative += score;
        if r <= cumulative {
            return index;
        }
    }
    scores.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::init_test_store;

    fn channel_with_weight(weight: i32) -> Channel {
        Channel {
            id: 1,
            name: "c".to_string(),
            base_url: "http://localhost:9".to_string(),
            api_key: "sk".to_string(),
            weight,
            is_enabled: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn metrics(latency_avg: f64, error_rate: f64) -> ChannelMetrics {
        ChannelMetrics {
            channel_id: 1,
            latency_avg,
            error_rate,
            request_count: 100,
            success_count: 100,
            last_updated_at: 0,
        }
    }

    #[test]
    fn test_score_without_metrics_is_the_weight() {
        let channel = channel_with_weight(10);
        assert_eq!(composite_score(&channel, None), 10.0);
    }

    #[test]
    fn test_score_discounts_latency() {
        let channel = channel_with_weight(10);
        let m = metrics(1.0, 0.0);
        assert!((composite_score(&channel, Some(&m)) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_factor_floors_at_one_tenth() {
        let channel = channel_with_weight(10);
        let m = metrics(0.0, 1.0);
        assert!((composite_score(&channel, Some(&m)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pick_index_walks_cumulative_sums() {
        let scores = vec![1.0, 2.0, 3.0];
        assert_eq!(pick_index(&scores, 0.5), 0);
        assert_eq!(pick_index(&scores, 1.5), 1);
        assert_eq!(pick_index(&scores, 5.5), 2);
        // Rounding past the total still lands on the last candidate.
        assert_eq!(pick_index(&scores, 6.5), 2);
    }

    #[test]
    fn test_weighted_draw_distribution() {
        let scores = vec![9.0, 1.0];
        let total: f64 = scores.iter().sum();
        let mut counts = [0_u32; 2];
        let mut generator = rng();
        let draws = 10_000;

        for _ in 0..draws {
            let r = generator.random::<f64>() * total;
            counts[pick_index(&scores, r)] += 1;
        }

        // Expectation is 9000 with sigma ~30; this band is ~10 sigma wide.
        assert!(counts[0] > 8700 && counts[0] < 9300, "counts: {:?}", counts);
    }

    #[test]
    fn test_failing_channel_share_collapses() {
        // Equal weights, but one channel has a full error rate: its score
        // floors at a tenth of its weight, so the clean channel should take
        // roughly 10/11 of the traffic.
        let broken = channel_with_weight(10);
        let clean = channel_with_weight(10);
        let scores = vec![
            composite_score(&broken, Some(&metrics(0.0, 1.0))),
            composite_score(&clean, None),
        ];
        let total: f64 = scores.iter().sum();
        let mut counts = [0_u32; 2];
        let mut generator = rng();
        let draws = 10_000;

        for _ in 0..draws {
            let r = generator.random::<f64>() * total;
            counts[pick_index(&scores, r)] += 1;
        }

        let clean_share = counts[1] as f64 / draws as f64;
        assert!(
            (clean_share - 10.0 / 11.0).abs() < 0.02,
            "clean share: {}",
            clean_share
        );
    }

    #[test]
    fn test_route_unknown_model() {
        init_test_store();

        let err = route(5001, "route-nonesuch").unwrap_err();
        assert!(matches!(err, RouteError::ModelNotFound(_)));
        assert_eq!(err.to_string(), "model not found: route-nonesuch");
    }

    #[test]
    fn test_route_model_without_bindings() {
        init_test_store();

        Model::create("route-unbound").unwrap();
        let err = route(5002, "route-unbound").unwrap_err();
        assert!(matches!(err, RouteError::NoBindings(_)));
    }

    #[test]
    fn test_route_all_channels_disabled() {
        init_test_store();

        let channel = Channel::new("route-disabled", "http://localhost:9", "sk", 10, false);
        Channel::create(&channel).unwrap();
        let model = Model::create("route-disabled-model").unwrap();
        ModelChannel::add(model.id, channel.id, "backend", 10).unwrap();

        let err = route(5003, "route-disabled-model").unwrap_err();
        assert!(matches!(err, RouteError::NoHealthyChannel(_)));
    }

    #[test]
    fn test_route_is_sticky() {
        init_test_store();

        let a = Channel::new("route-sticky-a", "http://localhost:9", "sk", 10, true);
        let b = Channel::new("route-sticky-b", "http://localhost:9", "sk", 10, true);
        Channel::create(&a).unwrap();
        Channel::create(&b).unwrap();
        let model = Model::create("route-sticky-model").unwrap();
        ModelChannel::add(model.id, a.id, "backend-a", 10).unwrap();
        ModelChannel::add(model.id, b.id, "backend-b", 10).unwrap();

        let first = route(5004, "route-sticky-model").unwrap();
        assert!(first.is_new);

        for _ in 0..20 {
            let next = route(5004, "route-sticky-model").unwrap();
            assert!(!next.is_new);
            assert_eq!(next.channel.id, first.channel.id);
            assert_eq!(next.session_id, first.session_id);
        }
    }

    #[test]
    fn test_route_repins_when_channel_disabled() {
        init_test_store();

        let a = Channel::new("route-repin-a", "http://localhost:9", "sk", 10, true);
        let b = Channel::new("route-repin-b", "http://localhost:9", "sk", 10, true);
        Channel::create(&a).unwrap();
        Channel::create(&b).unwrap();
        let model = Model::create("route-repin-model").unwrap();
        ModelChannel::add(model.id, a.id, "backend-a", 10).unwrap();
        ModelChannel::add(model.id, b.id, "backend-b", 10).unwrap();

        let first = route(5005, "route-repin-model").unwrap();

        // Disable the pinned channel; the next route must move elsewhere.
        let mut pinned = Channel::get_by_id(first.channel.id).unwrap().unwrap();
        pinned.is_enabled = false;
        Channel::update(&pinned).unwrap();

        let second = route(5005, "route-repin-model").unwrap();
        assert!(second.is_new);
        assert_ne!(second.channel.id, first.channel.id);
    }

    #[test]
    fn test_route_returns_bound_backend_name() {
        init_test_store();

        let channel = Channel::new("route-backend", "http://localhost:9", "sk", 10, true);
        Channel::create(&channel).unwrap();
        let model = Model::create("route-backend-model").unwrap();
        ModelChannel::add(model.id, channel.id, "gpt-4-0613", 10).unwrap();

        let result = route(5006, "route-backend-model").unwrap();
        assert_eq!(result.backend_model_name, "gpt-4-0613");
        assert_eq!(result.channel.id, channel.id);
    }
}
