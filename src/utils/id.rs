use std::sync::Mutex;

use chrono::Utc;

// 2024-01-01T00:00:00Z
const EPOCH_MS: i64 = 1_704_067_200_000;
const NODE_BITS: u8 = 10;
const SEQUENCE_BITS: u8 = 12;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

/// Snowflake-style id generator: 41 bits of milliseconds since a fixed epoch,
/// 10 bits of node id, 12 bits of per-millisecond sequence.
pub struct Snowflake {
    node_id: i64,
    state: Mutex<State>,
}

struct State {
    last_timestamp: i64,
    sequence: i64,
}

impl Snowflake {
    pub fn new(node_id: i64) -> Self {
        Self {
            node_id: node_id & ((1 << NODE_BITS) - 1),
            state: Mutex::new(State {
                last_timestamp: 0,
                sequence: 0,
            }),
        }
    }

    pub fn generate_id(&self) -> i64 {
        let mut state = self.state.lock().unwrap();
        let mut now = Utc::now().timestamp_millis() - EPOCH_MS;

        // A clock step backwards must not mint colliding ids; ride on the last
        // timestamp until real time catches up.
        if now < state.last_timestamp {
            now = state.last_timestamp;
        }

        if now == state.last_timestamp {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                now += 1;
                while Utc::now().timestamp_millis() - EPOCH_MS < now {
                    std::hint::spin_loop();
                }
            }
        } else {
            state.sequence = 0;
        }

        state.last_timestamp = now;
        (now << (NODE_BITS + SEQUENCE_BITS)) | (self.node_id << SEQUENCE_BITS) | state.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let generator = Snowflake::new(1);
        let mut seen = HashSet::new();
        let mut previous = 0;
        for _ in 0..10_000 {
            let id = generator.generate_id();
            assert!(id > previous);
            assert!(seen.insert(id));
            previous = id;
        }
    }

    #[test]
    fn test_node_id_is_embedded() {
        let generator = Snowflake::new(7);
        let id = generator.generate_id();
        assert_eq!((id >> SEQUENCE_BITS) & ((1 << NODE_BITS) - 1), 7);
    }
}
