use std::time::Duration;

use pushgate_broker::Broker;
use tracing::{debug, info};

/// Tick rate for the probability sampler.
const UPDATE_RATE_HZ: f64 = 10.0;
/// Average broadcast messages per second.
const BROADCAST_RATE_HZ: f64 = 1.0;
/// Average targeted messages per second, per connected identity.
const USER_RATE_HZ: f64 = 0.1;

const BROADCAST_PROBABILITY: f64 = BROADCAST_RATE_HZ / UPDATE_RATE_HZ;
const USER_PROBABILITY: f64 = USER_RATE_HZ / UPDATE_RATE_HZ;

/// Emit random broadcast and per-identity messages for load testing the
/// push path. Purely a caller of the broker's producer API; runs until
/// the process exits.
pub async fn run(broker: Broker) {
    info!(
        broadcast_hz = BROADCAST_RATE_HZ,
        user_hz = USER_RATE_HZ,
        "demo traffic generator started"
    );

    let mut tick = tokio::time::interval(Duration::from_secs_f64(1.0 / UPDATE_RATE_HZ));
    let mut broadcast_count: u64 = 0;
    let mut tick_count: u64 = 0;

    loop {
        tick.tick().await;
        tick_count += 1;

        if chance(BROADCAST_PROBABILITY, tick_count) {
            let payload = serde_json::json!({
                "kind": "demo-broadcast",
                "n": broadcast_count,
                "ts": chrono::Utc::now().timestamp_millis(),
            })
            .to_string();
            broker.broadcast(payload).await;
            debug!(n = broadcast_count, "demo broadcast sent");
            broadcast_count += 1;
        }

        for identity in broker.identities().await {
            if chance(USER_PROBABILITY, tick_count ^ identity_salt(&identity)) {
                let payload = serde_json::json!({
                    "kind": "demo-individual",
                    "identity": identity,
                    "ts": chrono::Utc::now().timestamp_millis(),
                })
                .to_string();
                broker.send(identity.clone(), payload).await;
                debug!(identity = %identity, "demo user message sent");
            }
        }
    }
}

/// Bernoulli sample without a rand dependency. The wall-clock nanos are
/// scrambled SplitMix64-style together with a caller-supplied salt, so
/// samples taken within the same tick (one per connected identity) come
/// out independent rather than all-or-nothing.
fn chance(probability: f64, salt: u64) -> bool {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);

    let mut x = nanos ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^= x >> 31;

    ((x % 1_000_000_000) as f64) < probability * 1_000_000_000.0
}

fn identity_salt(identity: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    identity.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_probability_never_fires() {
        for salt in 0..100 {
            assert!(!chance(0.0, salt));
        }
    }

    #[test]
    fn full_probability_always_fires() {
        for salt in 0..100 {
            assert!(chance(1.0, salt));
        }
    }

    #[test]
    fn same_instant_samples_differ_across_salts() {
        // Different salts must not all land on the same side of the coin,
        // even when the clock barely moves between samples.
        let outcomes: Vec<bool> = (0..1000).map(|salt| chance(0.5, salt)).collect();
        assert!(outcomes.iter().any(|&fired| fired));
        assert!(outcomes.iter().any(|&fired| !fired));
    }

    #[test]
    fn identity_salt_is_stable_and_distinct() {
        assert_eq!(identity_salt("alice"), identity_salt("alice"));
        assert_ne!(identity_salt("alice"), identity_salt("bob"));
    }
}
