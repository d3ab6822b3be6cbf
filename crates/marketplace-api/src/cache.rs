/// Redis cache for normalized AI-assist results.
///
/// Operations degrade to misses when Redis is unavailable. Keys are namespaced
/// and hash the (already trimmed) user input:
/// - `pm:v1:assist:{kind}:{sha256(input)}`: JSON value (TTL: `ASSIST_TTL_SECS`)
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use marketplace_common::redis::RedisCache;

const KEY_PREFIX: &str = "pm:v1:";
const ASSIST_TTL_SECS: u64 = 3600;

#[derive(Clone)]
pub struct AssistCache {
    redis: RedisCache,
    ttl_secs: u64,
}

impl AssistCache {
    pub fn new(redis: RedisCache) -> Self {
        Self {
            redis,
            ttl_secs: ASSIST_TTL_SECS,
        }
    }

    pub async fn get(&self, kind: &str, input: &str) -> Option<Value> {
        let key = assist_key(kind, input);
        let json = self.redis.get(&key).await?;
        debug!(kind, "assist cache hit");
        serde_json::from_str(&json)
            .inspect_err(|e| warn!(error = %e, key = %key, "cache deserialization failed"))
            .ok()
    }

    pub async fn set(&self, kind: &str, input: &str, value: &Value) {
        let key = assist_key(kind, input);
        if let Ok(json) = serde_json::to_string(value) {
            self.redis.set_with_ttl(&key, &json, self.ttl_secs).await;
        }
    }
}

fn assist_key(kind: &str, input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let hash = hasher.finalize();
    format!("{KEY_PREFIX}assist:{kind}:{:x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_is_namespaced_and_stable() {
        let a = assist_key("suggestions", "iot garden");
        assert!(a.starts_with("pm:v1:assist:suggestions:"));
        assert_eq!(a, assist_key("suggestions", "iot garden"));
        assert_ne!(a, assist_key("websites", "iot garden"));
        assert_ne!(a, assist_key("suggestions", "iot gardens"));
    }

    #[tokio::test]
    async fn test_disabled_redis_misses() {
        let cache = AssistCache::new(RedisCache::disabled());
        cache.set("ideas", "ai", &json!([1])).await;
        assert!(cache.get("ideas", "ai").await.is_none());
    }
}
