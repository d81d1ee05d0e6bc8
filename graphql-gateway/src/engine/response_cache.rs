//! Whole-response cache for queries whose cache hints allow shared caching.

use std::time::Duration;

use bytes::Bytes;

use crate::cache::CacheStorage;
use crate::cache::hash_key;
use crate::configuration::ResponseCache as ResponseCacheConfig;
use crate::execution::CachePolicy;
use crate::json_ext::Object;

const RESPONSE_CACHE_VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CachedResponse {
    pub(crate) body: Bytes,
    pub(crate) cache_control: String,
}

#[derive(Clone)]
pub(crate) struct ResponseCache {
    storage: CacheStorage<String, CachedResponse>,
}

impl ResponseCache {
    /// `None` when response caching is disabled.
    pub(crate) fn new(configuration: &ResponseCacheConfig) -> Option<Self> {
        configuration.enabled.then(|| Self {
            storage: CacheStorage::new(configuration.capacity, "response"),
        })
    }

    pub(crate) fn key(query: &str, operation_name: Option<&str>, variables: &Object) -> String {
        let variables = sorted_variables(variables);
        let hash = hash_key([
            operation_name.unwrap_or_default().as_bytes(),
            query.as_bytes(),
            variables.as_slice(),
        ]);
        format!("version:{RESPONSE_CACHE_VERSION}:hash:{hash}")
    }

    pub(crate) async fn get(&self, key: &String) -> Option<CachedResponse> {
        let cached = self.storage.get(key).await;
        tracing::trace!(hit = cached.is_some(), "response cache lookup");
        cached
    }

    /// Stores `body` if `policy` allows shared caching. Returns whether it was stored.
    pub(crate) async fn store(&self, key: String, body: Bytes, policy: &CachePolicy) -> bool {
        let (Some(max_age), Some(cache_control)) = (policy.public_max_age(), policy.header_value())
        else {
            return false;
        };
        self.storage
            .insert_with_ttl(
                key,
                CachedResponse {
                    body,
                    cache_control,
                },
                Duration::from_secs(max_age.into()),
            )
            .await;
        true
    }
}

fn sorted_variables(variables: &Object) -> Vec<u8> {
    let mut entries: Vec<_> = variables.iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()));
    serde_json::to_vec(&entries).unwrap_or_default()
}
