//!  (A)utomatic (P)ersisted (Q)ueries cache.
//!
//!  For more information on APQ see:
//!  <https://www.apollographql.com/docs/apollo-server/performance/apq/>

use std::num::NonZeroUsize;

use http::StatusCode;
use serde::Deserialize;
use serde_json_bytes::json;
use sha2::Digest;
use sha2::Sha256;

use crate::cache::CacheStorage;
use crate::graphql;

/// A persisted query.
#[derive(Deserialize, Clone, Debug)]
struct PersistedQuery {
    version: u8,
    #[serde(rename = "sha256Hash")]
    sha256hash: String,
}

/// How a request was rejected by the APQ step.
#[derive(Debug)]
pub(crate) struct ApqRejection {
    pub(crate) status: StatusCode,
    pub(crate) error: graphql::Error,
}

#[derive(Clone)]
pub(crate) struct Apq {
    cache: CacheStorage<String, String>,
}

impl Apq {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: CacheStorage::new(capacity, "APQ"),
        }
    }

    /// Fills in `request.query` from the cache, or stores it for later hash-only requests.
    pub(crate) async fn apq_request(
        &self,
        request: &mut graphql::Request,
    ) -> Result<(), ApqRejection> {
        let Some(persisted_query) = request
            .extensions
            .get("persistedQuery")
            .and_then(|value| serde_json_bytes::from_value::<PersistedQuery>(value.clone()).ok())
        else {
            return Ok(());
        };

        if persisted_query.version != 1 {
            return Err(ApqRejection {
                status: StatusCode::BAD_REQUEST,
                error: graphql::Error::builder()
                    .message("Unsupported persisted query version")
                    .extension_code("PERSISTED_QUERY_UNSUPPORTED_VERSION")
                    .build(),
            });
        }

        let query_hash = persisted_query.sha256hash.to_ascii_lowercase();
        match &request.query {
            Some(query) => {
                if !hex::decode(query_hash.as_bytes())
                    .is_ok_and(|hash| query_matches_hash(query, &hash))
                {
                    tracing::debug!("apq: graphql request doesn't match provided sha256Hash");
                    return Err(ApqRejection {
                        status: StatusCode::BAD_REQUEST,
                        error: graphql::Error::builder()
                            .message("provided sha does not match query")
                            .extension_code("PERSISTED_QUERY_HASH_MISMATCH")
                            .build(),
                    });
                }
                tracing::trace!("apq: cache insert");
                self.cache.insert(query_hash, query.clone()).await;
                Ok(())
            }
            None => match self.cache.get(&query_hash).await {
                Some(cached_query) => {
                    tracing::trace!("apq: cache hit");
                    request.query = Some(cached_query);
                    Ok(())
                }
                None => {
                    tracing::trace!("apq: cache miss");
                    let mut error = graphql::Error::builder()
                        .message("PersistedQueryNotFound")
                        .extension_code("PERSISTED_QUERY_NOT_FOUND")
                        .build();
                    error.extensions.insert(
                        "exception",
                        json!({
                            "stacktrace": ["PersistedQueryNotFoundError: PersistedQueryNotFound"]
                        }),
                    );
                    Err(ApqRejection {
                        status: StatusCode::OK,
                        error,
                    })
                }
            },
        }
    }
}

fn query_matches_hash(query: &str, hash: &[u8]) -> bool {
    let mut digest = Sha256::new();
    digest.update(query.as_bytes());
    hash == digest.finalize().as_slice()
}
