use std::{future::Future, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use blogsy_api::{Cache, Mutation, Target};
use redis::{aio::ConnectionManager, AsyncCommands};

use crate::Error;

/// Redis-backed `Cache`
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> anyhow::Result<RedisCache> {
        let client =
            redis::Client::open(url).with_context(|| format!("parsing redis url {url:?}"))?;
        let conn = ConnectionManager::new(client)
            .await
            .with_context(|| format!("connecting to redis at {url:?}"))?;
        Ok(RedisCache { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key)
            .await
            .with_context(|| format!("reading cache key {key:?}"))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let seconds = usize::try_from(ttl.as_secs()).unwrap_or(usize::MAX);
        conn.set_ex::<_, _, ()>(key, value, seconds)
            .await
            .with_context(|| format!("writing cache key {key:?}"))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .with_context(|| format!("deleting cache key {key:?}"))
    }

    async fn delete_matching(&self, pattern: &str) -> anyhow::Result<()> {
        let mut scan_conn = self.conn.clone();
        let mut keys = Vec::new();
        {
            let mut iter = scan_conn
                .scan_match::<_, String>(pattern)
                .await
                .with_context(|| format!("scanning cache keys matching {pattern:?}"))?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&keys)
            .await
            .with_context(|| format!("deleting {} cache keys matching {pattern:?}", keys.len()))
    }
}

/// A JSON body that is already serialized, possibly straight out of the cache
#[derive(Debug)]
pub struct JsonBody(pub String);

impl JsonBody {
    pub fn new<T: serde::Serialize>(value: &T) -> Result<JsonBody, Error> {
        Ok(JsonBody(
            serde_json::to_string(value).context("serializing response body")?,
        ))
    }
}

impl IntoResponse for JsonBody {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, "application/json")], self.0).into_response()
    }
}

/// Returns the cached value of `key`, treating cache failures as misses
pub async fn lookup(cache: &dyn Cache, key: &str) -> Option<JsonBody> {
    match cache.get(key).await {
        Ok(Some(hit)) => {
            tracing::debug!(key, "cache hit");
            Some(JsonBody(hit))
        }
        Ok(None) => {
            tracing::debug!(key, "cache miss");
            None
        }
        Err(err) => {
            tracing::warn!(?err, key, "cache read failed, treating as a miss");
            None
        }
    }
}

/// Serializes `value` and stores it under `key`, cache failures being ignored
pub async fn fill<T: serde::Serialize>(
    cache: &dyn Cache,
    key: &str,
    ttl: Duration,
    value: &T,
) -> Result<JsonBody, Error> {
    let body = JsonBody::new(value)?;
    if let Err(err) = cache.set(key, &body.0, ttl).await {
        tracing::warn!(?err, key, "cache write failed");
    }
    Ok(body)
}

/// Serves `key` from the cache, or from `load` on a miss then caches the result
pub async fn read_through<T, F, Fut>(
    cache: &dyn Cache,
    key: &str,
    ttl: Duration,
    load: F,
) -> Result<JsonBody, Error>
where
    T: serde::Serialize,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    if let Some(hit) = lookup(cache, key).await {
        return Ok(hit);
    }
    let value = load().await?;
    fill(cache, key, ttl, &value).await
}

/// Drops everything `mutation` could have made stale
///
/// Failures are logged and otherwise ignored, stale entries then live until
/// their TTL runs out.
pub async fn invalidate(cache: &dyn Cache, mutation: Mutation<'_>) {
    for target in mutation.targets() {
        let res = match &target {
            Target::Key(key) => cache.delete(key).await,
            Target::Pattern(pattern) => cache.delete_matching(pattern).await,
        };
        match res {
            Ok(()) => tracing::debug!(?target, "invalidated cache"),
            Err(err) => tracing::warn!(?err, ?target, ?mutation, "cache invalidation failed"),
        }
    }
}
