//! Wrapping model calls with the cache
//!
//! [`cached_response`] is the usual entry point for the model client: it
//! answers from the cache when it can and otherwise awaits the real call and
//! stores what came back.

use crate::cache::{
    manager::AiCache,
    types::{CacheValue, Metadata},
};
use serde_json::{Map, Value};
use std::future::Future;

/// Everything that identifies one model request
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRequest {
    prompt: String,
    params: Value,
    context: Option<Value>,
    metadata: Metadata,
}

impl CacheRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            params: Value::Object(Map::new()),
            context: None,
            metadata: Metadata::new(),
        }
    }

    /// Replace all model parameters
    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Set a single model parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.params.is_object() {
            self.params = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.params {
            map.insert(name.into(), value.into());
        }
        self
    }

    /// Game context folded into the key (scene, character, ...)
    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Metadata stored alongside the response
    pub fn metadata(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn model_params(&self) -> &Value {
        &self.params
    }

    pub fn game_context(&self) -> Option<&Value> {
        self.context.as_ref()
    }

    /// Look this request up in `cache`
    pub fn lookup(&self, cache: &AiCache) -> Option<CacheValue> {
        cache.get(&self.prompt, &self.params, self.context.as_ref())
    }

    /// Store `response` for this request in `cache`
    pub fn store(&self, cache: &AiCache, response: CacheValue) {
        let metadata = (!self.metadata.is_empty()).then(|| self.metadata.clone());
        cache.put(&self.prompt, &self.params, response, self.context.as_ref(), metadata);
    }
}

/// Whether a model result is worth keeping
pub fn is_cacheable(value: &CacheValue) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Answer `request` from `cache`, falling back to `call` on a miss.
///
/// A successful non-empty result is stored before it is returned. Errors
/// from `call` are passed through untouched and never cached. With a
/// disabled cache `call` is simply awaited.
pub async fn cached_response<F, Fut, E>(
    cache: &AiCache,
    request: &CacheRequest,
    call: F,
) -> std::result::Result<CacheValue, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<CacheValue, E>>,
{
    if !cache.is_enabled() {
        return call().await;
    }

    if let Some(cached) = request.lookup(cache) {
        return Ok(cached);
    }

    let response = call().await?;
    if is_cacheable(&response) {
        request.store(cache, response.clone());
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn interrogation() -> CacheRequest {
        CacheRequest::new("Where were you at midnight?")
            .param("temperature", 0.7)
            .param("max_tokens", 120)
            .context(json!({"character": "gardener", "scene": 3}))
    }

    #[test]
    fn test_request_builder() {
        let request = interrogation().metadata("model", "gpt-4");

        assert_eq!(request.prompt(), "Where were you at midnight?");
        assert_eq!(request.model_params()["max_tokens"], json!(120));
        assert_eq!(request.game_context().unwrap()["scene"], json!(3));

        let replaced = CacheRequest::new("p").params(json!("bogus")).param("top_p", 1);
        assert_eq!(replaced.model_params(), &json!({"top_p": 1}));
    }

    #[test]
    fn test_lookup_and_store() {
        let cache = AiCache::new(CacheConfig::memory_only());
        let request = interrogation();

        assert!(request.lookup(&cache).is_none());
        request.store(&cache, json!("In the greenhouse."));
        assert_eq!(request.lookup(&cache), Some(json!("In the greenhouse.")));

        // Same request built directly against the cache API
        let params = json!({"max_tokens": 120, "temperature": 0.7});
        let context = json!({"scene": 3, "character": "gardener"});
        assert!(cache
            .get("Where were you at midnight?", &params, Some(&context))
            .is_some());
    }

    #[test]
    fn test_is_cacheable() {
        assert!(!is_cacheable(&json!(null)));
        assert!(!is_cacheable(&json!("")));
        assert!(is_cacheable(&json!("text")));
        assert!(is_cacheable(&json!({"reply": "x"})));
        assert!(is_cacheable(&json!(0)));
    }

    #[tokio::test]
    async fn test_cached_response_calls_once() {
        let cache = AiCache::new(CacheConfig::memory_only());
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let request = interrogation();

        for _ in 0..3 {
            let response = cached_response(&cache, &request, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(json!("In the greenhouse."))
            })
            .await
            .unwrap();
            assert_eq!(response, json!("In the greenhouse."));
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get_statistics().hits, 2);
    }

    #[tokio::test]
    async fn test_cached_response_disabled_always_calls() {
        let cache = AiCache::new(CacheConfig::disabled());
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let request = interrogation();

        for _ in 0..2 {
            cached_response(&cache, &request, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(json!("answer"))
            })
            .await
            .unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get_statistics().misses, 0);
    }

    #[tokio::test]
    async fn test_empty_results_not_stored() {
        let cache = AiCache::new(CacheConfig::memory_only());
        let request = interrogation();

        let response = cached_response(&cache, &request, || async { Ok::<_, String>(json!("")) })
            .await
            .unwrap();

        assert_eq!(response, json!(""));
        assert_eq!(cache.get_statistics().stores, 0);
        assert!(request.lookup(&cache).is_none());
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let cache = AiCache::new(CacheConfig::memory_only());
        let request = interrogation();

        let result = cached_response(&cache, &request, || async {
            Err::<CacheValue, _>("rate limited".to_string())
        })
        .await;

        assert_eq!(result, Err("rate limited".to_string()));
        assert_eq!(cache.get_statistics().stores, 0);
    }
}
