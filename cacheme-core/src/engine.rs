//! # Engine
//!
//! [`CacheMe`] owns the store handle and every component built on it. It is
//! usually constructed once at startup and [installed](CacheMe::install) as
//! the process-wide engine used by the `#[cacheme]` attribute; it can also
//! be used directly without installing it.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CacheMeConfig;
use crate::context::CallContext;
use crate::error::{CacheError, Result};
use crate::events::{ChangeDispatcher, EntityChange};
use crate::invalidation::InvalidationIndex;
use crate::key_codec::KeyLayout;
use crate::manual::{InvalidationRecord, InvalidationRequest, ManualInvalidator};
use crate::pattern::PatternInvalidator;
use crate::policy::{CacheOptions, Memoized};
use crate::registry::TagRegistry;
use crate::store::{MemoryStore, Store};

static GLOBAL: OnceCell<CacheMe> = OnceCell::new();

/// The caching engine.
pub struct CacheMe {
    config: CacheMeConfig,
    store: Arc<dyn Store>,
    layout: KeyLayout,
    index: InvalidationIndex,
    registry: Arc<TagRegistry>,
    dispatcher: ChangeDispatcher,
    patterns: PatternInvalidator,
    manual: ManualInvalidator,
}

impl CacheMe {
    pub fn new(config: CacheMeConfig, store: impl Store + 'static) -> Self {
        Self::with_store(config, Arc::new(store))
    }

    /// Builds an engine on a store handle that may be shared elsewhere.
    pub fn with_store(config: CacheMeConfig, store: Arc<dyn Store>) -> Self {
        let layout = KeyLayout::new(config.prefix.clone());
        let index = InvalidationIndex::new(store.clone(), layout.clone())
            .with_entry_ttl(config.index_ttl());
        let registry = Arc::new(TagRegistry::new(store.clone(), layout.clone()));
        let dispatcher = ChangeDispatcher::new(index.clone());
        let patterns = PatternInvalidator::new(store.clone())
            .with_scan_count(config.scan_count)
            .with_batch_size(config.delete_batch_size);
        let manual = ManualInvalidator::new(
            store.clone(),
            layout.clone(),
            registry.clone(),
            patterns.clone(),
        );
        Self {
            config,
            store,
            layout,
            index,
            registry,
            dispatcher,
            patterns,
            manual,
        }
    }

    /// Builds an engine on the store the configuration asks for.
    ///
    /// With the `redis` feature enabled and `redis_url` set, connects to
    /// Redis; otherwise uses an in-process [`MemoryStore`].
    pub fn from_config(config: CacheMeConfig) -> Result<Self> {
        #[cfg(feature = "redis")]
        if let Some(url) = config.redis_url.clone() {
            let store = crate::store::RedisStore::connect(&url)?;
            tracing::info!(url = %url, prefix = %config.prefix, "cache engine using redis store");
            return Ok(Self::new(config, store));
        }

        #[cfg(not(feature = "redis"))]
        if config.redis_url.is_some() {
            tracing::warn!("redis_url is set but the `redis` feature is disabled, using memory store");
        }
        Ok(Self::new(config, MemoryStore::new()))
    }

    /// Makes this engine the process-wide engine.
    ///
    /// # Errors
    ///
    /// [`CacheError::AlreadyInstalled`] when an engine was installed before.
    pub fn install(self) -> Result<&'static CacheMe> {
        GLOBAL.set(self).map_err(|_| CacheError::AlreadyInstalled)?;
        GLOBAL.get().ok_or(CacheError::NotInstalled)
    }

    /// The installed engine, if any.
    pub fn global() -> Option<&'static CacheMe> {
        GLOBAL.get()
    }

    /// The installed engine, installing the one built by `init` if none is.
    pub fn get_or_install<F>(init: F) -> &'static CacheMe
    where
        F: FnOnce() -> CacheMe,
    {
        GLOBAL.get_or_init(init)
    }

    /// Registers a cached computation.
    ///
    /// # Errors
    ///
    /// [`CacheError::DuplicateTag`] when the tag is already taken.
    pub fn register<R, F>(
        &self,
        name: &str,
        options: CacheOptions<R>,
        computation: F,
    ) -> Result<Memoized<R, F>>
    where
        R: Serialize + DeserializeOwned + 'static,
        F: Fn(&CallContext) -> R,
    {
        let policy = options.build(self, name)?;
        Ok(Memoized::new(policy, computation))
    }

    /// Reports a data change, marking every dependent cache key stale.
    pub fn dispatch(&self, change: &EntityChange) -> Result<usize> {
        self.dispatcher.dispatch(change)
    }

    /// Fires one trigger key directly, bypassing source subscriptions.
    pub fn invalidate_key(&self, trigger: &str) -> Result<usize> {
        self.index.fire(trigger)
    }

    pub fn invalidate_tag(&self, tag: &str) -> Result<usize> {
        self.registry.invalidate_all(tag)
    }

    /// Deletes every store key matching `pattern`.
    pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        self.patterns.invalidate(pattern)
    }

    pub fn submit(&self, request: InvalidationRequest) -> Result<InvalidationRecord> {
        self.manual.submit(request)
    }

    pub fn config(&self) -> &CacheMeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    pub fn index(&self) -> &InvalidationIndex {
        &self.index
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &ChangeDispatcher {
        &self.dispatcher
    }

    pub fn manual(&self) -> &ManualInvalidator {
        &self.manual
    }
}

impl Default for CacheMe {
    fn default() -> Self {
        Self::new(CacheMeConfig::default(), MemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::__private::{run_cached, PolicyCell};
    use crate::events::{ChangeKind, ChangeSource};
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_prefix_from_config() {
        let config = CacheMeConfig {
            prefix: "APP".to_string(),
            ..CacheMeConfig::default()
        };
        let engine = CacheMe::new(config, MemoryStore::new());
        assert_eq!(engine.layout().pending_set(), "APP:delete");
    }

    #[test]
    fn test_register_subscribes_sources() {
        let engine = CacheMe::default();
        engine
            .register(
                "books",
                CacheOptions::new(|ctx| format!("Books:{}", ctx.text("user")))
                    .sources([ChangeSource::entity("Book")]),
                |_: &CallContext| vec![1u32, 2],
            )
            .unwrap();

        assert!(engine.dispatcher().is_subscribed("Book"));
        assert_eq!(engine.registry().list_tags(), vec!["books"]);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let engine = CacheMe::default();
        let first = engine.register(
            "a",
            CacheOptions::<u8>::default_key().tag("shared"),
            |_: &CallContext| 1u8,
        );
        assert!(first.is_ok());

        let second = engine.register(
            "b",
            CacheOptions::<u8>::default_key().tag("shared"),
            |_: &CallContext| 2u8,
        );
        assert!(matches!(second, Err(CacheError::DuplicateTag(tag)) if tag == "shared"));
    }

    #[test]
    fn test_unsubscribed_dispatch_is_noop() {
        let engine = CacheMe::default();
        let change = EntityChange::new("User", "User:1", ChangeKind::Updated);
        assert_eq!(engine.dispatch(&change).unwrap(), 0);
    }

    #[test]
    fn test_from_config_without_redis_uses_memory() {
        let engine = CacheMe::from_config(CacheMeConfig::default()).unwrap();
        engine.store().hash_set("k", "base", b"v").unwrap();
        assert_eq!(engine.store().hash_get("k", "base").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    #[serial]
    fn test_install_is_once_only() {
        let installed = CacheMe::get_or_install(CacheMe::default);
        assert!(std::ptr::eq(installed, CacheMe::global().unwrap()));
        assert!(matches!(
            CacheMe::default().install(),
            Err(CacheError::AlreadyInstalled)
        ));
    }

    #[test]
    #[serial]
    fn test_run_cached_registers_once_against_global() {
        static CELL: PolicyCell<u64> = PolicyCell::new();
        let engine = CacheMe::get_or_install(CacheMe::default);
        let runs = AtomicUsize::new(0);
        let options = || CacheOptions::new(|ctx: &CallContext| format!("Cube:{}", ctx.text("n")));

        for _ in 0..3 {
            let value = run_cached(
                &CELL,
                "cube",
                options,
                CallContext::new().with("n", &3),
                |ctx: &CallContext| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    ctx.arg::<u64>("n").unwrap_or_default().pow(3)
                },
            );
            assert_eq!(value, 27);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(engine.registry().contains("cube"));
    }

    #[test]
    #[serial]
    fn test_run_cached_name_clash_runs_uncached() {
        static FIRST: PolicyCell<u32> = PolicyCell::new();
        static SECOND: PolicyCell<u32> = PolicyCell::new();
        CacheMe::get_or_install(CacheMe::default);
        let runs = AtomicUsize::new(0);
        let options = || CacheOptions::new(|ctx: &CallContext| format!("Clash:{}", ctx.text("n")));
        let compute = |_: &CallContext| {
            runs.fetch_add(1, Ordering::SeqCst);
            5u32
        };

        for _ in 0..2 {
            let ctx = CallContext::new().with("n", &1);
            assert_eq!(run_cached(&FIRST, "clash", options, ctx, compute), 5);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        for _ in 0..2 {
            let ctx = CallContext::new().with("n", &2);
            assert_eq!(run_cached(&SECOND, "clash", options, ctx, compute), 5);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(matches!(SECOND.get(), Some(None)));
    }
}
