//! # Cache policies and the invocation pipeline
//!
//! A [`CachePolicy`] describes how one computation is cached: how its key is
//! built, which trigger keys invalidate it, its tag, skip rule, TTL and
//! hooks. Every call goes through the same pipeline:
//!
//! 1. **Skip**: when the engine is disabled or the skip rule applies, the
//!    computation runs and the store is never touched.
//! 2. **Key**: `prefix + key(ctx)`.
//! 3. **Stale check**: the key is atomically removed from the pending-delete
//!    set. If it was there, the computation runs and its result replaces the
//!    stored value.
//! 4. **Read**: a stored, decodable value is returned (hit hook first).
//! 5. **Miss**: the miss hook runs, then the computation, then the result is
//!    persisted and linked into the invalidation index.
//!
//! A write that fails part way leaves the key in the pending-delete set, so
//! whatever the store still holds under it is recomputed on the next read.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use cacheme_core::{CacheMe, CacheMeConfig, CacheOptions, CallContext, MemoryStore};
//!
//! static RUNS: AtomicUsize = AtomicUsize::new(0);
//!
//! let engine = CacheMe::new(CacheMeConfig::default(), MemoryStore::new());
//! let profile = engine
//!     .register(
//!         "profile",
//!         CacheOptions::new(|ctx| format!("User:{}", ctx.text("id")))
//!             .invalidation_keys(|ctx| format!("User:{}", ctx.text("id"))),
//!         |ctx: &CallContext| {
//!             RUNS.fetch_add(1, Ordering::SeqCst);
//!             format!("profile of {}", ctx.text("id"))
//!         },
//!     )
//!     .unwrap();
//!
//! let ctx = CallContext::new().with("id", &1);
//! assert_eq!(profile.call(ctx.clone()).unwrap(), "profile of 1");
//! assert_eq!(profile.call(ctx).unwrap(), "profile of 1");
//! assert_eq!(RUNS.load(Ordering::SeqCst), 1);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::StoreErrorPolicy;
use crate::context::CallContext;
use crate::engine::CacheMe;
use crate::error::{CacheError, Result};
use crate::events::ChangeSource;
use crate::invalidation::InvalidationIndex;
use crate::key_codec::{self, KeyLayout};
use crate::registry::TaggedPolicy;
use crate::store::Store;
use crate::trigger::TriggerKeys;
#[cfg(feature = "stats")]
use crate::CacheStats;

/// Builds the variable part of a cache key from the call context.
pub type KeyFn = Arc<dyn Fn(&CallContext) -> String + Send + Sync>;

/// Builds the trigger keys a cached value depends on.
pub type TriggerFn = Arc<dyn Fn(&CallContext) -> TriggerKeys + Send + Sync>;

/// Called with the key, the stored value and the context on every hit.
pub type HitHook<R> = Arc<dyn Fn(&str, &R, &CallContext) + Send + Sync>;

/// Called with the key and the context before a miss is computed.
pub type MissHook = Arc<dyn Fn(&str, &CallContext) + Send + Sync>;

/// Whether a call bypasses the cache.
#[derive(Clone, Default)]
pub enum Skip {
    Always,
    #[default]
    Never,
    /// Bypass whenever the predicate returns `true`.
    When(Arc<dyn Fn(&CallContext) -> bool + Send + Sync>),
}

impl Skip {
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&CallContext) -> bool + Send + Sync + 'static,
    {
        Skip::When(Arc::new(predicate))
    }

    pub fn applies(&self, ctx: &CallContext) -> bool {
        match self {
            Skip::Always => true,
            Skip::Never => false,
            Skip::When(predicate) => predicate(ctx),
        }
    }
}

impl From<bool> for Skip {
    fn from(skip: bool) -> Self {
        if skip {
            Skip::Always
        } else {
            Skip::Never
        }
    }
}

impl fmt::Debug for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::Always => f.write_str("Always"),
            Skip::Never => f.write_str("Never"),
            Skip::When(_) => f.write_str("When(..)"),
        }
    }
}

/// Options of a cached computation, turned into a [`CachePolicy`] when the
/// computation is registered.
pub struct CacheOptions<R> {
    key: Option<KeyFn>,
    invalidation_keys: Option<TriggerFn>,
    sources: Vec<ChangeSource>,
    tag: Option<String>,
    skip: Skip,
    ttl: Option<Duration>,
    on_hit: Option<HitHook<R>>,
    on_miss: Option<MissHook>,
}

impl<R> CacheOptions<R> {
    /// Options keyed by `key`. The engine prefix is prepended to its output.
    pub fn new<F>(key: F) -> Self
    where
        F: Fn(&CallContext) -> String + Send + Sync + 'static,
    {
        Self {
            key: Some(Arc::new(key)),
            ..Self::default_key()
        }
    }

    /// Options keyed by the computation name followed by every argument
    /// encoded as JSON, as in `name:[1,"ada"]`. Calls with an argument that
    /// cannot be encoded run uncached.
    pub fn default_key() -> Self {
        Self {
            key: None,
            invalidation_keys: None,
            sources: Vec::new(),
            tag: None,
            skip: Skip::Never,
            ttl: None,
            on_hit: None,
            on_miss: None,
        }
    }

    /// Trigger keys whose changes invalidate the cached value. The builder
    /// runs after the computation, so [`CallContext::result`] is available.
    pub fn invalidation_keys<F, K>(mut self, builder: F) -> Self
    where
        F: Fn(&CallContext) -> K + Send + Sync + 'static,
        K: Into<TriggerKeys>,
    {
        self.invalidation_keys = Some(Arc::new(move |ctx: &CallContext| builder(ctx).into()));
        self
    }

    /// Change sources the engine must listen to for this computation.
    pub fn sources(mut self, sources: impl IntoIterator<Item = ChangeSource>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// Tag the cached keys are recorded under. Defaults to the computation name.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn skip(mut self, skip: impl Into<Skip>) -> Self {
        self.skip = skip.into();
        self
    }

    /// Expiry of the whole bucket the key is stored in, refreshed on write.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn on_hit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &R, &CallContext) + Send + Sync + 'static,
    {
        self.on_hit = Some(Arc::new(hook));
        self
    }

    pub fn on_miss<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &CallContext) + Send + Sync + 'static,
    {
        self.on_miss = Some(Arc::new(hook));
        self
    }

    /// Builds the policy for `name` and registers it with `engine`.
    ///
    /// # Errors
    ///
    /// [`CacheError::DuplicateTag`] when the tag is already registered.
    pub fn build(self, engine: &CacheMe, name: &str) -> Result<Arc<CachePolicy<R>>>
    where
        R: Serialize + DeserializeOwned + 'static,
    {
        let keyed_by_arguments = self.key.is_none();
        let key = self.key.unwrap_or_else(|| {
            let name = name.to_string();
            Arc::new(move |ctx: &CallContext| format!("{}:{}", name, ctx.fingerprint()))
        });
        let config = engine.config();
        let policy = Arc::new(CachePolicy {
            name: name.to_string(),
            tag: self.tag.unwrap_or_else(|| name.to_string()),
            key,
            keyed_by_arguments,
            invalidation_keys: self.invalidation_keys,
            skip: self.skip,
            ttl: self.ttl,
            on_hit: self.on_hit,
            on_miss: self.on_miss,
            enabled: config.enabled,
            on_store_error: config.on_store_error,
            store: engine.store().clone(),
            layout: engine.layout().clone(),
            index: engine.index().clone(),
            #[cfg(feature = "stats")]
            stats: CacheStats::new(),
        });

        engine.registry().register(policy.clone())?;
        for source in &self.sources {
            engine.dispatcher().subscribe(source);
        }
        Ok(policy)
    }
}

/// How one computation is cached. Created once per computation and shared
/// by every call.
pub struct CachePolicy<R> {
    name: String,
    tag: String,
    key: KeyFn,
    /// The key is the name plus [`CallContext::fingerprint`].
    keyed_by_arguments: bool,
    invalidation_keys: Option<TriggerFn>,
    skip: Skip,
    ttl: Option<Duration>,
    on_hit: Option<HitHook<R>>,
    on_miss: Option<MissHook>,
    enabled: bool,
    on_store_error: StoreErrorPolicy,
    store: Arc<dyn Store>,
    layout: KeyLayout,
    index: InvalidationIndex,
    #[cfg(feature = "stats")]
    stats: CacheStats,
}

impl<R> CachePolicy<R>
where
    R: Serialize + DeserializeOwned,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Full cache key a call with `ctx` reads and writes.
    pub fn cache_key(&self, ctx: &CallContext) -> String {
        self.layout.cache_key(&(self.key)(ctx))
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Runs the pipeline for one call.
    ///
    /// Store failures follow the engine's `on_store_error` setting: they are
    /// returned as [`CacheError::Store`], or logged and bypassed.
    pub fn call<F>(&self, mut ctx: CallContext, compute: F) -> Result<R>
    where
        F: FnOnce(&CallContext) -> R,
    {
        let fail_open = self.on_store_error == StoreErrorPolicy::Bypass;
        let step = match self.resolve(&ctx) {
            Ok(step) => step,
            Err(err) if fail_open => {
                self.bypassed(None, &err);
                Step::Bypass
            }
            Err(err) => return Err(err),
        };
        match self.produce(step, &ctx, compute) {
            Produced::Ready(value) => Ok(value),
            Produced::Fresh(key, value) => match self.persist(&key, &mut ctx, &value) {
                Ok(()) => Ok(value),
                Err(err) => {
                    self.restore_pending(&key);
                    if fail_open {
                        self.bypassed(Some(&key), &err);
                        Ok(value)
                    } else {
                        Err(err)
                    }
                }
            },
        }
    }

    /// Runs the pipeline without ever failing: store errors are logged and
    /// the computed result is returned uncached.
    pub fn get_or_compute<F>(&self, mut ctx: CallContext, compute: F) -> R
    where
        F: FnOnce(&CallContext) -> R,
    {
        let step = self.resolve(&ctx).unwrap_or_else(|err| {
            self.bypassed(None, &err);
            Step::Bypass
        });
        match self.produce(step, &ctx, compute) {
            Produced::Ready(value) => value,
            Produced::Fresh(key, value) => {
                if let Err(err) = self.persist(&key, &mut ctx, &value) {
                    self.restore_pending(&key);
                    self.bypassed(Some(&key), &err);
                }
                value
            }
        }
    }

    /// Decides what the call will do, touching the store as needed.
    fn resolve(&self, ctx: &CallContext) -> Result<Step<R>> {
        if !self.enabled || self.skip.applies(ctx) {
            return Ok(Step::Skip);
        }
        if self.keyed_by_arguments && !ctx.unbound().is_empty() {
            // Unencodable arguments all read as null and would share one key
            tracing::debug!(
                policy = %self.name,
                unbound = ?ctx.unbound(),
                "arguments cannot be encoded into the key, running uncached"
            );
            return Ok(Step::Skip);
        }

        let key = self.cache_key(ctx);
        if self.index.take_pending(&key)? {
            return Ok(Step::Stale(key));
        }

        let (bucket, field) = key_codec::split(&key);
        let Some(bytes) = self.store.hash_get(bucket, field)? else {
            return Ok(Step::Miss(key));
        };
        match serde_json::from_slice::<R>(&bytes) {
            Ok(value) => Ok(Step::Hit(key, value)),
            Err(err) => {
                tracing::warn!(
                    policy = %self.name,
                    key = %key,
                    error = %err,
                    "stored value could not be decoded, recomputing"
                );
                Ok(Step::Miss(key))
            }
        }
    }

    fn produce<F>(&self, step: Step<R>, ctx: &CallContext, compute: F) -> Produced<R>
    where
        F: FnOnce(&CallContext) -> R,
    {
        match step {
            Step::Skip => {
                #[cfg(feature = "stats")]
                self.stats.record_skip();
                Produced::Ready(compute(ctx))
            }
            Step::Bypass => Produced::Ready(compute(ctx)),
            Step::Hit(key, value) => {
                #[cfg(feature = "stats")]
                self.stats.record_hit();
                if let Some(hook) = &self.on_hit {
                    hook(&key, &value, ctx);
                }
                Produced::Ready(value)
            }
            Step::Stale(key) => {
                #[cfg(feature = "stats")]
                self.stats.record_stale();
                tracing::debug!(policy = %self.name, key = %key, "recomputing stale cache entry");
                let value = compute(ctx);
                Produced::Fresh(key, value)
            }
            Step::Miss(key) => {
                #[cfg(feature = "stats")]
                self.stats.record_miss();
                if let Some(hook) = &self.on_miss {
                    hook(&key, ctx);
                }
                let started = Instant::now();
                let value = compute(ctx);
                tracing::debug!(
                    policy = %self.name,
                    key = %key,
                    elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "computed cache miss"
                );
                Produced::Fresh(key, value)
            }
        }
    }

    /// Stores a freshly computed value and registers its trigger keys.
    fn persist(&self, key: &str, ctx: &mut CallContext, value: &R) -> Result<()> {
        let encode = |source| CacheError::Encode {
            key: key.to_string(),
            source,
        };
        let encoded = serde_json::to_value(value).map_err(encode)?;
        let bytes = serde_json::to_vec(&encoded).map_err(encode)?;

        self.store
            .set_add(&self.layout.tag_set(&self.tag), &[key.to_string()])?;
        let (bucket, field) = key_codec::split(key);
        self.store.hash_set(bucket, field, &bytes)?;
        if let Some(ttl) = self.ttl {
            self.store.expire(bucket, ttl)?;
        }

        if let Some(builder) = &self.invalidation_keys {
            ctx.set_result(encoded);
            let triggers = builder(ctx).flatten();
            self.index.link_all(&triggers, key)?;
        }
        Ok(())
    }

    /// Marks `key` stale again after a failed [`persist`](Self::persist).
    ///
    /// The write may have left the previous value, or a new value without its
    /// trigger links, in the store. Either way the next read must recompute.
    fn restore_pending(&self, key: &str) {
        if let Err(err) = self.index.mark_stale([key.to_string()]) {
            tracing::warn!(
                policy = %self.name,
                key,
                error = %err,
                "could not mark cache entry stale after a failed write"
            );
        }
    }

    fn bypassed(&self, key: Option<&str>, err: &CacheError) {
        tracing::warn!(
            policy = %self.name,
            key = key.unwrap_or_default(),
            error = %err,
            "cache store failed, returning uncached result"
        );
    }
}

enum Step<R> {
    Skip,
    /// The store failed before the lookup finished.
    Bypass,
    Hit(String, R),
    Stale(String),
    Miss(String),
}

enum Produced<R> {
    /// Nothing to store.
    Ready(R),
    /// Computed for `key`; must be persisted.
    Fresh(String, R),
}

impl<R> TaggedPolicy for CachePolicy<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    #[cfg(feature = "stats")]
    fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

impl<R> fmt::Debug for CachePolicy<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePolicy")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("skip", &self.skip)
            .field("ttl", &self.ttl)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// A computation bound to its cache policy, returned by
/// [`CacheMe::register`].
pub struct Memoized<R, F> {
    policy: Arc<CachePolicy<R>>,
    computation: F,
}

impl<R, F> Memoized<R, F>
where
    R: Serialize + DeserializeOwned,
    F: Fn(&CallContext) -> R,
{
    pub(crate) fn new(policy: Arc<CachePolicy<R>>, computation: F) -> Self {
        Self {
            policy,
            computation,
        }
    }

    /// Calls the computation through the cache.
    pub fn call(&self, ctx: CallContext) -> Result<R> {
        self.policy.call(ctx, &self.computation)
    }

    pub fn policy(&self) -> &Arc<CachePolicy<R>> {
        &self.policy
    }
}
