//! Fallback cache provider
//!
//! Composes a primary and a secondary backend (typically Redis over SQLite)
//! and routes every operation to whichever side currently works. A primary
//! failure flips routing to the secondary and the in-flight operation is
//! retried there once; the primary is re-probed lazily at a configurable
//! interval. The composite favors availability over strict consistency:
//! writes made during an outage may never reach the other store, and no
//! reconciliation job runs.

use crate::cache::traits::CacheProvider;
use crate::cache::CacheStats;
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Which side of the composite currently serves operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveBackend {
    Primary,
    Secondary,
}

/// Routing state; the mutex is held only for decisions and flag flips,
/// never across backend I/O
struct RouteState {
    active: ActiveBackend,
    /// Monotonic clock for retry arithmetic, wall clock for reporting
    failed_at: Option<(Instant, SystemTime)>,
}

/// Primary/secondary composite with automatic failover and recovery
pub struct FallbackCacheProvider {
    primary: Arc<dyn CacheProvider>,
    secondary: Arc<dyn CacheProvider>,
    retry_primary: Duration,
    state: Mutex<RouteState>,
}

impl FallbackCacheProvider {
    /// Wrap `primary` and `secondary`; probes the primary immediately and
    /// starts on the secondary if it is already down
    pub async fn new(
        primary: Arc<dyn CacheProvider>,
        secondary: Arc<dyn CacheProvider>,
        retry_primary: Duration,
    ) -> Self {
        let active = if primary.health_check().await {
            ActiveBackend::Primary
        } else {
            log::warn!(
                "primary cache backend '{}' unhealthy at startup, starting on '{}'",
                primary.name(),
                secondary.name()
            );
            ActiveBackend::Secondary
        };

        let failed_at = (active == ActiveBackend::Secondary)
            .then(|| (Instant::now(), SystemTime::now()));

        Self {
            primary,
            secondary,
            retry_primary,
            state: Mutex::new(RouteState { active, failed_at }),
        }
    }

    fn provider(&self, which: ActiveBackend) -> &Arc<dyn CacheProvider> {
        match which {
            ActiveBackend::Primary => &self.primary,
            ActiveBackend::Secondary => &self.secondary,
        }
    }

    /// Decide which backend serves the next operation
    ///
    /// On the secondary, once `retry_primary` has elapsed since the last
    /// failure the primary is re-probed. A failed probe re-arms the full
    /// interval; retries never tighten under sustained failure.
    async fn select_backend(&self) -> ActiveBackend {
        let probe_due = {
            let state = self.state.lock();
            match state.active {
                ActiveBackend::Primary => return ActiveBackend::Primary,
                ActiveBackend::Secondary => state
                    .failed_at
                    .is_none_or(|(at, _)| at.elapsed() >= self.retry_primary),
            }
        };

        if !probe_due {
            return ActiveBackend::Secondary;
        }

        if self.primary.health_check().await {
            log::info!(
                "primary cache backend '{}' recovered, switching back",
                self.primary.name()
            );
            let mut state = self.state.lock();
            state.active = ActiveBackend::Primary;
            state.failed_at = None;
            ActiveBackend::Primary
        } else {
            let mut state = self.state.lock();
            state.failed_at = Some((Instant::now(), SystemTime::now()));
            ActiveBackend::Secondary
        }
    }

    /// Flip routing to the secondary after a primary operation failed
    fn mark_primary_failed(&self) {
        let mut state = self.state.lock();
        state.active = ActiveBackend::Secondary;
        state.failed_at = Some((Instant::now(), SystemTime::now()));
    }

    fn primary_nominally_active(&self) -> bool {
        self.state.lock().active == ActiveBackend::Primary
    }

    /// Best-effort mirror of a secondary-served write back to the primary,
    /// only when routing already points at the primary again
    async fn mirror_set(&self, text_hash: &str, embedding: &[f32], model: &str) {
        if !self.primary_nominally_active() {
            return;
        }
        if let Err(e) = self.primary.set(text_hash, embedding, model).await {
            log::debug!("mirror write to primary failed: {e}");
        }
    }

    async fn mirror_set_batch(&self, entries: &[(String, Vec<f32>)], model: &str) {
        if !self.primary_nominally_active() {
            return;
        }
        if let Err(e) = self.primary.set_batch(entries, model).await {
            log::debug!("mirror batch write to primary failed: {e}");
        }
    }
}

#[async_trait]
impl CacheProvider for FallbackCacheProvider {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn get(&self, text_hash: &str, model: &str) -> Result<Option<Vec<f32>>> {
        let which = self.select_backend().await;
        match self.provider(which).get(text_hash, model).await {
            Ok(value) => Ok(value),
            Err(e) if which == ActiveBackend::Primary => {
                log::warn!(
                    "primary cache backend '{}' failed on get: {e}, switching to '{}'",
                    self.primary.name(),
                    self.secondary.name()
                );
                self.mark_primary_failed();
                match self.secondary.get(text_hash, model).await {
                    Ok(value) => Ok(value),
                    Err(e) => {
                        log::warn!("secondary cache backend also failed on get: {e}");
                        Ok(None)
                    }
                }
            }
            Err(e) => {
                log::warn!("secondary cache backend failed on get: {e}");
                Ok(None)
            }
        }
    }

    async fn set(&self, text_hash: &str, embedding: &[f32], model: &str) -> Result<bool> {
        let which = self.select_backend().await;
        match self.provider(which).set(text_hash, embedding, model).await {
            Ok(written) => {
                if which == ActiveBackend::Secondary && written {
                    self.mirror_set(text_hash, embedding, model).await;
                }
                Ok(written)
            }
            Err(e) if which == ActiveBackend::Primary => {
                log::warn!(
                    "primary cache backend '{}' failed on set: {e}, switching to '{}'",
                    self.primary.name(),
                    self.secondary.name()
                );
                self.mark_primary_failed();
                match self.secondary.set(text_hash, embedding, model).await {
                    Ok(written) => {
                        if written {
                            self.mirror_set(text_hash, embedding, model).await;
                        }
                        Ok(written)
                    }
                    Err(e) => {
                        log::warn!("secondary cache backend also failed on set: {e}");
                        Ok(false)
                    }
                }
            }
            Err(e) => {
                log::warn!("secondary cache backend failed on set: {e}");
                Ok(false)
            }
        }
    }

    async fn get_batch(
        &self,
        text_hashes: &[String],
        model: &str,
    ) -> Result<HashMap<String, Vec<f32>>> {
        let which = self.select_backend().await;
        match self.provider(which).get_batch(text_hashes, model).await {
            Ok(found) => Ok(found),
            Err(e) if which == ActiveBackend::Primary => {
                log::warn!(
                    "primary cache backend '{}' failed on get_batch: {e}, switching to '{}'",
                    self.primary.name(),
                    self.secondary.name()
                );
                self.mark_primary_failed();
                match self.secondary.get_batch(text_hashes, model).await {
                    Ok(found) => Ok(found),
                    Err(e) => {
                        log::warn!("secondary cache backend also failed on get_batch: {e}");
                        Ok(HashMap::new())
                    }
                }
            }
            Err(e) => {
                log::warn!("secondary cache backend failed on get_batch: {e}");
                Ok(HashMap::new())
            }
        }
    }

    async fn set_batch(&self, entries: &[(String, Vec<f32>)], model: &str) -> Result<usize> {
        let which = self.select_backend().await;
        match self.provider(which).set_batch(entries, model).await {
            Ok(written) => {
                if which == ActiveBackend::Secondary && written > 0 {
                    self.mirror_set_batch(entries, model).await;
                }
                Ok(written)
            }
            Err(e) if which == ActiveBackend::Primary => {
                log::warn!(
                    "primary cache backend '{}' failed on set_batch: {e}, switching to '{}'",
                    self.primary.name(),
                    self.secondary.name()
                );
                self.mark_primary_failed();
                match self.secondary.set_batch(entries, model).await {
                    Ok(written) => {
                        if written > 0 {
                            self.mirror_set_batch(entries, model).await;
                        }
                        Ok(written)
                    }
                    Err(e) => {
                        log::warn!("secondary cache backend also failed on set_batch: {e}");
                        Ok(0)
                    }
                }
            }
            Err(e) => {
                log::warn!("secondary cache backend failed on set_batch: {e}");
                Ok(0)
            }
        }
    }

    async fn delete(&self, text_hash: &str, model: &str) -> Result<bool> {
        // Remove from both sides regardless of routing, so a later role
        // flip cannot resurrect a stale entry.
        let primary_removed = match self.primary.delete(text_hash, model).await {
            Ok(removed) => removed,
            Err(e) => {
                log::warn!("primary cache backend failed on delete: {e}");
                if self.primary_nominally_active() {
                    self.mark_primary_failed();
                }
                false
            }
        };

        let secondary_removed = match self.secondary.delete(text_hash, model).await {
            Ok(removed) => removed,
            Err(e) => {
                log::warn!("secondary cache backend failed on delete: {e}");
                false
            }
        };

        Ok(primary_removed || secondary_removed)
    }

    async fn clear(&self) -> Result<u64> {
        let mut removed = 0;

        match self.primary.clear().await {
            Ok(count) => removed += count,
            Err(e) => log::warn!("primary cache backend failed on clear: {e}"),
        }
        match self.secondary.clear().await {
            Ok(count) => removed += count,
            Err(e) => log::warn!("secondary cache backend failed on clear: {e}"),
        }

        Ok(removed)
    }

    async fn cleanup(&self, max_age_days: Option<u32>, max_entries: Option<u64>) -> Result<u64> {
        let mut removed = 0;

        match self.primary.cleanup(max_age_days, max_entries).await {
            Ok(count) => removed += count,
            Err(e) => log::warn!("primary cache backend failed on cleanup: {e}"),
        }
        match self.secondary.cleanup(max_age_days, max_entries).await {
            Ok(count) => removed += count,
            Err(e) => log::warn!("secondary cache backend failed on cleanup: {e}"),
        }

        Ok(removed)
    }

    async fn get_stats(&self) -> CacheStats {
        let (active, fallback_mode, next_retry) = {
            let state = self.state.lock();
            let next_retry = state
                .failed_at
                .map(|(_, wall)| wall + self.retry_primary);
            (
                state.active,
                state.active == ActiveBackend::Secondary,
                next_retry,
            )
        };

        let (serving, standby) = match active {
            ActiveBackend::Primary => (&self.primary, &self.secondary),
            ActiveBackend::Secondary => (&self.secondary, &self.primary),
        };

        let mut stats = serving.get_stats().await;
        stats
            .extra_info
            .insert("fallback_mode".to_string(), fallback_mode.to_string());
        stats
            .extra_info
            .insert("active_backend".to_string(), serving.name().to_string());
        stats
            .extra_info
            .insert("standby_backend".to_string(), standby.name().to_string());

        if fallback_mode && let Some(next_retry) = next_retry {
            let unix_seconds = next_retry
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            stats
                .extra_info
                .insert("next_primary_retry_unix".to_string(), unix_seconds.to_string());
        }

        stats
    }

    async fn health_check(&self) -> bool {
        // The composite is up as long as either side works
        self.primary.health_check().await || self.secondary.health_check().await
    }

    async fn close(&self) {
        self.primary.close().await;
        self.secondary.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory_cache::MemoryCacheProvider;
    use crate::error::CacheError;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Memory-backed provider with injectable failures for failover tests
    struct FlakyProvider {
        inner: MemoryCacheProvider,
        failures_left: AtomicU32,
        always_fail: AtomicBool,
        healthy: AtomicBool,
    }

    impl FlakyProvider {
        fn new() -> Self {
            Self {
                inner: MemoryCacheProvider::default(),
                failures_left: AtomicU32::new(0),
                always_fail: AtomicBool::new(false),
                healthy: AtomicBool::new(true),
            }
        }

        fn fail_next(&self, count: u32) {
            self.failures_left.store(count, Ordering::SeqCst);
        }

        fn fail_always(&self) {
            self.always_fail.store(true, Ordering::SeqCst);
        }

        fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }

        fn should_fail(&self) -> bool {
            if self.always_fail.load(Ordering::SeqCst) {
                return true;
            }
            self.failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }

        fn injected(&self) -> CacheError {
            CacheError::backend("flaky", "injected failure")
        }
    }

    #[async_trait]
    impl CacheProvider for FlakyProvider {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn get(&self, text_hash: &str, model: &str) -> Result<Option<Vec<f32>>> {
            if self.should_fail() {
                return Err(self.injected());
            }
            self.inner.get(text_hash, model).await
        }

        async fn set(&self, text_hash: &str, embedding: &[f32], model: &str) -> Result<bool> {
            if self.should_fail() {
                return Err(self.injected());
            }
            self.inner.set(text_hash, embedding, model).await
        }

        async fn get_batch(
            &self,
            text_hashes: &[String],
            model: &str,
        ) -> Result<HashMap<String, Vec<f32>>> {
            if self.should_fail() {
                return Err(self.injected());
            }
            self.inner.get_batch(text_hashes, model).await
        }

        async fn set_batch(&self, entries: &[(String, Vec<f32>)], model: &str) -> Result<usize> {
            if self.should_fail() {
                return Err(self.injected());
            }
            self.inner.set_batch(entries, model).await
        }

        async fn delete(&self, text_hash: &str, model: &str) -> Result<bool> {
            if self.should_fail() {
                return Err(self.injected());
            }
            self.inner.delete(text_hash, model).await
        }

        async fn clear(&self) -> Result<u64> {
            if self.should_fail() {
                return Err(self.injected());
            }
            self.inner.clear().await
        }

        async fn cleanup(
            &self,
            max_age_days: Option<u32>,
            max_entries: Option<u64>,
        ) -> Result<u64> {
            if self.should_fail() {
                return Err(self.injected());
            }
            self.inner.cleanup(max_age_days, max_entries).await
        }

        async fn get_stats(&self) -> CacheStats {
            self.inner.get_stats().await
        }

        async fn health_check(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        async fn close(&self) {}
    }

    async fn fallback_over(
        primary: Arc<FlakyProvider>,
        secondary: Arc<MemoryCacheProvider>,
        retry: Duration,
    ) -> FallbackCacheProvider {
        FallbackCacheProvider::new(primary, secondary, retry).await
    }

    #[tokio::test]
    async fn test_starts_on_secondary_when_primary_unhealthy() {
        let primary = Arc::new(FlakyProvider::new());
        primary.set_healthy(false);
        let secondary = Arc::new(MemoryCacheProvider::default());

        let cache = fallback_over(primary, secondary, Duration::from_secs(60)).await;

        let stats = cache.get_stats().await;
        assert_eq!(stats.extra_info["fallback_mode"], "true");
        assert_eq!(stats.extra_info["active_backend"], "memory");
        assert!(stats.extra_info.contains_key("next_primary_retry_unix"));
    }

    #[tokio::test]
    async fn test_failover_completes_inflight_operation() {
        let primary = Arc::new(FlakyProvider::new());
        let secondary = Arc::new(MemoryCacheProvider::default());
        let cache =
            fallback_over(primary.clone(), secondary.clone(), Duration::from_secs(60)).await;

        // Primary fails exactly once, then would succeed again
        primary.fail_next(1);

        assert!(cache.set("abc123", &[0.1, 0.2], "model-a").await.unwrap());

        // The write landed on the secondary and routing flipped
        assert_eq!(
            secondary.get("abc123", "model-a").await.unwrap().unwrap(),
            vec![0.1, 0.2]
        );
        assert_eq!(
            cache.get("abc123", "model-a").await.unwrap().unwrap(),
            vec![0.1, 0.2]
        );

        let stats = cache.get_stats().await;
        assert_eq!(stats.extra_info["fallback_mode"], "true");
        assert_eq!(stats.extra_info["standby_backend"], "flaky");
    }

    #[tokio::test]
    async fn test_double_failure_yields_empty_results() {
        let primary = Arc::new(FlakyProvider::new());
        primary.fail_always();
        let secondary = Arc::new(FlakyProvider::new());
        secondary.fail_always();

        let cache = FallbackCacheProvider::new(
            primary,
            secondary,
            Duration::from_secs(60),
        )
        .await;

        assert!(cache.get("h", "m").await.unwrap().is_none());
        assert!(!cache.set("h", &[1.0], "m").await.unwrap());
        assert!(cache
            .get_batch(&["h".to_string()], "m")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            cache.set_batch(&[("h".to_string(), vec![1.0])], "m").await.unwrap(),
            0
        );
        assert!(!cache.delete("h", "m").await.unwrap());
    }

    #[tokio::test]
    async fn test_stays_on_secondary_before_retry_interval() {
        let primary = Arc::new(FlakyProvider::new());
        primary.set_healthy(false);
        let secondary = Arc::new(MemoryCacheProvider::default());
        let cache =
            fallback_over(primary.clone(), secondary.clone(), Duration::from_secs(60)).await;

        // Primary recovers, but the interval has not elapsed
        primary.set_healthy(true);
        primary.inner.set("h", &[9.0], "m").await.unwrap();
        secondary.set("h", &[1.0], "m").await.unwrap();

        // Still served from the secondary
        assert_eq!(cache.get("h", "m").await.unwrap().unwrap(), vec![1.0]);
        assert_eq!(cache.get_stats().await.extra_info["fallback_mode"], "true");
    }

    #[tokio::test]
    async fn test_switches_back_after_retry_interval() {
        let primary = Arc::new(FlakyProvider::new());
        primary.set_healthy(false);
        let secondary = Arc::new(MemoryCacheProvider::default());
        let cache =
            fallback_over(primary.clone(), secondary.clone(), Duration::from_millis(50)).await;

        primary.set_healthy(true);
        primary.inner.set("h", &[9.0], "m").await.unwrap();
        secondary.set("h", &[1.0], "m").await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        // The probe succeeds and routing returns to the primary
        assert_eq!(cache.get("h", "m").await.unwrap().unwrap(), vec![9.0]);
        assert_eq!(cache.get_stats().await.extra_info["fallback_mode"], "false");
    }

    #[tokio::test]
    async fn test_failed_probe_rearms_full_interval() {
        let primary = Arc::new(FlakyProvider::new());
        primary.set_healthy(false);
        let secondary = Arc::new(MemoryCacheProvider::default());
        let cache =
            fallback_over(primary.clone(), secondary.clone(), Duration::from_millis(80)).await;

        tokio::time::sleep(Duration::from_millis(90)).await;
        // Probe fires, fails, and resets the timer
        assert!(cache.get("h", "m").await.unwrap().is_none());

        // Primary recovers right after the failed probe; the next probe is
        // still a full interval away
        primary.set_healthy(true);
        assert!(cache.get("h", "m").await.unwrap().is_none());
        assert_eq!(cache.get_stats().await.extra_info["fallback_mode"], "true");

        tokio::time::sleep(Duration::from_millis(90)).await;
        cache.get("h", "m").await.unwrap();
        assert_eq!(cache.get_stats().await.extra_info["fallback_mode"], "false");
    }

    #[tokio::test]
    async fn test_health_check_or_semantics() {
        let primary = Arc::new(FlakyProvider::new());
        let secondary = Arc::new(FlakyProvider::new());
        let cache = FallbackCacheProvider::new(
            primary.clone(),
            secondary.clone(),
            Duration::from_secs(60),
        )
        .await;

        assert!(cache.health_check().await);

        primary.set_healthy(false);
        assert!(cache.health_check().await);

        secondary.set_healthy(false);
        assert!(!cache.health_check().await);
    }

    #[tokio::test]
    async fn test_delete_removes_from_both_backends() {
        let primary = Arc::new(FlakyProvider::new());
        let secondary = Arc::new(MemoryCacheProvider::default());
        let cache =
            fallback_over(primary.clone(), secondary.clone(), Duration::from_secs(60)).await;

        primary.inner.set("h", &[1.0], "m").await.unwrap();
        secondary.set("h", &[1.0], "m").await.unwrap();

        assert!(cache.delete("h", "m").await.unwrap());
        assert!(primary.inner.get("h", "m").await.unwrap().is_none());
        assert!(secondary.get("h", "m").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_sums_both_backends() {
        let primary = Arc::new(FlakyProvider::new());
        let secondary = Arc::new(MemoryCacheProvider::default());
        let cache =
            fallback_over(primary.clone(), secondary.clone(), Duration::from_secs(60)).await;

        primary.inner.set("p1", &[1.0], "m").await.unwrap();
        primary.inner.set("p2", &[2.0], "m").await.unwrap();
        secondary.set("s1", &[3.0], "m").await.unwrap();

        assert_eq!(cache.clear().await.unwrap(), 3);
    }
}
