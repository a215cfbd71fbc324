//! Write options
//!
//! Options recognised by `SmartCache::set`.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::cache::MAX_TTL_MS;
use crate::tasks::RefreshFn;
use crate::ttl::TtlContext;

/// Options controlling a single write.
///
/// TTL resolution order: a positive `ttl_ms`, then the adaptive TTL of
/// `data_type` (in `context`, or the current local time), then the
/// configured default TTL.
#[derive(Clone, Default)]
pub struct SetOptions {
    /// Overrides the namespace carried by the key
    pub namespace: Option<String>,
    /// Explicit TTL; zero or negative values are ignored
    pub ttl_ms: Option<i64>,
    /// Data class name fed to the adaptive TTL engine
    pub data_type: Option<String>,
    /// Temporal context for the adaptive TTL engine
    pub context: Option<TtlContext>,
    /// Forces (`true`) or disables (`false`) compression
    pub compress: Option<bool>,
    /// Callback producing a fresh value for background refresh
    pub refresh: Option<RefreshFn>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn ttl(self, ttl: Duration) -> Self {
        self.ttl_ms(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
    }

    pub fn data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn context(mut self, context: TtlContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    pub fn refresh(mut self, refresh: RefreshFn) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Attaches an async refresh callback.
    pub fn refresh_with<F, Fut, T>(self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        self.refresh(RefreshFn::new(f))
    }

    /// The explicit TTL, if it is usable, capped at [`MAX_TTL_MS`].
    pub fn valid_ttl_ms(&self) -> Option<u64> {
        self.ttl_ms
            .filter(|ttl| *ttl > 0)
            .map(|ttl| (ttl as u64).min(MAX_TTL_MS))
    }
}

impl fmt::Debug for SetOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetOptions")
            .field("namespace", &self.namespace)
            .field("ttl_ms", &self.ttl_ms)
            .field("data_type", &self.data_type)
            .field("context", &self.context)
            .field("compress", &self.compress)
            .field("refresh", &self.refresh.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ttl() {
        assert_eq!(SetOptions::new().ttl_ms(1500).valid_ttl_ms(), Some(1500));
        assert_eq!(SetOptions::new().ttl_ms(0).valid_ttl_ms(), None);
        assert_eq!(SetOptions::new().ttl_ms(-5).valid_ttl_ms(), None);
        assert_eq!(SetOptions::new().valid_ttl_ms(), None);
        assert_eq!(SetOptions::new().ttl_ms(i64::MAX).valid_ttl_ms(), Some(MAX_TTL_MS));
    }

    #[test]
    fn test_ttl_from_duration() {
        let options = SetOptions::new().ttl(Duration::from_secs(2));
        assert_eq!(options.ttl_ms, Some(2000));
    }

    #[test]
    fn test_builder() {
        let options = SetOptions::new()
            .namespace("metrics")
            .data_type("realtime")
            .compress(false)
            .refresh_with(|| async { Ok(42u32) });

        assert_eq!(options.namespace.as_deref(), Some("metrics"));
        assert_eq!(options.data_type.as_deref(), Some("realtime"));
        assert_eq!(options.compress, Some(false));
        assert!(options.refresh.is_some());
        assert!(format!("{:?}", options).contains("refresh: true"));
    }
}
