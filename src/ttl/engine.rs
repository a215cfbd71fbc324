//! Adaptive TTL Engine
//!
//! Pure mapping from (data class, temporal context) to a TTL in milliseconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::MAX_TTL_MS;
use crate::ttl::{DataClass, SystemLoad, TtlContext, TtlPolicy};

// == TTL Source ==
/// Where the TTL of a write comes from; kept with refreshable entries so
/// every refresh recomputes it the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TtlSource {
    /// Caller-supplied TTL in milliseconds
    Fixed(u64),
    /// Adaptive TTL; `None` context means "the local time of each write"
    Adaptive {
        class: DataClass,
        context: Option<TtlContext>,
    },
    /// Configured default TTL in milliseconds
    Default(u64),
}

impl TtlSource {
    pub fn data_class(&self) -> Option<DataClass> {
        match self {
            TtlSource::Adaptive { class, .. } => Some(*class),
            _ => None,
        }
    }
}

// == TTL Engine ==
/// Computes context-dependent TTLs from a [`TtlPolicy`].
#[derive(Debug, Clone, Default)]
pub struct TtlEngine {
    policy: TtlPolicy,
}

impl TtlEngine {
    pub fn new(policy: TtlPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    // == Calculate Optimal TTL ==
    /// Returns the TTL in milliseconds for a data class name.
    ///
    /// Unknown names resolve to the default band. The result is always at
    /// least the policy's `min_ttl_ms` and never zero.
    pub fn calculate_optimal_ttl(&self, data_class: &str, context: &TtlContext) -> u64 {
        self.ttl_for(DataClass::parse(data_class), context)
    }

    /// Typed variant of [`calculate_optimal_ttl`](Self::calculate_optimal_ttl).
    pub fn ttl_for(&self, class: DataClass, context: &TtlContext) -> u64 {
        let band = self.policy.band(class);
        let mut ttl = band.base_ms as f64;

        if self.is_business_hours(context) {
            ttl *= self.business_hours_factor();
        }
        ttl *= self.policy.load_multipliers.for_load(context.system_load);

        let adjusted = if ttl.is_finite() && ttl >= 0.0 {
            ttl.round() as u64
        } else {
            band.base_ms
        };

        band.clamp(adjusted).max(self.policy.min_ttl_ms).max(1)
    }

    /// Same as [`ttl_for`](Self::ttl_for), as a `Duration`.
    pub fn ttl_duration(&self, class: DataClass, context: &TtlContext) -> Duration {
        Duration::from_millis(self.ttl_for(class, context))
    }

    /// Resolves a [`TtlSource`] to milliseconds.
    pub fn resolve(&self, source: &TtlSource) -> u64 {
        match source {
            TtlSource::Fixed(ttl_ms) | TtlSource::Default(ttl_ms) => (*ttl_ms).clamp(1, MAX_TTL_MS),
            TtlSource::Adaptive { class, context } => {
                let context = context.unwrap_or_else(|| TtlContext::current(SystemLoad::Low));
                self.ttl_for(*class, &context)
            }
        }
    }

    // == Business Hours ==
    /// Weekdays within `[business_hours_start, business_hours_end)`.
    pub fn is_business_hours(&self, context: &TtlContext) -> bool {
        !context.is_weekend()
            && context.hour >= self.policy.business_hours_start
            && context.hour < self.policy.business_hours_end
    }

    /// Business hours may only shorten TTLs.
    fn business_hours_factor(&self) -> f64 {
        let factor = self.policy.business_hours_factor;
        if factor.is_finite() && factor > 0.0 {
            factor.min(1.0)
        } else {
            1.0
        }
    }
}
