//! TTL Policy Module
//!
//! Configuration tables for the adaptive TTL engine.

use serde::{Deserialize, Serialize};

use crate::ttl::{DataClass, SystemLoad};

// == TTL Band ==
/// Base TTL of a data class together with its permitted range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlBand {
    /// Off-hours TTL at low load
    pub base_ms: u64,
    /// Lower bound after adjustments
    pub min_ms: u64,
    /// Upper bound after adjustments
    pub max_ms: u64,
}

impl TtlBand {
    pub const fn new(base_ms: u64, min_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            min_ms,
            max_ms,
        }
    }

    /// Clamps `ttl_ms` into the band, tolerating an inverted min/max.
    pub fn clamp(&self, ttl_ms: u64) -> u64 {
        let upper = self.max_ms.max(self.min_ms);
        ttl_ms.max(self.min_ms).min(upper)
    }
}

// == Load Multipliers ==
/// Multiplicative TTL scaling per system load level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadMultipliers {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl LoadMultipliers {
    pub fn for_load(&self, load: SystemLoad) -> f64 {
        let multiplier = match load {
            SystemLoad::Low => self.low,
            SystemLoad::Medium => self.medium,
            SystemLoad::High => self.high,
        };
        if multiplier.is_finite() && multiplier > 0.0 {
            multiplier
        } else {
            1.0
        }
    }
}

impl Default for LoadMultipliers {
    fn default() -> Self {
        Self {
            low: 1.0,
            medium: 1.25,
            high: 1.5,
        }
    }
}

// == TTL Policy ==
/// Tables driving [`TtlEngine`](crate::ttl::TtlEngine).
///
/// The default bands are disjoint, so `realtime < critical < secondary`
/// holds for every context no matter how the adjustments combine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlPolicy {
    pub realtime: TtlBand,
    pub critical: TtlBand,
    pub secondary: TtlBand,
    pub user_preferences: TtlBand,
    pub static_reference: TtlBand,
    pub default: TtlBand,
    /// First business hour (inclusive)
    pub business_hours_start: u32,
    /// Last business hour (exclusive)
    pub business_hours_end: u32,
    /// Scaling applied during business hours, capped at 1.0
    pub business_hours_factor: f64,
    pub load_multipliers: LoadMultipliers,
    /// Absolute TTL floor
    pub min_ttl_ms: u64,
}

impl TtlPolicy {
    /// Returns the band configured for `class`.
    pub fn band(&self, class: DataClass) -> TtlBand {
        match class {
            DataClass::Realtime => self.realtime,
            DataClass::CriticalDashboardData => self.critical,
            DataClass::SecondaryDashboardData => self.secondary,
            DataClass::UserPreferences => self.user_preferences,
            DataClass::StaticReference => self.static_reference,
            DataClass::Default => self.default,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            realtime: TtlBand::new(5_000, 1_000, 10_000),
            critical: TtlBand::new(30_000, 15_000, 60_000),
            secondary: TtlBand::new(300_000, 120_000, 1_800_000),
            user_preferences: TtlBand::new(1_800_000, 600_000, 7_200_000),
            static_reference: TtlBand::new(3_600_000, 1_800_000, 86_400_000),
            default: TtlBand::new(60_000, 5_000, 600_000),
            business_hours_start: 8,
            business_hours_end: 18,
            business_hours_factor: 0.5,
            load_multipliers: LoadMultipliers::default(),
            min_ttl_ms: 1_000,
        }
    }
}
