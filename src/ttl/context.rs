//! TTL Context Module
//!
//! Data classes and the temporal context fed into the adaptive TTL engine.

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};

// == Data Class ==
/// Category of cached data, selecting a base TTL band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataClass {
    /// Live metrics that change every few seconds
    Realtime,
    /// Primary dashboard panels
    CriticalDashboardData,
    /// Secondary panels, summaries and history
    SecondaryDashboardData,
    /// Per-user settings
    UserPreferences,
    /// Lookup tables that rarely change
    StaticReference,
    /// Anything unrecognised
    Default,
}

impl DataClass {
    /// Resolves a data class name. Unknown names map to [`DataClass::Default`].
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "realtime" | "real-time" => DataClass::Realtime,
            "critical-dashboard-data" | "critical" => DataClass::CriticalDashboardData,
            "secondary-dashboard-data" | "secondary" => DataClass::SecondaryDashboardData,
            "user-preferences" => DataClass::UserPreferences,
            "static-reference" | "static" => DataClass::StaticReference,
            _ => DataClass::Default,
        }
    }

    /// Canonical name of the class.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataClass::Realtime => "realtime",
            DataClass::CriticalDashboardData => "critical-dashboard-data",
            DataClass::SecondaryDashboardData => "secondary-dashboard-data",
            DataClass::UserPreferences => "user-preferences",
            DataClass::StaticReference => "static-reference",
            DataClass::Default => "default",
        }
    }
}

impl From<&str> for DataClass {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

// == System Load ==
/// Coarse host load level reported by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemLoad {
    #[default]
    Low,
    Medium,
    High,
}

impl SystemLoad {
    /// Resolves a load name, falling back to `Low`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "medium" => SystemLoad::Medium,
            "high" => SystemLoad::High,
            _ => SystemLoad::Low,
        }
    }
}

// == TTL Context ==
/// Temporal context of a TTL decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlContext {
    /// Local hour of day, 0-23
    pub hour: u32,
    /// Local day of week
    pub weekday: Weekday,
    /// Reported system load
    pub system_load: SystemLoad,
}

impl TtlContext {
    /// Creates a context from explicit parts. Hours past 23 wrap around.
    pub fn new(hour: u32, weekday: Weekday, system_load: SystemLoad) -> Self {
        Self {
            hour: hour % 24,
            weekday,
            system_load,
        }
    }

    /// Creates a context for the given instant.
    pub fn at<Tz: TimeZone>(when: &DateTime<Tz>, system_load: SystemLoad) -> Self {
        Self::new(when.hour(), when.weekday(), system_load)
    }

    /// Creates a context for the current local time.
    pub fn current(system_load: SystemLoad) -> Self {
        Self::at(&Local::now(), system_load)
    }

    /// Returns true on Saturday and Sunday.
    pub fn is_weekend(&self) -> bool {
        matches!(self.weekday, Weekday::Sat | Weekday::Sun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_data_class_parse() {
        assert_eq!(DataClass::parse("realtime"), DataClass::Realtime);
        assert_eq!(
            DataClass::parse("Critical-Dashboard-Data"),
            DataClass::CriticalDashboardData
        );
        assert_eq!(
            DataClass::parse("secondary-dashboard-data"),
            DataClass::SecondaryDashboardData
        );
        assert_eq!(DataClass::parse("no-such-class"), DataClass::Default);
        assert_eq!(DataClass::parse(""), DataClass::Default);
    }

    #[test]
    fn test_data_class_name_roundtrip() {
        for class in [
            DataClass::Realtime,
            DataClass::CriticalDashboardData,
            DataClass::SecondaryDashboardData,
            DataClass::UserPreferences,
            DataClass::StaticReference,
            DataClass::Default,
        ] {
            assert_eq!(DataClass::parse(class.as_str()), class);
        }
    }

    #[test]
    fn test_system_load_parse() {
        assert_eq!(SystemLoad::parse("HIGH"), SystemLoad::High);
        assert_eq!(SystemLoad::parse("medium"), SystemLoad::Medium);
        assert_eq!(SystemLoad::parse("whatever"), SystemLoad::Low);
    }

    #[test]
    fn test_context_at() {
        // 2024-03-06 was a Wednesday
        let when = Utc.with_ymd_and_hms(2024, 3, 6, 14, 30, 0).unwrap();
        let ctx = TtlContext::at(&when, SystemLoad::Medium);
        assert_eq!(ctx.hour, 14);
        assert_eq!(ctx.weekday, Weekday::Wed);
        assert!(!ctx.is_weekend());
    }

    #[test]
    fn test_context_hour_wraps() {
        let ctx = TtlContext::new(25, Weekday::Sat, SystemLoad::Low);
        assert_eq!(ctx.hour, 1);
        assert!(ctx.is_weekend());
    }
}
