// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL dialect helpers.
//!
//! Callers write one query per backend kind; these helpers cover the
//! fragments that differ between the analytical primary and SQLite. Both
//! dialects take positional `?` parameters.

use std::fmt;

/// Which backend served a connection. Callers pick their SQL dialect from this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Primary,
    Fallback,
}

impl BackendKind {
    /// Metric/log label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }

    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback)
    }

    /// Exact distinct count of `expr`.
    #[must_use]
    pub fn distinct_count(&self, expr: &str) -> String {
        match self {
            Self::Primary => format!("uniqExact({})", expr),
            Self::Fallback => format!("COUNT(DISTINCT {})", expr),
        }
    }

    /// Bucket `column` by a date format bound as the next `?` parameter
    /// (see [`Period::format`]).
    #[must_use]
    pub fn period_bucket(&self, column: &str) -> String {
        match self {
            Self::Primary => format!("formatDateTime({}, ?)", column),
            Self::Fallback => format!("strftime(?, {})", column),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trend bucket size. Only these values ever reach a format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    #[default]
    Day,
    Week,
    Month,
}

impl Period {
    /// Parse a user-supplied period name; anything outside the whitelist is `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    /// Bucket format for [`BackendKind::period_bucket`].
    ///
    /// `formatDateTime` reads `%W` as the weekday name, so the primary buckets
    /// weeks by ISO week number instead.
    #[must_use]
    pub fn format(&self, kind: BackendKind) -> &'static str {
        match (self, kind) {
            (Self::Day, _) => "%Y-%m-%d",
            (Self::Week, BackendKind::Primary) => "%Y-%V",
            (Self::Week, BackendKind::Fallback) => "%Y-%W",
            (Self::Month, _) => "%Y-%m",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_count() {
        assert_eq!(BackendKind::Primary.distinct_count("order_id"), "uniqExact(order_id)");
        assert_eq!(BackendKind::Fallback.distinct_count("order_id"), "COUNT(DISTINCT order_id)");
    }

    #[test]
    fn test_period_bucket_parameter_position() {
        assert_eq!(BackendKind::Primary.period_bucket("date"), "formatDateTime(date, ?)");
        assert_eq!(BackendKind::Fallback.period_bucket("date"), "strftime(?, date)");
    }

    #[test]
    fn test_period_whitelist() {
        assert_eq!(Period::parse("day"), Some(Period::Day));
        assert_eq!(Period::parse("month").map(|p| p.format(BackendKind::Primary)), Some("%Y-%m"));
        assert_eq!(Period::parse("%Y'); DROP TABLE buy_fact; --"), None);
        assert_eq!(Period::parse("Day"), None);
        assert_eq!(Period::default().to_string(), "day");
    }

    #[test]
    fn test_week_format_per_backend() {
        assert_eq!(Period::Week.format(BackendKind::Primary), "%Y-%V");
        assert_eq!(Period::Week.format(BackendKind::Fallback), "%Y-%W");
        assert_eq!(Period::Day.format(BackendKind::Fallback), Period::Day.format(BackendKind::Primary));
    }

    #[test]
    fn test_backend_kind_labels() {
        assert_eq!(BackendKind::Primary.to_string(), "primary");
        assert!(BackendKind::Fallback.is_fallback());
        assert!(!BackendKind::Primary.is_fallback());
    }
}
