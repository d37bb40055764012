// Retention periods
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A retention tier.
///
/// Variants are declared from finest to coarsest, so the derived ordering is
/// `Hourly < Daily < Monthly < Yearly`. Each period is rotated on its own;
/// the ordering never feeds into a pruning decision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[value(alias = "hours")]
    #[serde(alias = "hours")]
    Hourly,
    #[value(alias = "days")]
    #[serde(alias = "days")]
    Daily,
    #[value(alias = "months")]
    #[serde(alias = "months")]
    Monthly,
    #[value(alias = "years")]
    #[serde(alias = "years")]
    Yearly,
}

impl Period {
    pub const ALL: [Period; 4] = [Period::Hourly, Period::Daily, Period::Monthly, Period::Yearly];

    pub fn label(self) -> &'static str {
        match self {
            Period::Hourly => "hourly",
            Period::Daily => "daily",
            Period::Monthly => "monthly",
            Period::Yearly => "yearly",
        }
    }

    /// Letter that terminates the timestamp of an encoded snapshot name
    pub fn qualifier(self) -> char {
        match self {
            Period::Hourly => 'H',
            Period::Daily => 'd',
            Period::Monthly => 'm',
            Period::Yearly => 'Y',
        }
    }

    /// Number of snapshots kept when nothing overrides it
    ///
    /// One day of hourlies, four weeks of dailies, a year of monthlies and
    /// two yearlies.
    pub fn default_keep(self) -> i64 {
        match self {
            Period::Hourly => 24,
            Period::Daily => 28,
            Period::Monthly => 12,
            Period::Yearly => 2,
        }
    }

    /// Drop every field finer than this period's resolution
    pub fn truncate(self, instant: NaiveDateTime) -> NaiveDateTime {
        let (month, day, hour) = match self {
            Period::Hourly => (instant.month(), instant.day(), instant.hour()),
            Period::Daily => (instant.month(), instant.day(), 0),
            Period::Monthly => (instant.month(), 1, 0),
            Period::Yearly => (1, 1, 0),
        };

        // Every component comes from a valid instant, so the coarser date is valid too.
        NaiveDate::from_ymd_opt(instant.year(), month, day)
            .and_then(|date| date.and_hms_opt(hour, 0, 0))
            .unwrap_or(instant)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
