// Snapshot naming codec
//
// Grammar: `<prefix>-<stamp><qualifier>[-<suffix>]` where the stamp is the
// creation instant truncated to the period's resolution:
//
//   hourly   auto-2018.09.01.13H
//   daily    auto-2018.09.01d
//   monthly  auto-2018.09m
//   yearly   auto-2018Y
//
// Every field is fixed width, so for one prefix and period the byte order of
// encoded names is the chronological order of their instants.
use crate::period::Period;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::fmt::Write;
use thiserror::Error;

const PREFIX_SEPARATOR: char = '-';
const STAMP_SEPARATOR: u8 = b'.';

/// Errors raised while building or decoding snapshot names
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("malformed snapshot name '{name}': {reason}")]
    Malformed { name: String, reason: &'static str },

    #[error("invalid snapshot prefix '{0}': must be non-empty and must not contain '@', '/', '-' or whitespace")]
    InvalidPrefix(String),

    #[error("invalid snapshot suffix '{0}': only ASCII letters, digits, '_', '.' and ':' are allowed")]
    InvalidSuffix(String),

    #[error("instant {0} cannot be encoded: year must be between 0 and 9999")]
    OutOfRange(NaiveDateTime),
}

/// Decoded form of a snapshot name owned by this tool
///
/// The instant is always stored truncated to the period's resolution, which
/// is what makes `decode(encode(n)) == n` hold for every value of this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotName {
    period: Period,
    instant: NaiveDateTime,
    suffix: Option<String>,
}

impl SnapshotName {
    pub fn new(
        period: Period,
        instant: NaiveDateTime,
        suffix: Option<String>,
    ) -> Result<Self, NameError> {
        if !(0..=9999).contains(&instant.year()) {
            return Err(NameError::OutOfRange(instant));
        }
        if let Some(suffix) = &suffix {
            if !is_valid_suffix(suffix) {
                return Err(NameError::InvalidSuffix(suffix.clone()));
            }
        }

        Ok(Self {
            period,
            instant: period.truncate(instant),
            suffix,
        })
    }

    pub fn period(&self) -> Period {
        self.period
    }

    /// Creation instant at the period's resolution
    pub fn instant(&self) -> NaiveDateTime {
        self.instant
    }
}

/// Encodes and decodes snapshot names under one tool prefix
#[derive(Debug, Clone)]
pub struct NamingCodec {
    prefix: String,
}

impl NamingCodec {
    pub fn new(prefix: impl Into<String>) -> Result<Self, NameError> {
        let prefix = prefix.into();
        let valid = !prefix.is_empty()
            && !prefix
                .chars()
                .any(|c| c == '@' || c == '/' || c == PREFIX_SEPARATOR || c.is_whitespace());

        if !valid {
            return Err(NameError::InvalidPrefix(prefix));
        }

        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn encode(&self, name: &SnapshotName) -> String {
        let t = name.instant;
        let mut out = String::with_capacity(self.prefix.len() + 24);

        out.push_str(&self.prefix);
        out.push(PREFIX_SEPARATOR);
        // Writing into a String cannot fail.
        let _ = write!(out, "{:04}", t.year());
        if name.period <= Period::Monthly {
            let _ = write!(out, ".{:02}", t.month());
        }
        if name.period <= Period::Daily {
            let _ = write!(out, ".{:02}", t.day());
        }
        if name.period == Period::Hourly {
            let _ = write!(out, ".{:02}", t.hour());
        }
        out.push(name.period.qualifier());

        if let Some(suffix) = &name.suffix {
            out.push(PREFIX_SEPARATOR);
            out.push_str(suffix);
        }

        out
    }

    pub fn decode(&self, raw: &str) -> Result<SnapshotName, NameError> {
        let malformed = |reason| NameError::Malformed {
            name: raw.to_string(),
            reason,
        };

        let body = raw
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(PREFIX_SEPARATOR))
            .ok_or_else(|| malformed("prefix does not match"))?;

        // A suffix never contains the separator, so the first one ends the stamp.
        let (stamp, suffix) = match body.split_once(PREFIX_SEPARATOR) {
            Some((stamp, suffix)) => {
                if !is_valid_suffix(suffix) {
                    return Err(malformed("bad suffix"));
                }
                (stamp, Some(suffix.to_string()))
            }
            None => (body, None),
        };

        let period = Period::ALL
            .into_iter()
            .find(|p| {
                stamp.len() == stamp_width(*p) + 1
                    && stamp.as_bytes()[stamp_width(*p)] == p.qualifier() as u8
            })
            .ok_or_else(|| malformed("no period qualifier after the timestamp"))?;

        let fields =
            parse_stamp(&stamp[..stamp_width(period)]).ok_or_else(|| malformed("bad timestamp"))?;

        let month = fields.get(1).copied().unwrap_or(1);
        let day = fields.get(2).copied().unwrap_or(1);
        let hour = fields.get(3).copied().unwrap_or(0);
        let instant = NaiveDate::from_ymd_opt(fields[0] as i32, month, day)
            .and_then(|date| date.and_hms_opt(hour, 0, 0))
            .ok_or_else(|| malformed("timestamp is not a calendar instant"))?;

        Ok(SnapshotName {
            period,
            instant,
            suffix,
        })
    }
}

/// Length of the timestamp for a period: `YYYY`, then `.MM`, `.DD`, `.HH`
fn stamp_width(period: Period) -> usize {
    match period {
        Period::Yearly => 4,
        Period::Monthly => 7,
        Period::Daily => 10,
        Period::Hourly => 13,
    }
}

/// Split a fixed-width stamp into its numeric fields.
fn parse_stamp(stamp: &str) -> Option<Vec<u32>> {
    let bytes = stamp.as_bytes();
    if bytes.len() < 4 || !bytes[..4].iter().all(u8::is_ascii_digit) {
        return None;
    }

    let mut fields = vec![stamp[..4].parse().ok()?];
    for chunk in bytes[4..].chunks(3) {
        match chunk {
            [STAMP_SEPARATOR, hi, lo] if hi.is_ascii_digit() && lo.is_ascii_digit() => {
                fields.push(u32::from(hi - b'0') * 10 + u32::from(lo - b'0'));
            }
            _ => return None,
        }
    }

    Some(fields)
}

fn is_valid_suffix(suffix: &str) -> bool {
    !suffix.is_empty()
        && suffix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':'))
}
