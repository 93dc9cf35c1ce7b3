//! Feed timestamp parsing.
//!
//! Feeds in the wild use a loose mix of RFC 822, RFC 1123 and RFC 3339 dates. Each
//! string is tried against [`LAYOUTS`] in order and the first layout that accepts the
//! whole string wins, so the order of that table matters: several layouts are textual
//! subsets of others.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    /// The field was empty after trimming. Not a failure: callers pick a default.
    #[error("no date specified")]
    NoDate,
    #[error("cannot parse date string: {0:?}")]
    Unparsable(String),
}

#[derive(Debug, Clone, Copy)]
enum Zone {
    /// Trailing alphabetic abbreviation such as `GMT` or `PST`.
    Named,
    /// Trailing numeric offset such as `-0700`.
    Numeric,
}

/// Width of the year field in the zoned layouts.
#[derive(Debug, Clone, Copy)]
enum Year {
    /// Exactly two digits; `69`-`99` are 19xx, the rest 20xx.
    Short,
    /// Exactly four digits.
    Full,
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    /// `pattern` covers everything except a leading `Mon, ` (when `weekday` is set)
    /// and, for named zones, the trailing abbreviation. The year field is always
    /// written `%Y`; `year` says how many digits the input must carry there.
    Zoned {
        pattern: &'static str,
        weekday: bool,
        year: Year,
        zone: Zone,
    },
    Rfc3339,
    /// Calendar date only, midnight UTC.
    Date(&'static str),
    /// Date and time with no zone, read as UTC.
    Naive(&'static str),
}

// `%.f` accepts an optional fractional part after the seconds.
const LAYOUTS: &[Layout] = &[
    // RFC 822
    Layout::Zoned {
        pattern: "%d %b %Y %H:%M",
        weekday: false,
        year: Year::Short,
        zone: Zone::Named,
    },
    Layout::Zoned {
        pattern: "%d %b %Y %H:%M %z",
        weekday: false,
        year: Year::Short,
        zone: Zone::Numeric,
    },
    // RFC 1123
    Layout::Zoned {
        pattern: "%d %b %Y %H:%M:%S%.f",
        weekday: true,
        year: Year::Full,
        zone: Zone::Named,
    },
    Layout::Zoned {
        pattern: "%d %b %Y %H:%M:%S%.f %z",
        weekday: true,
        year: Year::Full,
        zone: Zone::Numeric,
    },
    Layout::Rfc3339,
    // RFC 822 with a four digit year and seconds
    Layout::Zoned {
        pattern: "%d %b %Y %H:%M:%S%.f",
        weekday: false,
        year: Year::Full,
        zone: Zone::Named,
    },
    Layout::Zoned {
        pattern: "%d %b %Y %H:%M:%S%.f %z",
        weekday: false,
        year: Year::Full,
        zone: Zone::Numeric,
    },
    // Unpadded day variants
    Layout::Zoned {
        pattern: "%e %b %Y %H:%M:%S%.f %z",
        weekday: false,
        year: Year::Full,
        zone: Zone::Numeric,
    },
    Layout::Zoned {
        pattern: "%e %b %Y %H:%M:%S%.f",
        weekday: true,
        year: Year::Full,
        zone: Zone::Named,
    },
    Layout::Zoned {
        pattern: "%e %b %Y %H:%M:%S%.f %z",
        weekday: true,
        year: Year::Full,
        zone: Zone::Numeric,
    },
    Layout::Date("%Y-%m-%d"),
    Layout::Naive("%Y-%m-%d %H:%M:%S%.f"),
];

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Parses a feed date into UTC.
///
/// Returns [`DateError::NoDate`] for blank input and [`DateError::Unparsable`] (carrying
/// the input as given) when no layout matches.
pub fn parse_date(input: &str) -> Result<DateTime<Utc>, DateError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DateError::NoDate);
    }

    LAYOUTS
        .iter()
        .find_map(|layout| layout.parse(trimmed))
        .ok_or_else(|| DateError::Unparsable(input.to_string()))
}

impl Layout {
    fn parse(&self, s: &str) -> Option<DateTime<Utc>> {
        match *self {
            Layout::Zoned {
                pattern,
                weekday,
                year,
                zone,
            } => {
                let s = if weekday { strip_weekday(s)? } else { s };
                let s = expand_year(s, year)?;
                let s = s.as_str();
                match zone {
                    Zone::Numeric => DateTime::parse_from_str(s, pattern)
                        .ok()
                        .map(|time| time.with_timezone(&Utc)),
                    Zone::Named => {
                        let (rest, abbreviation) = s.rsplit_once(' ')?;
                        let offset = zone_offset(abbreviation)?;
                        let naive = NaiveDateTime::parse_from_str(rest.trim_end(), pattern).ok()?;
                        offset
                            .from_local_datetime(&naive)
                            .single()
                            .map(|time| time.with_timezone(&Utc))
                    }
                }
            }
            Layout::Rfc3339 => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|time| time.with_timezone(&Utc)),
            Layout::Date(pattern) if leading_full_year(s) => NaiveDate::parse_from_str(s, pattern)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc()),
            Layout::Naive(pattern) if leading_full_year(s) => {
                NaiveDateTime::parse_from_str(s, pattern)
                    .ok()
                    .map(|naive| naive.and_utc())
            }
            Layout::Date(_) | Layout::Naive(_) => None,
        }
    }
}

/// Strips a leading `Mon, ` style prefix. The name is not checked against the date.
fn strip_weekday(s: &str) -> Option<&str> {
    let (name, rest) = s.split_once(',')?;
    WEEKDAYS
        .iter()
        .any(|day| day.eq_ignore_ascii_case(name))
        .then(|| rest.trim_start())
}

/// Checks the third field (`02 Jan 2006 ...`) has the digits `year` asks for and
/// rewrites a two digit year as four.
fn expand_year(s: &str, year: Year) -> Option<String> {
    let fields: Vec<&str> = s.split_whitespace().collect();
    let raw = *fields.get(2)?;
    if !raw.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let full = match (year, raw.len()) {
        (Year::Full, 4) => raw.to_string(),
        (Year::Short, 2) => {
            let yy: u32 = raw.parse().ok()?;
            let century = if yy >= 69 { 1900 } else { 2000 };
            (century + yy).to_string()
        }
        _ => return None,
    };
    Some([&fields[..2], &[full.as_str()][..], &fields[3..]].concat().join(" "))
}

/// `%Y` alone takes any number of digits; ISO forms need exactly four.
fn leading_full_year(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() > 4 && bytes[..4].iter().all(u8::is_ascii_digit) && bytes[4] == b'-'
}

/// Offset for a zone abbreviation. Unrecognised alphabetic abbreviations read as UTC.
fn zone_offset(abbreviation: &str) -> Option<FixedOffset> {
    if !(2..=5).contains(&abbreviation.len())
        || !abbreviation.bytes().all(|byte| byte.is_ascii_alphabetic())
    {
        return None;
    }
    let hours = match abbreviation.to_ascii_uppercase().as_str() {
        "EDT" => -4,
        "EST" | "CDT" => -5,
        "CST" | "MDT" => -6,
        "MST" | "PDT" => -7,
        "PST" => -8,
        _ => 0,
    };
    FixedOffset::east_opt(hours * 3600)
}
