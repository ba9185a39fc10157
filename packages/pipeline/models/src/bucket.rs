//! Temporal bucket schemes.
//!
//! A [`BucketScheme`] is a closed enumeration of buckets plus the SQL
//! expression that maps a pickup timestamp onto one of them. Every count
//! column in the aggregate and joined tables is named `cnt_<bucket key>`.

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator as _;

/// Number of hour-of-day buckets.
pub const HOURS_PER_DAY: u32 = 24;

/// How pickups are bucketed in time.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum BucketScheme {
    /// Seven weekday buckets, Monday first.
    #[default]
    #[serde(alias = "day")]
    #[strum(to_string = "day", serialize = "day_of_week")]
    DayOfWeek,
    /// Twenty-four hour-of-day buckets, hour 0 first.
    #[serde(alias = "hour")]
    #[strum(to_string = "hour", serialize = "hour_of_day")]
    HourOfDay,
}

/// One bucket of a [`BucketScheme`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Column suffix, e.g. `monday` or `13`.
    pub key: String,
    /// Human-readable label, e.g. `Monday` or `Hour 13`.
    pub label: String,
    /// SQL literal the bucket expression yields for this bucket.
    pub sql_value: String,
}

impl Bucket {
    /// Name of the count column holding this bucket.
    #[must_use]
    pub fn column(&self) -> String {
        format!("cnt_{}", self.key)
    }
}

impl BucketScheme {
    /// All buckets in display order. The first bucket is the default map
    /// layer.
    #[must_use]
    pub fn buckets(self) -> Vec<Bucket> {
        match self {
            Self::DayOfWeek => Weekday::iter()
                .map(|day| Bucket {
                    key: day.key(),
                    label: day.to_string(),
                    sql_value: format!("'{day}'"),
                })
                .collect(),
            Self::HourOfDay => (0..HOURS_PER_DAY)
                .map(|hour| Bucket {
                    key: hour.to_string(),
                    label: format!("Hour {hour}"),
                    sql_value: hour.to_string(),
                })
                .collect(),
        }
    }

    /// Count column names in bucket order.
    #[must_use]
    pub fn column_names(self) -> Vec<String> {
        self.buckets().iter().map(Bucket::column).collect()
    }

    /// SQL expression that maps the timestamp column `ts` onto a bucket
    /// value (see [`Bucket::sql_value`]).
    ///
    /// `EXTRACT(DOW ...)` numbers days from Sunday = 0.
    #[must_use]
    pub fn bucket_sql(self, ts: &str) -> String {
        match self {
            Self::DayOfWeek => {
                let arms: String = Weekday::iter()
                    .map(|day| format!(" WHEN {} THEN '{day}'", day.dow()))
                    .collect();
                format!("CASE EXTRACT(DOW FROM {ts}){arms} END")
            }
            Self::HourOfDay => format!("EXTRACT(HOUR FROM {ts})"),
        }
    }

    /// Dataset name shown in the map legend.
    #[must_use]
    pub const fn dataset_label(self) -> &'static str {
        match self {
            Self::DayOfWeek => "NYC Taxi Pickup by Day",
            Self::HourOfDay => "NYC Buildings with Taxi Data",
        }
    }

    /// Map layer label for one bucket.
    #[must_use]
    pub fn layer_label(bucket: &Bucket) -> String {
        format!("Pickups - {}", bucket.label)
    }
}

/// Day of the week, Monday first.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    /// From an ISO day-of-week number where Monday = 1 and Sunday = 7.
    #[must_use]
    pub const fn from_iso(isodow: u32) -> Option<Self> {
        match isodow {
            1 => Some(Self::Monday),
            2 => Some(Self::Tuesday),
            3 => Some(Self::Wednesday),
            4 => Some(Self::Thursday),
            5 => Some(Self::Friday),
            6 => Some(Self::Saturday),
            7 => Some(Self::Sunday),
            _ => None,
        }
    }

    /// Day-of-week number where Sunday = 0.
    #[must_use]
    pub const fn dow(self) -> u32 {
        match self {
            Self::Sunday => 0,
            Self::Monday => 1,
            Self::Tuesday => 2,
            Self::Wednesday => 3,
            Self::Thursday => 4,
            Self::Friday => 5,
            Self::Saturday => 6,
        }
    }

    /// Lowercase name used in column names.
    #[must_use]
    pub fn key(self) -> String {
        self.to_string().to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn day_scheme_has_seven_columns_starting_monday() {
        let cols = BucketScheme::DayOfWeek.column_names();
        assert_eq!(cols.len(), 7);
        assert_eq!(cols[0], "cnt_monday");
        assert_eq!(cols[6], "cnt_sunday");
    }

    #[test]
    fn hour_scheme_has_twenty_four_columns_starting_zero() {
        let buckets = BucketScheme::HourOfDay.buckets();
        assert_eq!(buckets.len(), 24);
        assert_eq!(buckets[0].column(), "cnt_0");
        assert_eq!(buckets[23].column(), "cnt_23");
        assert_eq!(buckets[5].label, "Hour 5");
        assert_eq!(buckets[5].sql_value, "5");
    }

    #[test]
    fn day_bucket_sql_maps_sunday_to_zero() {
        let sql = BucketScheme::DayOfWeek.bucket_sql("pickup_at");
        assert!(sql.starts_with("CASE EXTRACT(DOW FROM pickup_at)"));
        assert!(sql.contains("WHEN 0 THEN 'Sunday'"));
        assert!(sql.contains("WHEN 1 THEN 'Monday'"));
        assert!(sql.ends_with("END"));
    }

    #[test]
    fn parses_short_and_long_scheme_names() {
        assert_eq!(
            BucketScheme::from_str("day").unwrap(),
            BucketScheme::DayOfWeek
        );
        assert_eq!(
            BucketScheme::from_str("hour_of_day").unwrap(),
            BucketScheme::HourOfDay
        );
        assert!(BucketScheme::from_str("minute").is_err());
        assert_eq!(BucketScheme::HourOfDay.to_string(), "hour");
    }

    #[test]
    fn weekday_numbering_roundtrips() {
        for day in Weekday::iter() {
            let isodow = if day.dow() == 0 { 7 } else { day.dow() };
            assert_eq!(Weekday::from_iso(isodow), Some(day));
        }
        assert_eq!(Weekday::from_iso(7), Some(Weekday::Sunday));
        assert_eq!(Weekday::from_iso(0), None);
        assert_eq!(Weekday::from_iso(8), None);
    }
}
