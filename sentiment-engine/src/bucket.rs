use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use sentiscan_core::{BucketScheme, ConfigError, PlotConfig};
use std::collections::BTreeMap;

/// Buckets are named after their earliest date.
pub type BucketKey = NaiveDate;

/// Partition of `[start, end]` (whole days, inclusive) into buckets.
#[derive(Debug, Clone)]
pub struct TimeBucketer {
    start: NaiveDate,
    end: NaiveDate,
    index: BTreeMap<NaiveDate, BucketKey>,
}

fn check_range(start: NaiveDate, end: NaiveDate) -> Result<(), ConfigError> {
    if start > end {
        return Err(ConfigError::InvalidValue {
            field: "plot.start_date".to_string(),
            value: format!("{} (after end_date {})", start, end),
        });
    }
    Ok(())
}

impl TimeBucketer {
    /// Walks from `end` back to `start` in runs of `group_by` days; the run
    /// touching `start` may be shorter.
    pub fn day_groups(start: NaiveDate, end: NaiveDate, group_by: u32) -> Result<Self, ConfigError> {
        if group_by == 0 {
            return Err(ConfigError::InvalidValue {
                field: "plot.group_by".to_string(),
                value: "0".to_string(),
            });
        }
        check_range(start, end)?;

        let days: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();
        let mut index = BTreeMap::new();
        for chunk in days.rchunks(group_by as usize) {
            let key = chunk[0];
            for day in chunk {
                index.insert(*day, key);
            }
        }
        Ok(Self { start, end, index })
    }

    /// Monday-based weeks clipped to the range.
    pub fn calendar_weeks(start: NaiveDate, end: NaiveDate) -> Result<Self, ConfigError> {
        check_range(start, end)?;

        let index = start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|day| {
                let monday = day - Duration::days(day.weekday().num_days_from_monday() as i64);
                (day, monday.max(start))
            })
            .collect();
        Ok(Self { start, end, index })
    }

    pub fn from_config(plot: &PlotConfig) -> Result<Self, ConfigError> {
        match plot.bucket {
            BucketScheme::DayGroup => Self::day_groups(plot.start_date, plot.end_date, plot.group_by),
            BucketScheme::CalendarWeek => Self::calendar_weeks(plot.start_date, plot.end_date),
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// `None` for timestamps whose UTC date lies outside the range.
    pub fn bucket_of(&self, timestamp: DateTime<Utc>) -> Option<BucketKey> {
        self.index.get(&timestamp.date_naive()).copied()
    }

    /// Distinct bucket keys, ascending.
    pub fn keys(&self) -> Vec<BucketKey> {
        let mut keys: Vec<BucketKey> = self.index.values().copied().collect();
        keys.dedup();
        keys
    }
}
