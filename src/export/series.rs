use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One point of a daily time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

impl DailyCount {
    pub fn new(date: NaiveDate, count: i64) -> Self {
        Self { date, count }
    }
}

/// Fills the gaps of a sparse daily series.
///
/// The result covers every day from the earliest to the latest of the samples,
/// `today` and `min_date`, newest first. Days without a sample count zero; when a
/// day is sampled more than once the last sample wins.
pub fn verify_list(samples: &[DailyCount], today: NaiveDate, min_date: NaiveDate) -> Vec<DailyCount> {
    let mut counts: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for sample in samples {
        counts.insert(sample.date, sample.count);
    }

    let dates = samples.iter().map(|s| s.date).chain([today, min_date]);
    let (start, end) = dates.fold((today, today), |(lo, hi), d| (lo.min(d), hi.max(d)));

    start
        .iter_days()
        .take_while(|day| *day <= end)
        .map(|day| DailyCount::new(day, counts.get(&day).copied().unwrap_or(0)))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect()
}
