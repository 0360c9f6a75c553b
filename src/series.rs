//! Per-practice monthly time series.
//!
//! The store returns counts only where a practice recorded a code in a month. Deciles over that
//! would drift whenever practices start or stop using a code, so each code's series is expanded
//! to every practice that ever used it, in every month of the extraction, with zeros filled in.
use chrono::{Datelike, NaiveDate};
use noisy_float::prelude::*;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{btree_map::Entry, BTreeMap, BTreeSet},
    path::Path,
    sync::Arc,
};

use crate::{
    ctv3::Ctv3Code,
    error::DataError,
    util::{compact_date, quantile_sorted, round_dp},
};

pub type PracticeId = u64;

/// One row of the extraction: the number of events for a code in a practice in a month.
///
/// `denominator` is the practice list size, counted from registrations live at the end of the
/// study, so it is the same in every month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractRow {
    #[serde(rename = "first_digits")]
    pub code: Ctv3Code,
    #[serde(deserialize_with = "compact_date")]
    pub month: NaiveDate,
    #[serde(rename = "Practice_ID")]
    pub practice_id: PracticeId,
    pub numerator: u64,
    pub denominator: u64,
}

/// The raw extraction for all the codes in a codelist.
#[derive(Debug, Clone, Default)]
pub struct Extract {
    rows: Arc<Vec<ExtractRow>>,
}

impl Extract {
    pub fn new(rows: Vec<ExtractRow>) -> Self {
        Self {
            rows: Arc::new(rows),
        }
    }

    /// Load `first_digits,month,Practice_ID,numerator,denominator` rows.
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let rows: Vec<ExtractRow> = crate::load_csv(path)?;
        event!(
            Level::DEBUG,
            "{} extraction rows in \"{}\"",
            rows.len(),
            path.display()
        );
        Ok(Self::new(rows))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtractRow> + '_ {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get an `Extract` containing only rows that match the filter.
    pub fn filter(&self, f: impl Fn(&ExtractRow) -> bool) -> Self {
        Self::new(self.iter().filter(|row| f(row)).cloned().collect())
    }

    /// All rows for `code` and its descendants, counted as `code`.
    ///
    /// Counts are summed per (month, practice, denominator), so a 2 digit code gets one row per
    /// practice per month however many of its children were used.
    pub fn for_code(&self, code: Ctv3Code) -> Self {
        let mut sums: BTreeMap<(NaiveDate, PracticeId, u64), u64> = BTreeMap::new();
        for row in self.iter().filter(|row| row.code.starts_with(code)) {
            *sums
                .entry((row.month, row.practice_id, row.denominator))
                .or_default() += row.numerator;
        }
        Self::new(
            sums.into_iter()
                .map(
                    |((month, practice_id, denominator), numerator)| ExtractRow {
                        code,
                        month,
                        practice_id,
                        numerator,
                        denominator,
                    },
                )
                .collect(),
        )
    }

    /// The distinct months, in order.
    pub fn months(&self) -> BTreeSet<NaiveDate> {
        self.iter().map(|row| row.month).collect()
    }

    /// The number of distinct practices.
    pub fn practice_count(&self) -> usize {
        self.iter()
            .map(|row| row.practice_id)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

impl FromIterator<ExtractRow> for Extract {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = ExtractRow>,
    {
        Self::new(iter.into_iter().collect())
    }
}

/// The first day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Which practices a panel covers, as a share of all practices in the extraction.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct Coverage {
    /// Practices in the panel, in thousands (1 d.p.).
    pub practice_count_thou: f64,
    /// Practices in the panel as a percentage of all practices in the extraction (1 d.p.).
    pub practices_percent: f64,
}

/// Build the complete panel for `code`.
///
/// `full` is the extraction for the whole codelist and decides the months; `subset` is the
/// extraction for `code` alone (see [`Extract::for_code`]) and decides the practices: those that
/// recorded the code at least once. The result has a row for every month and practice, with a numerator of 0 where the practice didn't record
/// the code that month.
///
/// A practice with more than one denominator in `subset` is an error.
pub fn all_pracs(full: &Extract, subset: &Extract, code: Ctv3Code) -> Result<(Panel, Coverage)> {
    let months = full.months();

    let active: BTreeSet<PracticeId> = subset
        .iter()
        .filter(|row| row.numerator > 0)
        .map(|row| row.practice_id)
        .collect();

    let mut practices: BTreeMap<PracticeId, u64> = BTreeMap::new();
    for row in subset.iter().filter(|row| active.contains(&row.practice_id)) {
        match practices.entry(row.practice_id) {
            Entry::Vacant(entry) => {
                entry.insert(row.denominator);
            }
            Entry::Occupied(entry) => {
                ensure!(
                    *entry.get() == row.denominator,
                    DataError::format(format!(
                        "practice {} has list sizes {} and {}",
                        row.practice_id,
                        entry.get(),
                        row.denominator
                    ))
                );
            }
        }
    }

    let mut numerators: BTreeMap<(NaiveDate, PracticeId), u64> = BTreeMap::new();
    for row in subset.iter() {
        *numerators.entry((row.month, row.practice_id)).or_default() += row.numerator;
    }

    let mut rows = Vec::with_capacity(months.len() * practices.len());
    for month in months.iter().copied() {
        for (practice_id, denominator) in practices.iter() {
            rows.push(PanelRow {
                month,
                practice_id: *practice_id,
                denominator: *denominator,
                numerator: numerators
                    .get(&(month, *practice_id))
                    .copied()
                    .unwrap_or(0),
            });
        }
    }

    let practice_count = practices.len();
    let all_practices = full.practice_count();
    let coverage = Coverage {
        practice_count_thou: round_dp(practice_count as f64 / 1000., 1),
        practices_percent: if all_practices == 0 {
            0.
        } else {
            round_dp(100. * practice_count as f64 / all_practices as f64, 1)
        },
    };
    event!(
        Level::DEBUG,
        "panel for {}: {} months x {} practices",
        code,
        months.len(),
        practice_count
    );
    Ok((Panel { code, rows }, coverage))
}

/// A single practice-month in a panel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct PanelRow {
    pub month: NaiveDate,
    pub practice_id: PracticeId,
    pub denominator: u64,
    pub numerator: u64,
}

impl PanelRow {
    /// Events per 1000 patients. `None` for a practice with no patients.
    pub fn rate(&self) -> Option<f64> {
        if self.denominator == 0 {
            None
        } else {
            Some(1000. * self.numerator as f64 / self.denominator as f64)
        }
    }
}

/// The quantiles of practice rates in one month.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthQuantiles {
    pub month: NaiveDate,
    /// One value per requested quantile, or empty if no practice has a rate this month.
    pub values: Vec<f64>,
}

pub const DECILES: [f64; 9] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9];

/// Every practice that used a code, in every month, ordered by month then practice.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    code: Ctv3Code,
    rows: Vec<PanelRow>,
}

impl Panel {
    /// A panel from rows that are already complete, ordering them by month then practice.
    pub fn from_rows(code: Ctv3Code, mut rows: Vec<PanelRow>) -> Self {
        rows.sort_by_key(|row| (row.month, row.practice_id));
        Self { code, rows }
    }

    pub fn code(&self) -> Ctv3Code {
        self.code
    }

    pub fn rows(&self) -> &[PanelRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The practice rates (per 1000) in `month`, skipping practices with no patients.
    pub fn rates_at(&self, month: NaiveDate) -> Vec<R64> {
        self.rows
            .iter()
            .filter(|row| row.month == month)
            .filter_map(PanelRow::rate)
            .map(r64)
            .collect()
    }

    pub fn total_numerator(&self) -> u64 {
        self.rows.iter().map(|row| row.numerator).sum()
    }

    pub fn months(&self) -> Vec<NaiveDate> {
        self.rows
            .iter()
            .map(|row| row.month)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn last_month(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|row| row.month).max()
    }

    pub fn practice_count(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row.practice_id)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// The given quantiles of practice rates for every month.
    pub fn quantiles_by_month(&self, qs: &[f64]) -> Vec<MonthQuantiles> {
        self.months()
            .into_iter()
            .map(|month| {
                let mut rates = self.rates_at(month);
                rates.sort_unstable();
                let values = qs
                    .iter()
                    .filter_map(|q| quantile_sorted(&rates, *q))
                    .collect();
                MonthQuantiles { month, values }
            })
            .collect()
    }

    /// The 10th to 90th percentiles of practice rates for every month.
    pub fn deciles(&self) -> Vec<MonthQuantiles> {
        self.quantiles_by_month(&DECILES)
    }
}
