//! Label how a code's activity changed between fixed points in the study.
//!
//! For each panel we take the median practice rate (events per 1000 patients) at:
//!
//!  - the baseline month, before anything happened;
//!  - the onset month;
//!  - the peak month;
//!  - the last month of data, and the same month a year earlier.
//!
//! The change from baseline to peak and the change over the year to the last month each get a
//! [`Position`], and the two together give the [`Overall`] label.
use chrono::{Datelike, NaiveDate};
use qu::ick_use::*;
use serde::Serialize;
use std::fmt;

use crate::{
    series::Panel,
    util::{quantile, round_dp},
};

/// The months compared, and how many events a panel needs before it is worth classifying.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct Anchors {
    pub baseline: NaiveDate,
    pub onset: NaiveDate,
    pub peak: NaiveDate,
    /// Panels with this many events or fewer are [`Trend::InsufficientData`].
    pub min_events: u64,
}

impl Default for Anchors {
    fn default() -> Self {
        crate::config::StudyConfig::default().anchors()
    }
}

/// Percentage change from `b` to `a`.
///
/// Any activity from nothing counts as a 100% increase, and no activity from nothing is no
/// change.
pub fn pct_change(a: f64, b: f64) -> f64 {
    if b > 0. {
        100. * (a - b) / b
    } else if a > 0. {
        100.
    } else {
        0.
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Position {
    Increase,
    NoChange,
    SmallDrop,
    LargeDrop,
    Other,
}

impl Position {
    /// Label a percentage change. The thresholds are exclusive, so exactly -60% (or a missing
    /// change) is `Other`, and exactly 15% is a small drop.
    pub fn from_change(change: Option<f64>) -> Self {
        let x = match change {
            Some(x) => x,
            None => return Position::Other,
        };
        if x > 15. {
            Position::Increase
        } else if x < 15. && x > -15. {
            Position::NoChange
        } else if x > -60. {
            Position::SmallDrop
        } else if x < -60. {
            Position::LargeDrop
        } else {
            Position::Other
        }
    }

    pub fn is_drop(self) -> bool {
        matches!(self, Position::SmallDrop | Position::LargeDrop)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Position::Increase => "Increase",
            Position::NoChange => "No change",
            Position::SmallDrop => "Small drop",
            Position::LargeDrop => "Large drop",
            Position::Other => "Other",
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum Overall {
    Increase,
    NoChange,
    SustainedDrop,
    Recovered,
    Other,
}

impl Overall {
    /// The first rule that applies wins.
    pub fn from_changes(
        peak_position: Position,
        end_position: Position,
        peak_change: Option<f64>,
        recovery_change: Option<f64>,
    ) -> Self {
        if peak_position == Position::Increase || end_position == Position::Increase {
            Overall::Increase
        } else if peak_position == Position::NoChange {
            Overall::NoChange
        } else if end_position.is_drop() {
            Overall::SustainedDrop
        } else if matches!(
            (peak_change, recovery_change),
            (Some(peak), Some(recovery)) if peak < -15. && recovery > -15.
        ) {
            Overall::Recovered
        } else {
            Overall::Other
        }
    }
}

impl fmt::Display for Overall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Overall::Increase => "Increase",
            Overall::NoChange => "No change",
            Overall::SustainedDrop => "Sustained drop",
            Overall::Recovered => "Recovered",
            Overall::Other => "Other",
        })
    }
}

/// Everything computed for one panel.
///
/// Medians and ranges are `None` when no practice has a rate in that month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub anchors: Anchors,
    pub end_month: NaiveDate,
    pub total_events: u64,

    pub baseline_median: Option<f64>,
    pub end_year_ago_median: Option<f64>,
    pub onset_median: Option<f64>,
    pub peak_median: Option<f64>,
    pub end_median: Option<f64>,

    /// Inter-decile range (P90 - P10).
    pub onset_idr: Option<f64>,
    pub peak_idr: Option<f64>,
    pub end_idr: Option<f64>,

    /// % change from baseline to peak.
    pub peak_change: Option<f64>,
    /// % change over the year to the last month.
    pub recovery_change: Option<f64>,
    pub peak_position: Position,
    pub end_position: Position,
    pub overall: Overall,
}

/// The result of classifying a panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Trend {
    /// Too few events to say anything.
    InsufficientData { total_events: u64 },
    Classified(Classification),
}

impl Trend {
    pub fn classification(&self) -> Option<&Classification> {
        match self {
            Trend::Classified(classification) => Some(classification),
            Trend::InsufficientData { .. } => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, Trend::InsufficientData { .. })
    }
}

/// The same month one year earlier.
pub fn year_before(month: NaiveDate) -> Option<NaiveDate> {
    month.with_year(month.year() - 1)
}

/// Classify the trend in a panel, using `end_month` as the last month of data.
///
/// Sparse panels are reported as [`Trend::InsufficientData`] before any statistics are
/// computed.
pub fn classify(panel: &Panel, end_month: NaiveDate, anchors: &Anchors) -> Trend {
    let total_events = panel.total_numerator();
    if total_events <= anchors.min_events {
        event!(
            Level::DEBUG,
            "{}: {} events is too few to classify",
            panel.code(),
            total_events
        );
        return Trend::InsufficientData { total_events };
    }

    let median = |month: Option<NaiveDate>| {
        month.and_then(|month| quantile(&panel.rates_at(month), 0.5))
    };
    let idr = |month: NaiveDate| {
        let rates = panel.rates_at(month);
        Some(quantile(&rates, 0.9)? - quantile(&rates, 0.1)?)
    };

    let end_year_ago = year_before(end_month);
    let baseline_median = median(Some(anchors.baseline));
    let end_year_ago_median = median(end_year_ago);
    let onset_median = median(Some(anchors.onset));
    let peak_median = median(Some(anchors.peak));
    let end_median = median(Some(end_month));

    let change = |a: Option<f64>, b: Option<f64>| Some(pct_change(a?, b?));
    let peak_change = change(peak_median, baseline_median);
    let recovery_change = change(end_median, end_year_ago_median);
    let peak_position = Position::from_change(peak_change);
    let end_position = Position::from_change(recovery_change);
    let overall = Overall::from_changes(peak_position, end_position, peak_change, recovery_change);

    Trend::Classified(Classification {
        anchors: *anchors,
        end_month,
        total_events,
        baseline_median,
        end_year_ago_median,
        onset_median,
        peak_median,
        end_median,
        onset_idr: idr(anchors.onset),
        peak_idr: idr(anchors.peak),
        end_idr: idr(end_month),
        peak_change,
        recovery_change,
        peak_position,
        end_position,
        overall,
    })
}

/// `x` to 1 d.p., or `-` if missing.
struct Dp1(Option<f64>);

impl fmt::Display for Dp1 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(x) => write!(f, "{}", round_dp(x, 1)),
            None => f.write_str("-"),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let onset = self.anchors.onset.format("%b");
        let peak = self.anchors.peak.format("%B");
        let end = self.end_month.format("%B");
        writeln!(
            f,
            "{} median: {} (IDR {}), {} median: {} (IDR {}), {} median: {} (IDR {})",
            onset,
            Dp1(self.onset_median),
            Dp1(self.onset_idr),
            peak,
            Dp1(self.peak_median),
            Dp1(self.peak_idr),
            end,
            Dp1(self.end_median),
            Dp1(self.end_idr),
        )?;
        write!(
            f,
            "Change in median from {}: {} {}% ({}); {} {}% ({}); Overall classification: {}",
            self.anchors.baseline.year(),
            peak,
            Dp1(self.peak_change),
            self.peak_position,
            end,
            Dp1(self.recovery_change),
            self.end_position,
            self.overall,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        ctv3::Ctv3Code,
        series::{PanelRow, PracticeId},
    };

    fn ymd(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    /// One practice with 1000 patients, so the rate is the numerator.
    fn panel(counts: &[(NaiveDate, u64)]) -> Panel {
        panel_for(counts.iter().map(|(month, numerator)| (*month, 1, *numerator)))
    }

    fn panel_for(counts: impl Iterator<Item = (NaiveDate, PracticeId, u64)>) -> Panel {
        let rows = counts
            .map(|(month, practice_id, numerator)| PanelRow {
                month,
                practice_id,
                denominator: 1000,
                numerator,
            })
            .collect();
        Panel::from_rows(Ctv3Code::parse("XaJ4").unwrap(), rows)
    }

    #[test]
    fn pct_change_boundaries() {
        assert_eq!(pct_change(0., 0.), 0.);
        assert_eq!(pct_change(5., 0.), 100.);
        assert_eq!(pct_change(150., 100.), 50.);
        assert_eq!(pct_change(40., 100.), -60.);
    }

    #[test]
    fn positions() {
        assert_eq!(Position::from_change(Some(15.1)), Position::Increase);
        assert_eq!(Position::from_change(Some(15.)), Position::SmallDrop);
        assert_eq!(Position::from_change(Some(-14.9)), Position::NoChange);
        assert_eq!(Position::from_change(Some(-15.)), Position::SmallDrop);
        assert_eq!(Position::from_change(Some(-59.9)), Position::SmallDrop);
        assert_eq!(Position::from_change(Some(-60.)), Position::Other);
        assert_eq!(Position::from_change(Some(-61.)), Position::LargeDrop);
        assert_eq!(Position::from_change(None), Position::Other);
    }

    #[test]
    fn overall_order() {
        use Position::*;
        assert_eq!(
            Overall::from_changes(LargeDrop, Increase, Some(-70.), Some(20.)),
            Overall::Increase
        );
        assert_eq!(
            Overall::from_changes(NoChange, SmallDrop, Some(0.), Some(-20.)),
            Overall::NoChange
        );
        assert_eq!(
            Overall::from_changes(LargeDrop, SmallDrop, Some(-70.), Some(-20.)),
            Overall::SustainedDrop
        );
        assert_eq!(
            Overall::from_changes(SmallDrop, Other, Some(-20.), None),
            Overall::Other
        );
    }

    #[test]
    fn recovered_example() {
        let end = ymd(2020, 12);
        let panel = panel(&[
            (ymd(2019, 4), 100),
            (ymd(2019, 12), 95),
            (ymd(2020, 2), 100),
            (ymd(2020, 4), 40),
            (end, 90),
        ]);
        let trend = classify(&panel, end, &Anchors::default());
        let c = trend.classification().unwrap();
        assert_eq!(c.baseline_median, Some(100.));
        assert_eq!(c.peak_change, Some(-60.));
        assert!((c.recovery_change.unwrap() + 5.263).abs() < 1e-3);
        // exactly -60% sits on neither side of the drop thresholds
        assert_eq!(c.peak_position, Position::Other);
        assert_eq!(c.end_position, Position::NoChange);
        assert_eq!(c.overall, Overall::Recovered);

        let text = c.to_string();
        assert!(text.starts_with("Feb median: 100 (IDR 0), April median: 40 (IDR 0)"));
        assert!(text.contains("Change in median from 2019: April -60% (Other)"));
        assert!(text.ends_with("Overall classification: Recovered"));
    }

    #[test]
    fn medians_and_ranges() {
        let peak = ymd(2020, 4);
        let panel = panel_for(
            [(peak, 1, 10), (peak, 2, 20), (peak, 3, 30), (peak, 4, 40)].into_iter(),
        );
        let c = classify(&panel, peak, &Anchors::default());
        let c = c.classification().unwrap();
        assert_eq!(c.peak_median, Some(25.));
        assert!((c.peak_idr.unwrap() - 24.).abs() < 1e-9);
        // no data at the baseline
        assert_eq!(c.baseline_median, None);
        assert_eq!(c.peak_change, None);
        assert_eq!(c.peak_position, Position::Other);
    }

    #[test]
    fn insufficient_data() {
        let sparse = panel(&[(ymd(2019, 4), 4), (ymd(2020, 4), 6)]);
        let trend = classify(&sparse, ymd(2020, 4), &Anchors::default());
        assert_eq!(trend, Trend::InsufficientData { total_events: 10 });
        assert!(trend.classification().is_none());

        let enough = panel(&[(ymd(2019, 4), 5), (ymd(2020, 4), 6)]);
        assert!(!classify(&enough, ymd(2020, 4), &Anchors::default()).is_insufficient());
    }
}
