use crate::ArcStr;
use chrono::NaiveDate;
use noisy_float::prelude::*;
use serde::{de, Deserialize, Deserializer, Serializer};
use std::{fs, io, path::Path};

/// Converts a not found error to Ok(false)
pub fn path_exists(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Round to `dp` decimal places.
pub fn round_dp(value: f64, dp: i32) -> f64 {
    let factor = 10f64.powi(dp);
    (value * factor).round() / factor
}

/// The `q`th quantile of some values, interpolating linearly between the two nearest order
/// statistics (numpy/pandas "linear" method).
///
/// `None` if there are no values.
pub fn quantile(values: &[R64], q: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    quantile_sorted(&sorted, q)
}

/// `quantile` for values that are already in ascending order.
pub fn quantile_sorted(sorted: &[R64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0., 1.) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let (lo_val, hi_val) = (sorted[lo].raw(), sorted[hi].raw());
    Some(lo_val + (hi_val - lo_val) * (pos - lo as f64))
}

// Helpers for serde to parse fields with quirks.

/// Parse a string, but map "null" to `None` (in addition to the default "" -> None mapping)
pub fn optional_string<'de, D>(d: D) -> Result<Option<ArcStr>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(d)?;
    match s {
        Some(s) if !(s.eq_ignore_ascii_case("null") || s.is_empty()) => Ok(Some(s.into())),
        _ => Ok(None),
    }
}

/// Parse a date written either `yyyymmdd` (as the study end date is) or `yyyy-mm-dd`.
pub fn compact_date<'de, D>(d: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(d)?;
    parse_date(&s).map_err(de::Error::custom)
}

pub fn parse_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y%m%d").or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
}

/// Write dates as `yyyymmdd`, the inverse of `compact_date`.
pub fn compact_date_ser<S>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_str(&date.format("%Y%m%d").to_string())
}

pub fn header(header: &str) {
    let len = header.len();
    print!("\n{}\n", header);
    for _ in 0..len {
        print!("=");
    }
    println!("\n")
}

#[cfg(test)]
mod test {
    use super::{parse_date, quantile, round_dp};
    use chrono::NaiveDate;
    use noisy_float::prelude::*;

    #[test]
    fn linear_quantiles() {
        let values: Vec<R64> = [4., 1., 3., 2.].iter().map(|v| r64(*v)).collect();
        assert_eq!(quantile(&values, 0.5), Some(2.5));
        assert_eq!(quantile(&values, 0.), Some(1.));
        assert_eq!(quantile(&values, 1.), Some(4.));
        assert!((quantile(&values, 0.1).unwrap() - 1.3).abs() < 1e-9);
        assert_eq!(quantile(&[], 0.5), None);
        assert_eq!(quantile(&[r64(7.)], 0.9), Some(7.));
    }

    #[test]
    fn rounding() {
        assert_eq!(round_dp(1_234_567. / 1_000_000., 2), 1.23);
        assert_eq!(round_dp(12.345_6, 1), 12.3);
    }

    #[test]
    fn dates() {
        let date = NaiveDate::from_ymd_opt(2020, 12, 31).unwrap();
        assert_eq!(parse_date("20201231").unwrap(), date);
        assert_eq!(parse_date("2020-12-31").unwrap(), date);
        assert!(parse_date("31/12/2020").is_err());
    }
}
