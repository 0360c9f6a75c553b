//! Narrow a described code inventory down to the codes relevant to one topic.
use qu::ick_use::*;
use regex::{RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    ops::Deref,
    path::Path,
    str::FromStr,
};

use crate::{enrich::EnrichedRow, util::round_dp, ArcStr};

/// Whether matching rows are kept or removed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    In,
    Out,
}

impl FromStr for FilterMode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim() {
            s if s.eq_ignore_ascii_case("in") => FilterMode::In,
            s if s.eq_ignore_ascii_case("out") => FilterMode::Out,
            other => bail!("expected \"in\" or \"out\", found \"{}\"", other),
        })
    }
}

/// How several keywords combine when filtering out.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordExclusion {
    /// Remove rows matching any keyword.
    #[default]
    Cumulative,
    /// Only remove rows matching the last keyword, as the historical notebooks did.
    LastOnly,
}

/// Case-insensitive literal keywords, matched anywhere in a description.
#[derive(Debug, Clone)]
struct Keywords {
    set: RegexSet,
}

impl Keywords {
    fn new(keywords: &[String]) -> Result<Self> {
        let set = RegexSetBuilder::new(keywords.iter().map(|kw| regex::escape(kw)))
            .case_insensitive(true)
            .build()
            .context("building keyword matcher")?;
        Ok(Self { set })
    }

    /// Which keywords match a row. Rows without a description match as if it were empty.
    fn matches(&self, row: &EnrichedRow) -> regex::SetMatches {
        self.set.matches(row.description.as_deref().unwrap_or(""))
    }
}

/// Keyword and concept rules to apply to a list of codes.
///
/// ```
/// # use ctv3_decile_trends::{CodelistFilter, FilterMode};
/// let filter = CodelistFilter::new(FilterMode::In)
///     .keywords(["heart", "pulse"])
///     .label("High level");
/// ```
#[derive(Debug, Clone)]
pub struct CodelistFilter {
    keywords: Vec<String>,
    concepts: Vec<String>,
    mode: FilterMode,
    exclusion: KeywordExclusion,
    label: String,
    event_count: bool,
}

impl CodelistFilter {
    pub fn new(mode: FilterMode) -> Self {
        Self {
            keywords: vec![],
            concepts: vec![],
            mode,
            exclusion: KeywordExclusion::default(),
            label: String::new(),
            event_count: false,
        }
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn concepts<I, S>(mut self, concepts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.concepts.extend(concepts.into_iter().map(Into::into));
        self
    }

    pub fn exclusion(mut self, exclusion: KeywordExclusion) -> Self {
        self.exclusion = exclusion;
        self
    }

    /// The name used in the diagnostics (e.g. "High level").
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Also log the total number of events after filtering.
    pub fn event_count(mut self, event_count: bool) -> Self {
        self.event_count = event_count;
        self
    }

    /// Whether there are no rules at all.
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.concepts.is_empty()
    }

    /// Filter `rows`, returning a new list deduplicated by code and sorted by events, largest
    /// first.
    ///
    /// Keywords are applied first, then concepts:
    ///
    ///  - keywords in: rows matching any keyword;
    ///  - keywords out: all rows except those matching a keyword (see [`KeywordExclusion`]);
    ///  - concepts in: add rows (from the whole input) with one of the concepts;
    ///  - concepts out: remove rows with one of the concepts, from the keyword result if that is
    ///    non-empty and otherwise from the whole input.
    ///
    /// With no rules at all the whole input is returned.
    pub fn apply(&self, rows: &[EnrichedRow]) -> Result<Codelist> {
        let mut filtered: Vec<&EnrichedRow> = vec![];

        let keywords_applied = !self.keywords.is_empty();
        if keywords_applied {
            let keywords = Keywords::new(&self.keywords)?;
            let matches: Vec<_> = rows.iter().map(|row| keywords.matches(row)).collect();
            let matches = &matches;
            filtered = match (self.mode, self.exclusion) {
                // keyword by keyword, so ties in event count keep the keyword order
                (FilterMode::In, _) => (0..self.keywords.len())
                    .flat_map(|idx| {
                        rows.iter()
                            .zip(matches)
                            .filter(move |(_, m)| m.matched(idx))
                            .map(|(row, _)| row)
                    })
                    .collect(),
                (FilterMode::Out, KeywordExclusion::Cumulative) => rows
                    .iter()
                    .zip(matches)
                    .filter(|(_, m)| !m.matched_any())
                    .map(|(row, _)| row)
                    .collect(),
                (FilterMode::Out, KeywordExclusion::LastOnly) => {
                    let last = self.keywords.len() - 1;
                    rows.iter()
                        .zip(matches)
                        .filter(|(_, m)| !m.matched(last))
                        .map(|(row, _)| row)
                        .collect()
                }
            };
        }

        if !self.concepts.is_empty() {
            match self.mode {
                FilterMode::In => {
                    for concept in &self.concepts {
                        filtered.extend(rows.iter().filter(|row| *row.concept_desc == **concept));
                    }
                }
                FilterMode::Out => {
                    if filtered.is_empty() {
                        filtered = rows.iter().collect();
                    }
                    filtered.retain(|row| !self.has_concept(row));
                }
            }
        } else if !keywords_applied {
            filtered = rows.iter().collect();
        }

        let mut seen = HashSet::new();
        let mut out: Vec<EnrichedRow> = filtered
            .into_iter()
            .filter(|row| seen.insert(row.code))
            .cloned()
            .collect();
        // `sort_by` is stable
        out.sort_by(|a, b| b.events_mill.total_cmp(&a.events_mill));
        let out = Codelist::new(out);

        event!(Level::INFO, "{} codes: {}", self.label, out.len());
        if self.event_count {
            event!(
                Level::INFO,
                "{} event count: {} million",
                self.label,
                out.total_events_mill()
            );
        }
        Ok(out)
    }

    fn has_concept(&self, row: &EnrichedRow) -> bool {
        self.concepts
            .iter()
            .any(|concept| **concept == *row.concept_desc)
    }
}

/// Filter `rows` in or out by keywords and concepts.
///
/// Shorthand for [`CodelistFilter`] with the default keyword exclusion.
pub fn filter_codelists(
    rows: &[EnrichedRow],
    keywords: &[String],
    concepts: &[String],
    mode: FilterMode,
    label: &str,
) -> Result<Codelist> {
    CodelistFilter::new(mode)
        .keywords(keywords.iter().cloned())
        .concepts(concepts.iter().cloned())
        .label(label)
        .apply(rows)
}

/// Load the high level and detailed codelists produced for `end_date` from `dir`, and filter
/// both in with the same keywords and concepts.
///
/// The files are `level_two_codes_{end_date}.csv` and `combined_codelist_{end_date}.csv`.
pub fn load_filter_codelists(
    dir: impl AsRef<Path>,
    end_date: &str,
    keywords: &[String],
    concepts: &[String],
) -> Result<(Codelist, Codelist)> {
    let dir = dir.as_ref();
    let high_level = Codelist::load(dir.join(high_level_file_name(end_date)))?;
    let detailed = Codelist::load(dir.join(detailed_file_name(end_date)))?;

    let filter = CodelistFilter::new(FilterMode::In)
        .keywords(keywords.iter().cloned())
        .concepts(concepts.iter().cloned());
    let high_level = filter.clone().label("High level").apply(&high_level)?;
    let detailed = filter.label("Detailed").apply(&detailed)?;
    Ok((high_level, detailed))
}

pub fn high_level_file_name(end_date: &str) -> String {
    format!("level_two_codes_{}.csv", end_date)
}

pub fn detailed_file_name(end_date: &str) -> String {
    format!("combined_codelist_{}.csv", end_date)
}

/// An ordered list of described codes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Codelist {
    rows: Vec<EnrichedRow>,
}

/// The total activity of one concept within a codelist.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub name: ArcStr,
    pub events_mill: f64,
    pub codes: usize,
}

impl Codelist {
    pub fn new(rows: Vec<EnrichedRow>) -> Self {
        Self { rows }
    }

    /// Load a codelist CSV (the layout written by `build_codelist`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let rows: Vec<EnrichedRow> = crate::load_csv(path)?;
        event!(
            Level::DEBUG,
            "{} codes in codelist \"{}\"",
            rows.len(),
            path.display()
        );
        Ok(Self::new(rows))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        crate::save_csv(&self.rows, path)
    }

    /// Apply a filter to this list.
    pub fn filter(&self, filter: &CodelistFilter) -> Result<Codelist> {
        filter.apply(&self.rows)
    }

    /// Total events in millions, to 2 d.p.
    pub fn total_events_mill(&self) -> f64 {
        round_dp(self.rows.iter().map(|row| row.events_mill).sum(), 2)
    }

    /// The first `n` codes (all of them if there are fewer).
    pub fn head(&self, n: usize) -> Codelist {
        Self::new(self.rows.iter().take(n).cloned().collect())
    }

    /// Put every code in the same (topic) category.
    pub fn with_category(mut self, category: &str) -> Self {
        let category = ArcStr::from(category);
        for row in &mut self.rows {
            row.concept_desc = category.clone();
        }
        self
    }

    /// Categories by total events, largest first, skipping any in `excluded`.
    pub fn categories(&self, excluded: &[String]) -> Vec<Category> {
        let mut totals: BTreeMap<ArcStr, (f64, usize)> = BTreeMap::new();
        for row in &self.rows {
            let entry = totals.entry(row.concept_desc.clone()).or_default();
            entry.0 += row.events_mill;
            entry.1 += 1;
        }
        let mut out: Vec<Category> = totals
            .into_iter()
            .filter(|(name, _)| !excluded.iter().any(|ex| **ex == **name))
            .map(|(name, (events_mill, codes))| Category {
                name,
                events_mill: round_dp(events_mill, 2),
                codes,
            })
            .collect();
        out.sort_by(|a, b| b.events_mill.total_cmp(&a.events_mill));
        out
    }

    /// The codes in one category, in list order.
    pub fn in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a EnrichedRow> {
        self.rows
            .iter()
            .filter(move |row| *row.concept_desc == *category)
    }

    pub fn into_rows(self) -> Vec<EnrichedRow> {
        self.rows
    }

    /// The codes as a table of code, description and activity.
    pub fn term_table(&self) -> term_data_table::Table {
        contents_table(self.rows.iter())
    }
}

/// A table of code, description, events and patients (millions).
pub(crate) fn contents_table<'a>(
    rows: impl Iterator<Item = &'a EnrichedRow>,
) -> term_data_table::Table<'static> {
    use term_data_table::{Cell, Row, Table};
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Code"))
            .with_cell(Cell::from("Description"))
            .with_cell(Cell::from("Events (mill)"))
            .with_cell(Cell::from("Patients (mill)")),
    );
    for row in rows {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(row.code.to_string()))
                .with_cell(Cell::from(row.description().to_string()))
                .with_cell(Cell::from(row.events_mill.to_string()))
                .with_cell(Cell::from(row.patients_mill.to_string())),
        );
    }
    table
}

impl Deref for Codelist {
    type Target = [EnrichedRow];
    fn deref(&self) -> &Self::Target {
        &self.rows
    }
}

impl FromIterator<EnrichedRow> for Codelist {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = EnrichedRow>,
    {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for Codelist {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.term_table().for_terminal())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ctv3::Ctv3Code;

    fn row(code: &str, description: Option<&str>, events_mill: f64, concept: &str) -> EnrichedRow {
        let code = Ctv3Code::parse(code).unwrap();
        EnrichedRow {
            code,
            description: description.map(ArcStr::from),
            events: (events_mill * 1_000_000.) as u64,
            patients: 0,
            events_mill,
            patients_mill: 0.,
            first_digit: code.first_digit(),
            digits: code.len(),
            concept_desc: concept.into(),
        }
    }

    fn rows() -> Vec<EnrichedRow> {
        vec![
            row("246", Some("O/E - blood pressure reading"), 3.2, "Examination / Signs"),
            row("G5", Some("Other forms of heart disease"), 0.4, "Circulatory disorders"),
            row("2432", Some("O/E - pulse rate"), 1.1, "Examination / Signs"),
            row("9N1", Some("Site of encounter"), 8.5, "Administration"),
            row("XaJ", None, 0.2, "Other"),
            row("7L1", Some("Heart transfusion"), 0.05, "Procedure"),
        ]
    }

    fn codes(list: &Codelist) -> Vec<&str> {
        list.iter().map(|row| row.code.as_str()).collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keywords_in() {
        let rows = rows();
        let list = filter_codelists(
            &rows,
            &strings(&["HEART", "pulse", "heart"]),
            &[],
            FilterMode::In,
            "test",
        )
        .unwrap();
        // deduplicated and sorted by events
        assert_eq!(codes(&list), ["2432", "G5", "7L1"]);
    }

    #[test]
    fn keywords_are_literal() {
        let rows = rows();
        let list =
            filter_codelists(&rows, &strings(&["o/e - (b"]), &[], FilterMode::In, "").unwrap();
        assert!(list.is_empty());
        let list =
            filter_codelists(&rows, &strings(&["o/e - b"]), &[], FilterMode::In, "").unwrap();
        assert_eq!(codes(&list), ["246"]);
    }

    #[test]
    fn concepts_in_union() {
        let rows = rows();
        let list = filter_codelists(
            &rows,
            &strings(&["pulse"]),
            &strings(&["Administration"]),
            FilterMode::In,
            "",
        )
        .unwrap();
        assert_eq!(codes(&list), ["9N1", "2432"]);
    }

    #[test]
    fn filter_in_is_idempotent() {
        let rows = rows();
        let keywords = strings(&["heart", "o/e"]);
        let concepts = strings(&["Other"]);
        let once = filter_codelists(&rows, &keywords, &concepts, FilterMode::In, "").unwrap();
        let twice = filter_codelists(&once, &keywords, &concepts, FilterMode::In, "").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn exclusion_semantics() {
        let rows = rows();
        let keywords = strings(&["heart", "pulse"]);

        let cumulative = CodelistFilter::new(FilterMode::Out)
            .keywords(keywords.iter().cloned())
            .apply(&rows)
            .unwrap();
        assert_eq!(codes(&cumulative), ["9N1", "246", "XaJ"]);

        let last_only = CodelistFilter::new(FilterMode::Out)
            .keywords(keywords.iter().cloned())
            .exclusion(KeywordExclusion::LastOnly)
            .apply(&rows)
            .unwrap();
        assert_eq!(codes(&last_only), ["9N1", "246", "G5", "XaJ", "7L1"]);
    }

    #[test]
    fn concepts_out() {
        let rows = rows();
        let list = filter_codelists(
            &rows,
            &strings(&["heart"]),
            &strings(&["Procedure"]),
            FilterMode::Out,
            "",
        )
        .unwrap();
        assert_eq!(codes(&list), ["9N1", "246", "2432", "XaJ"]);

        // nothing left after keywords: concepts apply to the whole list
        let everything = strings(&["o/e", "heart", "site", "Heart"]);
        let list = CodelistFilter::new(FilterMode::Out)
            .keywords(everything.iter().cloned().chain(["xyz".to_string()]))
            .concepts(["Other"])
            .apply(&rows[..4])
            .unwrap();
        assert_eq!(codes(&list), ["9N1", "246", "2432", "G5"]);
    }

    #[test]
    fn no_rules_is_everything() {
        let mut rows = rows();
        rows.push(rows[0].clone());
        let list = filter_codelists(&rows, &[], &[], FilterMode::Out, "").unwrap();
        assert_eq!(codes(&list), ["9N1", "246", "2432", "G5", "XaJ", "7L1"]);
        // a keyword that matches nothing gives nothing
        let list = filter_codelists(&rows, &strings(&["zzz"]), &[], FilterMode::In, "").unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn categories() {
        let list = Codelist::new(rows());
        let cats = list.categories(&strings(&["Other"]));
        let names: Vec<&str> = cats.iter().map(|cat| &*cat.name).collect();
        assert_eq!(
            names,
            ["Administration", "Examination / Signs", "Circulatory disorders", "Procedure"]
        );
        assert_eq!(cats[1].events_mill, 4.3);
        assert_eq!(cats[1].codes, 2);
        assert_eq!(list.total_events_mill(), 13.45);

        let topic = list.head(2).with_category("Cardiovascular");
        assert_eq!(topic.len(), 2);
        assert!(topic.iter().all(|row| &*row.concept_desc == "Cardiovascular"));
        assert_eq!(topic.in_category("Cardiovascular").count(), 2);
    }
}
