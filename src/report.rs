//! Run a topic: pull the data for a codelist, then build, classify and chart a panel per code.
//!
//! The data store and chart renderer are behind the [`EventStore`] and [`ChartRenderer`]
//! traits. [`LocalStore`] (CSV files) and [`DecileTable`] (terminal tables) let the whole thing
//! run without a database or a plotting library.
use chrono::NaiveDate;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    cell::Cell,
    collections::BTreeMap,
    fmt, io,
    path::Path,
    rc::Rc,
};

use crate::{
    codelist::{contents_table, Codelist},
    config::StudyConfig,
    ctv3::{CodeDictionary, Ctv3Code},
    enrich::EnrichedRow,
    series::{all_pracs, month_start, Coverage, Extract, ExtractRow, Panel},
    trend::{classify, Trend},
    util::round_dp,
    ArcStr,
};

/// How often a full length code was used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeCount {
    #[serde(rename = "first_digits")]
    pub code: Ctv3Code,
    pub events: u64,
}

/// Somewhere coded events can be extracted from.
pub trait EventStore {
    /// Open a connection. It is closed when dropped.
    fn open(&self) -> Result<Box<dyn StoreConnection + '_>>;
}

pub trait StoreConnection {
    /// Event counts per code, month and practice, for codes starting with any of `prefixes`,
    /// from the month containing `start` up to `end` inclusive.
    ///
    /// Codes come back in canonical form, and months as their first day.
    fn extract(&mut self, prefixes: &[Ctv3Code], start: NaiveDate, end: NaiveDate)
        -> Result<Extract>;

    /// Total events per full length code starting with any of `prefixes`, between `start` and
    /// `end` (exclusive), keeping codes with more than `threshold` events.
    fn code_counts(
        &mut self,
        prefixes: &[Ctv3Code],
        start: NaiveDate,
        end: NaiveDate,
        threshold: u64,
    ) -> Result<Vec<CodeCount>>;
}

/// An event store held in memory, usually loaded from `extract.csv`.
#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    events: Extract,
    live: Rc<Cell<usize>>,
}

impl LocalStore {
    pub fn new(events: Extract) -> Self {
        Self {
            events,
            live: Rc::new(Cell::new(0)),
        }
    }

    /// Load `extract.csv` from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Extract::load_csv(dir.as_ref().join("extract.csv"))?))
    }

    /// The number of connections currently open.
    pub fn live_connections(&self) -> usize {
        self.live.get()
    }
}

impl EventStore for LocalStore {
    fn open(&self) -> Result<Box<dyn StoreConnection + '_>> {
        self.live.set(self.live.get() + 1);
        event!(Level::DEBUG, "opened local store connection");
        Ok(Box::new(LocalConnection { store: self }))
    }
}

struct LocalConnection<'a> {
    store: &'a LocalStore,
}

impl LocalConnection<'_> {
    fn matching<'b>(
        &'b self,
        prefixes: &'b [Ctv3Code],
    ) -> impl Iterator<Item = &'b ExtractRow> + 'b {
        self.store
            .events
            .iter()
            .filter(move |row| prefixes.iter().any(|prefix| row.code.starts_with(*prefix)))
    }
}

impl StoreConnection for LocalConnection<'_> {
    fn extract(
        &mut self,
        prefixes: &[Ctv3Code],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Extract> {
        let start = month_start(start);
        let out: Extract = self
            .matching(prefixes)
            .filter(|row| row.month >= start && row.month <= end)
            .cloned()
            .collect();
        event!(
            Level::DEBUG,
            "extracted {} rows for {} prefixes",
            out.len(),
            prefixes.len()
        );
        Ok(out)
    }

    fn code_counts(
        &mut self,
        prefixes: &[Ctv3Code],
        start: NaiveDate,
        end: NaiveDate,
        threshold: u64,
    ) -> Result<Vec<CodeCount>> {
        let start = month_start(start);
        let mut counts: BTreeMap<Ctv3Code, u64> = BTreeMap::new();
        for row in self
            .matching(prefixes)
            .filter(|row| row.month >= start && row.month < end)
        {
            *counts.entry(row.code).or_default() += row.numerator;
        }
        Ok(counts
            .into_iter()
            .filter(|(_, events)| *events > threshold)
            .map(|(code, events)| CodeCount { code, events })
            .collect())
    }
}

impl Drop for LocalConnection<'_> {
    fn drop(&mut self) {
        self.store.live.set(self.store.live.get() - 1);
        event!(Level::DEBUG, "closed local store connection");
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChartOptions {
    /// Also draw the 1st-9th and 91st-99th percentiles.
    pub show_outer_percentiles: bool,
    pub show_legend: bool,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            show_outer_percentiles: false,
            show_legend: true,
        }
    }
}

/// Draws the distribution of practice rates over time.
pub trait ChartRenderer {
    /// Draw `panel` under `title`. Anything written to `out` lands between the report text
    /// before and after the chart.
    fn deciles_chart(
        &mut self,
        out: &mut dyn io::Write,
        title: &str,
        panel: &Panel,
        options: ChartOptions,
    ) -> Result;
}

/// Renders deciles as a table, one row per month.
#[derive(Debug, Default, Copy, Clone)]
pub struct DecileTable;

impl DecileTable {
    /// Percentiles shown, and their column names.
    fn percentiles(options: ChartOptions) -> Vec<(f64, String)> {
        let mut out: Vec<u32> = (1..10).map(|d| d * 10).collect();
        if options.show_outer_percentiles {
            out = (1..10).chain(out).chain(91..100).collect();
        }
        out.into_iter()
            .map(|p| (p as f64 / 100., format!("P{}", p)))
            .collect()
    }
}

impl ChartRenderer for DecileTable {
    fn deciles_chart(
        &mut self,
        out: &mut dyn io::Write,
        title: &str,
        panel: &Panel,
        options: ChartOptions,
    ) -> Result {
        use term_data_table::{Cell, Row, Table};

        let percentiles = Self::percentiles(options);
        let qs: Vec<f64> = percentiles.iter().map(|(q, _)| *q).collect();

        let mut header = Row::new().with_cell(Cell::from("Month"));
        for (_, name) in &percentiles {
            header = header.with_cell(Cell::from(name.as_str()));
        }
        let mut table = Table::new().with_row(header);
        for month in panel.quantiles_by_month(&qs) {
            let mut row = Row::new().with_cell(Cell::from(month.month.format("%Y-%m").to_string()));
            for value in &month.values {
                row = row.with_cell(Cell::from(round_dp(*value, 1).to_string()));
            }
            table.add_row(row);
        }
        writeln!(out, "Chart: {}", title)?;
        writeln!(out, "{}", table.for_terminal())?;
        if options.show_legend {
            writeln!(
                out,
                "Rate per 1000 patients at each percentile of {} practices (P50 is the median)",
                panel.practice_count()
            )?;
        }
        Ok(())
    }
}

/// A full length code found under a parent code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildCode {
    pub code: Ctv3Code,
    /// Events in thousands (1 d.p.).
    pub events_thou: f64,
    pub description: Option<ArcStr>,
}

/// The most used children of each parent code, most used first.
#[derive(Debug, Clone, Default)]
pub struct ChildCodes {
    by_parent: BTreeMap<Ctv3Code, Vec<ChildCode>>,
}

impl ChildCodes {
    /// Keep up to `cap` children for each of `parents`.
    pub fn from_counts(
        parents: &[Ctv3Code],
        counts: &[CodeCount],
        dictionary: &CodeDictionary,
        cap: usize,
    ) -> Self {
        let mut by_parent = BTreeMap::new();
        for parent in parents {
            let mut children: Vec<&CodeCount> = counts
                .iter()
                .filter(|count| count.code.starts_with(*parent))
                .collect();
            children.sort_by(|a, b| b.events.cmp(&a.events));
            let children = children
                .into_iter()
                .take(cap)
                .map(|count| ChildCode {
                    code: count.code,
                    events_thou: round_dp(count.events as f64 / 1000., 1),
                    description: dictionary.lookup(count.code),
                })
                .collect();
            by_parent.insert(*parent, children);
        }
        Self { by_parent }
    }

    /// The `n` most used children of `parent`.
    pub fn top(&self, parent: Ctv3Code, n: usize) -> &[ChildCode] {
        match self.by_parent.get(&parent) {
            Some(children) => &children[..n.min(children.len())],
            None => &[],
        }
    }
}

/// The report for one code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeReport {
    pub code: Ctv3Code,
    pub description: ArcStr,
    pub events_mill: f64,
    pub patients: u64,
    pub coverage: Coverage,
    pub trend: Trend,
    /// The most used children, for 2 and 3 digit codes.
    pub children: Vec<ChildCode>,
    /// The top child, if it was charted too.
    pub top_child: Option<ChildCode>,
    /// The panel to chart. Missing when there were too few events.
    #[serde(skip)]
    pub panel: Option<Panel>,
    #[serde(skip)]
    pub top_child_panel: Option<Panel>,
}

/// The codes in one category.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryReport {
    pub name: ArcStr,
    pub total_events_mill: f64,
    pub contents: Vec<EnrichedRow>,
    pub codes: Vec<CodeReport>,
}

/// Everything produced for a topic's codelist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicReport {
    pub categories: Vec<CategoryReport>,
    /// Codes in the list with no rows in the extraction.
    pub no_data: Vec<Ctv3Code>,
}

/// Codes this long get a list of their children.
fn has_children(digits: usize) -> bool {
    digits == 2 || digits == 3
}

impl TopicReport {
    /// Report on the first `limit` codes of `codelist`.
    ///
    /// A code with too few events is reported as such and the run carries on. Missing or
    /// malformed data stops the run. Nothing is drawn until [`TopicReport::render`].
    pub fn run(
        codelist: &Codelist,
        dictionary: &CodeDictionary,
        limit: usize,
        config: &StudyConfig,
        store: &dyn EventStore,
        second_chart: bool,
    ) -> Result<Self> {
        let subset = codelist.head(limit);
        let mut report = TopicReport::default();
        if subset.is_empty() {
            event!(Level::WARN, "no codes to report on");
            return Ok(report);
        }

        let prefixes: Vec<Ctv3Code> = subset.iter().map(|row| row.code).collect();
        let parents: Vec<Ctv3Code> = subset
            .iter()
            .filter(|row| has_children(row.digits))
            .map(|row| row.code)
            .collect();
        let (extract, counts) = {
            let mut conn = store.open()?;
            let extract = conn
                .extract(&prefixes, config.extract_start, config.end_date)
                .context("extracting events")?;
            let counts = if parents.is_empty() {
                vec![]
            } else {
                conn.code_counts(
                    &parents,
                    config.child_code_start,
                    config.end_date,
                    config.threshold,
                )
                .context("counting child codes")?
            };
            (extract, counts)
        };
        let children =
            ChildCodes::from_counts(&parents, &counts, dictionary, config.child_code_cap);
        let anchors = config.anchors();

        for category in subset.categories(&config.excluded_categories) {
            event!(Level::INFO, "category {}", category.name);
            let contents: Vec<EnrichedRow> = subset.in_category(&category.name).cloned().collect();
            let mut codes = vec![];
            for row in &contents {
                let code_rows = extract.for_code(row.code);
                if code_rows.is_empty() {
                    event!(Level::WARN, "no data for {}, skipping", row.code);
                    report.no_data.push(row.code);
                    continue;
                }
                let (panel, coverage) = all_pracs(&extract, &code_rows, row.code)?;
                let end_month = match panel.last_month() {
                    Some(month) => month,
                    None => continue,
                };
                let trend = classify(&panel, end_month, &anchors);

                let mut code_children = vec![];
                let mut top_child = None;
                let mut top_child_panel = None;
                if !trend.is_insufficient() && has_children(row.digits) {
                    code_children = children.top(row.code, config.children_shown).to_vec();
                    match code_children.first() {
                        Some(child) if second_chart && child.code != row.code => {
                            let child_rows = extract.for_code(child.code);
                            let (child_panel, _) = all_pracs(&extract, &child_rows, child.code)?;
                            if !child_panel.is_empty() {
                                top_child_panel = Some(child_panel);
                            }
                            top_child = Some(child.clone());
                        }
                        _ => (),
                    }
                }
                let panel = if trend.is_insufficient() {
                    None
                } else {
                    Some(panel)
                };

                codes.push(CodeReport {
                    code: row.code,
                    description: row.description().replace('\'', "").into(),
                    events_mill: round_dp(row.events_mill, 2),
                    patients: row.patients,
                    coverage,
                    trend,
                    children: code_children,
                    top_child,
                    panel,
                    top_child_panel,
                });
            }
            report.categories.push(CategoryReport {
                name: category.name,
                total_events_mill: category.events_mill,
                contents,
                codes,
            });
        }
        Ok(report)
    }

    pub fn code_reports(&self) -> impl Iterator<Item = &CodeReport> + '_ {
        self.categories.iter().flat_map(|cat| cat.codes.iter())
    }

    /// Write the report to `out`, drawing each code's charts straight after its summary.
    pub fn render(
        &self,
        out: &mut dyn io::Write,
        renderer: &mut dyn ChartRenderer,
        options: ChartOptions,
    ) -> Result {
        for category in &self.categories {
            write!(out, "{}", CategoryHeading(category))?;
            for code in &category.codes {
                code.render(out, renderer, options)?;
                writeln!(out)?;
            }
        }
        Ok(())
    }
}

/// Patient counts as millions over a million, otherwise thousands.
fn patient_count(patients: u64) -> String {
    if patients > 1_000_000 {
        format!("{}m", round_dp(patients as f64 / 1_000_000., 2))
    } else {
        format!("{}k", round_dp(patients as f64 / 1000., 1))
    }
}

fn children_table(children: &[ChildCode]) -> term_data_table::Table {
    use term_data_table::{Cell, Row, Table};
    let mut table = Table::new().with_row(
        Row::new()
            .with_cell(Cell::from("Code"))
            .with_cell(Cell::from("Events (thou)"))
            .with_cell(Cell::from("Description")),
    );
    for child in children {
        table.add_row(
            Row::new()
                .with_cell(Cell::from(child.code.to_string()))
                .with_cell(Cell::from(child.events_thou.to_string()))
                .with_cell(Cell::from(
                    child.description.as_deref().unwrap_or("Unknown").to_string(),
                )),
        );
    }
    table
}

impl CodeReport {
    fn title(&self) -> String {
        format!("{} - {}", self.code, self.description)
    }

    /// Write this code's block to `out`, with its charts in place.
    pub fn render(
        &self,
        out: &mut dyn io::Write,
        renderer: &mut dyn ChartRenderer,
        options: ChartOptions,
    ) -> Result {
        write!(out, "{}", Summary(self))?;
        if let Some(panel) = &self.panel {
            renderer.deciles_chart(out, &self.title(), panel, options)?;
        }
        write!(out, "{}", Children(self))?;
        if let (Some(child), Some(panel)) = (&self.top_child, &self.top_child_panel) {
            let title = format!(
                "{} - {}",
                child.code,
                child.description.as_deref().unwrap_or("Unknown")
            );
            renderer.deciles_chart(out, &title, panel, options)?;
        }
        Ok(())
    }
}

/// Heading, coverage and trend summary.
struct Summary<'a>(&'a CodeReport);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let code = self.0;
        writeln!(f, "## \"{}\" - {}", code.code, code.description)?;
        writeln!(
            f,
            "(Practices included: {}k ({}%); patients: {}; events: {}m)",
            code.coverage.practice_count_thou,
            code.coverage.practices_percent,
            patient_count(code.patients),
            code.events_mill
        )?;
        match &code.trend {
            Trend::InsufficientData { .. } => {
                writeln!(f, "{}: Too few events to plot", code.description)
            }
            Trend::Classified(classification) => writeln!(f, "{}", classification),
        }
    }
}

/// The child code table, and the heading for the top child's chart.
struct Children<'a>(&'a CodeReport);

impl fmt::Display for Children<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let code = self.0;
        if !code.children.is_empty() {
            writeln!(f, "Top 'child' codes represented within parent code above:")?;
            writeln!(f, "{}", children_table(&code.children).for_terminal())?;
        }
        if let Some(child) = &code.top_child {
            writeln!(
                f,
                "Trend in top child code: {} - {}",
                child.code,
                child.description.as_deref().unwrap_or("Unknown")
            )?;
        }
        Ok(())
    }
}

struct CategoryHeading<'a>(&'a CategoryReport);

impl fmt::Display for CategoryHeading<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let category = self.0;
        writeln!(f, "# Category: {}", category.name)?;
        writeln!(f, "Total events: {} m", category.total_events_mill)?;
        writeln!(f, "Contents:")?;
        writeln!(
            f,
            "{}",
            contents_table(category.contents.iter()).for_terminal()
        )
    }
}

/// The report text without charts.
impl fmt::Display for CodeReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", Summary(self), Children(self))
    }
}

impl fmt::Display for TopicReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for category in &self.categories {
            write!(f, "{}", CategoryHeading(category))?;
            for code in &category.codes {
                writeln!(f, "{}", code)?;
            }
        }
        Ok(())
    }
}
