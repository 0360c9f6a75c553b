//! Study-wide settings and the per-topic keyword/concept rules.
//!
//! Both are read from one TOML file:
//!
//! ```toml
//! [study]
//! end_date = "20201231"
//!
//! [[topics]]
//! name = "screening"
//! title = "Screening"
//! category = "Screening"
//! keywords = ["screen", "smear", "NHS health check"]
//! ```
use chrono::NaiveDate;
use itertools::Itertools;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    codelist::{CodelistFilter, FilterMode, KeywordExclusion},
    error::DataError,
    file_exists,
    trend::Anchors,
    util::{compact_date, compact_date_ser},
};

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}

/// Dates, thresholds and file locations for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StudyConfig {
    /// The last day of the study period, written `yyyymmdd` (it also names the codelist files).
    #[serde(deserialize_with = "compact_date", serialize_with = "compact_date_ser")]
    pub end_date: NaiveDate,
    /// The month everything is compared against.
    #[serde(deserialize_with = "compact_date")]
    pub baseline: NaiveDate,
    #[serde(deserialize_with = "compact_date")]
    pub onset: NaiveDate,
    #[serde(deserialize_with = "compact_date")]
    pub peak: NaiveDate,
    /// The first month extracted for charts.
    #[serde(deserialize_with = "compact_date")]
    pub extract_start: NaiveDate,
    /// Child codes are ranked by their use from this date.
    #[serde(deserialize_with = "compact_date")]
    pub child_code_start: NaiveDate,
    /// Child codes need more than this many events to be listed.
    pub threshold: u64,
    /// `threshold` for dummy data, which is much sparser.
    pub dummy_threshold: u64,
    pub child_code_cap: usize,
    pub children_shown: usize,
    /// Codes with this many events or fewer in their panel are not classified.
    pub min_events: u64,
    /// Categories never reported on.
    pub excluded_categories: Vec<String>,
    pub keyword_exclusion: KeywordExclusion,
    /// Dictionary, concept files and the local store.
    pub data_dir: PathBuf,
    /// Codelists are written and read here.
    pub output_dir: PathBuf,
    pub code_dictionary: PathBuf,
    /// Concept hierarchy files for levels 1, 2 and 3.
    pub concept_files: [PathBuf; 3],
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            end_date: ymd(2020, 12, 31),
            baseline: ymd(2019, 4, 1),
            onset: ymd(2020, 2, 1),
            peak: ymd(2020, 4, 1),
            extract_start: ymd(2019, 1, 1),
            child_code_start: ymd(2020, 1, 1),
            threshold: 1000,
            dummy_threshold: 1,
            child_code_cap: 50,
            children_shown: 5,
            min_events: 10,
            excluded_categories: vec!["Additional values".into(), "Unit".into()],
            keyword_exclusion: KeywordExclusion::Cumulative,
            data_dir: "data".into(),
            output_dir: "output".into(),
            code_dictionary: "code_dictionary.csv".into(),
            concept_files: [
                "concepts_level1.json".into(),
                "concepts_level2.json".into(),
                "concepts_level3.json".into(),
            ],
        }
    }
}

impl StudyConfig {
    /// The end date as it appears in file names, e.g. `20201231`.
    pub fn end_date_stamp(&self) -> String {
        self.end_date.format("%Y%m%d").to_string()
    }

    pub fn threshold(&self, dummy_data: bool) -> u64 {
        if dummy_data {
            self.dummy_threshold
        } else {
            self.threshold
        }
    }

    pub fn anchors(&self) -> Anchors {
        Anchors {
            baseline: self.baseline,
            onset: self.onset,
            peak: self.peak,
            min_events: self.min_events,
        }
    }

    pub fn code_dictionary_path(&self) -> PathBuf {
        self.data_dir.join(&self.code_dictionary)
    }

    pub fn concept_paths(&self) -> [PathBuf; 3] {
        self.concept_files.clone().map(|file| self.data_dir.join(file))
    }
}

/// Extra rules applied to one of a topic's codelists after the keyword search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Refinement {
    pub keywords: Vec<String>,
    pub concepts: Vec<String>,
    pub mode: FilterMode,
}

impl Default for Refinement {
    fn default() -> Self {
        Self {
            keywords: vec![],
            concepts: vec![],
            mode: FilterMode::Out,
        }
    }
}

impl Refinement {
    pub fn filter(&self, label: &str, exclusion: KeywordExclusion) -> CodelistFilter {
        CodelistFilter::new(self.mode)
            .keywords(self.keywords.iter().cloned())
            .concepts(self.concepts.iter().cloned())
            .exclusion(exclusion)
            .label(label)
            .event_count(true)
    }
}

/// One topic: how to find its codes, and how many to chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Topic {
    /// Used to pick the topic on the command line.
    pub name: String,
    pub title: String,
    /// Every code in the topic is reported under this one category.
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub high_level: Refinement,
    #[serde(default)]
    pub detailed: Refinement,
    /// The most high level codes to chart, 0 to skip them.
    #[serde(default = "default_high_level_limit")]
    pub high_level_limit: usize,
    /// The most detailed codes to chart, 0 to skip them.
    #[serde(default = "default_detailed_limit")]
    pub detailed_limit: usize,
    /// Also chart the top child of each high level code.
    #[serde(default)]
    pub second_chart: bool,
}

fn default_high_level_limit() -> usize {
    25
}

fn default_detailed_limit() -> usize {
    75
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub study: StudyConfig,
    #[serde(default)]
    pub topics: Vec<Topic>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<Config> {
            if !file_exists(path)? {
                return Err(DataError::NotFound(path.to_owned()).into());
            }
            let text = fs::read_to_string(path)?;
            Config::from_toml(&text)
        }
        let path = path.as_ref();
        let config =
            inner(path).with_context(|| format!("loading config \"{}\"", path.display()))?;
        event!(
            Level::DEBUG,
            "{} topics in \"{}\"",
            config.topics.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(DataError::format)?;
        for (idx, topic) in config.topics.iter().enumerate() {
            ensure!(
                !config.topics[..idx].iter().any(|t| t.name == topic.name),
                DataError::format(format!("topic \"{}\" is listed twice", topic.name))
            );
        }
        Ok(config)
    }

    /// Find a topic by name (ignoring case).
    pub fn topic(&self, name: &str) -> Result<&Topic> {
        self.topics
            .iter()
            .find(|topic| topic.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| {
                format_err!(
                    "no topic called \"{}\" (expected one of {})",
                    name,
                    self.topics.iter().map(|t| &t.name).join(", ")
                )
            })
    }
}
