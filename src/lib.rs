//! How clinical coding activity in primary care changed over a study period.
//!
//! The pipeline runs per topic:
//!
//! 1. [`enrich`] describes every code in a frequency extract and puts it into a concept, using
//!    the code dictionary and concept hierarchy in [`ctv3`].
//! 2. [`codelist`] narrows those codes to a topic with keyword/concept rules.
//! 3. [`series`] turns raw practice/month counts into one dense panel per code.
//! 4. [`trend`] summarizes each panel at fixed anchor months and labels the change.
//! 5. [`report`] drives the above against a data store and a chart renderer.
pub mod codelist;
pub mod config;
pub mod ctv3;
pub mod enrich;
pub mod error;
pub mod report;
pub mod series;
pub mod trend;
mod util;

pub use anyhow::{Context, Error};
use qu::ick_use::*;
use serde::{de::DeserializeOwned, Serialize};
use std::{fs, io, path::Path, sync::Arc};

pub use crate::{
    codelist::{filter_codelists, Codelist, CodelistFilter, FilterMode, KeywordExclusion},
    config::{Config, StudyConfig, Topic},
    ctv3::{CodeDictionary, ConceptTable, Ctv3Code},
    enrich::{join_concept_descriptions, process_df, EnrichedRow, FrequencyRow},
    error::DataError,
    report::{ChartRenderer, DecileTable, EventStore, LocalStore, StoreConnection, TopicReport},
    series::{all_pracs, Coverage, Extract, Panel, PracticeId},
    trend::{classify, pct_change, Classification, Overall, Position, Trend},
    util::{header, parse_date, quantile, round_dp},
};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;

/// Load every row of a CSV file with headers.
///
/// A missing file is a [`DataError::NotFound`], rows that don't fit `T` are a
/// [`DataError::DataFormat`].
pub fn load_csv<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    fn inner<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        if !file_exists(path)? {
            return Err(DataError::NotFound(path.to_owned()).into());
        }
        read_csv(io::BufReader::new(fs::File::open(path)?))
    }
    let path = path.as_ref();
    inner(path).with_context(|| format!("while loading \"{}\"", path.display()))
}

/// Like `load_csv`, but from any reader.
pub fn read_csv<T: DeserializeOwned>(reader: impl io::Read) -> Result<Vec<T>> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
        .into_deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| DataError::format(e).into())
}

/// Save rows to a CSV file, creating parent directories as needed.
pub fn save_csv<T: Serialize>(rows: &[T], path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize>(rows: &[T], path: &Path) -> Result {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("could not create parent")?;
        }
        if file_exists(path)? {
            event!(
                Level::WARN,
                "overwriting existing file at \"{}\"",
                path.display()
            );
        }
        let mut out = csv::Writer::from_path(path)?;
        for row in rows {
            out.serialize(row)?;
        }
        out.flush()?;
        Ok(())
    }
    let path = path.as_ref();
    check_extension(path, "csv")?;
    inner(rows, path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

pub fn file_exists(path: &Path) -> io::Result<bool> {
    util::path_exists(path)
}

pub fn check_extension(path: &Path, ext: &str) -> Result<()> {
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}
