//! Describe and categorize the codes in a frequency extract.
//!
//! Every code gets its own description (if the dictionary has one) and exactly one concept,
//! worked out from the three levels of the concept hierarchy:
//!
//! 1. codes starting `Y` or `9` are "Administration", whatever the hierarchy says;
//! 2. codes starting `4`, or whose level 3 concept is a lab test, are "Laboratory procedures";
//! 3. codes with no level 1 concept are "Other";
//! 4. level 1 "Clinical findings" is too broad to be useful, so those codes use the description
//!    of their first digit instead;
//! 5. everything else keeps its level 1 concept.
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{io, path::Path};

use crate::{
    ctv3::{CodeDictionary, ConceptTable, Ctv3Code},
    util::{optional_string, round_dp},
    ArcStr,
};

pub const ADMINISTRATION: &str = "Administration";
pub const LABORATORY_PROCEDURES: &str = "Laboratory procedures";
pub const CLINICAL_FINDINGS: &str = "Clinical findings";
pub const OTHER: &str = "Other";

const ADMIN_FIRST_DIGITS: [char; 2] = ['Y', '9'];
const LAB_FIRST_DIGIT: char = '4';
const LAB_TEST_CONCEPTS: [&str; 2] = ["Laboratory test", "Laboratory test observations"];

/// A row of the code frequency extract: how often each code was used in the period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyRow {
    #[serde(rename = "first_digits")]
    pub code: Ctv3Code,
    pub events: u64,
    pub patients: u64,
}

impl FrequencyRow {
    pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let rows: Vec<Self> = crate::load_csv(path)?;
        event!(
            Level::DEBUG,
            "{} code frequencies in \"{}\"",
            rows.len(),
            path.display()
        );
        Ok(rows)
    }

    pub fn from_reader(reader: impl io::Read) -> Result<Vec<Self>> {
        crate::read_csv(reader)
    }
}

/// A frequency row with derived fields and dictionary descriptions.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRow {
    pub code: Ctv3Code,
    pub events: u64,
    pub patients: u64,
    pub events_mill: f64,
    pub patients_mill: f64,
    pub first_digit: Ctv3Code,
    pub digits: usize,
    pub description: Option<ArcStr>,
    /// The description of the first digit, used for "Clinical findings" codes.
    pub first_digit_description: Option<ArcStr>,
}

/// A fully described code, one row per code in a codelist file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRow {
    #[serde(rename = "first_digits")]
    pub code: Ctv3Code,
    #[serde(
        rename = "Description",
        deserialize_with = "optional_string",
        default
    )]
    pub description: Option<ArcStr>,
    pub events: u64,
    pub patients: u64,
    #[serde(rename = "2020 events (mill)")]
    pub events_mill: f64,
    #[serde(rename = "2020 Patient count (mill)")]
    pub patients_mill: f64,
    pub first_digit: Ctv3Code,
    pub digits: usize,
    pub concept_desc: ArcStr,
}

impl EnrichedRow {
    /// The description, or "Unknown".
    pub fn description(&self) -> &str {
        self.description
            .as_deref()
            .unwrap_or(crate::ctv3::UNKNOWN_DESCRIPTION)
    }
}

/// Add derived fields and descriptions (of the code and of its first digit) to frequency rows.
///
/// Codes with no dictionary entry keep `None`.
pub fn process_df(rows: &[FrequencyRow], dictionary: &CodeDictionary) -> Vec<ProcessedRow> {
    rows.iter()
        .map(|row| {
            let first_digit = row.code.first_digit();
            ProcessedRow {
                code: row.code,
                events: row.events,
                patients: row.patients,
                events_mill: round_dp(row.events as f64 / 1_000_000., 2),
                patients_mill: round_dp(row.patients as f64 / 1_000_000., 2),
                first_digit,
                digits: row.code.len(),
                description: dictionary.lookup(row.code),
                first_digit_description: dictionary.lookup(first_digit),
            }
        })
        .collect()
}

/// Join the three concept levels onto each row and resolve them to one concept.
///
/// The inputs are left untouched.
pub fn join_concept_descriptions(
    rows: &[ProcessedRow],
    level1: &ConceptTable,
    level2: &ConceptTable,
    level3: &ConceptTable,
) -> Vec<EnrichedRow> {
    let mut matched = [0usize; 3];
    let out: Vec<EnrichedRow> = rows
        .iter()
        .map(|row| {
            let levels = [
                level1.concept_for(row.code),
                level2.concept_for(row.code),
                level3.concept_for(row.code),
            ];
            for (count, level) in matched.iter_mut().zip(levels.iter()) {
                if level.is_some() {
                    *count += 1;
                }
            }
            let concept_desc = resolve_concept(
                row.first_digit,
                row.first_digit_description.as_ref(),
                levels[0],
                levels[2],
            );
            EnrichedRow {
                code: row.code,
                description: row.description.clone(),
                events: row.events,
                patients: row.patients,
                events_mill: row.events_mill,
                patients_mill: row.patients_mill,
                first_digit: row.first_digit,
                digits: row.digits,
                concept_desc,
            }
        })
        .collect();
    event!(
        Level::DEBUG,
        "{} codes: {} with a level 1 concept, {} level 2, {} level 3",
        out.len(),
        matched[0],
        matched[1],
        matched[2]
    );
    out
}

/// Pick the single concept for a code (see the module docs for the order).
pub fn resolve_concept(
    first_digit: Ctv3Code,
    first_digit_description: Option<&ArcStr>,
    level1: Option<&ArcStr>,
    level3: Option<&ArcStr>,
) -> ArcStr {
    let first = first_digit.first_char();
    if ADMIN_FIRST_DIGITS.contains(&first) {
        return ADMINISTRATION.into();
    }
    if first == LAB_FIRST_DIGIT || matches!(level3, Some(l3) if LAB_TEST_CONCEPTS.contains(&&**l3))
    {
        return LABORATORY_PROCEDURES.into();
    }
    match level1 {
        None => OTHER.into(),
        // no description for the first digit: keep the level 1 label rather than leave a hole.
        Some(l1) if &**l1 == CLINICAL_FINDINGS => first_digit_description
            .cloned()
            .unwrap_or_else(|| l1.clone()),
        Some(l1) => l1.clone(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn code(s: &str) -> Ctv3Code {
        Ctv3Code::parse(s).unwrap()
    }

    fn dictionary() -> CodeDictionary {
        [
            ("2", "Examination / Signs"),
            ("246", "O/E - blood pressure reading"),
            ("4", "Laboratory procedures"),
            ("9", "Administration"),
            ("XaBVJ", "Clinical findings"),
            ("Xa0lK", "Procedure"),
            ("XaLab", "Laboratory test"),
        ]
        .into_iter()
        .map(|(c, d)| (code(c), ArcStr::from(d)))
        .collect()
    }

    fn concepts(json: &str) -> ConceptTable {
        ConceptTable::from_reader(json.as_bytes(), &dictionary()).unwrap()
    }

    fn rows() -> Vec<FrequencyRow> {
        let input = "first_digits,events,patients\n\
                     246..,2500000,1234567\n\
                     9N1..,10000,9000\n\
                     42W5.,5000,4000\n\
                     Y1234,300,200\n\
                     XaZZZ,10,10\n\
                     7L1..,100,50\n";
        FrequencyRow::from_reader(input.as_bytes()).unwrap()
    }

    #[test]
    fn process() {
        let processed = process_df(&rows(), &dictionary());
        let bp = &processed[0];
        assert_eq!(bp.code, code("246"));
        assert_eq!(bp.digits, 3);
        assert_eq!(bp.first_digit, code("2"));
        assert_eq!(bp.events_mill, 2.5);
        assert_eq!(bp.patients_mill, 1.23);
        assert_eq!(bp.description.as_deref(), Some("O/E - blood pressure reading"));
        assert_eq!(
            bp.first_digit_description.as_deref(),
            Some("Examination / Signs")
        );
        // no dictionary match is not an error
        assert!(processed[4].description.is_none());
        assert!(processed[4].first_digit_description.is_none());
    }

    #[test]
    fn concept_precedence() {
        let dict = dictionary();
        let level1 = concepts(
            r#"{
                "XaBVJ": ["246..", "9N1..", "XaZZZ"],
                "Xa0lK": ["7L1.."]
            }"#,
        );
        let level2 = concepts("{}");
        let level3 = concepts(r#"{ "XaLab": ["Y1234", "7L1.."] }"#);

        let input = rows();
        let processed = process_df(&input, &dict);
        let enriched = join_concept_descriptions(&processed, &level1, &level2, &level3);
        let concept_of = |c: &str| {
            enriched
                .iter()
                .find(|row| row.code == code(c))
                .map(|row| row.concept_desc.to_string())
                .unwrap()
        };

        // clinical findings use the first digit's description
        assert_eq!(concept_of("246"), "Examination / Signs");
        // 9 outranks clinical findings
        assert_eq!(concept_of("9N1"), "Administration");
        // Y outranks the lab test concept
        assert_eq!(concept_of("Y1234"), "Administration");
        // first digit 4 with no concepts at all
        assert_eq!(concept_of("42W5"), "Laboratory procedures");
        // lab test at level 3 outranks level 1
        assert_eq!(concept_of("7L1"), "Laboratory procedures");
        // clinical finding whose first digit is undescribed
        assert_eq!(concept_of("XaZZZ"), "Clinical findings");

        // inputs untouched, one output row per input row
        assert_eq!(processed, process_df(&input, &dict));
        assert_eq!(enriched.len(), processed.len());
    }

    #[test]
    fn no_concept_is_other() {
        let empty = concepts("{}");
        let processed = process_df(&rows(), &dictionary());
        let enriched = join_concept_descriptions(&processed, &empty, &empty, &empty);
        let other = enriched
            .iter()
            .find(|row| row.code == code("246"))
            .unwrap();
        assert_eq!(&*other.concept_desc, OTHER);
        assert!(enriched.iter().all(|row| !row.concept_desc.is_empty()));
    }

    #[test]
    fn codelist_layout() {
        let processed = process_df(&rows(), &dictionary());
        let empty = concepts("{}");
        let enriched = join_concept_descriptions(&processed, &empty, &empty, &empty);

        let mut out = csv::Writer::from_writer(vec![]);
        for row in &enriched {
            out.serialize(row).unwrap();
        }
        let text = String::from_utf8(out.into_inner().unwrap()).unwrap();
        assert!(text.starts_with("first_digits,Description,events,patients,"));
        let back: Vec<EnrichedRow> = crate::read_csv(text.as_bytes()).unwrap();
        assert_eq!(back, enriched);
    }
}
