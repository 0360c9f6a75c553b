use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, io, path::Path, sync::Arc};

use crate::{ctv3::Ctv3Code, read_csv, util::optional_string, ArcStr};

/// Shown wherever a code has no dictionary entry.
pub const UNKNOWN_DESCRIPTION: &str = "Unknown";

#[derive(Debug, Deserialize)]
struct DictionaryRaw {
    #[serde(rename = "first_digits")]
    code: Ctv3Code,
    #[serde(rename = "Description", deserialize_with = "optional_string")]
    description: Option<ArcStr>,
}

/// Descriptions for CTV3 codes, keyed by canonical code.
///
/// This serves both for describing codes and for describing concepts, since a concept is named
/// by a canonical code too (either a full ancestor code or a single leading character).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CodeDictionary {
    codes: Arc<BTreeMap<Ctv3Code, ArcStr>>,
}

impl CodeDictionary {
    /// Load `code_dictionary.csv` (columns `first_digits`, `Description`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let rows: Vec<DictionaryRaw> = crate::load_csv(path)?;
        let dict = Self::from_raw(rows);
        event!(
            Level::DEBUG,
            "loaded {} code descriptions from \"{}\"",
            dict.len(),
            path.display()
        );
        Ok(dict)
    }

    pub fn from_reader(reader: impl io::Read) -> Result<Self> {
        Ok(Self::from_raw(read_csv(reader)?))
    }

    fn from_raw(rows: Vec<DictionaryRaw>) -> Self {
        rows.into_iter()
            .filter_map(|row| Some((row.code, row.description?)))
            .collect()
    }

    /// Get the description for a code.
    pub fn get(&self, code: Ctv3Code) -> Option<&ArcStr> {
        self.codes.get(&code)
    }

    /// Like `get`, but owned - handy when filling optional fields.
    pub fn lookup(&self, code: Ctv3Code) -> Option<ArcStr> {
        self.get(code).cloned()
    }

    /// The description, or "Unknown".
    pub fn describe(&self, code: Ctv3Code) -> &str {
        self.get(code).map(|d| &**d).unwrap_or(UNKNOWN_DESCRIPTION)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// An iterator over (code, description) pairs
    pub fn iter(&self) -> impl Iterator<Item = (Ctv3Code, &ArcStr)> + '_ {
        self.codes.iter().map(|(code, desc)| (*code, desc))
    }
}

impl FromIterator<(Ctv3Code, ArcStr)> for CodeDictionary {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = (Ctv3Code, ArcStr)>,
    {
        // First description wins if a code is listed twice.
        let mut codes = BTreeMap::new();
        for (code, desc) in iter {
            codes.entry(code).or_insert(desc);
        }
        Self {
            codes: Arc::new(codes),
        }
    }
}

#[cfg(test)]
mod test {
    use super::CodeDictionary;
    use crate::ctv3::Ctv3Code;

    const DICT: &str = "first_digits,Description\n\
                        246..,O/E - blood pressure reading\n\
                        2,Examination / Signs\n\
                        XaJ..,\n";

    #[test]
    fn load_dictionary() {
        let dict = CodeDictionary::from_reader(DICT.as_bytes()).unwrap();
        assert_eq!(dict.len(), 2);
        let bp = Ctv3Code::parse("246").unwrap();
        assert_eq!(dict.describe(bp), "O/E - blood pressure reading");
        assert_eq!(dict.describe(bp.first_digit()), "Examination / Signs");
        // empty description is the same as no entry
        assert_eq!(dict.describe(Ctv3Code::parse("XaJ").unwrap()), "Unknown");
    }

    #[test]
    fn bad_code_is_an_error() {
        let input = "first_digits,Description\n2-4,nonsense\n";
        assert!(CodeDictionary::from_reader(input.as_bytes()).is_err());
    }
}
