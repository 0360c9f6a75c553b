//! The CTV3 concept hierarchy.
//!
//! Concept files map an ancestor code to the list of all its descendant codes, e.g.
//!
//! ```text
//! { "4....": ["42...", "42W5."], "XaBVJ": ["XaBVJ", "XaIz8"] }
//! ```
//!
//! The ancestor names the concept. Ancestors that are a single leading character padded with
//! separators (`4....`) are described by that character, everything else by the full ancestor
//! code.
use qu::ick_use::*;
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    fs, io,
    path::Path,
};

use crate::{
    ctv3::{CodeDictionary, Ctv3Code, SEPARATOR},
    error::DataError,
    file_exists, ArcStr,
};

/// One (ancestor, descendant) pair from the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConceptEdge {
    /// The ancestor as written in the source file.
    pub ancestor: ArcStr,
    /// The descendant with separators stripped, ready for joining.
    pub descendant: Ctv3Code,
    /// The code used to look up the concept's description.
    pub concept_digit: Ctv3Code,
    pub concept_desc: Option<ArcStr>,
}

/// A flattened concept hierarchy, with an index from descendant to concept.
#[derive(Debug, Clone)]
pub struct ConceptTable {
    edges: Vec<ConceptEdge>,
    descendant_idx: HashMap<Ctv3Code, usize>,
}

impl ConceptTable {
    /// Load a concept file (JSON object of ancestor -> list of descendants).
    pub fn load(path: impl AsRef<Path>, dictionary: &CodeDictionary) -> Result<Self> {
        fn inner(path: &Path, dictionary: &CodeDictionary) -> Result<ConceptTable> {
            if !file_exists(path)? {
                return Err(DataError::NotFound(path.to_owned()).into());
            }
            let reader = io::BufReader::new(fs::File::open(path)?);
            ConceptTable::from_reader(reader, dictionary)
        }
        let path = path.as_ref();
        let table = inner(path, dictionary)
            .with_context(|| format!("loading concepts from \"{}\"", path.display()))?;
        event!(
            Level::DEBUG,
            "{} concept edges in \"{}\"",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn from_reader(reader: impl io::Read, dictionary: &CodeDictionary) -> Result<Self> {
        let raw: BTreeMap<String, serde_json::Value> =
            serde_json::from_reader(reader).map_err(DataError::format)?;
        Self::from_hierarchy(raw, dictionary)
    }

    fn from_hierarchy(
        raw: BTreeMap<String, serde_json::Value>,
        dictionary: &CodeDictionary,
    ) -> Result<Self> {
        let mut edges = vec![];
        for (ancestor, descendants) in raw {
            let descendants = match descendants {
                serde_json::Value::Array(list) => list,
                other => {
                    return Err(DataError::format(format!(
                        "descendants of \"{}\" should be a list, found {}",
                        ancestor, other
                    ))
                    .into())
                }
            };
            let concept_digit = concept_digit(&ancestor)?;
            let concept_desc = dictionary.lookup(concept_digit);
            let ancestor: ArcStr = ancestor.into();
            for descendant in descendants {
                let descendant = match descendant {
                    serde_json::Value::String(s) => Ctv3Code::parse(&s)?,
                    other => {
                        return Err(DataError::format(format!(
                            "descendant of \"{}\" should be a code, found {}",
                            ancestor, other
                        ))
                        .into())
                    }
                };
                edges.push(ConceptEdge {
                    ancestor: ancestor.clone(),
                    descendant,
                    concept_digit,
                    concept_desc: concept_desc.clone(),
                });
            }
        }
        Ok(Self::new(edges))
    }

    /// The description of the concept a code belongs to, if any.
    ///
    /// Where a code sits under more than one ancestor, the first described ancestor (in code
    /// order) wins, so each code gets at most one concept.
    pub fn concept_for(&self, code: Ctv3Code) -> Option<&ArcStr> {
        let idx = self.descendant_idx.get(&code)?;
        self.edges[*idx].concept_desc.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConceptEdge> + '_ {
        self.edges.iter()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn new(edges: Vec<ConceptEdge>) -> Self {
        let mut this = Self {
            edges,
            descendant_idx: HashMap::new(),
        };
        this.rebuild_index();
        this
    }

    fn rebuild_index(&mut self) {
        self.descendant_idx.clear();
        for (idx, edge) in self.edges.iter().enumerate() {
            let insert = match self.descendant_idx.get(&edge.descendant) {
                // replace an undescribed match with a described one
                Some(prev) => {
                    self.edges[*prev].concept_desc.is_none() && edge.concept_desc.is_some()
                }
                None => true,
            };
            if insert {
                self.descendant_idx.insert(edge.descendant, idx);
            }
        }
    }
}

impl FromIterator<ConceptEdge> for ConceptTable {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = ConceptEdge>,
    {
        Self::new(iter.into_iter().collect())
    }
}

/// `4....` is described by `4`, anything else by the whole (canonical) ancestor.
fn concept_digit(ancestor: &str) -> Result<Ctv3Code> {
    let ancestor = ancestor.trim();
    let tail = ancestor.as_bytes().get(1..5);
    if matches!(tail, Some(tail) if tail.iter().all(|ch| *ch == SEPARATOR)) {
        Ctv3Code::from_bytes(&ancestor.as_bytes()[..1])
    } else {
        Ctv3Code::parse(ancestor)
    }
}

#[cfg(test)]
mod test {
    use super::{concept_digit, ConceptTable};
    use crate::{
        ctv3::{CodeDictionary, Ctv3Code},
        error::DataError,
        ArcStr,
    };

    fn code(s: &str) -> Ctv3Code {
        Ctv3Code::parse(s).unwrap()
    }

    fn dictionary() -> CodeDictionary {
        [
            (code("4"), ArcStr::from("Laboratory procedures")),
            (code("XaBVJ"), ArcStr::from("Clinical findings")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn digit_rule() {
        assert_eq!(concept_digit("4....").unwrap(), code("4"));
        assert_eq!(concept_digit("XaBVJ").unwrap(), code("XaBVJ"));
        assert_eq!(concept_digit("42...").unwrap(), code("42"));
    }

    #[test]
    fn flatten() {
        let input = r#"{
            "4....": ["42...", "42W5."],
            "XaBVJ": ["XaBVJ", "XaIz8"],
            "Xa0lK": ["Y1234"]
        }"#;
        let table = ConceptTable::from_reader(input.as_bytes(), &dictionary()).unwrap();
        assert_eq!(table.len(), 5);
        for edge in table.iter() {
            assert!(!edge.descendant.as_str().contains('.'));
            assert!(edge.descendant.len() > 0);
        }
        assert_eq!(
            table.concept_for(code("42W5")).map(|d| &**d),
            Some("Laboratory procedures")
        );
        assert_eq!(
            table.concept_for(code("XaIz8")).map(|d| &**d),
            Some("Clinical findings")
        );
        // edge exists but the concept has no description
        assert!(table.concept_for(code("Y1234")).is_none());
        assert!(table.concept_for(code("ZZZ")).is_none());
    }

    #[test]
    fn described_ancestor_wins() {
        let input = r#"{ "Xa0lK": ["XaIz8"], "XaBVJ": ["XaIz8"] }"#;
        let table = ConceptTable::from_reader(input.as_bytes(), &dictionary()).unwrap();
        assert_eq!(
            table.concept_for(code("XaIz8")).map(|d| &**d),
            Some("Clinical findings")
        );
    }

    #[test]
    fn malformed_entries() {
        let input = r#"{ "4....": "42..." }"#;
        let err = ConceptTable::from_reader(input.as_bytes(), &dictionary()).unwrap_err();
        assert!(err.downcast_ref::<DataError>().unwrap().is_data_format());

        let input = r#"{ "4....": [42] }"#;
        assert!(ConceptTable::from_reader(input.as_bytes(), &dictionary()).is_err());
    }

    #[test]
    fn missing_file() {
        let err = ConceptTable::load("no/such/concepts.json", &dictionary()).unwrap_err();
        assert!(err.downcast_ref::<DataError>().unwrap().is_not_found());
    }
}
