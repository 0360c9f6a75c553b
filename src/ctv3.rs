//! CTV3 codes, the dictionary of their descriptions, and the concept hierarchy.

pub mod concept;
pub use concept::{ConceptEdge, ConceptTable};
mod dictionary;
pub use dictionary::{CodeDictionary, UNKNOWN_DESCRIPTION};

use crate::error::DataError;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    fmt,
    str::{self, FromStr},
};

/// The separator used to pad CTV3 codes out to 5 characters (e.g. `246..`).
pub const SEPARATOR: u8 = b'.';

/// A CTV3 code in canonical form: the separators are stripped, leaving 1-5 alphanumeric
/// characters.
///
/// Codes are hierarchical by prefix. `2X` is a parent of `2X3` and `2XFAD` (made up codes).
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Ctv3Code {
    bytes: [u8; 5],
    len: u8,
}

impl Ctv3Code {
    /// Parse a code, stripping any separators.
    pub fn from_bytes(v: &[u8]) -> Result<Self> {
        let mut bytes = [0; 5];
        let mut len = 0;
        for ch in v.iter().copied().filter(|ch| *ch != SEPARATOR) {
            ensure!(
                ch.is_ascii_alphanumeric(),
                DataError::format(format!(
                    "CTV3 codes contain characters [a-zA-Z0-9.], found {:?}",
                    String::from_utf8_lossy(v)
                ))
            );
            ensure!(
                len < 5,
                DataError::format(format!(
                    "CTV3 codes are at most 5 characters long, found {:?}",
                    String::from_utf8_lossy(v)
                ))
            );
            bytes[len] = ch;
            len += 1;
        }
        ensure!(len > 0, DataError::format("empty CTV3 code"));
        Ok(Ctv3Code {
            bytes,
            len: len as u8,
        })
    }

    pub fn parse(v: &str) -> Result<Self> {
        Self::from_bytes(v.trim().as_bytes())
    }

    pub fn as_str(&self) -> &str {
        str::from_utf8(self.as_bytes()).expect("CTV3 codes are ascii")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// The number of characters in the canonical code.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// The leading character, which decides the coarse category of the code.
    pub fn first_char(self) -> char {
        char::from(self.bytes[0])
    }

    /// The 1-character code for the first digit.
    pub fn first_digit(self) -> Ctv3Code {
        self.truncate(1)
    }

    /// Keep at most `len` leading characters.
    pub fn truncate(self, len: usize) -> Ctv3Code {
        let len = len.clamp(1, self.len());
        let mut bytes = [0; 5];
        bytes[..len].copy_from_slice(&self.bytes[..len]);
        Ctv3Code {
            bytes,
            len: len as u8,
        }
    }

    /// Whether `parent` is a prefix of this code (a code starts with itself).
    pub fn starts_with(self, parent: Ctv3Code) -> bool {
        self.as_bytes().starts_with(parent.as_bytes())
    }

    pub fn is_child_of(self, parent: Ctv3Code) -> bool {
        self != parent && self.starts_with(parent)
    }

    pub fn is_parent_of(self, child: Ctv3Code) -> bool {
        child.is_child_of(self)
    }
}

/// Strip separators from a code as written in a source file.
pub fn canonical(raw: &str) -> String {
    raw.trim().chars().filter(|ch| *ch != SEPARATOR as char).collect()
}

impl fmt::Debug for Ctv3Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for Ctv3Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Parents come directly before their children.
impl PartialOrd for Ctv3Code {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ctv3Code {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl<'a> TryFrom<&'a str> for Ctv3Code {
    type Error = Error;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl<'a> TryFrom<&'a [u8]> for Ctv3Code {
    type Error = Error;
    fn try_from(s: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(s)
    }
}

impl FromStr for Ctv3Code {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Ctv3Code {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Serialize for Ctv3Code {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Ctv3Code {
    fn deserialize<D>(deserializer: D) -> Result<Ctv3Code, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(Ctv3CodeVisitor)
    }
}

struct Ctv3CodeVisitor;

impl<'de> serde::de::Visitor<'de> for Ctv3CodeVisitor {
    type Value = Ctv3Code;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a CTV3 code (1-5 characters, optionally padded with '.')")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ctv3Code::parse(v).map_err(serde::de::Error::custom)
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ctv3Code::from_bytes(v).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::{canonical, Ctv3Code};

    #[test]
    fn strips_separators() {
        let code = Ctv3Code::parse("246..").unwrap();
        assert_eq!(code.as_str(), "246");
        assert_eq!(code.len(), 3);
        assert_eq!(code, Ctv3Code::parse("246").unwrap());
        assert_eq!(canonical("XaJ.."), "XaJ");
    }

    #[test]
    fn rejects_bad_codes() {
        assert!(Ctv3Code::parse(".....").is_err());
        assert!(Ctv3Code::parse("XaBcdE").is_err());
        assert!(Ctv3Code::parse("2-4").is_err());
    }

    #[test]
    fn hierarchy() {
        let parent = Ctv3Code::parse("2X...").unwrap();
        let child = Ctv3Code::parse("2X3..").unwrap();
        let other = Ctv3Code::parse("3X3..").unwrap();
        assert!(child.is_child_of(parent));
        assert!(parent.is_parent_of(child));
        assert!(!parent.is_child_of(parent));
        assert!(parent.starts_with(parent));
        assert!(!other.starts_with(parent));
        assert!(parent < child && child < other);
        assert_eq!(child.first_digit(), Ctv3Code::parse("2").unwrap());
        assert_eq!(child.first_char(), '2');
        assert_eq!(child.truncate(9), child);
    }
}
