//! Live directory entries as returned by a search.

use std::collections::{BTreeMap, HashMap};

use ldap3::SearchEntry;

/// Name of the attribute carrying an entry's object classes.
pub const OBJECT_CLASS: &str = "objectClass";

/// Directory entry: DN plus every attribute the server returned.
///
/// Attribute names keep the server's spelling and values keep the server's order. The
/// object classes live in the `objectClass` attribute like any other value list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Attribute map (values preserved order from server).
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Creates an entry from a DN and its attributes.
    #[must_use]
    pub fn new<I, K, V>(dn: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            dn: dn.into(),
            attributes: attributes
                .into_iter()
                .map(|(name, values)| (name.into(), values.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    /// Returns all values for the attribute, matching the name case-insensitively.
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values.as_slice())
    }

    /// Returns the object classes of the entry.
    #[must_use]
    pub fn object_classes(&self) -> &[String] {
        self.values(OBJECT_CLASS).unwrap_or_default()
    }

    fn from_parts(dn: String, attrs: HashMap<String, Vec<String>>) -> Self {
        Self {
            dn,
            attributes: attrs.into_iter().collect(),
        }
    }
}

impl From<SearchEntry> for DirectoryEntry {
    fn from(entry: SearchEntry) -> Self {
        Self::from_parts(entry.dn, entry.attrs)
    }
}
