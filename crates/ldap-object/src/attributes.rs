//! Declared attribute representations and their conversion to and from directory entries.
//!
//! The directory stores `name → [values]`. A declarative host stores either a flat
//! `name → value` map, where several values are written as a JSON array literal, or a set of
//! `{name: value}` pairs where a name may repeat. Both shapes leave out the object classes and
//! the entry's naming attribute, which are carried by their own fields.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use ldap_object_core::Error;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::dn::starts_with_pair;
use crate::entry::{DirectoryEntry, OBJECT_CLASS};
use crate::Result;

/// Splits a declared value into the values sent to the directory.
///
/// A value that starts with `[` (ignoring leading whitespace) and parses as a JSON array of
/// strings yields that array. Anything else, including a bracketed value that is not valid
/// JSON, is a single literal value.
#[must_use]
pub fn parse_value(raw: &str) -> Vec<String> {
    if raw.trim_start().starts_with('[') {
        match serde_json::from_str::<Vec<String>>(raw) {
            Ok(values) => return values,
            Err(err) => {
                debug!("could not decode `{raw}` as a JSON array ({err}); using it verbatim");
            }
        }
    }
    vec![raw.to_string()]
}

/// Encodes several values as the JSON array literal stored in a declared map.
///
/// # Errors
///
/// Returns [`Error::Encoding`] when serialization fails.
pub fn encode_values(values: &[String]) -> Result<String> {
    serde_json::to_string(values).map_err(Error::from)
}

/// Returns true when `name` is the object-class attribute or one of the caller's skip names.
#[must_use]
pub fn is_skipped(name: &str, skip: &BTreeSet<String>) -> bool {
    name.eq_ignore_ascii_case(OBJECT_CLASS) || skip.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// Attributes of `entry` that belong in declared state, in name order.
fn declared_attributes<'a>(
    entry: &'a DirectoryEntry,
    skip: &'a BTreeSet<String>,
) -> impl Iterator<Item = (&'a String, &'a Vec<String>)> + 'a {
    entry.attributes.iter().filter(move |(name, values)| {
        if is_skipped(name, skip) {
            trace!("skipping attribute `{name}` of `{}`", entry.dn);
            return false;
        }
        if let [value] = values.as_slice() {
            if starts_with_pair(&entry.dn, name, value) {
                trace!("skipping RDN `{name}={value}` of `{}`", entry.dn);
                return false;
            }
        }
        !values.is_empty()
    })
}

/// Declared attributes as a flat map, multi-values encoded as JSON arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMap(BTreeMap<String, String>);

impl AttributeMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Projects a live entry into declared map form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if a multi-valued attribute cannot be encoded.
    pub fn from_entry(entry: &DirectoryEntry, skip: &BTreeSet<String>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for (name, values) in declared_attributes(entry, skip) {
            let value = match values.as_slice() {
                [single] => single.clone(),
                many => encode_values(many)?,
            };
            trace!("declared `{name}` of `{}` as `{value}`", entry.dn);
            map.insert(name.clone(), value);
        }
        Ok(Self(map))
    }

    /// Inserts a declared value, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    /// Returns the declared value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Returns true if `name` is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Iterates over declared pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of declared attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Expands the map into directory attribute lists, leaving out skipped names.
    #[must_use]
    pub fn to_directory(&self, skip: &BTreeSet<String>) -> Vec<(String, Vec<String>)> {
        self.iter()
            .filter(|(name, _)| !is_skipped(name, skip))
            .map(|(name, value)| (name.to_string(), parse_value(value)))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One `{name: value}` element of an [`AttributeSet`].
///
/// Ordered and compared by `(name, value)`, so equal pairs collapse in a set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct AttributeValue {
    name: String,
    value: String,
}

impl AttributeValue {
    /// Creates a pair.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Attribute name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

impl TryFrom<BTreeMap<String, String>> for AttributeValue {
    type Error = String;

    fn try_from(map: BTreeMap<String, String>) -> std::result::Result<Self, Self::Error> {
        let mut pairs = map.into_iter();
        match (pairs.next(), pairs.next()) {
            (Some((name, value)), None) => Ok(Self { name, value }),
            _ => Err("attribute entries must hold exactly one name/value pair".to_string()),
        }
    }
}

impl From<AttributeValue> for BTreeMap<String, String> {
    fn from(pair: AttributeValue) -> Self {
        BTreeMap::from([(pair.name, pair.value)])
    }
}

/// Declared attributes as a set of single `{name: value}` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSet(BTreeSet<AttributeValue>);

impl AttributeSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Projects a live entry into declared set form.
    #[must_use]
    pub fn from_entry(entry: &DirectoryEntry, skip: &BTreeSet<String>) -> Self {
        declared_attributes(entry, skip)
            .flat_map(|(name, values)| {
                values
                    .iter()
                    .map(move |value| AttributeValue::new(name.clone(), value.clone()))
            })
            .collect()
    }

    /// Adds a pair; returns false if it was already present.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        self.0.insert(AttributeValue::new(name, value))
    }

    /// Iterates over pairs ordered by name, then value.
    pub fn iter(&self) -> impl Iterator<Item = &AttributeValue> + '_ {
        self.0.iter()
    }

    /// Every value declared under `name`.
    #[must_use]
    pub fn values_for(&self, name: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|pair| pair.name == name)
            .map(|pair| pair.value.clone())
            .collect()
    }

    /// Distinct attribute names in the set.
    #[must_use]
    pub fn names(&self) -> BTreeSet<&str> {
        self.0.iter().map(AttributeValue::name).collect()
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the set holds no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pairs in `self` that are not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    /// Pairs present in both sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self(self.0.intersection(&other.0).cloned().collect())
    }

    /// Groups pairs back into directory attribute lists, leaving out skipped names.
    #[must_use]
    pub fn to_directory(&self, skip: &BTreeSet<String>) -> Vec<(String, Vec<String>)> {
        let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for pair in self.0.iter().filter(|pair| !is_skipped(&pair.name, skip)) {
            grouped
                .entry(pair.name.as_str())
                .or_default()
                .push(pair.value.clone());
        }
        grouped
            .into_iter()
            .map(|(name, values)| (name.to_string(), values))
            .collect()
    }
}

impl FromIterator<AttributeValue> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = AttributeValue>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .map(|(name, value)| AttributeValue::new(name, value))
            .collect()
    }
}

/// Which declared shape a host uses for an object's attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeMode {
    /// Flat map with JSON-array encoded multi-values.
    Map,
    /// Set of single `{name: value}` pairs.
    Set,
}

/// Declared attributes in either representation.
///
/// Serialized untagged: a JSON object is a map, a JSON array is a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeclaredAttributes {
    /// Flat map representation.
    Map(AttributeMap),
    /// Set-of-pairs representation.
    Set(AttributeSet),
}

impl DeclaredAttributes {
    /// Projects a live entry into the requested representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if a multi-valued attribute cannot be encoded.
    pub fn from_entry(
        entry: &DirectoryEntry,
        mode: AttributeMode,
        skip: &BTreeSet<String>,
    ) -> Result<Self> {
        Ok(match mode {
            AttributeMode::Map => Self::Map(AttributeMap::from_entry(entry, skip)?),
            AttributeMode::Set => Self::Set(AttributeSet::from_entry(entry, skip)),
        })
    }

    /// Representation of this value.
    #[must_use]
    pub const fn mode(&self) -> AttributeMode {
        match self {
            Self::Map(_) => AttributeMode::Map,
            Self::Set(_) => AttributeMode::Set,
        }
    }

    /// Directory attribute lists for an add request.
    #[must_use]
    pub fn to_directory(&self, skip: &BTreeSet<String>) -> Vec<(String, Vec<String>)> {
        match self {
            Self::Map(map) => map.to_directory(skip),
            Self::Set(set) => set.to_directory(skip),
        }
    }

    /// Returns true when no attribute is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Map(map) => map.is_empty(),
            Self::Set(set) => set.is_empty(),
        }
    }
}

impl Default for DeclaredAttributes {
    fn default() -> Self {
        Self::Map(AttributeMap::default())
    }
}

impl From<AttributeMap> for DeclaredAttributes {
    fn from(map: AttributeMap) -> Self {
        Self::Map(map)
    }
}

impl From<AttributeSet> for DeclaredAttributes {
    fn from(set: AttributeSet) -> Self {
        Self::Set(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> DirectoryEntry {
        DirectoryEntry::new(
            "uid=jdoe,ou=People,dc=example,dc=com",
            [
                ("objectClass", vec!["top", "inetOrgPerson"]),
                ("uid", vec!["jdoe"]),
                ("cn", vec!["John Doe"]),
                ("mail", vec!["jdoe@example.com", "john@example.com"]),
                ("userPassword", vec!["{SSHA}abc"]),
            ],
        )
    }

    fn no_skip() -> BTreeSet<String> {
        BTreeSet::new()
    }

    #[test]
    fn parse_value_decodes_json_arrays() {
        assert_eq!(parse_value(r#"["a","b"]"#), ["a", "b"]);
        assert_eq!(parse_value(r#"  ["only"]"#), ["only"]);
        assert!(parse_value("[]").is_empty());
    }

    #[test]
    fn parse_value_keeps_plain_strings() {
        for raw in ["plain", "", " spaced ", "a[b]", "{\"k\":1}"] {
            assert_eq!(parse_value(raw), [raw]);
        }
    }

    #[test]
    fn parse_value_falls_back_on_malformed_arrays() {
        assert_eq!(parse_value("[not json"), ["[not json"]);
        assert_eq!(parse_value("[1, 2]"), ["[1, 2]"]);
    }

    #[test]
    fn encoded_values_parse_back() {
        let values = vec![
            "plain".to_string(),
            "with \"quotes\"".to_string(),
            "back\\slash".to_string(),
            "uni\u{e9}code".to_string(),
        ];
        let encoded = encode_values(&values).unwrap();
        assert_eq!(parse_value(&encoded), values);
    }

    #[test]
    fn map_from_entry_skips_object_class_and_rdn() {
        let map = AttributeMap::from_entry(&person(), &no_skip()).unwrap();

        assert!(!map.contains("objectClass"));
        assert!(!map.contains("uid"));
        assert_eq!(map.get("cn"), Some("John Doe"));
        assert_eq!(
            map.get("mail"),
            Some(r#"["jdoe@example.com","john@example.com"]"#)
        );
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn caller_skip_names_ignore_case() {
        let skip = BTreeSet::from(["userpassword".to_string()]);
        let map = AttributeMap::from_entry(&person(), &skip).unwrap();
        assert!(!map.contains("userPassword"));
        assert!(map.contains("cn"));
    }

    #[test]
    fn multi_valued_naming_attribute_is_kept() {
        let entry = DirectoryEntry::new(
            "cn=admins,ou=Groups,dc=example,dc=com",
            [("cn", vec!["admins", "administrators"])],
        );
        let map = AttributeMap::from_entry(&entry, &no_skip()).unwrap();
        assert_eq!(map.get("cn"), Some(r#"["admins","administrators"]"#));
    }

    #[test]
    fn set_from_entry_flattens_values() {
        let set = AttributeSet::from_entry(&person(), &no_skip());

        assert_eq!(set.len(), 4);
        assert_eq!(
            set.values_for("mail"),
            ["jdoe@example.com", "john@example.com"]
        );
        assert!(set.values_for("uid").is_empty());
        assert!(!set.names().contains("objectClass"));
    }

    #[test]
    fn set_collapses_duplicate_pairs() {
        let mut set = AttributeSet::new();
        assert!(set.insert("mail", "a@example.com"));
        assert!(!set.insert("mail", "a@example.com"));
        assert!(set.insert("mail", "b@example.com"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn representations_expand_to_same_directory_lists() {
        let entry = person();
        let map = AttributeMap::from_entry(&entry, &no_skip()).unwrap();
        let set = AttributeSet::from_entry(&entry, &no_skip());

        let expected = vec![
            ("cn".to_string(), vec!["John Doe".to_string()]),
            (
                "mail".to_string(),
                vec![
                    "jdoe@example.com".to_string(),
                    "john@example.com".to_string(),
                ],
            ),
            ("userPassword".to_string(), vec!["{SSHA}abc".to_string()]),
        ];
        assert_eq!(map.to_directory(&no_skip()), expected);
        assert_eq!(set.to_directory(&no_skip()), expected);
    }

    #[test]
    fn to_directory_drops_skipped_names() {
        let map: AttributeMap = [("cn", "John"), ("objectClass", "top"), ("secret", "x")]
            .into_iter()
            .collect();
        let skip = BTreeSet::from(["secret".to_string()]);
        assert_eq!(
            map.to_directory(&skip),
            vec![("cn".to_string(), vec!["John".to_string()])]
        );
    }

    #[test]
    fn declared_attributes_serde_shapes() {
        let map: DeclaredAttributes =
            serde_json::from_value(json!({"cn": "John", "mail": "[\"a\",\"b\"]"})).unwrap();
        assert_eq!(map.mode(), AttributeMode::Map);

        let set: DeclaredAttributes =
            serde_json::from_value(json!([{"mail": "a"}, {"mail": "b"}, {"mail": "a"}])).unwrap();
        assert_eq!(set.mode(), AttributeMode::Set);
        match &set {
            DeclaredAttributes::Set(pairs) => assert_eq!(pairs.len(), 2),
            DeclaredAttributes::Map(_) => panic!("expected set"),
        }
        assert_eq!(
            serde_json::to_value(&set).unwrap(),
            json!([{"mail": "a"}, {"mail": "b"}])
        );

        assert!(serde_json::from_value::<AttributeValue>(json!({"a": "1", "b": "2"})).is_err());
    }
}
