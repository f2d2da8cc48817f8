//! Attribute deltas between two declared states.
//!
//! Both diffs are pure functions of their inputs. Output is deterministic: removals first, then
//! additions, then replacements, each group in attribute-name order.

use std::collections::BTreeSet;
use std::fmt;

use ldap_object_core::Error;
use tracing::trace;

use crate::attributes::{parse_value, AttributeMap, AttributeSet, DeclaredAttributes};
use crate::Result;

/// One change to apply to an entry's attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeDelta {
    /// Add a new attribute with these values.
    Add {
        /// Attribute to add.
        attribute: String,
        /// Values of the new attribute.
        values: Vec<String>,
    },
    /// Remove the attribute and all its values.
    Remove {
        /// Attribute to remove.
        attribute: String,
    },
    /// Replace every value of the attribute.
    Replace {
        /// Attribute to modify.
        attribute: String,
        /// Replacement values.
        values: Vec<String>,
    },
}

impl AttributeDelta {
    /// Builds an `Add` delta.
    #[must_use]
    pub fn add(attribute: impl Into<String>, values: Vec<String>) -> Self {
        Self::Add {
            attribute: attribute.into(),
            values,
        }
    }

    /// Builds a `Remove` delta.
    #[must_use]
    pub fn remove(attribute: impl Into<String>) -> Self {
        Self::Remove {
            attribute: attribute.into(),
        }
    }

    /// Builds a `Replace` delta.
    #[must_use]
    pub fn replace(attribute: impl Into<String>, values: Vec<String>) -> Self {
        Self::Replace {
            attribute: attribute.into(),
            values,
        }
    }

    /// Attribute the delta applies to.
    #[must_use]
    pub fn attribute(&self) -> &str {
        match self {
            Self::Add { attribute, .. }
            | Self::Remove { attribute }
            | Self::Replace { attribute, .. } => attribute,
        }
    }
}

impl fmt::Display for AttributeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add { attribute, values } => write!(f, "add {attribute} {values:?}"),
            Self::Remove { attribute } => write!(f, "remove {attribute}"),
            Self::Replace { attribute, values } => write!(f, "replace {attribute} {values:?}"),
        }
    }
}

/// Diffs two declared maps.
///
/// Names only in `old` are removed, names only in `new` are added, and names in both whose
/// declared strings differ are replaced. Values are compared as declared text; `["a","b"]` and
/// `[ "a", "b" ]` count as different.
#[must_use]
pub fn diff_attribute_maps(old: &AttributeMap, new: &AttributeMap) -> Vec<AttributeDelta> {
    let mut deltas = Vec::new();

    for (name, _) in old.iter().filter(|(name, _)| !new.contains(name)) {
        trace!("going to remove attribute `{name}`");
        deltas.push(AttributeDelta::remove(name));
    }

    for (name, value) in new.iter().filter(|(name, _)| !old.contains(name)) {
        trace!("going to add attribute `{name}`");
        deltas.push(AttributeDelta::add(name, parse_value(value)));
    }

    for (name, value) in new.iter() {
        if old.get(name).is_some_and(|previous| previous != value) {
            trace!("going to replace attribute `{name}`");
            deltas.push(AttributeDelta::replace(name, parse_value(value)));
        }
    }

    deltas
}

/// Diffs two declared pair sets.
///
/// A name whose pairs all disappeared is removed and a name that is entirely new is added. Any
/// other name touched by the change (some values added, removed or kept alongside) is replaced
/// wholesale with every value it has in `new`; individual values are never added or deleted.
#[must_use]
pub fn diff_attribute_sets(old: &AttributeSet, new: &AttributeSet) -> Vec<AttributeDelta> {
    let removed = old.difference(new);
    let added = new.difference(old);
    let kept = new.intersection(old);

    let removed_names = removed.names();
    let added_names = added.names();
    let kept_names = kept.names();

    let mut deltas = Vec::new();
    let mut changed = BTreeSet::new();

    for name in &removed_names {
        if added_names.contains(name) || kept_names.contains(name) {
            changed.insert(*name);
        } else {
            trace!("going to remove attribute `{name}`");
            deltas.push(AttributeDelta::remove(*name));
        }
    }

    for name in &added_names {
        if removed_names.contains(name) || kept_names.contains(name) {
            changed.insert(*name);
        } else {
            trace!("going to add attribute `{name}`");
            deltas.push(AttributeDelta::add(*name, new.values_for(name)));
        }
    }

    for name in changed {
        trace!("going to replace attribute `{name}`");
        deltas.push(AttributeDelta::replace(name, new.values_for(name)));
    }

    deltas
}

/// Diffs two declared states of the same representation.
///
/// # Errors
///
/// Returns [`Error::InvalidRequest`] when one side is a map and the other a set.
pub fn diff(old: &DeclaredAttributes, new: &DeclaredAttributes) -> Result<Vec<AttributeDelta>> {
    match (old, new) {
        (DeclaredAttributes::Map(old), DeclaredAttributes::Map(new)) => {
            Ok(diff_attribute_maps(old, new))
        }
        (DeclaredAttributes::Set(old), DeclaredAttributes::Set(new)) => {
            Ok(diff_attribute_sets(old, new))
        }
        _ => Err(Error::InvalidRequest(format!(
            "cannot diff {:?} attributes against {:?} attributes",
            old.mode(),
            new.mode()
        ))),
    }
}
