//! Reconciliation of declared LDAP objects against a live directory.
//!
//! A declarative host keeps the desired state of an object (DN, object classes, attributes).
//! This crate reads the live entry back into that shape, computes the attribute deltas between
//! two declared states, and applies them through an injectable directory client.
//!
//! - [`attributes`] converts live entries to declared attributes and back
//! - [`delta`] computes add / remove / replace deltas
//! - [`ObjectManager`] drives create, read, update, delete and existence checks

#![deny(missing_docs)]

pub mod attributes;
mod client;
pub mod delta;
mod dn;
mod entry;
mod object;

pub use attributes::{
    encode_values, parse_value, AttributeMap, AttributeMode, AttributeSet, AttributeValue,
    DeclaredAttributes,
};
pub use client::{
    encode_attribute_value, DirectoryConnector, DirectorySession, Ldap3Connector, SearchScope,
    UNICODE_PWD,
};
pub use delta::{diff, diff_attribute_maps, diff_attribute_sets, AttributeDelta};
pub use dn::{DistinguishedName, DistinguishedNameError, RelativeDistinguishedName};
pub use entry::{DirectoryEntry, OBJECT_CLASS};
pub use ldap_object_core::{DirectoryConfig, Error};
pub use object::{reconcile, LdapObject, ObjectManager};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = ldap_object_core::Result<T>;
