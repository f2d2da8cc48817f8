//! Declared LDAP objects and the lifecycle operations a declarative host drives.

use std::collections::BTreeSet;
use std::sync::Arc;

use ldap_object_core::{DirectoryConfig, Error};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::{
    attributes::DeclaredAttributes,
    client::{DirectoryConnector, DirectorySession, Ldap3Connector, SearchScope},
    delta::{self, AttributeDelta},
    dn::DistinguishedName,
    entry::{DirectoryEntry, OBJECT_CLASS},
    Result,
};

const MATCH_ALL_FILTER: &str = "(objectClass=*)";
const ALL_ATTRIBUTES: &[&str] = &["*"];
const NO_ATTRIBUTES: &[&str] = &["1.1"];

/// Desired state of one directory object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapObject {
    /// Distinguished name; immutable once the object exists.
    pub dn: DistinguishedName,
    /// Object classes the entry conforms to.
    pub object_classes: BTreeSet<String>,
    /// Declared attributes, excluding object classes and the naming attribute.
    #[serde(default)]
    pub attributes: DeclaredAttributes,
    /// Attribute names ignored when creating and reading the object.
    #[serde(default)]
    pub skip_attributes: BTreeSet<String>,
}

impl LdapObject {
    /// Creates a declared object with no attributes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when no object class is given.
    pub fn new<I, S>(dn: DistinguishedName, object_classes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let object_classes: BTreeSet<String> =
            object_classes.into_iter().map(Into::into).collect();
        if object_classes.is_empty() {
            return Err(Error::Validation(format!(
                "object `{dn}` must declare at least one object class"
            )));
        }
        Ok(Self {
            dn,
            object_classes,
            attributes: DeclaredAttributes::default(),
            skip_attributes: BTreeSet::new(),
        })
    }

    /// Sets the declared attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: impl Into<DeclaredAttributes>) -> Self {
        self.attributes = attributes.into();
        self
    }

    /// Sets the attribute names to ignore.
    #[must_use]
    pub fn with_skip_attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_attributes = names.into_iter().map(Into::into).collect();
        self
    }

    /// Rebuilds the declared state from a live entry, keeping this object's representation
    /// and skip list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if a multi-valued attribute cannot be encoded.
    pub fn refreshed_from(&self, entry: &DirectoryEntry) -> Result<Self> {
        Ok(Self {
            dn: self.dn.clone(),
            object_classes: entry.object_classes().iter().cloned().collect(),
            attributes: DeclaredAttributes::from_entry(
                entry,
                self.attributes.mode(),
                &self.skip_attributes,
            )?,
            skip_attributes: self.skip_attributes.clone(),
        })
    }

    /// Attribute lists for an add request, object classes first.
    #[must_use]
    pub fn to_add_request(&self) -> Vec<(String, Vec<String>)> {
        let mut attributes = vec![(
            OBJECT_CLASS.to_string(),
            self.object_classes.iter().cloned().collect(),
        )];
        attributes.extend(self.attributes.to_directory(&self.skip_attributes));
        attributes
    }
}

/// Computes the modify request that turns `old` into `new`.
///
/// Object classes are replaced wholesale when they differ; attribute deltas follow.
///
/// # Errors
///
/// Returns [`Error::InvalidRequest`] when the DNs differ or the attribute representations do
/// not match.
pub fn reconcile(old: &LdapObject, new: &LdapObject) -> Result<Vec<AttributeDelta>> {
    if old.dn != new.dn {
        return Err(Error::InvalidRequest(format!(
            "cannot move `{}` to `{}`; the DN of an object is immutable",
            old.dn, new.dn
        )));
    }

    let mut deltas = Vec::new();
    if old.object_classes != new.object_classes {
        debug!(
            "updating classes of `{}`, new value: {:?}",
            new.dn, new.object_classes
        );
        deltas.push(AttributeDelta::replace(
            OBJECT_CLASS,
            new.object_classes.iter().cloned().collect(),
        ));
    }
    if old.attributes != new.attributes {
        trace!("old attributes of `{}`: {:?}", old.dn, old.attributes);
        trace!("new attributes of `{}`: {:?}", new.dn, new.attributes);
        deltas.extend(delta::diff(&old.attributes, &new.attributes)?);
    }
    Ok(deltas)
}

/// Drives create, read, update and delete of declared objects against a directory.
pub struct ObjectManager {
    config: Arc<DirectoryConfig>,
    connector: Box<dyn DirectoryConnector>,
}

impl ObjectManager {
    /// Creates a manager that talks to the configured server through `ldap3`.
    #[must_use]
    pub fn new(config: DirectoryConfig) -> Self {
        let config = Arc::new(config);
        let connector: Box<dyn DirectoryConnector> =
            Box::new(Ldap3Connector::new(config.clone()));
        Self { config, connector }
    }

    /// Creates a manager with an injected connector.
    #[must_use]
    pub fn with_connector(config: DirectoryConfig, connector: Box<dyn DirectoryConnector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
        }
    }

    /// Checks whether an entry exists at `dn`.
    ///
    /// # Errors
    ///
    /// Returns any directory failure other than a missing entry.
    pub async fn exists(&self, dn: &DistinguishedName) -> Result<bool> {
        debug!("checking if `{dn}` exists");
        let mut session = self.bound_session().await?;
        let found = match session
            .search(dn.as_str(), SearchScope::Base, MATCH_ALL_FILTER, NO_ATTRIBUTES)
            .await
        {
            Ok(entries) => !entries.is_empty(),
            Err(Error::NotFound(_)) => {
                warn!("lookup for `{dn}` returned no value: deleted on server?");
                false
            }
            Err(err) => {
                debug!("lookup for `{dn}` returned an error: {err}");
                return Err(err);
            }
        };
        session.unbind().await?;
        Ok(found)
    }

    /// Creates the entry and returns its state as read back from the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the entry is gone on read-back, or any directory failure.
    pub async fn create(&self, object: &LdapObject) -> Result<LdapObject> {
        let dn = &object.dn;
        debug!("creating a new object under `{dn}`");
        trace!("`{dn}` going to skip attributes: {:?}", object.skip_attributes);

        let request = object.to_add_request();
        let mut session = self.bound_session().await?;
        if let Err(err) = session.add(dn.as_str(), &request).await {
            error!("error creating `{dn}`: {err}");
            return Err(err);
        }
        debug!("object `{dn}` added to LDAP server");

        let state = Self::fetch(&mut *session, object).await?;
        session.unbind().await?;
        state.ok_or_else(|| Error::NotFound(format!("`{dn}` vanished right after creation")))
    }

    /// Reads the live state of `object`.
    ///
    /// Returns `None` when the entry no longer exists, so the host can drop it from state.
    ///
    /// # Errors
    ///
    /// Returns any directory failure other than a missing entry.
    pub async fn read(&self, object: &LdapObject) -> Result<Option<LdapObject>> {
        let mut session = self.bound_session().await?;
        let state = Self::fetch(&mut *session, object).await?;
        session.unbind().await?;
        Ok(state)
    }

    /// Applies the changes from `old` to `new` and returns the state read back.
    ///
    /// No modify request is sent when nothing changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for a DN change or mixed representations, and
    /// propagates directory failures, including [`Error::NotFound`] from the modify.
    pub async fn update(&self, old: &LdapObject, new: &LdapObject) -> Result<Option<LdapObject>> {
        let dn = &new.dn;
        debug!("performing update on `{dn}`");
        let deltas = reconcile(old, new)?;

        let mut session = self.bound_session().await?;
        if deltas.is_empty() {
            debug!("`{dn}` is already up to date");
        } else {
            for change in &deltas {
                trace!("`{dn}`: {change}");
            }
            if let Err(err) = session.modify(dn.as_str(), &deltas).await {
                error!("error modifying `{dn}`: {err}");
                return Err(err);
            }
        }

        let state = Self::fetch(&mut *session, new).await?;
        session.unbind().await?;
        Ok(state)
    }

    /// Deletes the entry at `dn`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the entry does not exist, or any directory failure.
    pub async fn delete(&self, dn: &DistinguishedName) -> Result<()> {
        debug!("removing `{dn}`");
        let mut session = self.bound_session().await?;
        if let Err(err) = session.delete(dn.as_str()).await {
            error!("error removing `{dn}`: {err}");
            return Err(err);
        }
        session.unbind().await?;
        debug!("`{dn}` removed");
        Ok(())
    }

    async fn bound_session(&self) -> Result<Box<dyn DirectorySession>> {
        let mut session = self.connector.connect().await?;
        session
            .simple_bind(self.config.bind_dn(), self.config.bind_password())
            .await?;
        Ok(session)
    }

    async fn fetch(
        session: &mut dyn DirectorySession,
        object: &LdapObject,
    ) -> Result<Option<LdapObject>> {
        let dn = &object.dn;
        debug!("looking for object `{dn}`");

        let entries = match session
            .search(dn.as_str(), SearchScope::Base, MATCH_ALL_FILTER, ALL_ATTRIBUTES)
            .await
        {
            Ok(entries) => entries,
            Err(Error::NotFound(_)) => {
                warn!("object not found, `{dn}` no longer exists in LDAP");
                return Ok(None);
            }
            Err(err) => {
                debug!("lookup for `{dn}` returned an error: {err}");
                return Err(err);
            }
        };

        match entries.as_slice() {
            [] => {
                warn!("object not found, `{dn}` no longer exists in LDAP");
                Ok(None)
            }
            [entry] => {
                trace!("query for `{dn}` returned {entry:?}");
                object.refreshed_from(entry).map(Some)
            }
            many => Err(Error::Directory {
                code: None,
                message: format!(
                    "base search for `{dn}` returned {} entries instead of one",
                    many.len()
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeMap, AttributeSet};
    use crate::client::{MockDirectoryConnector, MockDirectorySession};

    const DN: &str = "uid=jdoe,ou=People,dc=example,dc=com";

    fn config() -> DirectoryConfig {
        DirectoryConfig::new("ldap://localhost:389", "cn=admin,dc=example,dc=com", "secret")
            .unwrap()
    }

    fn dn() -> DistinguishedName {
        DistinguishedName::parse(DN).unwrap()
    }

    fn live_entry() -> DirectoryEntry {
        DirectoryEntry::new(
            DN,
            [
                ("objectClass", vec!["inetOrgPerson", "top"]),
                ("uid", vec!["jdoe"]),
                ("cn", vec!["John Doe"]),
                ("sn", vec!["Doe"]),
                ("mail", vec!["jdoe@example.com", "john@example.com"]),
            ],
        )
    }

    fn declared() -> LdapObject {
        let attributes: AttributeMap = [
            ("cn", "John Doe"),
            ("sn", "Doe"),
            ("mail", r#"["jdoe@example.com","john@example.com"]"#),
        ]
        .into_iter()
        .collect();
        LdapObject::new(dn(), ["top", "inetOrgPerson"])
            .unwrap()
            .with_attributes(attributes)
    }

    fn bound_session() -> MockDirectorySession {
        let mut session = MockDirectorySession::new();
        session
            .expect_simple_bind()
            .withf(|dn, password| dn == "cn=admin,dc=example,dc=com" && password == "secret")
            .times(1)
            .returning(|_, _| Ok(()));
        session.expect_unbind().returning(|| Ok(()));
        session
    }

    fn manager(session: MockDirectorySession) -> ObjectManager {
        let mut connector = MockDirectoryConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(move || Ok(Box::new(session)));
        ObjectManager::with_connector(config(), Box::new(connector))
    }

    #[test]
    fn new_requires_an_object_class() {
        let err = LdapObject::new(dn(), Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn add_request_leads_with_object_classes_and_drops_skipped() {
        let object = declared()
            .with_skip_attributes(["sn"])
            .with_attributes(
                [("cn", "John Doe"), ("sn", "Doe")]
                    .into_iter()
                    .collect::<AttributeMap>(),
            );

        assert_eq!(
            object.to_add_request(),
            vec![
                (
                    "objectClass".to_string(),
                    vec!["inetOrgPerson".to_string(), "top".to_string()]
                ),
                ("cn".to_string(), vec!["John Doe".to_string()]),
            ]
        );
    }

    #[test]
    fn reconcile_replaces_object_classes_first() {
        let old = declared();
        let mut new = declared();
        new.object_classes.insert("posixAccount".to_string());
        new.attributes = [("cn", "Johnny"), ("sn", "Doe")]
            .into_iter()
            .collect::<AttributeMap>()
            .into();

        assert_eq!(
            reconcile(&old, &new).unwrap(),
            vec![
                AttributeDelta::replace(
                    "objectClass",
                    vec![
                        "inetOrgPerson".to_string(),
                        "posixAccount".to_string(),
                        "top".to_string()
                    ]
                ),
                AttributeDelta::remove("mail"),
                AttributeDelta::replace("cn", vec!["Johnny".to_string()]),
            ]
        );
    }

    #[test]
    fn reconcile_rejects_dn_change() {
        let old = declared();
        let mut new = declared();
        new.dn = DistinguishedName::parse("uid=jane,ou=People,dc=example,dc=com").unwrap();
        assert!(matches!(
            reconcile(&old, &new),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn read_projects_live_entry() {
        let mut session = bound_session();
        session
            .expect_search()
            .withf(|base, scope, filter, attributes| {
                base == DN
                    && *scope == SearchScope::Base
                    && filter == "(objectClass=*)"
                    && attributes == ["*"]
            })
            .returning(|_, _, _, _| Ok(vec![live_entry()]));

        let state = manager(session).read(&declared()).await.unwrap().unwrap();
        assert_eq!(state, declared());
    }

    #[tokio::test]
    async fn read_keeps_set_representation() {
        let mut session = bound_session();
        session
            .expect_search()
            .returning(|_, _, _, _| Ok(vec![live_entry()]));

        let object = declared().with_attributes(AttributeSet::new());
        let state = manager(session).read(&object).await.unwrap().unwrap();

        let expected: AttributeSet = [
            ("cn", "John Doe"),
            ("mail", "jdoe@example.com"),
            ("mail", "john@example.com"),
            ("sn", "Doe"),
        ]
        .into_iter()
        .collect();
        assert_eq!(state.attributes, DeclaredAttributes::Set(expected));
    }

    #[tokio::test]
    async fn read_missing_object_returns_none() {
        let mut session = bound_session();
        session
            .expect_search()
            .returning(|_, _, _, _| Err(Error::NotFound("no such object".to_string())));

        assert!(manager(session).read(&declared()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_propagates_other_failures() {
        let mut session = MockDirectorySession::new();
        session.expect_simple_bind().returning(|_, _| Ok(()));
        session.expect_search().returning(|_, _, _, _| {
            Err(Error::Directory {
                code: Some(50),
                message: "insufficient access".to_string(),
            })
        });

        let err = manager(session).read(&declared()).await.unwrap_err();
        assert_eq!(err.error_code(), "DIRECTORY_ERROR");
    }

    #[tokio::test]
    async fn create_adds_then_reads_back() {
        let mut sequence = mockall::Sequence::new();
        let mut session = bound_session();
        let expected = declared().to_add_request();
        session
            .expect_add()
            .withf(move |dn, attributes| dn == DN && attributes == expected.as_slice())
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| Ok(()));
        session
            .expect_search()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _, _, _| Ok(vec![live_entry()]));

        let state = manager(session).create(&declared()).await.unwrap();
        assert_eq!(state.dn, dn());
    }

    #[tokio::test]
    async fn update_sends_computed_patch() {
        let old = declared();
        let mut new = declared();
        new.attributes = [("cn", "John Doe"), ("sn", "Doe"), ("mail", "jdoe@example.com")]
            .into_iter()
            .collect::<AttributeMap>()
            .into();

        let mut session = bound_session();
        session
            .expect_modify()
            .withf(|dn, deltas| {
                dn == DN
                    && deltas
                        == [AttributeDelta::replace(
                            "mail",
                            vec!["jdoe@example.com".to_string()],
                        )]
            })
            .times(1)
            .returning(|_, _| Ok(()));
        session.expect_search().returning(|_, _, _, _| {
            let mut entry = live_entry();
            entry
                .attributes
                .insert("mail".to_string(), vec!["jdoe@example.com".to_string()]);
            Ok(vec![entry])
        });

        let state = manager(session).update(&old, &new).await.unwrap().unwrap();
        assert_eq!(state, new);
    }

    #[tokio::test]
    async fn update_without_changes_skips_modify() {
        let mut session = bound_session();
        session.expect_modify().never();
        session
            .expect_search()
            .returning(|_, _, _, _| Ok(vec![live_entry()]));

        let state = manager(session)
            .update(&declared(), &declared())
            .await
            .unwrap();
        assert_eq!(state, Some(declared()));
    }

    #[tokio::test]
    async fn update_propagates_missing_object() {
        let mut new = declared();
        new.object_classes.insert("posixAccount".to_string());

        let mut session = MockDirectorySession::new();
        session.expect_simple_bind().returning(|_, _| Ok(()));
        session
            .expect_modify()
            .returning(|_, _| Err(Error::NotFound("no such object".to_string())));

        let err = manager(session)
            .update(&declared(), &new)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn exists_maps_not_found_to_false() {
        let mut session = bound_session();
        session
            .expect_search()
            .withf(|_, _, _, attributes| attributes == ["1.1"])
            .returning(|_, _, _, _| Err(Error::NotFound("no such object".to_string())));

        assert!(!manager(session).exists(&dn()).await.unwrap());
    }

    #[tokio::test]
    async fn exists_finds_entry() {
        let mut session = bound_session();
        session.expect_search().returning(|_, _, _, _| {
            Ok(vec![DirectoryEntry::new(
                DN,
                Vec::<(String, Vec<String>)>::new(),
            )])
        });

        assert!(manager(session).exists(&dn()).await.unwrap());
    }

    #[tokio::test]
    async fn delete_propagates_not_found() {
        let mut session = MockDirectorySession::new();
        session.expect_simple_bind().returning(|_, _| Ok(()));
        session
            .expect_delete()
            .withf(|dn| dn == DN)
            .returning(|_| Err(Error::NotFound("no such object".to_string())));

        let err = manager(session).delete(&dn()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let mut session = bound_session();
        session
            .expect_delete()
            .times(1)
            .returning(|_| Ok(()));

        manager(session).delete(&dn()).await.unwrap();
    }
}
