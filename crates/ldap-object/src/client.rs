//! Directory client boundary and its `ldap3` implementation.

use crate::{delta::AttributeDelta, entry::DirectoryEntry, Result};
use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry};
use ldap_object_core::{DirectoryConfig, Error};
use native_tls::{Certificate, TlsConnector};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Attribute whose values are sent as quoted UTF-16LE (Active Directory passwords).
pub const UNICODE_PWD: &str = "unicodePwd";

/// Represents the search scope for LDAP queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// One open connection to the directory.
///
/// A search against a missing base must fail with [`Error::NotFound`]; every other failure is
/// [`Error::Directory`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectorySession: Send {
    /// Authenticates the session.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()>;
    /// Searches below `base_dn`.
    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<DirectoryEntry>>;
    /// Creates an entry with the given attributes.
    async fn add(&mut self, dn: &str, attributes: &[(String, Vec<String>)]) -> Result<()>;
    /// Applies attribute deltas to an entry in one request.
    async fn modify(&mut self, dn: &str, deltas: &[AttributeDelta]) -> Result<()>;
    /// Deletes an entry.
    async fn delete(&mut self, dn: &str) -> Result<()>;
    /// Closes the session.
    async fn unbind(&mut self) -> Result<()>;
}

/// Opens directory sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Opens an unauthenticated session.
    async fn connect(&self) -> Result<Box<dyn DirectorySession>>;
}

/// Real LDAP connector backed by `ldap3`.
pub struct Ldap3Connector {
    config: Arc<DirectoryConfig>,
}

impl Ldap3Connector {
    /// Creates a new connector instance.
    #[must_use]
    pub fn new(config: Arc<DirectoryConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DirectoryConnector for Ldap3Connector {
    async fn connect(&self) -> Result<Box<dyn DirectorySession>> {
        let settings = build_ldap_settings(&self.config)?;
        let (conn, ldap) = LdapConnAsync::with_settings(settings, self.config.url())
            .await
            .map_err(map_ldap_error)?;
        ldap3::drive!(conn);
        Ok(Box::new(Ldap3Session {
            inner: ldap,
            operation_timeout: self.config.operation_timeout(),
        }))
    }
}

struct Ldap3Session {
    inner: ldap3::Ldap,
    operation_timeout: Duration,
}

#[async_trait]
impl DirectorySession for Ldap3Session {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        let limit = self.operation_timeout;
        timed(limit, "bind", self.inner.simple_bind(dn, password))
            .await?
            .success()
            .map_err(map_ldap_error)?;
        Ok(())
    }

    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<DirectoryEntry>> {
        let result = timed(
            self.operation_timeout,
            "search",
            self.inner
                .search(base_dn, scope.into(), filter, attributes.to_vec()),
        )
        .await?;
        let (entries, _) = result.success().map_err(map_ldap_error)?;
        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(DirectoryEntry::from)
            .collect())
    }

    async fn add(&mut self, dn: &str, attributes: &[(String, Vec<String>)]) -> Result<()> {
        let attrs = attributes
            .iter()
            .map(|(name, values)| (name.as_bytes().to_vec(), encode_values(name, values)))
            .collect::<Vec<_>>();

        timed(self.operation_timeout, "add", self.inner.add(dn, attrs))
            .await?
            .success()
            .map_err(map_ldap_error)?;
        Ok(())
    }

    async fn modify(&mut self, dn: &str, deltas: &[AttributeDelta]) -> Result<()> {
        let mods = deltas
            .iter()
            .map(|delta| match delta {
                AttributeDelta::Add { attribute, values } => Mod::Add(
                    attribute.as_bytes().to_vec(),
                    encode_values(attribute, values),
                ),
                AttributeDelta::Remove { attribute } => {
                    Mod::Delete(attribute.as_bytes().to_vec(), HashSet::new())
                }
                AttributeDelta::Replace { attribute, values } => Mod::Replace(
                    attribute.as_bytes().to_vec(),
                    encode_values(attribute, values),
                ),
            })
            .collect::<Vec<_>>();

        timed(self.operation_timeout, "modify", self.inner.modify(dn, mods))
            .await?
            .success()
            .map_err(map_ldap_error)?;
        Ok(())
    }

    async fn delete(&mut self, dn: &str) -> Result<()> {
        timed(self.operation_timeout, "delete", self.inner.delete(dn))
            .await?
            .success()
            .map_err(map_ldap_error)?;
        Ok(())
    }

    async fn unbind(&mut self) -> Result<()> {
        timed(self.operation_timeout, "unbind", self.inner.unbind()).await
    }
}

async fn timed<F, T>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = std::result::Result<T, LdapError>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(format!("LDAP {operation} timed out")))?
        .map_err(map_ldap_error)
}

/// Encodes one attribute value for the wire.
///
/// `unicodePwd` values are wrapped in double quotes and encoded as UTF-16LE; everything else is
/// sent as UTF-8.
#[must_use]
pub fn encode_attribute_value(attribute: &str, value: &str) -> Vec<u8> {
    if attribute.eq_ignore_ascii_case(UNICODE_PWD) {
        format!("\"{value}\"")
            .encode_utf16()
            .flat_map(u16::to_le_bytes)
            .collect()
    } else {
        value.as_bytes().to_vec()
    }
}

fn encode_values(attribute: &str, values: &[String]) -> HashSet<Vec<u8>> {
    values
        .iter()
        .map(|value| encode_attribute_value(attribute, value))
        .collect()
}

fn build_ldap_settings(config: &DirectoryConfig) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new().set_conn_timeout(config.connection_timeout());

    if !config.tls_verify() {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| Error::Config(format!("failed to construct TLS connector: {err}")))?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    } else if let Some(cert_path) = config.tls_ca_cert() {
        let pem = fs::read(cert_path).map_err(|err| {
            Error::Config(format!(
                "failed to read CA certificate {}: {err}",
                cert_path.display()
            ))
        })?;
        let certificate = Certificate::from_pem(&pem)
            .map_err(|err| Error::Config(format!("invalid CA certificate: {err}")))?;
        let connector = TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|err| Error::Config(format!("failed to load CA certificate: {err}")))?;
        settings = settings.set_connector(connector);
    }

    Ok(settings)
}

fn map_ldap_error(err: LdapError) -> Error {
    match err {
        LdapError::LdapResult { result } => {
            let message = if result.text.is_empty() {
                format!("result code {}", result.rc)
            } else {
                result.text
            };
            Error::from_result_code(result.rc, message)
        }
        other => Error::Directory {
            code: None,
            message: other.to_string(),
        },
    }
}
