//! `ldap3`-backed directory connector.

use std::time::Duration;

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry};

use super::traits::{DirectoryAddress, DirectoryConnector, DirectoryError, DirectorySession, Entry};

/// Default transport timeout (10 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connector dialing real directory servers.
///
/// The timeout bounds connection establishment and every single operation.
#[derive(Debug, Clone)]
pub struct LdapConnector {
    timeout: Duration,
}

impl LdapConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for LdapConnector {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(
        &self,
        addr: &DirectoryAddress,
    ) -> Result<Box<dyn DirectorySession>, DirectoryError> {
        let url = addr.url()?;
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| match e {
                LdapError::Timeout { .. } => DirectoryError::Timeout(self.timeout),
                e => DirectoryError::Dial {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                },
            })?;

        let target = addr.to_string();
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                tracing::warn!(addr = %target, error = %e, "Directory connection driver stopped");
            }
        });

        tracing::debug!(addr = %addr, "Directory connection opened");
        Ok(Box::new(LdapSession {
            ldap,
            timeout: self.timeout,
            addr: addr.to_string(),
        }))
    }
}

struct LdapSession {
    ldap: Ldap,
    timeout: Duration,
    addr: String,
}

impl LdapSession {
    fn map_err(&self, e: LdapError, wrap: impl FnOnce(String) -> DirectoryError) -> DirectoryError {
        match e {
            LdapError::Timeout { .. } => DirectoryError::Timeout(self.timeout),
            e => wrap(e.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl DirectorySession for LdapSession {
    async fn bind(&mut self, user: &str, password: &str) -> Result<(), DirectoryError> {
        let result = self
            .ldap
            .with_timeout(self.timeout)
            .simple_bind(user, password)
            .await
            .and_then(|r| r.success());

        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.map_err(e, |reason| DirectoryError::Bind {
                user: user.to_string(),
                reason,
            })),
        }
    }

    async fn search(
        &mut self,
        base_dn: &str,
        filter: &str,
        attribute: &str,
    ) -> Result<Vec<Entry>, DirectoryError> {
        let result = self
            .ldap
            .with_timeout(self.timeout)
            .search(base_dn, Scope::Subtree, filter, vec![attribute])
            .await
            .and_then(|r| r.success());

        let (entries, _) = match result {
            Ok(found) => found,
            Err(e) => {
                return Err(self.map_err(e, |reason| DirectoryError::Search {
                    base_dn: base_dn.to_string(),
                    reason,
                }));
            }
        };

        Ok(entries
            .into_iter()
            .map(|raw| {
                let entry = SearchEntry::construct(raw);
                Entry {
                    dn: entry.dn,
                    attrs: entry.attrs,
                }
            })
            .collect())
    }

    async fn close(self: Box<Self>) {
        let mut session = *self;
        if let Err(e) = session.ldap.unbind().await {
            tracing::debug!(addr = %session.addr, error = %e, "Unbind failed");
        }
        tracing::debug!(addr = %session.addr, "Directory connection closed");
    }
}
