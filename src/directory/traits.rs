//! Core directory traits and types.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Errors that can occur while talking to a directory server.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The server could not be reached.
    #[error("dial {addr} failed: {reason}")]
    Dial { addr: String, reason: String },

    /// Simple bind was rejected.
    #[error("bind as '{user}' failed: {reason}")]
    Bind { user: String, reason: String },

    /// Search execution failed.
    #[error("search under '{base_dn}' failed: {reason}")]
    Search { base_dn: String, reason: String },

    /// Operation did not complete in time.
    #[error("timeout elapsed after {0:?}")]
    Timeout(Duration),

    /// The configured address cannot be turned into a directory URL.
    #[error("invalid directory address: {0}")]
    InvalidAddress(String),
}

/// Transport used to reach the directory server.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Transport {
    /// Plain LDAP over TCP (`ldap://`).
    #[default]
    Tcp,
    /// LDAP over TLS (`ldaps://`).
    Tls,
    /// LDAP over a unix domain socket (`ldapi://`).
    Unix,
}

/// Transport kind plus address of a directory server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryAddress {
    pub transport: Transport,
    /// `host:port` for TCP/TLS, socket path for unix.
    pub addr: String,
}

impl DirectoryAddress {
    pub fn new(transport: Transport, addr: impl Into<String>) -> Self {
        Self {
            transport,
            addr: addr.into(),
        }
    }

    /// Build the `ldap3` connection URL for this address.
    ///
    /// # Errors
    /// Returns `DirectoryError::InvalidAddress` for an empty address or a
    /// relative socket path.
    pub fn url(&self) -> Result<String, DirectoryError> {
        let addr = self.addr.trim();
        if addr.is_empty() {
            return Err(DirectoryError::InvalidAddress("address is empty".to_string()));
        }

        match self.transport {
            Transport::Tcp => Ok(format!("ldap://{addr}")),
            Transport::Tls => Ok(format!("ldaps://{addr}")),
            Transport::Unix => {
                if !addr.starts_with('/') {
                    return Err(DirectoryError::InvalidAddress(format!(
                        "unix socket path must be absolute: '{addr}'"
                    )));
                }
                let encoded: String = url::form_urlencoded::byte_serialize(addr.as_bytes()).collect();
                Ok(format!("ldapi://{encoded}"))
            }
        }
    }
}

impl std::fmt::Display for DirectoryAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.transport, self.addr)
    }
}

/// Simple bind credentials.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// No bind at all.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A bind is only issued when both user and password are set.
    pub fn should_bind(&self) -> bool {
        !self.user.is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A single search result entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    /// Distinguished name.
    pub dn: String,
    /// Attribute name to values.
    pub attrs: HashMap<String, Vec<String>>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: HashMap::new(),
        }
    }

    /// Add a value to an attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.entry(name.into()).or_default().push(value.into());
        self
    }

    /// First value of an attribute.
    ///
    /// Attribute names are matched case-insensitively. An empty value is
    /// reported as absent.
    pub fn attr(&self, name: &str) -> Option<&str> {
        let values = self.attrs.get(name).or_else(|| {
            self.attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })?;

        values.first().map(String::as_str).filter(|v| !v.is_empty())
    }
}

/// An open connection to a directory server.
///
/// Sessions are consumed by [`DirectorySession::close`], which every caller
/// invokes on all exit paths once it is done with the session.
#[async_trait::async_trait]
pub trait DirectorySession: Send {
    /// Authenticate with a simple bind.
    async fn bind(&mut self, user: &str, password: &str) -> Result<(), DirectoryError>;

    /// Run a whole-subtree search returning only `attribute`.
    async fn search(
        &mut self,
        base_dn: &str,
        filter: &str,
        attribute: &str,
    ) -> Result<Vec<Entry>, DirectoryError>;

    /// Release the connection.
    async fn close(self: Box<Self>);
}

/// Opens sessions to directory servers.
#[async_trait::async_trait]
pub trait DirectoryConnector: Send + Sync + 'static {
    /// Dial the server at `addr`.
    async fn connect(
        &self,
        addr: &DirectoryAddress,
    ) -> Result<Box<dyn DirectorySession>, DirectoryError>;
}

/// Dial `addr` and bind when credentials are configured.
///
/// On bind failure the session is closed before the error is returned.
pub async fn open_session(
    connector: &dyn DirectoryConnector,
    addr: &DirectoryAddress,
    credentials: &Credentials,
) -> Result<Box<dyn DirectorySession>, DirectoryError> {
    let mut session = connector.connect(addr).await?;

    if credentials.should_bind() {
        if let Err(e) = session.bind(&credentials.user, &credentials.password).await {
            session.close().await;
            return Err(e);
        }
    }

    Ok(session)
}
