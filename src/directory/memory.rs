//! In-memory directory connector.
//!
//! Serves fixed entries per address and lets callers inject dial, bind and
//! search failures. Filters are limited to `(objectClass=<value>)`, where
//! `*` matches every entry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::{DirectoryAddress, DirectoryConnector, DirectoryError, DirectorySession, Entry};

/// Number of sessions opened and closed so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub opened: usize,
    pub closed: usize,
}

/// Contents and failure behavior of one simulated server.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    entries: Vec<Entry>,
    credentials: Option<(String, String)>,
    failing_bases: HashSet<String>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Its `objectClass` attribute drives filter matching.
    pub fn with_entry(mut self, entry: Entry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Only accept a bind with exactly these credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Fail every search issued against `base_dn`.
    pub fn failing_search(mut self, base_dn: impl Into<String>) -> Self {
        self.failing_bases.insert(base_dn.into().to_lowercase());
        self
    }

    fn search(&self, base_dn: &str, filter: &str, attribute: &str) -> Result<Vec<Entry>, DirectoryError> {
        if self.failing_bases.contains(&base_dn.to_lowercase()) {
            return Err(DirectoryError::Search {
                base_dn: base_dn.to_string(),
                reason: "operations error".to_string(),
            });
        }

        let class = parse_object_class_filter(filter).ok_or_else(|| DirectoryError::Search {
            base_dn: base_dn.to_string(),
            reason: format!("unsupported filter '{filter}'"),
        })?;

        Ok(self
            .entries
            .iter()
            .filter(|e| in_subtree(&e.dn, base_dn) && has_object_class(e, class))
            .map(|e| project(e, attribute))
            .collect())
    }
}

#[derive(Debug, Default)]
struct State {
    servers: HashMap<String, MemoryServer>,
    stats: SessionStats,
}

/// Shared in-memory directory. Clones see the same servers and counters.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<State>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server reachable at `addr`.
    pub fn with_server(self, addr: impl Into<String>, server: MemoryServer) -> Self {
        self.set_server(addr, server);
        self
    }

    /// Register or replace the server at `addr`.
    pub fn set_server(&self, addr: impl Into<String>, server: MemoryServer) {
        self.lock().servers.insert(addr.into(), server);
    }

    /// Make `addr` unreachable.
    pub fn remove_server(&self, addr: &str) {
        self.lock().servers.remove(addr);
    }

    pub fn stats(&self) -> SessionStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl DirectoryConnector for MemoryDirectory {
    async fn connect(
        &self,
        addr: &DirectoryAddress,
    ) -> Result<Box<dyn DirectorySession>, DirectoryError> {
        let mut state = self.lock();
        if !state.servers.contains_key(&addr.addr) {
            return Err(DirectoryError::Dial {
                addr: addr.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        state.stats.opened += 1;

        Ok(Box::new(MemorySession {
            directory: self.clone(),
            addr: addr.addr.clone(),
        }))
    }
}

struct MemorySession {
    directory: MemoryDirectory,
    addr: String,
}

impl MemorySession {
    fn server(&self) -> Result<MemoryServer, DirectoryError> {
        self.directory
            .lock()
            .servers
            .get(&self.addr)
            .cloned()
            .ok_or_else(|| DirectoryError::Dial {
                addr: self.addr.clone(),
                reason: "connection reset".to_string(),
            })
    }
}

#[async_trait::async_trait]
impl DirectorySession for MemorySession {
    async fn bind(&mut self, user: &str, password: &str) -> Result<(), DirectoryError> {
        match self.server()?.credentials {
            Some((u, p)) if u != user || p != password => Err(DirectoryError::Bind {
                user: user.to_string(),
                reason: "invalid credentials".to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn search(
        &mut self,
        base_dn: &str,
        filter: &str,
        attribute: &str,
    ) -> Result<Vec<Entry>, DirectoryError> {
        self.server()?.search(base_dn, filter, attribute)
    }

    async fn close(self: Box<Self>) {
        self.directory.lock().stats.closed += 1;
    }
}

fn parse_object_class_filter(filter: &str) -> Option<&str> {
    let inner = filter.strip_prefix('(')?.strip_suffix(')')?;
    let (attr, value) = inner.split_once('=')?;
    attr.eq_ignore_ascii_case("objectClass").then_some(value)
}

fn in_subtree(dn: &str, base_dn: &str) -> bool {
    let dn = dn.to_lowercase();
    let base = base_dn.to_lowercase();
    dn == base || dn.ends_with(&format!(",{base}"))
}

fn has_object_class(entry: &Entry, class: &str) -> bool {
    if class == "*" {
        return true;
    }
    entry
        .attrs
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case("objectClass"))
        .flat_map(|(_, v)| v)
        .any(|v| v.eq_ignore_ascii_case(class))
}

fn project(entry: &Entry, attribute: &str) -> Entry {
    Entry {
        dn: entry.dn.clone(),
        attrs: entry
            .attrs
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(attribute))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}
