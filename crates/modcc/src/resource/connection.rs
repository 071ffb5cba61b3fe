//! Connection resources
//!
//! Each backend shares the same resource core and contributes its own
//! settings; dispatch over {validate, resolve, serialize} goes through
//! [ConnectionBackend].

use super::ResourceCore;
use crate::diagnostic::{Diagnostic, Diagnostics};
use hcl::Value;

/// A database connection declaration, `connection "<type>" "<name>" { .. }`
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Connection {
    #[serde(flatten)]
    pub core: ResourceCore,
    /// The subtype label, e.g. `postgres`
    pub connection_type: String,
    pub backend: ConnectionBackend,
}

impl Connection {
    pub fn new(core: ResourceCore, connection_type: String, backend: ConnectionBackend) -> Self {
        Self {
            core,
            connection_type,
            backend,
        }
    }

    pub fn validate(&self) -> Diagnostics {
        let mut diags = Diagnostics::new();
        if self.connection_string().is_none() {
            diags.push(
                Diagnostic::error(format!(
                    "Connection '{}' does not resolve to a connection string",
                    self.core.full_name
                ))
                .with_range(self.core.decl_range.clone()),
            );
        }
        diags
    }

    /// Resolve the backend settings to a connection string
    pub fn connection_string(&self) -> Option<String> {
        self.backend.connection_string(&self.connection_type)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum ConnectionBackend {
    /// Server based backends (postgres, mysql)
    Server(ServerBackend),
    /// File based backends (sqlite, duckdb)
    File(FileBackend),
}

impl ConnectionBackend {
    /// Whether `connection_type` maps to a server or file backend
    pub fn for_type(connection_type: &str) -> Option<ConnectionBackend> {
        match connection_type {
            "postgres" | "mysql" => Some(ConnectionBackend::Server(ServerBackend::default())),
            "sqlite" | "duckdb" => Some(ConnectionBackend::File(FileBackend::default())),
            _ => None,
        }
    }

    fn connection_string(&self, connection_type: &str) -> Option<String> {
        match self {
            ConnectionBackend::Server(server) => server.connection_string(connection_type),
            ConnectionBackend::File(file) => file.connection_string(connection_type),
        }
    }

    pub(crate) fn extend_reference_value(&self, map: &mut hcl::value::Map<String, Value>) {
        match self {
            ConnectionBackend::Server(server) => {
                if let Some(host) = &server.host {
                    map.insert("host".into(), Value::String(host.clone()));
                }
                if let Some(database) = &server.database {
                    map.insert("database".into(), Value::String(database.clone()));
                }
                if let Some(username) = &server.username {
                    map.insert("username".into(), Value::String(username.clone()));
                }
            }
            ConnectionBackend::File(file) => {
                if let Some(filename) = &file.filename {
                    map.insert("filename".into(), Value::String(filename.clone()));
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ServerBackend {
    pub connection_string: Option<String>,
    pub host: Option<String>,
    pub port: Option<i64>,
    pub database: Option<String>,
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
    pub search_path: Vec<String>,
    pub search_path_prefix: Vec<String>,
}

impl ServerBackend {
    fn connection_string(&self, connection_type: &str) -> Option<String> {
        if let Some(connection_string) = &self.connection_string {
            return Some(connection_string.clone());
        }

        // build from parts; host and database are the minimum
        let host = self.host.as_deref()?;
        let database = self.database.as_deref()?;
        let mut auth = String::new();
        if let Some(username) = &self.username {
            auth.push_str(username);
            if let Some(password) = &self.password {
                auth.push(':');
                auth.push_str(password);
            }
            auth.push('@');
        }
        let port = self.port.map(|p| format!(":{p}")).unwrap_or_default();
        Some(format!("{connection_type}://{auth}{host}{port}/{database}"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct FileBackend {
    pub connection_string: Option<String>,
    pub filename: Option<String>,
}

impl FileBackend {
    fn connection_string(&self, connection_type: &str) -> Option<String> {
        if let Some(connection_string) = &self.connection_string {
            return Some(connection_string.clone());
        }
        self.filename
            .as_ref()
            .map(|filename| format!("{connection_type}://{filename}"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn server_connection_string_from_parts() {
        let backend = ServerBackend {
            host: Some("db.internal".into()),
            port: Some(5432),
            database: Some("metrics".into()),
            username: Some("reader".into()),
            ..Default::default()
        };
        assert_eq!(
            backend.connection_string("postgres").as_deref(),
            Some("postgres://reader@db.internal:5432/metrics")
        );
    }

    #[test]
    fn explicit_connection_string_wins() {
        let backend = ServerBackend {
            connection_string: Some("postgres://elsewhere/db".into()),
            host: Some("ignored".into()),
            database: Some("ignored".into()),
            ..Default::default()
        };
        assert_eq!(
            backend.connection_string("postgres").as_deref(),
            Some("postgres://elsewhere/db")
        );
    }

    #[test]
    fn unknown_backend_type_is_rejected() {
        assert!(ConnectionBackend::for_type("oracle").is_none());
    }
}
