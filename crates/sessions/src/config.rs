use crate::error::{Result, SessionError};

const DEFAULT_TABLE: &str = "sessions";

/// Connection settings for the session store.
#[derive(Debug, Clone)]
pub struct SessionDbConfig {
    /// Path to the SQLite database file (or `:memory:` for tests).
    pub db_path: String,
    /// Table holding session rows.
    pub table_name: String,
}

impl Default for SessionDbConfig {
    fn default() -> Self {
        Self {
            db_path: "sessions.db".into(),
            table_name: DEFAULT_TABLE.into(),
        }
    }
}

impl SessionDbConfig {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// In-memory database, private to the connection pool.
    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Connection URL for the pool, derived from `db_path`. File-backed
    /// databases are created on first open.
    pub fn connect_url(&self) -> String {
        if self.db_path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", self.db_path)
        }
    }

    /// The table name is rendered into SQL, so restrict it to identifier
    /// characters.
    pub(crate) fn validated_table_name(&self) -> Result<&str> {
        let table = self.table_name.as_str();
        let valid = !table.is_empty()
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !table.starts_with(|c: char| c.is_ascii_digit());
        if valid {
            Ok(table)
        } else {
            Err(SessionError::Config(format!(
                "table name {table:?} is not a valid identifier"
            )))
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionDbConfig::default();
        assert_eq!(config.db_path, "sessions.db");
        assert_eq!(config.table_name, "sessions");
    }

    #[test]
    fn connect_url_forms() {
        assert_eq!(SessionDbConfig::in_memory().connect_url(), "sqlite::memory:");
        assert_eq!(
            SessionDbConfig::new("/tmp/app.db").connect_url(),
            "sqlite:///tmp/app.db?mode=rwc"
        );
    }

    #[test]
    fn table_name_validation() {
        let ok = SessionDbConfig::in_memory().with_table_name("web_sessions_2");
        assert_eq!(ok.validated_table_name().unwrap(), "web_sessions_2");

        for bad in ["", "se ssions", "sessions;drop", "1sessions"] {
            let config = SessionDbConfig::in_memory().with_table_name(bad);
            assert!(matches!(
                config.validated_table_name(),
                Err(SessionError::Config(_))
            ));
        }
    }
}
