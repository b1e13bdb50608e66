use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::types::Status;

pub const VISITED_KEY: &str = "visited_shops";
pub const FAVORITE_KEY: &str = "favorite_shops";
pub const USER_NAME_KEY: &str = "user_name";
pub const STATUS_KEY: &str = "shop_status";

pub const DEFAULT_USER_NAME: &str = "台灣囡仔";

/// A flat, durable string key-value space.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug)]
pub struct SqliteKeyValue {
    conn: Connection,
}

impl SqliteKeyValue {
    pub fn new(db_url: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_url)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(
            "
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            ",
            (),
        )?;
        Ok(SqliteKeyValue { conn })
    }
}

impl KeyValueStore for SqliteKeyValue {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "
            INSERT INTO kv (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            ",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// Non-durable store, handy for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryKeyValue {
    values: RefCell<HashMap<String, String>>,
}

impl KeyValueStore for MemoryKeyValue {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.borrow_mut().remove(key);
        Ok(())
    }
}

/// Per-place user state on top of a [`KeyValueStore`].
///
/// The visited list is the only record of [`Status::Visited`]; the other
/// statuses live in a separate id to status map. Every mutation is written
/// through immediately. Values that no longer parse read back as empty.
pub struct StatusStore<S> {
    kv: S,
}

impl<S: KeyValueStore> StatusStore<S> {
    pub fn new(kv: S) -> Self {
        StatusStore { kv }
    }

    pub fn get_status(&self, place_id: &str) -> Status {
        if self.list_visited().iter().any(|id| id == place_id) {
            return Status::Visited;
        }
        self.read_statuses()
            .get(place_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_status(&self, place_id: &str, status: Status) -> Result<(), StoreError> {
        debug!(place_id, %status, "setting status");
        let mut statuses = self.read_statuses();
        let changed = match status {
            Status::None | Status::Visited => statuses.remove(place_id).is_some(),
            other => statuses.insert(place_id.to_owned(), other) != Some(other),
        };
        if changed {
            self.kv.set(STATUS_KEY, &serde_json::to_string(&statuses)?)?;
        }
        if status == Status::Visited {
            self.add_visited(place_id)?;
        } else {
            self.remove_visited(place_id)?;
        }
        Ok(())
    }

    /// Statuses of the given ids, skipping ids with no status.
    pub fn status_map<'a>(
        &self,
        place_ids: impl IntoIterator<Item = &'a str>,
    ) -> HashMap<String, Status> {
        let visited = self.list_visited();
        let statuses = self.read_statuses();
        place_ids
            .into_iter()
            .filter_map(|id| {
                let status = if visited.iter().any(|v| v == id) {
                    Status::Visited
                } else {
                    statuses.get(id).copied()?
                };
                Some((id.to_owned(), status))
            })
            .collect()
    }

    pub fn list_visited(&self) -> Vec<String> {
        self.read_json(VISITED_KEY)
    }

    pub fn add_visited(&self, place_id: &str) -> Result<Vec<String>, StoreError> {
        let mut visited = self.list_visited();
        if !visited.iter().any(|id| id == place_id) {
            visited.push(place_id.to_owned());
            self.kv.set(VISITED_KEY, &serde_json::to_string(&visited)?)?;
        }
        Ok(visited)
    }

    pub fn remove_visited(&self, place_id: &str) -> Result<Vec<String>, StoreError> {
        let mut visited = self.list_visited();
        let before = visited.len();
        visited.retain(|id| id != place_id);
        if visited.len() != before {
            self.kv.set(VISITED_KEY, &serde_json::to_string(&visited)?)?;
        }
        Ok(visited)
    }

    /// Clears the visited list. Favorites, other statuses and the user name stay.
    pub fn reset_visited(&self) -> Result<(), StoreError> {
        self.kv.remove(VISITED_KEY)
    }

    pub fn favorites(&self) -> Vec<String> {
        self.read_json(FAVORITE_KEY)
    }

    pub fn is_favorite(&self, place_id: &str) -> bool {
        self.favorites().iter().any(|id| id == place_id)
    }

    /// Flip the favorite flag and return the new favorite list.
    pub fn toggle_favorite(&self, place_id: &str) -> Result<Vec<String>, StoreError> {
        let mut favorites = self.favorites();
        if favorites.iter().any(|id| id == place_id) {
            favorites.retain(|id| id != place_id);
        } else {
            favorites.push(place_id.to_owned());
        }
        self.kv
            .set(FAVORITE_KEY, &serde_json::to_string(&favorites)?)?;
        Ok(favorites)
    }

    pub fn user_name(&self) -> String {
        match self.kv.get(USER_NAME_KEY) {
            Ok(Some(name)) if !name.is_empty() => name,
            Ok(_) => DEFAULT_USER_NAME.to_owned(),
            Err(e) => {
                warn!(error = %e, "could not read user name");
                DEFAULT_USER_NAME.to_owned()
            }
        }
    }

    pub fn set_user_name(&self, name: &str) -> Result<(), StoreError> {
        self.kv.set(USER_NAME_KEY, name)
    }

    /// Write the default name on first start.
    pub fn init_user_name(&self) -> Result<(), StoreError> {
        match self.kv.get(USER_NAME_KEY)? {
            Some(name) if !name.is_empty() => Ok(()),
            _ => self.kv.set(USER_NAME_KEY, DEFAULT_USER_NAME),
        }
    }

    fn read_statuses(&self) -> BTreeMap<String, Status> {
        self.read_json(STATUS_KEY)
    }

    fn read_json<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let stored = match self.kv.get(key) {
            Ok(Some(stored)) => stored,
            Ok(None) => return T::default(),
            Err(e) => {
                warn!(key, error = %e, "could not read stored value");
                return T::default();
            }
        };
        serde_json::from_str(&stored).unwrap_or_else(|e| {
            warn!(key, error = %e, "ignoring unparsable stored value");
            T::default()
        })
    }
}
