//! Purpose: Data-access collaborator seam plus a JSON-file key-value adapter.
//! Exports: `Connector`, `DataClient`, `run_in_transaction`, `FileStore`.
//! Role: What services reach for in `load_session`/`run`; the core never calls it.
//! Invariants: `close` is idempotent and also runs on drop.
//! Invariants: Writes inside a transaction are invisible on disk until commit.
//! Invariants: Adapter failures carry `SYSTEM`; callers treat them as opaque.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::core::error::{ErrorCode, Failure, ServiceResult};

pub trait Connector {
    fn connect(&mut self) -> ServiceResult<()>;

    /// Safe to call repeatedly, including during teardown.
    fn close(&mut self);

    fn is_connected(&self) -> bool;
}

pub trait DataClient: Connector {
    /// Returns the number of rows affected.
    fn execute(&mut self, statement: &str, params: &[Value]) -> ServiceResult<u64>;

    fn query(&mut self, statement: &str, params: &[Value]) -> ServiceResult<Vec<Value>>;

    fn fetch_one(&mut self, statement: &str, params: &[Value]) -> ServiceResult<Option<Value>> {
        Ok(self.query(statement, params)?.into_iter().next())
    }

    fn begin(&mut self) -> ServiceResult<()>;

    fn commit(&mut self) -> ServiceResult<()>;

    fn rollback(&mut self) -> ServiceResult<()>;
}

/// Commits when `f` succeeds, rolls back when it fails. A failed rollback
/// does not mask the original failure.
pub fn run_in_transaction<C, T, F>(client: &mut C, f: F) -> ServiceResult<T>
where
    C: DataClient + ?Sized,
    F: FnOnce(&mut C) -> ServiceResult<T>,
{
    client.begin()?;
    match f(client) {
        Ok(value) => {
            client.commit()?;
            Ok(value)
        }
        Err(failure) => {
            let _ = client.rollback();
            Err(failure)
        }
    }
}

#[derive(Debug, Default)]
struct Connection {
    data: Map<String, Value>,
    staged: Option<Map<String, Value>>,
}

/// Key-value store persisted as one JSON object file.
///
/// Statements: `get <key>`, `keys`, `set <key> <value>`, `incr <key> <delta>`,
/// `del <key>`; the key and value are passed as params.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    conn: Option<Connection>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn in_transaction(&self) -> bool {
        self.conn
            .as_ref()
            .is_some_and(|conn| conn.staged.is_some())
    }

    fn conn_mut(&mut self) -> ServiceResult<&mut Connection> {
        let path = self.path.display().to_string();
        self.conn.as_mut().ok_or_else(|| {
            Failure::new(ErrorCode::SYSTEM)
                .with_message("store not connected")
                .with_field("path", path)
        })
    }

    fn persist(path: &Path, data: &Map<String, Value>) -> ServiceResult<()> {
        let encoded = serde_json::to_vec_pretty(data).map_err(|err| {
            Failure::new(ErrorCode::SYSTEM)
                .with_message("failed to encode store")
                .with_source(err)
        })?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, encoded)
            .and_then(|_| fs::rename(&tmp, path))
            .map_err(|err| io_failure("failed to write store", path, err))
    }
}

impl Connector for FileStore {
    fn connect(&mut self) -> ServiceResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| io_failure("failed to create store dir", parent, err))?;
        }
        let data = match fs::read(&self.path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Map::new(),
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(Failure::new(ErrorCode::SYSTEM)
                        .with_message("store is not a JSON object")
                        .with_field("path", self.path.display().to_string()));
                }
                Err(err) => {
                    return Err(Failure::new(ErrorCode::SYSTEM)
                        .with_message("store is corrupt")
                        .with_field("path", self.path.display().to_string())
                        .with_source(err));
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Map::new(),
            Err(err) => return Err(io_failure("failed to read store", &self.path, err)),
        };
        self.conn = Some(Connection { data, staged: None });
        Ok(())
    }

    /// Drops the connection; an open transaction is discarded.
    fn close(&mut self) {
        self.conn = None;
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }
}

impl DataClient for FileStore {
    fn execute(&mut self, statement: &str, params: &[Value]) -> ServiceResult<u64> {
        let path = self.path.clone();
        let conn = self.conn_mut()?;
        let in_tx = conn.staged.is_some();
        let data = conn.staged.as_mut().unwrap_or(&mut conn.data);

        let affected = match statement {
            "set" => {
                let key = key_param(statement, params)?;
                let value = params.get(1).cloned().unwrap_or(Value::Null);
                data.insert(key, value);
                1
            }
            "incr" => {
                let key = key_param(statement, params)?;
                let delta = params.get(1).and_then(Value::as_i64).unwrap_or(1);
                let current = match data.get(&key) {
                    None | Some(Value::Null) => 0,
                    Some(value) => value.as_i64().ok_or_else(|| {
                        Failure::new(ErrorCode::SYSTEM)
                            .with_message("incr on non-integer value")
                            .with_field("key", key.clone())
                    })?,
                };
                let next = current.checked_add(delta).ok_or_else(|| {
                    Failure::new(ErrorCode::SYSTEM)
                        .with_message("incr overflow")
                        .with_field("key", key.clone())
                        .with_field("delta", delta)
                })?;
                data.insert(key, Value::from(next));
                1
            }
            "del" => {
                let key = key_param(statement, params)?;
                u64::from(data.remove(&key).is_some())
            }
            _ => return Err(unknown_statement(statement)),
        };

        if !in_tx {
            FileStore::persist(&path, &conn.data)?;
        }
        Ok(affected)
    }

    fn query(&mut self, statement: &str, params: &[Value]) -> ServiceResult<Vec<Value>> {
        let conn = self.conn_mut()?;
        let data = conn.staged.as_ref().unwrap_or(&conn.data);
        match statement {
            "get" => {
                let key = key_param(statement, params)?;
                Ok(data.get(&key).cloned().into_iter().collect())
            }
            "keys" => Ok(data.keys().map(|key| Value::from(key.as_str())).collect()),
            _ => Err(unknown_statement(statement)),
        }
    }

    fn begin(&mut self) -> ServiceResult<()> {
        let conn = self.conn_mut()?;
        if conn.staged.is_some() {
            return Err(Failure::new(ErrorCode::SYSTEM).with_message("transaction already open"));
        }
        conn.staged = Some(conn.data.clone());
        Ok(())
    }

    fn commit(&mut self) -> ServiceResult<()> {
        let path = self.path.clone();
        let conn = self.conn_mut()?;
        let staged = conn.staged.take().ok_or_else(|| {
            Failure::new(ErrorCode::SYSTEM).with_message("no open transaction")
        })?;
        FileStore::persist(&path, &staged)?;
        conn.data = staged;
        Ok(())
    }

    fn rollback(&mut self) -> ServiceResult<()> {
        let conn = self.conn_mut()?;
        conn.staged = None;
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn key_param(statement: &str, params: &[Value]) -> ServiceResult<String> {
    match params.first() {
        Some(Value::String(key)) => Ok(key.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(Failure::new(ErrorCode::SYSTEM)
            .with_message("missing key param")
            .with_field("statement", statement)),
    }
}

fn unknown_statement(statement: &str) -> Failure {
    Failure::new(ErrorCode::SYSTEM)
        .with_message("unknown statement")
        .with_field("statement", statement)
}

fn io_failure(message: &str, path: &Path, err: io::Error) -> Failure {
    Failure::new(ErrorCode::SYSTEM)
        .with_message(message)
        .with_field("path", path.display().to_string())
        .with_source(err)
}
