// Per-identity advisory lock files backing a service's lock/unlock pair.
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::core::error::{ErrorCode, Failure, ServiceResult};

/// Non-blocking exclusive lock on `<dir>/<scope>-<id>.lock`.
#[derive(Debug)]
pub struct IdentityLock {
    dir: PathBuf,
    held: Option<(File, PathBuf)>,
}

impl IdentityLock {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            held: None,
        }
    }

    pub fn path_for(&self, scope: &str, id: i64) -> PathBuf {
        self.dir.join(format!("{scope}-{id}.lock"))
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Contention fails with `RETRY`; anything else with `SYSTEM`.
    pub fn acquire(&mut self, scope: &str, id: i64) -> ServiceResult<()> {
        if self.held.is_some() {
            return Err(Failure::new(ErrorCode::SYSTEM)
                .with_message("lock already held")
                .with_field("scope", scope)
                .with_field("id", id));
        }
        fs::create_dir_all(&self.dir).map_err(|err| lock_failure(&self.dir, err))?;
        let path = self.path_for(scope, id);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| lock_failure(&path, err))?;
        file.try_lock_exclusive()
            .map_err(|err| lock_failure(&path, err))?;
        self.held = Some((file, path));
        Ok(())
    }

    pub fn release(&mut self) -> ServiceResult<()> {
        let Some((file, path)) = self.held.take() else {
            return Ok(());
        };
        FileExt::unlock(&file).map_err(|err| lock_failure(&path, err))
    }
}

impl Drop for IdentityLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn lock_failure(path: &Path, err: io::Error) -> Failure {
    let code = lock_error_code(&err);
    let message = if code == ErrorCode::RETRY {
        "lock busy"
    } else {
        "lock failed"
    };
    Failure::new(code)
        .with_message(message)
        .with_field("path", path.display().to_string())
        .with_source(err)
}

fn lock_error_code(err: &io::Error) -> ErrorCode {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorCode::SYSTEM;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorCode::RETRY,
        _ => ErrorCode::SYSTEM,
    }
}
