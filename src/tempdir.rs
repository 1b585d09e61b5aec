//! Manage a temporary directory

use libc;
use std::ffi::{CString, OsString};
use std::io;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use log::{debug, error};

use super::err::{Error, Result};
use super::path;

const TEMPLATE: &str = "run-in-fsns-XXXXXX";

/// A temporary directory which will be `rm -rf` when dropped.
#[derive(Debug)]
pub struct TempDir {
    name: PathBuf,
}

impl TempDir {
    /// Create a new, empty, owner only, temporary directory under `$TMPDIR`
    pub fn new() -> Result<TempDir> {
        let template = path!(std::env::temp_dir(), TEMPLATE);
        let template = CString::new(template.as_os_str().as_bytes())?;
        let raw = template.into_raw();
        let ret = unsafe { libc::mkdtemp(raw) }; // modifies template
        let template = unsafe { CString::from_raw(raw) };
        if ret.is_null() {
            return Err(Error::last_os_error("mkdtemp"));
        }
        let name = PathBuf::from(OsString::from_vec(template.into_bytes()));
        debug!("Temp dir: {}", name.display());
        Ok(TempDir { name })
    }

    /// Where is it?
    pub fn path(&self) -> &Path {
        &self.name
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.name) {
            Ok(()) => debug!("Cleaned up: {}", self.name.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("Already gone: {}", self.name.display())
            }
            Err(err) => error!(
                "Unable to remove temporary directory: {} : {}",
                self.name.display(),
                err
            ),
        }
    }
}
