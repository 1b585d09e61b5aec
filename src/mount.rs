//! Assemble a new root from a sorted list of bind mounts

use std::fs;
use std::path::Path;

use log::debug;

use super::bind::{BindList, BindMount};
use super::effect::{Action, Effects};
use super::err::{Error, Result};
use super::fs::under;

/// Lay down each bind under `root`, in list order.
///
/// `root` must exist.  `binds` should already be sorted by hierarchy.
/// The first failure aborts.  Whatever was already mounted is left for
/// the caller to dispose of.
pub fn apply<E: Effects + ?Sized>(effects: &E, root: &Path, binds: &BindList) -> Result<()> {
    let root = root
        .canonicalize()
        .map_err(|e| Error::file("resolve root", root, e))?;
    debug!("Prepare new root at {}", root.display());

    for bind in binds {
        apply_one(effects, &root, bind)?;
    }
    Ok(())
}

fn apply_one<E: Effects + ?Sized>(effects: &E, root: &Path, bind: &BindMount) -> Result<()> {
    let target = under(root, bind.target());
    let st = fs::metadata(bind.source()).map_err(|e| Error::file("stat", bind.source(), e))?;

    if st.is_dir() {
        effects.perform(Action::CreateDir(&target))?;
    } else {
        // files, devices, sockets, ... get a placeholder to mount over
        if let Some(parent) = target.parent() {
            effects.perform(Action::CreateDir(parent))?;
        }
        effects.perform(Action::CreateFile(&target))?;
    }

    effects.perform(Action::Mount {
        source: bind.source(),
        target: &target,
        writable: bind.writable(),
    })
}
