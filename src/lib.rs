//! Run a command in a private root assembled from bind mounts,
//! inside new mount and user namespaces.

mod err;
pub use err::{Error, Result};

#[macro_use]
pub mod fs;

pub mod args;
pub mod bind;
pub mod container;
pub mod effect;
pub mod logging;
pub mod mount;
pub mod proc;
pub mod tempdir;
pub mod user;
pub mod util;

pub use bind::{BindList, BindMount, Exclusion};
pub use container::{runc, ContainerHooks, Sandbox, WorkDir};
pub use effect::{Action, DryRun, Effects, Live};
