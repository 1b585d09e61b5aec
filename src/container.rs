use std::ffi::OsString;
use std::path::{Path, PathBuf};

use log::{debug, error, warn};

use libc;

use super::bind::BindList;
use super::effect::{Action, Effects};
use super::err::{Error, Result};
use super::proc::{split, Gate, Proc};
use super::{mount, user};

/// Container lifecycle hooks
#[allow(unused_variables)]
pub trait ContainerHooks {
    /// Namespaces for the child.  Passed to clone()
    fn clone_flags(&self) -> libc::c_int {
        libc::CLONE_NEWNS | libc::CLONE_NEWUSER
    }
    /// When false, the parent does not map IDs and the child does not wait.
    fn is_live(&self) -> bool {
        true
    }
    /// Called from child, with full privilege in its new namespaces,
    /// before identity mapping is complete.
    fn setup(&self) -> Result<()> {
        Ok(())
    }
    /// Called from parent when time to set child uid/gid_map.
    fn set_id_map(&self, pid: &Proc) -> Result<()> {
        Ok(())
    }
    /// Called from child after mapping.  Normally does not return.
    fn exec(&self) -> Result<()> {
        Ok(())
    }
}

fn handle_child<H: ContainerHooks>(hooks: &H, gate: Gate) -> Result<()> {
    hooks.setup()?;

    if hooks.is_live() {
        // our IDs must be mapped before the first instruction of the target
        gate.wait()?;
    } else {
        drop(gate);
    }
    debug!("child continue");

    hooks.exec()
}

fn handle_parent<H: ContainerHooks>(hooks: &H, mut pid: Proc, gate: Gate) -> Result<i32> {
    if hooks.is_live() {
        if let Err(err) = hooks.set_id_map(&pid) {
            // kill before the gate closes, so the child never runs unmapped
            pid.kill()?;
            if let Err(err) = pid.park() {
                warn!("reaping {} : {}", pid, err);
            }
            drop(gate);
            return Err(err);
        }
        gate.open();
    } else {
        drop(gate);
    }

    debug!("Parent park");
    let ret = pid.park()?;
    debug!("{}", pid);
    Ok(ret)
}

fn explain_clone_failure(err: &Error) {
    match err.raw_os_error() {
        Some(libc::EPERM) | Some(libc::EINVAL) | Some(libc::ENOSPC) | Some(libc::EUSERS) => {
            error!("Insufficient permission to create namespaces.");
            error!("Must either have CAP_SYS_ADMIN, or enable non-privileged user namespaces by eg.");
            error!("  echo 1 > /proc/sys/kernel/unprivileged_userns_clone");
            error!("  sysctl user.max_user_namespaces");
        }
        _ => (),
    }
}

/// Launch container with given hooks.  Returns the exit code of the child.
pub fn runc<H: ContainerHooks>(hooks: &H) -> Result<i32> {
    split(
        hooks.clone_flags(),
        |gate| handle_child(hooks, gate),
        |pid, gate| handle_parent(hooks, pid, gate),
    )
    .map_err(|err| {
        explain_clone_failure(&err);
        err
    })
}

/// Where to start inside the new root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkDir {
    /// `--run-in`.  Must exist.
    Explicit(PathBuf),
    /// `$HOME`, or `/` if it can not be entered
    Home(PathBuf),
    Root,
}

/// Runs a command in a new root assembled from bind mounts
pub struct Sandbox<'a> {
    effects: &'a dyn Effects,
    root: PathBuf,
    binds: &'a BindList,
    workdir: WorkDir,
    argv: Vec<OsString>,
}

impl<'a> Sandbox<'a> {
    /// `root` is an existing, empty, directory.  `argv` includes argv[0].
    pub fn new(
        effects: &'a dyn Effects,
        root: &Path,
        binds: &'a BindList,
        workdir: WorkDir,
        argv: Vec<OsString>,
    ) -> Result<Sandbox<'a>> {
        if argv.is_empty() {
            return Err(Error::usage("No command to execute"));
        }
        let root = root
            .canonicalize()
            .map_err(|e| Error::file("resolve root", root, e))?;
        Ok(Sandbox {
            effects,
            root,
            binds,
            workdir,
            argv,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn enter_workdir(&self) -> Result<()> {
        match &self.workdir {
            WorkDir::Explicit(dir) => self.effects.perform(Action::Chdir(dir)),
            WorkDir::Home(dir) => self.effects.perform(Action::Chdir(dir)).or_else(|err| {
                warn!("Starting in / : {}", err);
                self.effects.perform(Action::Chdir(Path::new("/")))
            }),
            WorkDir::Root => self.effects.perform(Action::Chdir(Path::new("/"))),
        }
    }
}

impl<'a> ContainerHooks for Sandbox<'a> {
    fn is_live(&self) -> bool {
        self.effects.is_live()
    }

    fn setup(&self) -> Result<()> {
        mount::apply(self.effects, &self.root, self.binds)?;

        debug!("Switch to new root");
        self.effects.perform(Action::Chdir(&self.root))?;
        self.effects.perform(Action::Chroot(&self.root))?;

        self.enter_workdir()
    }

    fn set_id_map(&self, pid: &Proc) -> Result<()> {
        user::map_self(pid.id())
    }

    fn exec(&self) -> Result<()> {
        debug!("EXEC {:?}", &self.argv);
        self.effects.perform(Action::Exec(&self.argv))
    }
}
