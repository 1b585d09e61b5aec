//! Side effects on the host, either performed or only described.
//!
//! Every operation which changes the filesystem, mount table, or process
//! image goes through an `Effects`.  `Live` does it.  `DryRun` prints
//! what would have been done and succeeds.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Write};
use std::path::Path;

use log::debug;

use super::err::{Error, Result};
use super::proc::Exec;
use super::util;

/// One mutating operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    /// `mkdir -p`
    CreateDir(&'a Path),
    /// Open or create an empty placeholder
    CreateFile(&'a Path),
    /// Recursive bind mount
    Mount {
        source: &'a Path,
        target: &'a Path,
        writable: bool,
    },
    Chdir(&'a Path),
    Chroot(&'a Path),
    /// argv, including argv[0]
    Exec(&'a [OsString]),
}

impl<'a> Action<'a> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateDir(_) => "create-dir",
            Self::CreateFile(_) => "create-file",
            Self::Mount { .. } => "mount",
            Self::Chdir(_) => "chdir",
            Self::Chroot(_) => "chroot",
            Self::Exec(_) => "exec",
        }
    }
}

impl<'a> fmt::Display for Action<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateDir(dir) => write!(f, "mkdir {}", dir.display()),
            Self::CreateFile(file) => write!(f, "open or create {}", file.display()),
            Self::Mount {
                source,
                target,
                writable,
            } => {
                write!(
                    f,
                    "mount {} -> {}, MS_BIND | MS_REC",
                    source.display(),
                    target.display()
                )?;
                if !writable {
                    write!(f, " | MS_RDONLY")?;
                }
                Ok(())
            }
            Self::Chdir(dir) => write!(f, "chdir {}", dir.display()),
            Self::Chroot(dir) => write!(f, "chroot {}", dir.display()),
            Self::Exec(argv) => {
                write!(f, "exec")?;
                for arg in argv.iter() {
                    write!(f, " {}", arg.to_string_lossy())?;
                }
                Ok(())
            }
        }
    }
}

/// Strategy for carrying out `Action`s.  Chosen once per invocation.
pub trait Effects {
    fn perform(&self, action: Action<'_>) -> Result<()>;

    /// Are actions really happening?
    ///
    /// Steps which are not `Action`s, like identity mapping, key off this.
    fn is_live(&self) -> bool {
        true
    }
}

/// Performs actions on the host
#[derive(Debug, Default)]
pub struct Live;

impl Effects for Live {
    fn perform(&self, action: Action<'_>) -> Result<()> {
        debug!("perform: {}", action);
        match action {
            Action::CreateDir(dir) => util::mkdirs(dir),
            Action::CreateFile(file) => util::touch(file),
            Action::Mount {
                source,
                target,
                writable,
            } => util::bind_mount(source, target, writable),
            Action::Chdir(dir) => util::chdir(dir),
            Action::Chroot(dir) => util::chroot(dir),
            Action::Exec(argv) => {
                let cmd = argv
                    .first()
                    .ok_or_else(|| Error::usage("No command to execute"))?;
                Exec::new(cmd)?.args(argv)?.exec()
            }
        }
    }
}

/// Describes actions, one per line, without performing them
pub struct DryRun<W: Write> {
    out: RefCell<W>,
}

impl DryRun<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> DryRun<W> {
    pub fn new(out: W) -> Self {
        DryRun {
            out: RefCell::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write> Effects for DryRun<W> {
    fn perform(&self, action: Action<'_>) -> Result<()> {
        let mut out = self.out.borrow_mut();
        writeln!(out, "{}", action)
            .and_then(|()| out.flush())
            .map_err(|e| Error::os("dry-run output", e))
    }

    fn is_live(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tempdir::TempDir;

    #[test]
    fn describe() {
        let p = Path::new;
        let argv: Vec<OsString> = vec!["cat".into(), "/etc/hostname".into()];
        let dry = DryRun::new(Vec::<u8>::new());
        dry.perform(Action::CreateDir(p("/r/etc"))).unwrap();
        dry.perform(Action::CreateFile(p("/r/x"))).unwrap();
        dry.perform(Action::Mount {
            source: p("/etc"),
            target: p("/r/etc"),
            writable: false,
        })
        .unwrap();
        dry.perform(Action::Mount {
            source: p("/tmp/s"),
            target: p("/r/home"),
            writable: true,
        })
        .unwrap();
        dry.perform(Action::Chdir(p("/r"))).unwrap();
        dry.perform(Action::Chroot(p("/r"))).unwrap();
        dry.perform(Action::Exec(&argv)).unwrap();
        assert!(!dry.is_live());

        let out = String::from_utf8(dry.into_inner()).unwrap();
        assert_eq!(
            out,
            "mkdir /r/etc
open or create /r/x
mount /etc -> /r/etc, MS_BIND | MS_REC | MS_RDONLY
mount /tmp/s -> /r/home, MS_BIND | MS_REC
chdir /r
chroot /r
exec cat /etc/hostname
"
        );
    }

    #[test]
    fn dry_run_touches_nothing() {
        let tdir = TempDir::new().unwrap();
        let dir = tdir.path().join("a/b");
        let file = tdir.path().join("f");
        let dry = DryRun::new(io::sink());
        dry.perform(Action::CreateDir(&dir)).unwrap();
        dry.perform(Action::CreateFile(&file)).unwrap();
        dry.perform(Action::Mount {
            source: Path::new("/does/not/exist"),
            target: &dir,
            writable: false,
        })
        .unwrap();
        assert!(!dir.exists());
        assert!(!file.exists());
    }

    #[test]
    fn live_create() {
        let tdir = TempDir::new().unwrap();
        let dir = tdir.path().join("a/b");
        let file = dir.join("f");
        assert!(Live.is_live());
        Live.perform(Action::CreateDir(&dir)).unwrap();
        Live.perform(Action::CreateFile(&file)).unwrap();
        // existing is ok
        Live.perform(Action::CreateDir(&dir)).unwrap();
        Live.perform(Action::CreateFile(&file)).unwrap();
        assert!(dir.is_dir());
        assert!(file.is_file());
    }

    #[test]
    fn live_exec_empty() {
        let argv: Vec<OsString> = vec![];
        assert!(Live.perform(Action::Exec(&argv)).is_err());
    }

    #[test]
    fn kinds() {
        let p = Path::new("/");
        assert_eq!(Action::CreateDir(p).kind(), "create-dir");
        assert_eq!(Action::Chroot(p).kind(), "chroot");
        assert_eq!(Action::Exec(&[]).kind(), "exec");
    }
}
