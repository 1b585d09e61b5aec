//! Command line of run-in-fsns

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use log::debug;

use super::bind::{BindList, Exclusion};
use super::container::WorkDir;
use super::err::{Error, Result};

/// `SRC,TARGET[,ro|rw]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    pub source: PathBuf,
    pub target: PathBuf,
    pub writable: bool,
}

impl Pair {
    pub fn parse<S: AsRef<OsStr> + ?Sized>(arg: &S) -> Result<Pair> {
        let arg = arg.as_ref();
        let mut parts = split(arg, b',');
        let (source, target) = match (parts.next(), parts.next()) {
            (Some(s), Some(t)) => (s, t),
            _ => {
                return Err(Error::usage(format!(
                    "Source and target should be separated by a ',' : {:?}",
                    arg
                )))
            }
        };
        let writable = match parts.next().map(OsStr::as_bytes) {
            None | Some(b"ro") => false,
            Some(b"rw") => true,
            Some(other) => {
                return Err(Error::usage(format!(
                    "Unknown bind-mount type {}",
                    String::from_utf8_lossy(other)
                )))
            }
        };
        if let Some(extra) = parts.next() {
            return Err(Error::usage(format!("Unexpected {:?} in {:?}", extra, arg)));
        }
        Ok(Pair {
            source: source.into(),
            target: absolute(target)?,
            writable,
        })
    }
}

/// Non-empty pieces of `arg` between `sep`
fn split(arg: &OsStr, sep: u8) -> impl Iterator<Item = &OsStr> {
    arg.as_bytes()
        .split(move |b| *b == sep)
        .filter(|s| !s.is_empty())
        .map(OsStr::from_bytes)
}

/// Absolute path, without redundant separators or `.`
pub fn absolute<S: AsRef<OsStr> + ?Sized>(arg: &S) -> Result<PathBuf> {
    let path = Path::new(arg.as_ref());
    if path.is_absolute() {
        Ok(path.components().collect())
    } else {
        Err(Error::NotAbsolute(path.to_path_buf()))
    }
}

/// Entries which keep their relative command line order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Direct {
    Bind(Pair),
    Temp(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub dry_run: bool,
    pub run_in: Option<PathBuf>,
    pub home: Option<PathBuf>,
    /// `--bind` and `--bind-temp`
    pub direct: Vec<Direct>,
    pub top: Vec<Pair>,
    pub exclude: Vec<PathBuf>,
    /// Command and arguments.  Never empty.
    pub command: Vec<OsString>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Parsed {
    Run(Options),
    Help,
}

/// Options which take a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opt {
    RunIn,
    Bind,
    BindTop,
    BindTemp,
    Exclude,
}

impl Opt {
    fn lookup(name: &OsStr) -> Option<Opt> {
        match name.as_bytes() {
            b"--run-in" => Some(Opt::RunIn),
            b"--bind" => Some(Opt::Bind),
            b"--bind-top" => Some(Opt::BindTop),
            b"--bind-temp" => Some(Opt::BindTemp),
            b"--exclude" => Some(Opt::Exclude),
            _ => None,
        }
    }
}

/// Split colon separated list
fn entries<'a>(opt: &OsStr, arg: &'a OsStr) -> Result<Vec<&'a OsStr>> {
    let ret: Vec<_> = split(arg, b':').collect();
    if ret.is_empty() {
        return Err(Error::usage(format!("Extra arguments needed for {:?}", opt)));
    }
    Ok(ret)
}

pub const DEFAULT_SHELL: &str = "/bin/sh";

impl Options {
    /// `args` excludes argv[0].  `home` is `$HOME`, if set.
    pub fn parse<I>(args: I, home: Option<PathBuf>) -> Result<Parsed>
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        let mut args = args.into_iter().map(Into::<OsString>::into).peekable();
        let mut opts = Options {
            home: home.filter(|h| !h.as_os_str().is_empty()),
            ..Default::default()
        };
        let mut use_default = true;

        while let Some(arg) = args.next_if(|a| a.as_bytes().starts_with(b"-")) {
            if arg == "--" {
                break;
            } else if arg == "-h" || arg == "--help" {
                return Ok(Parsed::Help);
            } else if arg == "--dry-run" {
                opts.dry_run = true;
                continue;
            }

            let opt = Opt::lookup(&arg).ok_or_else(|| {
                Error::usage(format!("Unknown option: {}", arg.to_string_lossy()))
            })?;
            let value = args.next().ok_or_else(|| {
                Error::usage(format!(
                    "One more argument is needed for {}",
                    arg.to_string_lossy()
                ))
            })?;

            match opt {
                Opt::RunIn => {
                    if opts.run_in.is_some() {
                        return Err(Error::usage("\"--run-in\" should be specified at most once"));
                    }
                    opts.run_in = Some(absolute(&value)?);
                }
                Opt::Bind => {
                    use_default = false;
                    for ent in entries(&arg, &value)? {
                        opts.direct.push(Direct::Bind(Pair::parse(ent)?));
                    }
                }
                Opt::BindTop => {
                    use_default = false;
                    for ent in entries(&arg, &value)? {
                        opts.top.push(Pair::parse(ent)?);
                    }
                }
                Opt::BindTemp => {
                    use_default = false;
                    for ent in entries(&arg, &value)? {
                        opts.direct.push(Direct::Temp(absolute(ent)?));
                    }
                }
                Opt::Exclude => {
                    use_default = false;
                    for ent in entries(&arg, &value)? {
                        opts.exclude.push(ent.into());
                    }
                }
            }
        }

        if use_default {
            debug!("Using default binds");
            opts.top.push(Pair {
                source: "/".into(),
                target: "/".into(),
                writable: false,
            });
            if let Some(home) = opts.home.clone() {
                opts.exclude.push("/home".into());
                opts.direct.push(Direct::Temp(absolute_home(home)?));
            }
        }

        opts.command = args.collect();
        if opts.command.is_empty() {
            opts.command.push(DEFAULT_SHELL.into());
        }

        Ok(Parsed::Run(opts))
    }

    /// Resolve, expand, exclude, merge, and sort.
    ///
    /// Creates `--bind-temp` directories.
    pub fn bind_list(&self) -> Result<BindList> {
        let mut direct = BindList::new();
        for ent in &self.direct {
            match ent {
                Direct::Bind(pair) => direct.bind(&pair.source, &pair.target, pair.writable)?,
                Direct::Temp(target) => direct.bind_temp(target)?,
            };
        }

        let mut top = BindList::new();
        for pair in &self.top {
            top.bind_top(&pair.source, &pair.target, pair.writable)?;
        }

        let exclusions = self
            .exclude
            .iter()
            .map(Exclusion::new)
            .collect::<Result<Vec<_>>>()?;
        top.exclude(&exclusions);

        direct.append(top).sort_by_hierarchy();
        direct.dump();
        Ok(direct)
    }

    pub fn workdir(&self) -> WorkDir {
        if let Some(dir) = &self.run_in {
            WorkDir::Explicit(dir.clone())
        } else if let Some(home) = &self.home {
            WorkDir::Home(home.clone())
        } else {
            WorkDir::Root
        }
    }
}

fn absolute_home(home: PathBuf) -> Result<PathBuf> {
    if home.is_absolute() {
        absolute(&home)
    } else {
        Err(Error::usage(format!(
            "$HOME must be an absolute path, not {}",
            home.display()
        )))
    }
}
