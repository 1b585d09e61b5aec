//! Bind mount specifications, and their ordering.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::err::{Error, Result};
use super::fs::is_ancestor_or_equal;
use super::tempdir::TempDir;

/// Make host `source` visible at `target` under the new root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    source: PathBuf,
    target: PathBuf,
    writable: bool,
}

impl BindMount {
    /// Resolve `source`.  Returns None if it does not exist.
    pub fn new<A: AsRef<Path>, B: AsRef<Path>>(
        source: A,
        target: B,
        writable: bool,
    ) -> Result<Option<BindMount>> {
        let (source, target) = (source.as_ref(), target.as_ref());
        if !target.is_absolute() {
            return Err(Error::NotAbsolute(target.to_path_buf()));
        }
        let source = match source.canonicalize() {
            Ok(real) => real,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("skip missing {}", source.display());
                return Ok(None);
            }
            Err(err) => return Err(Error::file("resolve", source, err)),
        };
        Ok(Some(BindMount {
            source,
            // drop any trailing '/'
            target: target.components().collect(),
            writable,
        }))
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn writable(&self) -> bool {
        self.writable
    }
}

impl fmt::Display for BindMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({})",
            self.source.display(),
            self.target.display(),
            if self.writable { "rw" } else { "ro" }
        )
    }
}

/// Drop binds of exactly this source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    source: PathBuf,
}

impl Exclusion {
    /// Resolved like a bind source, when it exists.
    pub fn new<P: AsRef<Path>>(source: P) -> Result<Exclusion> {
        let source = source.as_ref();
        let source = match source.canonicalize() {
            Ok(real) => real,
            Err(err) if err.kind() == io::ErrorKind::NotFound => source.to_path_buf(),
            Err(err) => return Err(Error::file("resolve", source, err)),
        };
        Ok(Exclusion { source })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// An ordered list of bind mounts.
///
/// Also owns the scratch directories created by `bind_temp()`, which are
/// removed when the list is dropped.
#[derive(Debug, Default)]
pub struct BindList {
    mounts: Vec<BindMount>,
    scratch: Vec<TempDir>,
}

impl BindList {
    pub fn new() -> BindList {
        Default::default()
    }

    pub fn push(&mut self, mount: BindMount) -> &mut Self {
        self.mounts.push(mount);
        self
    }

    /// `--bind`.  A missing source is silently skipped.
    pub fn bind<A: AsRef<Path>, B: AsRef<Path>>(
        &mut self,
        source: A,
        target: B,
        writable: bool,
    ) -> Result<&mut Self> {
        if let Some(mount) = BindMount::new(source, target, writable)? {
            self.push(mount);
        }
        Ok(self)
    }

    /// `--bind-top`.  One bind for each entry in the `source` directory,
    /// in name order.
    pub fn bind_top<A: AsRef<Path>, B: AsRef<Path>>(
        &mut self,
        source: A,
        target: B,
        writable: bool,
    ) -> Result<&mut Self> {
        let (source, target) = (source.as_ref(), target.as_ref());
        if !target.is_absolute() {
            return Err(Error::NotAbsolute(target.to_path_buf()));
        }
        let mut names = fs::read_dir(source)
            .and_then(|dir| {
                dir.map(|ent| ent.map(|ent| ent.file_name()))
                    .collect::<io::Result<Vec<_>>>()
            })
            .map_err(|e| Error::file("list", source, e))?;
        names.sort();

        for name in names {
            self.bind(source.join(&name), target.join(&name), writable)?;
        }
        Ok(self)
    }

    /// `--bind-temp`.  A new empty directory, writable at `target`.
    pub fn bind_temp<P: AsRef<Path>>(&mut self, target: P) -> Result<&mut Self> {
        let target = target.as_ref();
        if !target.is_absolute() {
            return Err(Error::NotAbsolute(target.to_path_buf()));
        }
        let temp = TempDir::new()?;
        let mount = BindMount::new(temp.path(), target, true)?;
        self.scratch.push(temp);
        match mount {
            Some(mount) => {
                self.push(mount);
                Ok(self)
            }
            // we just created it...
            None => Err(Error::file(
                "resolve",
                target,
                io::Error::from(io::ErrorKind::NotFound),
            )),
        }
    }

    /// Remove every bind whose source is exactly that of some exclusion.
    ///
    /// Binds of paths under an excluded directory are kept.
    pub fn exclude(&mut self, exclusions: &[Exclusion]) -> &mut Self {
        self.mounts.retain(|mount| {
            let excluded = exclusions.iter().any(|ex| ex.source == mount.source);
            if excluded {
                debug!("exclude {}", mount);
            }
            !excluded
        });
        self
    }

    /// Move all entries (and scratch directories) of `other` to the end of this list.
    pub fn append(&mut self, mut other: BindList) -> &mut Self {
        self.mounts.append(&mut other.mounts);
        self.scratch.append(&mut other.scratch);
        self
    }

    /// Order so that a bind comes before any other bind whose target is
    /// at or below its own target.
    ///
    /// Each entry is inserted just before the first placed entry it is an
    /// ancestor of (or equal to), otherwise at the end.  So unrelated
    /// entries keep their relative order, and a sorted list without
    /// duplicate targets is unchanged.  Entries sharing a target come out
    /// in reverse, so sorting again swaps them back.
    pub fn sort_by_hierarchy(&mut self) -> &mut Self {
        let unsorted = std::mem::take(&mut self.mounts);
        for mount in unsorted {
            let pos = self
                .mounts
                .iter()
                .position(|placed| is_ancestor_or_equal(&mount.target, &placed.target))
                .unwrap_or(self.mounts.len());
            self.mounts.insert(pos, mount);
        }
        self
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BindMount> {
        self.mounts.iter()
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Log the final order
    pub fn dump(&self) {
        if self.mounts.is_empty() {
            warn!("No bind mounts.  The new root will be empty.");
        }
        for (i, mount) in self.mounts.iter().enumerate() {
            debug!("bind[{}] {}", i, mount);
        }
    }
}

impl<'a> IntoIterator for &'a BindList {
    type Item = &'a BindMount;
    type IntoIter = std::slice::Iter<'a, BindMount>;

    fn into_iter(self) -> Self::IntoIter {
        self.mounts.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bind without resolution, for ordering tests
    fn raw(source: &str, target: &str) -> BindMount {
        BindMount {
            source: source.into(),
            target: target.into(),
            writable: false,
        }
    }

    fn list(targets: &[&str]) -> BindList {
        let mut ret = BindList::new();
        for t in targets {
            ret.push(raw(t, t));
        }
        ret
    }

    fn targets(list: &BindList) -> Vec<String> {
        list.iter()
            .map(|m| m.target().display().to_string())
            .collect()
    }

    #[test]
    fn sort_parents_first() {
        let mut l = list(&["/usr/lib", "/etc", "/usr", "/"]);
        l.sort_by_hierarchy();
        assert_eq!(targets(&l), ["/", "/usr", "/usr/lib", "/etc"]);
    }

    #[test]
    fn sort_home() {
        let mut l = list(&["/home/alice", "/bin", "/home", "/"]);
        l.sort_by_hierarchy();
        assert_eq!(targets(&l), ["/", "/home", "/home/alice", "/bin"]);
    }

    #[test]
    fn sort_stable_unrelated() {
        let mut l = list(&["/b", "/a"]);
        l.sort_by_hierarchy();
        assert_eq!(targets(&l), ["/b", "/a"]);

        let mut l = list(&["/", "/a", "/x/y"]);
        l.sort_by_hierarchy();
        assert_eq!(targets(&l), ["/", "/a", "/x/y"]);
    }

    #[test]
    fn sort_idempotent() {
        let mut l = list(&["/x/y", "/a/b", "/a", "/x", "/", "/a/b/c", "/ab"]);
        l.sort_by_hierarchy();
        let once = targets(&l);
        l.sort_by_hierarchy();
        assert_eq!(targets(&l), once);
    }

    #[test]
    fn sort_invariant() {
        let all = ["/", "/a", "/a/b", "/a/b/c", "/x", "/a/c", "/x/y", "/ab"];
        // every rotation and its reverse
        for n in 0..all.len() {
            let mut input = all.to_vec();
            input.rotate_left(n);
            for input in [input.clone(), input.into_iter().rev().collect()] {
                let mut l = list(&input);
                l.sort_by_hierarchy();
                let out = targets(&l);
                for (i, p) in out.iter().enumerate() {
                    for q in &out[..i] {
                        assert!(
                            !is_ancestor_or_equal(p, q),
                            "{} placed after {} in {:?}",
                            p,
                            q,
                            out
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn sort_duplicate_target() {
        // later entry is placed first, so the earlier one is mounted over it
        let mut l = BindList::new();
        l.push(raw("/srv/mine", "/etc")).push(raw("/etc", "/etc"));
        l.sort_by_hierarchy();
        let sources: Vec<_> = l.iter().map(|m| m.source().to_path_buf()).collect();
        assert_eq!(sources, [PathBuf::from("/etc"), PathBuf::from("/srv/mine")]);
    }

    #[test]
    fn sort_duplicate_target_twice() {
        let mut l = BindList::new();
        l.push(raw("/srv/mine", "/etc")).push(raw("/etc", "/etc"));
        l.sort_by_hierarchy().sort_by_hierarchy();
        let sources: Vec<_> = l.iter().map(|m| m.source().to_path_buf()).collect();
        assert_eq!(sources, [PathBuf::from("/srv/mine"), PathBuf::from("/etc")]);
    }

    #[test]
    fn trailing_slash_target() {
        let m = BindMount::new("/", "/a/", false).unwrap().unwrap();
        assert_eq!(m.target().as_os_str(), "/a");

        let mut l = BindList::new();
        l.bind("/", "/a/b/", false)
            .unwrap()
            .bind("/", "/a/", false)
            .unwrap()
            .bind("/", "/a", false)
            .unwrap();
        l.sort_by_hierarchy();
        assert_eq!(targets(&l), ["/a", "/a", "/a/b"]);
    }

    #[test]
    fn exclude_exact() {
        let mut l = BindList::new();
        l.push(raw("/home", "/home"))
            .push(raw("/home/alice", "/home/alice"))
            .push(raw("/usr", "/usr"));
        l.exclude(&[Exclusion {
            source: "/home".into(),
        }]);
        assert_eq!(targets(&l), ["/home/alice", "/usr"]);
    }

    #[test]
    fn exclude_none() {
        let mut l = list(&["/a", "/b"]);
        l.exclude(&[]);
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn missing_source() {
        let ret = BindMount::new("/does/not/exist", "/x", false).unwrap();
        assert!(ret.is_none());

        let mut l = BindList::new();
        l.bind("/does/not/exist", "/x", false).unwrap();
        assert!(l.is_empty());
    }

    #[test]
    fn relative_target() {
        match BindMount::new("/", "relative", false) {
            Err(Error::NotAbsolute(p)) => assert_eq!(p, Path::new("relative")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn resolve_source() {
        let tdir = TempDir::new().unwrap();
        fs::create_dir(tdir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(tdir.path().join("real"), tdir.path().join("link")).unwrap();

        let m = BindMount::new(tdir.path().join("link"), "/x", true)
            .unwrap()
            .unwrap();
        assert_eq!(
            m.source(),
            tdir.path().canonicalize().unwrap().join("real")
        );
        assert!(m.writable());
    }

    #[test]
    fn top() {
        let tdir = TempDir::new().unwrap();
        let src = tdir.path().canonicalize().unwrap();
        fs::create_dir(src.join("b")).unwrap();
        fs::create_dir(src.join("a")).unwrap();
        fs::write(src.join("c"), "").unwrap();
        std::os::unix::fs::symlink(src.join("gone"), src.join("dangling")).unwrap();

        let mut l = BindList::new();
        l.bind_top(&src, "/t", true).unwrap();
        assert_eq!(targets(&l), ["/t/a", "/t/b", "/t/c"]);
        assert_eq!(l.iter().next().unwrap().source(), src.join("a"));
    }

    #[test]
    fn top_unreadable() {
        let mut l = BindList::new();
        let err = l.bind_top("/does/not/exist", "/", false).unwrap_err();
        assert!(err.is_io_error(io::ErrorKind::NotFound), "{}", err);
    }

    #[test]
    fn top_then_exclude() {
        let tdir = TempDir::new().unwrap();
        let src = tdir.path().canonicalize().unwrap();
        fs::create_dir(src.join("home")).unwrap();
        fs::create_dir(src.join("home/alice")).unwrap();
        fs::create_dir(src.join("usr")).unwrap();

        let mut l = BindList::new();
        l.bind_top(&src, "/", false).unwrap();
        l.bind_top(src.join("home"), "/home", false).unwrap();
        l.exclude(&[Exclusion::new(src.join("home")).unwrap()]);
        assert_eq!(targets(&l), ["/usr", "/home/alice"]);
    }

    #[test]
    fn temp() {
        let mut l = BindList::new();
        l.bind_temp("/scratch").unwrap();
        let m = l.iter().next().unwrap().clone();
        assert!(m.writable());
        assert_eq!(m.target(), Path::new("/scratch"));
        assert!(m.source().is_dir());
        assert_eq!(fs::read_dir(m.source()).unwrap().count(), 0);

        drop(l);
        assert!(!m.source().exists());
    }

    #[test]
    fn append_keeps_order() {
        let mut a = list(&["/home/alice"]);
        a.append(list(&["/bin", "/home"]));
        assert_eq!(targets(&a), ["/home/alice", "/bin", "/home"]);
        a.sort_by_hierarchy();
        assert_eq!(targets(&a), ["/home", "/home/alice", "/bin"]);
    }
}
