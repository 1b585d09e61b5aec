//! Path utilities...
//!
//! Nothing here touches the filesystem.  Targets name locations under a
//! root which may not exist yet.

use std::path::{Component, Path, PathBuf};

// like vec!() for a PathBuf
#[macro_export]
macro_rules! path {
    ($root:expr, $( $piece:expr ),*) => {
        {
            let mut temp = ::std::path::PathBuf::from($root);
            $(
                temp.push($piece);
            )*
            temp
        }
    }
}

/// Is `a` the same path as `b`, or one of the parent directories of `b`.
pub fn is_ancestor_or_equal<A: AsRef<Path>, B: AsRef<Path>>(a: A, b: B) -> bool {
    // component-wise, so "/a/" and "/a" are the same
    b.as_ref().starts_with(a.as_ref())
}

/// Location of the absolute virtual path `target` beneath `root`.
///
/// eg. `under("/tmp/r", "/etc/hosts")` -> "/tmp/r/etc/hosts"
pub fn under<A: AsRef<Path>, B: AsRef<Path>>(root: A, target: B) -> PathBuf {
    let mut ret = root.as_ref().to_path_buf();
    for c in target.as_ref().components() {
        match c {
            Component::RootDir | Component::Prefix(_) | Component::CurDir => (),
            other => ret.push(other),
        }
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestor() {
        assert!(is_ancestor_or_equal("/", "/"));
        assert!(is_ancestor_or_equal("/", "/usr/lib"));
        assert!(is_ancestor_or_equal("/usr", "/usr/lib"));
        assert!(is_ancestor_or_equal("/usr/lib", "/usr/lib"));
        assert!(is_ancestor_or_equal("/usr/", "/usr/lib"));
        assert!(is_ancestor_or_equal("/usr/", "/usr"));
        assert!(is_ancestor_or_equal("/usr", "/usr/"));
        assert!(is_ancestor_or_equal("/usr/lib/", "/usr//lib"));
    }

    #[test]
    fn not_ancestor() {
        assert!(!is_ancestor_or_equal("/usr/lib", "/usr"));
        assert!(!is_ancestor_or_equal("/usr/lib", "/"));
        // same length, different name
        assert!(!is_ancestor_or_equal("/usr", "/var"));
        // string prefix is not a parent
        assert!(!is_ancestor_or_equal("/us", "/usr"));
        assert!(!is_ancestor_or_equal("/home", "/homework/x"));
        assert!(!is_ancestor_or_equal("/a", "/b"));
    }

    #[test]
    fn join_under() {
        assert_eq!(under("/tmp/r", "/etc/hosts"), Path::new("/tmp/r/etc/hosts"));
        assert_eq!(under("/tmp/r/", "/"), Path::new("/tmp/r"));
        assert_eq!(under("/tmp/r", "/home/alice/"), Path::new("/tmp/r/home/alice"));
    }

    #[test]
    fn path_macro() {
        assert_eq!(path!("/tmp", "a", "b"), PathBuf::from("/tmp/a/b"));
    }
}
