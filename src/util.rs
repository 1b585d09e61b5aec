use std::ffi::CString;
use std::fs;
use std::io::Write;
use std::path::Path;

use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::os::unix::io::FromRawFd;

use libc;

use log::debug;

use super::err::{Error, Result};

/// Mode of directories and placeholder files created under a new root
pub const PRIVATE_MODE: u32 = 0o700;

pub(crate) fn path2cstr<P: AsRef<Path>>(path: P) -> Result<CString> {
    let ret = CString::new(path.as_ref().as_os_str().as_bytes())?;
    Ok(ret)
}

/// Write to an existing file.  eg. under /proc
pub fn write_file<P: AsRef<Path>, S: AsRef<[u8]>>(name: P, buf: S) -> Result<()> {
    debug!("write_file({:?}, ...)", name.as_ref().display());
    let mut file = fs::OpenOptions::new()
        .write(true)
        .open(name.as_ref())
        .map_err(|e| Error::file("open", name.as_ref(), e))?;
    file.write_all(buf.as_ref())
        .map_err(|e| Error::file("write", name.as_ref(), e))
}

/// `mkdir -p` with owner only permissions.  Existing directories are not an error.
pub fn mkdirs<S: AsRef<Path>>(name: S) -> Result<()> {
    debug!("mkdirs({:?})", name.as_ref().display());
    fs::DirBuilder::new()
        .recursive(true)
        .mode(PRIVATE_MODE)
        .create(name.as_ref())
        .map_err(|e| Error::file("mkdirs", name.as_ref(), e))
}

/// Open or create an empty file.  Existing content is untouched.
pub fn touch<S: AsRef<Path>>(name: S) -> Result<()> {
    debug!("touch({:?})", name.as_ref().display());
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .mode(PRIVATE_MODE)
        .open(name.as_ref())
        .map_err(|e| Error::file("open or create", name.as_ref(), e))?;
    Ok(())
}

pub fn mount<A, B, C>(src: A, target: B, fstype: C, flags: libc::c_ulong) -> Result<()>
where
    A: AsRef<Path>,
    B: AsRef<Path>,
    C: AsRef<Path>,
{
    let csrc = path2cstr(&src)?;
    let ctarget = path2cstr(&target)?;
    let cfstype = path2cstr(&fstype)?;
    debug!("mount({:?},{:?},{:?},0x{:x})", csrc, ctarget, cfstype, flags);
    unsafe {
        if 0 != libc::mount(
            csrc.as_ptr(),
            ctarget.as_ptr(),
            cfstype.as_ptr(),
            flags,
            std::ptr::null(),
        ) {
            Err(Error::last_os_error(format!(
                "mount src={:?} target={:?} fs={:?} flags=0x{:x}",
                src.as_ref(),
                target.as_ref(),
                fstype.as_ref(),
                flags
            )))?;
        }
    }
    Ok(())
}

/// Flags for a recursive bind mount
pub fn bind_flags(writable: bool) -> libc::c_ulong {
    let flags = libc::MS_BIND | libc::MS_REC;
    if writable {
        flags
    } else {
        flags | libc::MS_RDONLY
    }
}

/// `mount --rbind [-o ro]`
///
/// The kernel ignores MS_RDONLY when creating a bind mount, so a read-only
/// bind is followed by a remount of the new mount point.
pub fn bind_mount<A: AsRef<Path>, B: AsRef<Path>>(src: A, target: B, writable: bool) -> Result<()> {
    mount(&src, &target, "none", bind_flags(writable))?;
    if !writable {
        remount_readonly(&target)?;
    }
    Ok(())
}

/// `ST_RELATIME` from <sys/statvfs.h>.  Not exported by libc for every target.
const ST_RELATIME: libc::c_ulong = 0x1000;

/// statvfs() f_flag bits which a remount in a user namespace must repeat,
/// and the mount() flag for each.
const LOCKED: [(libc::c_ulong, libc::c_ulong); 6] = [
    (libc::ST_NOSUID, libc::MS_NOSUID),
    (libc::ST_NODEV, libc::MS_NODEV),
    (libc::ST_NOEXEC, libc::MS_NOEXEC),
    (libc::ST_NOATIME, libc::MS_NOATIME),
    (libc::ST_NODIRATIME, libc::MS_NODIRATIME),
    (ST_RELATIME, libc::MS_RELATIME),
];

/// Translate the locked statvfs() flags of a mount into mount() flags
pub fn locked_flags(f_flag: libc::c_ulong) -> libc::c_ulong {
    LOCKED
        .iter()
        .filter(|(st, _)| f_flag & st != 0)
        .fold(0, |acc, (_, ms)| acc | ms)
}

fn remount_readonly<P: AsRef<Path>>(target: P) -> Result<()> {
    let rawname = path2cstr(&target)?;
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    unsafe {
        if libc::statvfs(rawname.as_ptr(), &mut st) != 0 {
            return Err(Error::last_file_error("statvfs", target));
        }
    }
    // Inside a user namespace, flags locked by the outer mount must be repeated.
    let keep = locked_flags(st.f_flag as libc::c_ulong);
    mount(
        "none",
        &target,
        "none",
        libc::MS_REMOUNT | libc::MS_BIND | libc::MS_RDONLY | keep,
    )
}

pub fn chdir<P: AsRef<Path>>(path: P) -> Result<()> {
    debug!("chdir({:?})", path.as_ref().display());
    std::env::set_current_dir(path.as_ref()).map_err(|e| Error::file("chdir", path.as_ref(), e))
}

pub fn chroot<P: AsRef<Path>>(path: P) -> Result<()> {
    debug!("chroot({:?})", path.as_ref().display());
    let rawname = path2cstr(&path)?;
    unsafe {
        if libc::chroot(rawname.as_ptr()) == 0 {
            Ok(())
        } else {
            Err(Error::last_file_error("chroot", path))
        }
    }
}

/// Returns (read, write) ends.  Both are close-on-exec.
pub fn pipe() -> Result<(fs::File, fs::File)> {
    let mut fds = [0; 2];
    unsafe {
        if 0 != libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) {
            return Err(Error::last_os_error("pipe2"));
        }
        Ok((fs::File::from_raw_fd(fds[0]), fs::File::from_raw_fd(fds[1])))
    }
}
