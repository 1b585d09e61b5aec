//! User namespace identity mapping.  cf. user_namespaces(7)

use std::collections::BTreeMap;

use libc;
use log::debug;

use super::err::Result;
use super::util;

pub fn getuid() -> libc::uid_t {
    unsafe { libc::getuid() }
}

pub fn getgid() -> libc::gid_t {
    unsafe { libc::getgid() }
}

/// Prevent `setgroups()` in the user namespace of `pid`.
///
/// Must happen before an unprivileged write of `gid_map`.
pub fn deny_setgroups(pid: libc::pid_t) -> Result<()> {
    debug!("deny setgroups for PID {}", pid);
    util::write_file(format!("/proc/{}/setgroups", pid), "deny")
}

/// Contents of `/proc/<pid>/uid_map` or `gid_map`
pub struct IdMap {
    pid: libc::pid_t,
    isuid: bool,
    map: BTreeMap<u32, (u32, u32)>,
}

impl IdMap {
    pub fn new_uid(pid: libc::pid_t) -> IdMap {
        IdMap {
            pid,
            isuid: true,
            map: BTreeMap::new(),
        }
    }

    pub fn new_gid(pid: libc::pid_t) -> IdMap {
        IdMap {
            pid,
            isuid: false,
            map: BTreeMap::new(),
        }
    }

    /// Map `count` IDs starting at `inner` in the namespace to `outer`.
    pub fn add(&mut self, inner: u32, outer: u32, count: u32) -> &mut Self {
        self.map.insert(inner, (outer, count));
        self
    }

    fn map_file(&self) -> String {
        // emit mapping as lines
        //   inner# outer# count#\n
        self.map
            .iter()
            .map(|(inner, (outer, count))| format!("{} {} {}\n", inner, outer, count))
            .collect()
    }

    fn file_name(&self) -> String {
        let kind = if self.isuid { "uid_map" } else { "gid_map" };
        format!("/proc/{}/{}", self.pid, kind)
    }

    /// Write the whole map at once.  The kernel accepts a single write.
    pub fn write(&self) -> Result<()> {
        debug!("{} <- {:?}", self.file_name(), self.map_file());
        util::write_file(self.file_name(), self.map_file().as_bytes())
    }
}

/// Map the calling user and group to themselves in the namespace of `pid`.
pub fn map_self(pid: libc::pid_t) -> Result<()> {
    let uid = getuid();
    let gid = getgid();
    debug!("Setup 1-1 mapping uid={} gid={}", uid, gid);
    deny_setgroups(pid)?;
    IdMap::new_uid(pid).add(uid, uid, 1).write()?;
    IdMap::new_gid(pid).add(gid, gid, 1).write()?;
    Ok(())
}
