use std::io::{self, Read};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::panic::{self, AssertUnwindSafe};
use std::{env, ffi, fmt, fs, process};

use libc;
use signal_hook;
use signal_hook::iterator::Signals;

use log::{debug, error, warn};

use super::err::{Error, Result};
use super::util;

/// Managed (child) process
#[derive(Debug)]
pub struct Proc {
    pid: libc::pid_t,
    done: bool,
    code: i32,
}

impl Proc {
    pub fn manage(pid: libc::pid_t) -> Proc {
        assert!(pid > 0);
        Proc {
            pid,
            done: false,
            code: -1, // poison
        }
    }

    pub fn id(&self) -> libc::pid_t {
        self.pid
    }

    /// Send signal to process
    pub fn signal(&self, sig: libc::c_int) -> Result<()> {
        if !self.done {
            debug!("signal PID {} with {}", self.pid, sig);
            unsafe {
                if 0 != libc::kill(self.pid, sig) {
                    return Err(Error::last_os_error(format!(
                        "Unable to signal {} with {}",
                        self.pid, sig
                    )));
                }
            }
        }
        Ok(())
    }

    /// Send SIGKILL to process
    pub fn kill(&self) -> Result<()> {
        self.signal(libc::SIGKILL)
    }

    /// Block current process until child exits.
    ///
    /// Interruptions are passed on to the child.  The third becomes SIGKILL.
    /// Returns the exit code, or 128+N if the child was killed by signal N.
    pub fn park(&mut self) -> Result<i32> {
        if self.done {
            return Ok(self.code);
        }

        let mut signals = Signals::new([
            signal_hook::consts::SIGTERM,
            signal_hook::consts::SIGINT,
            signal_hook::consts::SIGQUIT,
            signal_hook::consts::SIGCHLD,
        ])
        .map_err(|e| Error::os("Install signal handler", e))?;
        let mut isig = signals.forever();

        let mut cnt = 0;

        loop {
            match trywaitpid(self.pid)? {
                TryWait::Busy => (),
                TryWait::Done(_child, sts) => {
                    debug!("park() -> {}", sts);
                    self.done = true;
                    self.code = sts;
                    return Ok(sts);
                }
            }
            debug!("Waiting for PID {}", self.pid);

            match isig.next() {
                Some(signal_hook::consts::SIGCHLD) => {
                    debug!("SIGCHLD");
                    // loop around to test child
                }
                Some(sig) => {
                    debug!("SIG {}", sig);
                    // we are being interrupted.
                    // be delicate with child at first
                    let num = if cnt < 2 { sig } else { libc::SIGKILL };
                    cnt += 1;
                    self.signal(num)?;
                }
                None => {
                    unreachable!();
                }
            }
        }
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if let Err(err) = self.kill() {
            warn!("unable to kill managed PID {} : {}", self.pid, err);
        }
    }
}

impl fmt::Display for Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.done {
            write!(f, "PID {} Exit with {}", self.pid, self.code)
        } else {
            write!(f, "PID {}", self.pid)
        }
    }
}

pub enum TryWait {
    Busy,
    Done(libc::pid_t, i32),
}

/// Reduce a raw wait status to a shell style exit code
pub fn exit_code(sts: libc::c_int) -> i32 {
    if libc::WIFEXITED(sts) {
        libc::WEXITSTATUS(sts)
    } else if libc::WIFSIGNALED(sts) {
        128 + libc::WTERMSIG(sts)
    } else {
        // stopped/continued are not reported without WUNTRACED
        1
    }
}

/// Wraps waitpid()
pub fn trywaitpid(pid: libc::pid_t) -> Result<TryWait> {
    let mut sts = 0;
    unsafe {
        let ret = libc::waitpid(pid, &mut sts, libc::WNOHANG);
        if ret == -1 {
            Err(Error::last_os_error(format!("waitpid({})", pid)))
        } else if ret == 0 {
            Ok(TryWait::Busy)
        } else {
            Ok(TryWait::Done(ret, exit_code(sts)))
        }
    }
}

/// Replacement process image.  Searches `$PATH`, keeps the current environment.
pub struct Exec {
    cmd: ffi::CString,
    args: Vec<ffi::CString>,
    env: Vec<ffi::CString>,
}

impl Exec {
    pub fn new<T: AsRef<ffi::OsStr>>(cmd: T) -> Result<Exec> {
        let mut es = vec![];
        for (k, v) in env::vars_os() {
            let mut kv = k.into_vec();
            kv.push(b'=');
            kv.extend_from_slice(v.as_bytes());
            es.push(ffi::CString::new(kv)?);
        }

        Ok(Exec {
            cmd: ffi::CString::new(cmd.as_ref().as_bytes())?,
            args: vec![],
            env: es,
        })
    }

    /// Full argument list, including argv[0]
    pub fn args<I>(&mut self, args: I) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: AsRef<ffi::OsStr>,
    {
        for s in args.into_iter() {
            self.args.push(ffi::CString::new(s.as_ref().as_bytes())?);
        }
        Ok(self)
    }

    pub fn exec(&self) -> Result<()> {
        let cmd = self.cmd.as_ptr();
        let mut args: Vec<*const libc::c_char> = self.args.iter().map(|s| s.as_ptr()).collect();
        let mut env: Vec<*const libc::c_char> = self.env.iter().map(|v| v.as_ptr()).collect();
        // arrays must be null terminated
        args.push(::std::ptr::null());
        env.push(::std::ptr::null());

        Err(unsafe {
            libc::execvpe(cmd, args.as_ptr(), env.as_ptr());
            // only returns on error
            Error::last_os_error(format!("exec cmd={:?} args={:?}", self.cmd, self.args))
        })
    }
}

/// One-shot release signal from parent to child.
///
/// Created before the split so that both processes hold both ends.
/// Nothing is ever written.  The child sees end-of-file once every
/// write end, including the parent's, has been closed.
#[derive(Debug)]
pub struct Gate {
    rx: fs::File,
    tx: Option<fs::File>,
}

impl Gate {
    pub fn new() -> Result<Gate> {
        let (rx, tx) = util::pipe()?;
        Ok(Gate { rx, tx: Some(tx) })
    }

    /// Parent side.  Let the child proceed.
    pub fn open(self) {
        debug!("release child");
        drop(self)
    }

    /// Child side.  Block until the parent calls `open()` (or exits).
    pub fn wait(mut self) -> Result<()> {
        // close our write end, or we would wait forever
        drop(self.tx.take());
        let mut buf = [0u8; 1];
        loop {
            match self.rx.read(&mut buf) {
                Ok(0) => {
                    debug!("released");
                    return Ok(());
                }
                Ok(_) => {
                    return Err(Error::Protocol(format!(
                        "read {:?} while waiting for release",
                        buf[0] as char
                    )))
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => return Err(Error::os("read release", err)),
            }
        }
    }
}

/// clone() which returns twice, like fork()
fn clone_fork(flags: libc::c_int) -> Result<libc::pid_t> {
    debug!("clone(0x{:x})", flags);
    let ret = unsafe {
        libc::syscall(
            libc::SYS_clone,
            (flags | libc::SIGCHLD) as libc::c_ulong,
            0 as libc::c_ulong, // no new stack
            0 as libc::c_ulong,
            0 as libc::c_ulong,
            0 as libc::c_ulong,
        )
    };
    if ret < 0 {
        Err(Error::last_os_error(format!("clone(0x{:x})", flags)))
    } else {
        Ok(ret as libc::pid_t)
    }
}

/// Create a child process with new namespaces given by `flags` (CLONE_NEW*).
///
/// The child runs `child` and then exits, with 0 on success or 1 on error or panic.
/// The parent runs `parent` and returns its result.  A `Gate` is handed to each.
pub fn split<C, P, T>(flags: libc::c_int, child: C, parent: P) -> Result<T>
where
    C: FnOnce(Gate) -> Result<()>,
    P: FnOnce(Proc, Gate) -> Result<T>,
{
    let gate = Gate::new()?;
    let pid = clone_fork(flags)?;
    if pid == 0 {
        // never unwind back into the parent's stack frames
        let code = match panic::catch_unwind(AssertUnwindSafe(|| child(gate))) {
            Ok(Ok(())) => 0,
            Ok(Err(err)) => {
                error!("*child error: {}", err);
                1
            }
            Err(_) => {
                error!("*child panic");
                1
            }
        };
        process::exit(code);
    } else {
        debug!("Split Child {}", pid);
        parent(Proc::manage(pid), gate)
    }
}
