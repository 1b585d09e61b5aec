use std::path::{Path, PathBuf};
use std::{error, fmt, io};

#[derive(Debug)]
pub enum Error {
    File {
        op: String,
        name: PathBuf,
        io: io::Error,
    },
    OS {
        op: String,
        io: io::Error,
    },
    BadStr,
    /// Malformed command line
    Usage(String),
    NotAbsolute(PathBuf),
    /// Unexpected traffic on the parent/child channel
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Annotate I/O error
    pub fn file<S: AsRef<str>, P: AsRef<Path>>(desc: S, path: P, err: io::Error) -> Self {
        Error::File {
            op: desc.as_ref().to_string(),
            name: path.as_ref().to_path_buf(),
            io: err,
        }
    }

    /// Annotate Error::last_os_error()
    pub fn last_file_error<S: AsRef<str>, P: AsRef<Path>>(desc: S, path: P) -> Self {
        Self::file(desc, path, io::Error::last_os_error())
    }

    pub fn os<S: AsRef<str>>(desc: S, err: io::Error) -> Self {
        Self::OS {
            op: desc.as_ref().to_string(),
            io: err,
        }
    }

    /// Annotate Error::last_os_error()
    pub fn last_os_error<S: AsRef<str>>(desc: S) -> Self {
        Self::os(desc, io::Error::last_os_error())
    }

    pub fn usage<S: AsRef<str>>(msg: S) -> Self {
        Self::Usage(msg.as_ref().to_string())
    }

    /// errno of a wrapped I/O error, if any
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::File { io, .. } | Self::OS { io, .. } => io.raw_os_error(),
            _ => None,
        }
    }

    pub fn is_io_error(&self, kind: io::ErrorKind) -> bool {
        match self {
            Self::File { io, .. } | Self::OS { io, .. } => io.kind() == kind,
            _ => false,
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::File { io, .. } => Some(io),
            Self::OS { io, .. } => Some(io),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { op, name, io } => {
                write!(f, "File {} with {} : {}", op, name.display(), io)
            }
            Self::OS { op, io } => write!(f, "OS {} : {}", op, io),
            Self::BadStr => write!(f, "String can not contain nil"),
            Self::Usage(msg) => write!(f, "{}", msg),
            Self::NotAbsolute(name) => write!(f, "Not an absolute path: {}", name.display()),
            Self::Protocol(msg) => write!(f, "Protocol violation: {}", msg),
        }
    }
}

impl From<std::ffi::NulError> for Error {
    fn from(_inp: std::ffi::NulError) -> Self {
        Error::BadStr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotate() {
        let err = Error::file("mkdir", "/x/y", io::Error::from_raw_os_error(libc::EACCES));
        assert!(err.is_io_error(io::ErrorKind::PermissionDenied));
        assert_eq!(err.raw_os_error(), Some(libc::EACCES));
        assert!(err.to_string().starts_with("File mkdir with /x/y : "), "{}", err);
        assert!(error::Error::source(&err).is_some());
    }

    #[test]
    fn usage() {
        let err = Error::usage("Unknown bind-mount type xx");
        assert_eq!(err.raw_os_error(), None);
        assert_eq!(err.to_string(), "Unknown bind-mount type xx");
    }
}
