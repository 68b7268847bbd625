//! Crate-wide error taxonomy.

use thiserror::Error;

/// All the ways an `ldb` operation can fail.
///
/// Every fallible library entry point returns `Result<T, Error>`; nothing
/// is retried internally, and the first error aborts the operation without
/// leaving partially-mutated externally visible state.
#[derive(Debug, Error)]
pub enum Error {
    /// A kernel-facing call (ptrace/waitpid/open/mmap/pipe/fork) failed.
    #[error("{op}: {source}")]
    Os {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The process wasn't in the state an operation required, a hardware
    /// debug-register slot was exhausted, or a watchpoint was misaligned.
    #[error("{0}")]
    ProcessState(String),

    /// A register, stoppoint, syscall name/id, symbol, DIE, file, or line
    /// could not be found.
    #[error("{0}")]
    Lookup(String),

    /// Malformed DWARF/ELF, or an invalid literal from the command surface.
    #[error("{0}")]
    Format(String),
}

impl Error {
    /// Build an `Os` error from the current `errno`, the way the original
    /// `Error::SendErrno` captured `strerror(errno)` at the call site.
    pub fn os(op: &'static str) -> Error {
        Error::Os {
            op,
            source: std::io::Error::last_os_error(),
        }
    }

    pub fn process_state(msg: impl Into<String>) -> Error {
        Error::ProcessState(msg.into())
    }

    pub fn lookup(msg: impl Into<String>) -> Error {
        Error::Lookup(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Error {
        Error::Format(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
