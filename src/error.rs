//! Error taxonomy for the document store.
//!
//! Every fallible operation in this crate returns [Result], and every
//! error is stamped with the call site that raised it via the [err_at]
//! macro, the same convention `util::files` and `wral::journal` use for
//! tracing failures back to source.

use std::{fmt, result};

/// Crate-wide result type.
pub type Result<T> = result::Result<T, Error>;

/// Kinds of failure this crate can raise. Associated `String` carries a
/// call-site-stamped message, not a user-facing sentence.
#[derive(Debug)]
pub enum Error {
    // -- taxonomy named by the engine's external contract --
    /// Malformed input, missing required field, reserved field misuse,
    /// out-of-range parameter.
    Precondition(String),
    /// No live entry for the given key/id.
    NotFound(String),
    /// The entry exists but its storage slot is tombstoned.
    RecordDeleted(String),
    /// `update`/`delete` carried a stale `_rev`.
    RevConflict(String),
    /// Duplicate index name, or wrong-identity instance passed to
    /// destroy/compact.
    IndexConflict(String),
    /// Operation touches an index that was added but never reindexed.
    TryReindex(String),
    /// Database directory missing, unreadable, or not a database.
    DatabasePath(String),
    /// `create()` on a directory that is already a database.
    DatabaseConflict(String),
    /// Duplicate unique key, or a key whose encoded width does not
    /// match the index's fixed key format.
    IndexError(String),
    /// `revert_index` called with no prior definition to revert to.
    RevertUnavailable(String),
    /// Index-definition mini-language: malformed value/operand.
    ValueException(String),
    /// Index-definition mini-language: unknown function or bad arity.
    FunctionException(String),

    // -- infrastructure kinds, not part of the external taxonomy --
    /// Wraps `std::io::Error`.
    IOError(String),
    /// A numeric conversion (e.g. `usize` <-> `u64`) failed.
    FailConvert(String),
    /// Encoding a document or index entry failed.
    EncodeFail(String),
    /// Decoding a document or index entry failed, including checksum
    /// mismatches and truncated records.
    DecodeFail(String),
    /// A background thread panicked or could not be joined.
    ThreadFail(String),
    /// A message could not be delivered to, or received from, a
    /// background thread's channel.
    IPCFail(String),
    /// Invariant violation that should be unreachable in correct code.
    Fatal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;

        match self {
            Precondition(msg) => write!(f, "precondition: {}", msg),
            NotFound(msg) => write!(f, "not-found: {}", msg),
            RecordDeleted(msg) => write!(f, "record-deleted: {}", msg),
            RevConflict(msg) => write!(f, "rev-conflict: {}", msg),
            IndexConflict(msg) => write!(f, "index-conflict: {}", msg),
            TryReindex(msg) => write!(f, "try-reindex: {}", msg),
            DatabasePath(msg) => write!(f, "database-path: {}", msg),
            DatabaseConflict(msg) => write!(f, "database-conflict: {}", msg),
            IndexError(msg) => write!(f, "index-error: {}", msg),
            RevertUnavailable(msg) => write!(f, "revert-unavailable: {}", msg),
            ValueException(msg) => write!(f, "value-exception: {}", msg),
            FunctionException(msg) => write!(f, "function-exception: {}", msg),
            IOError(msg) => write!(f, "io-error: {}", msg),
            FailConvert(msg) => write!(f, "fail-convert: {}", msg),
            EncodeFail(msg) => write!(f, "encode-fail: {}", msg),
            DecodeFail(msg) => write!(f, "decode-fail: {}", msg),
            ThreadFail(msg) => write!(f, "thread-fail: {}", msg),
            IPCFail(msg) => write!(f, "ipc-fail: {}", msg),
            Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        format!("{:?}", self) == format!("{:?}", other)
    }
}

/// Raise a typed [Error], stamped with the call site.
///
/// Two forms:
/// * `err_at!(Variant, result_expr)` maps the `Err` side of a
///   `Result<T, E>` (`E: Display`) into `Error::Variant`, leaving `Ok`
///   untouched. The macro evaluates to a `Result<T, Error>`.
/// * `err_at!(Variant, msg: fmt, args...)` formats a message and
///   immediately `return`s `Err(Error::Variant(..))` from the enclosing
///   function.
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let msg = format!($($arg),+);
        return Err($crate::Error::$v(format!("{}:{} {}", file!(), line!(), msg)));
    }};
    ($v:ident, $e:expr) => {
        match $e {
            Ok(val) => Ok(val),
            Err(err) => Err($crate::Error::$v(format!("{}:{} {}", file!(), line!(), err))),
        }
    };
}
