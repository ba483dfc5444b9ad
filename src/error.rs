use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Most read failures against the target image are *not* surfaced through this type: the core
/// treats an unreadable word or a failed DAC request as "this item cannot be resolved" and
/// unwinds to a `None`/empty result. The variants below cover the cases that are loud by
/// design.
///
/// # Error Categories
///
/// ## Session errors
/// - [`Error::Dac`] - A DAC request failed during session bootstrap, where it is fatal
/// - [`Error::RevisionMismatch`] - A cached handle was used after the target resumed
///
/// ## Decoding errors
/// - [`Error::Malformed`] - Corrupted or inconsistent target structures
/// - [`Error::OutOfBounds`] - Attempted to read beyond a buffer boundary
///
/// # Examples
///
/// ```rust
/// use clrscope::Error;
///
/// fn classify(err: &Error) -> &'static str {
///     match err {
///         Error::RevisionMismatch { .. } => "caller held a stale handle across flush()",
///         Error::Dac { .. } => "session is unusable",
///         _ => "decoding failure",
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The target image is damaged or inconsistent and could not be decoded.
    ///
    /// The error includes the source location where the malformation was
    /// detected for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while decoding a buffer.
    ///
    /// This error occurs when trying to read data beyond the end of a blob or
    /// snapshot region. It's a safety check to prevent overruns when decoding
    /// malformed or truncated data.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// A DAC request failed where the session cannot continue without it.
    ///
    /// Ordinary request failures degrade to unresolvable items; this variant is
    /// reserved for the bootstrap path (common method tables, version
    /// handshake) where there is no useful session without the answer.
    #[error("DAC request failed during {context} (hr: {hr:#x})")]
    Dac {
        /// Failure status returned by the request layer
        hr: i32,
        /// Which bootstrap step failed
        context: &'static str,
    },

    /// A cached object was accessed after the target was flushed.
    ///
    /// This is a programming-contract violation by the caller: any type,
    /// module, heap, or thread handle obtained before [`flush`] is invalid
    /// the instant the revision counter moves past the one it was stamped
    /// with.
    ///
    /// [`flush`]: crate::runtime::ClrRuntime::flush
    #[error("Revision mismatch: object was created at revision {cached}, runtime is at revision {current}")]
    RevisionMismatch {
        /// Revision the stale object was stamped with
        cached: u32,
        /// Current runtime revision
        current: u32,
    },

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while mapping a dump file.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
