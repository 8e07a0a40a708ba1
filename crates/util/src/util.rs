//! Shared utilities for panelmux.

/// Panic in debug builds, log error with backtrace in release.
///
/// Use for bookkeeping invariants whose violation should fail tests loudly but
/// must never take down a running session manager.
#[macro_export]
macro_rules! debug_panic {
    ( $($fmt_arg:tt)* ) => {
        if cfg!(debug_assertions) {
            panic!( $($fmt_arg)* );
        } else {
            let backtrace = std::backtrace::Backtrace::capture();
            tracing::error!("{}\n{:?}", format_args!($($fmt_arg)*), backtrace);
        }
    };
}

/// Log-and-continue helpers for best-effort operations.
pub trait ResultExt<T> {
    /// Log the error at `warn` level and turn the result into an `Option`.
    fn log_err(self) -> Option<T>;

    /// Like [`ResultExt::log_err`], but at `debug` level. For failures that are
    /// expected in normal operation (signalling a process that already exited).
    fn log_expected_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                tracing::warn!("{}:{}: {}", caller.file(), caller.line(), error);
                None
            }
        }
    }

    #[track_caller]
    fn log_expected_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                let caller = std::panic::Location::caller();
                tracing::debug!("{}:{}: {}", caller.file(), caller.line(), error);
                None
            }
        }
    }
}
