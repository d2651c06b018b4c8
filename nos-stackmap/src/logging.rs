//! Unified logging support for nos-stackmap
//!
//! The flush path runs in interrupt-like contexts, so logging is optional and
//! compiled out entirely unless the `log` feature is enabled. When it is off,
//! the macros still evaluate to a tuple of their arguments so that values only
//! consumed by logging do not trigger unused warnings.
//!
//! Only pass `Copy` values or references: the disabled form builds a tuple
//! from the arguments.

/// Trace-level logging
macro_rules! sm_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        log::trace!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = ($($arg)*); }
    }
}

/// Debug-level logging
macro_rules! sm_debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        log::debug!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = ($($arg)*); }
    }
}

/// Info-level logging
macro_rules! sm_info {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        log::info!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = ($($arg)*); }
    }
}

/// Warn-level logging
macro_rules! sm_warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        log::warn!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = ($($arg)*); }
    }
}

/// Error-level logging
macro_rules! sm_error {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        log::error!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = ($($arg)*); }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_macros_accept_format_args() {
        let port = 3u16;
        let name = "stack0";
        sm_trace!("trace {} {}", port, name);
        sm_debug!("debug {}", port);
        sm_info!("info {}", name);
        sm_warn!("warn {} {}", port, name);
        sm_error!("error {}", port);
    }
}
