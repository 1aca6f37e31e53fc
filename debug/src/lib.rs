#![no_std]
//! Structured debug logger shared by the `tinypan-hal` bindings and the
//! `tinypan` core.
//!
//! The teacher firmware this crate is descended from hardwires its logger
//! to a single UART that's always there. A portable protocol crate has no
//! such singleton, so the sink here is a trait object registered once at
//! startup by whatever HAL binding is driving the polling loop.

use core::fmt::Write;

#[derive(PartialOrd, PartialEq, Clone, Copy)]
#[allow(dead_code)]
pub enum LL {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

static mut LOG_LEVEL: LL = LL::Info;
static mut SINK: Option<&'static mut dyn Write> = None;

pub fn set_log_level(level: LL) {
    unsafe {
        LOG_LEVEL = level;
    }
}

pub fn log_level() -> LL {
    unsafe { LOG_LEVEL }
}

/// Install the sink the log macros write through. Must be called before any
/// logging happens; intended to be called once at init from the HAL side.
///
/// # Safety
/// Must not be called concurrently with logging from another thread of
/// control. The single-threaded cooperative model this crate targets (see
/// the supervisor's docs) makes that trivially true in practice.
pub unsafe fn set_sink(sink: &'static mut dyn Write) {
    SINK = Some(sink);
}

/// Run `f` with the installed sink, if any. No-op when no sink is installed
/// (e.g. in tests, or before `set_sink` is called).
#[doc(hidden)]
pub fn with_sink(f: impl FnOnce(&mut dyn Write)) {
    unsafe {
        if let Some(sink) = SINK.as_deref_mut() {
            f(sink);
        }
    }
}

#[macro_export]
macro_rules! sprint {
    ($($args:tt)+) => ({
        $crate::with_sink(|sink| {
            let _ = core::fmt::Write::write_fmt(sink, core::format_args!($($args)+));
        });
    });
}

#[macro_export]
macro_rules! sprintln {
    () => ({
        $crate::sprint!("\r\n")
    });
    ($fmt:expr) => ({
        $crate::sprint!(concat!($fmt, "\r\n"))
    });
    ($fmt:expr, $($args:tt)+) => ({
        $crate::sprint!(concat!($fmt, "\r\n"), $($args)+)
    });
}

#[macro_export]
macro_rules! log {
    ($level:expr, $($e:tt)+) => {
        if $crate::log_level() <= $level {
            $crate::sprint!($($e)+)
        }
    }
}

#[macro_export]
macro_rules! logln {
    ($level:expr) => {
        if $crate::log_level() <= $level {
            $crate::sprintln!()
        }
    };
    ($level:expr, $($e:tt)+) => {
        if $crate::log_level() <= $level {
            $crate::sprintln!($($e)+)
        }
    }
}

/// Log a label followed by the hex representation of an integer, no newline.
#[macro_export]
macro_rules! loghex {
    ($level:expr, $label:expr, $val:expr) => {
        $crate::log!($level, "{}{:x}", $label, $val)
    };
}

/// Log a label followed by the hex representation of an integer, with newline.
#[macro_export]
macro_rules! loghexln {
    ($level:expr, $label:expr, $val:expr) => {
        $crate::logln!($level, "{}{:x}", $label, $val)
    };
}
