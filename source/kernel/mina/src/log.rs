// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Leveled UART logging for the Rust side of the boot/trap layer
//! OWNERS: @kernel-arch-team
//! STATUS: Functional
//! TEST_COVERAGE: Line format + level gating unit tests
//! PUBLIC API: log_error!/log_warn!/log_info!/log_debug!/log_trace!, emit(), write_line()
//! DEPENDS_ON: uart::KernelUart (locked)
//! INVARIANTS: Callers are the vector installer, the context switch and the
//! boot collaborators in normal context. Trap handlers and the panic path
//! write through `uart::raw_writer` instead, since this module takes the UART lock.
//!
//! Lines look like `[INFO boot] stacks 0x..`. `log_debug!`/`log_trace!` cost
//! nothing in release builds.

use core::fmt::{Arguments, Write};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    const fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn enabled(self) -> bool {
        !matches!(self, Level::Debug | Level::Trace) || cfg!(debug_assertions)
    }
}

/// Formats one log line, newline included.
pub fn write_line<W: Write>(w: &mut W, level: Level, target: &str, args: Arguments<'_>) -> core::fmt::Result {
    write!(w, "[{} {}] ", level.tag(), target)?;
    w.write_fmt(args)?;
    w.write_char('\n')
}

/// Sends one line to the kernel UART when `level` is compiled in.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if level.enabled() {
        let mut uart = crate::uart::KernelUart::lock();
        let _ = write_line(&mut *uart, level, target, args);
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __mina_log {
    ($level:ident, target: $target:expr, $($arg:tt)+) => {
        $crate::log::emit($crate::log::Level::$level, $target, format_args!($($arg)+))
    };
    ($level:ident, $($arg:tt)+) => {
        $crate::log::emit($crate::log::Level::$level, module_path!(), format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)+) => { $crate::__mina_log!(Error, $($arg)+) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)+) => { $crate::__mina_log!(Warn, $($arg)+) };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)+) => { $crate::__mina_log!(Info, $($arg)+) };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)+) => { $crate::__mina_log!(Debug, $($arg)+) };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)+) => { $crate::__mina_log!(Trace, $($arg)+) };
}
