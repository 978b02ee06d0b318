//! Verbose diagnostic output.
//!
//! Diagnostics are disabled by default. When enabled with [`set_verbose`],
//! the handle reports geometry resolution, read errors, retries and skipped
//! ranges to the configured stream (stderr unless replaced with
//! [`set_stream`]).

use once_cell::sync::Lazy;
use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

struct Notifier {
    verbose: bool,
    stream: Box<dyn Write + Send>,
}

static NOTIFIER: Lazy<Mutex<Notifier>> = Lazy::new(|| {
    Mutex::new(Notifier {
        verbose: false,
        stream: Box::new(io::stderr()),
    })
});

fn with_notifier<R>(f: impl FnOnce(&mut Notifier) -> R) -> R {
    let mut notifier = NOTIFIER.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut notifier)
}

/// Enable or disable verbose output.
pub fn set_verbose(verbose: bool) {
    with_notifier(|n| n.verbose = verbose);
}

/// Whether verbose output is enabled.
pub fn is_verbose() -> bool {
    with_notifier(|n| n.verbose)
}

/// Redirect verbose output to `stream`.
pub fn set_stream(stream: Box<dyn Write + Send>) {
    with_notifier(|n| n.stream = stream);
}

/// Restore verbose output to stderr.
pub fn reset_stream() {
    set_stream(Box::new(io::stderr()));
}

#[doc(hidden)]
pub fn print(function: &str, args: fmt::Arguments<'_>) {
    with_notifier(|n| {
        if n.verbose {
            let _ = writeln!(n.stream, "{}: {}", function, args);
        }
    });
}

/// Print a diagnostic line prefixed with the calling operation when
/// verbose output is enabled.
macro_rules! notify {
    ($function:expr, $($arg:tt)*) => {
        $crate::notify::print($function, format_args!($($arg)*))
    };
}

pub(crate) use notify;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Shared buffer used to capture diagnostics.
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[test]
    fn test_verbose_output() {
        let capture = Capture::default();
        set_stream(Box::new(capture.clone()));

        set_verbose(false);
        notify!("test", "hidden {}", 1);

        set_verbose(true);
        assert!(is_verbose());
        notify!("test", "shown {}", 2);
        assert!(capture.contents().contains("test: shown 2\n"));
        assert!(!capture.contents().contains("hidden"));

        set_verbose(false);
        reset_stream();
    }
}
