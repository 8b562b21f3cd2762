//! Log routing.
//!
//! Inside a PAM stack the module logs to syslog under the authpriv
//! facility, tagged `openrc-pam[<user>]`. The subscriber is installed for
//! the duration of one call only, so the host process keeps whatever
//! subscriber (or none) it had. The command-line tool logs to stderr.

use nix::libc;
use std::ffi::CString;
use std::io;
use tracing::subscriber::DefaultGuard;
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

const SYSLOG_FORMAT: &[u8] = b"%s\0";

/// Builds the syslog tag for a user.
pub fn syslog_tag(user: &str) -> String {
    format!("openrc-pam[{}]", user)
}

/// Maps a tracing level to a syslog priority.
pub fn priority_for(level: &Level) -> libc::c_int {
    match *level {
        Level::ERROR => libc::LOG_ERR,
        Level::WARN => libc::LOG_WARNING,
        Level::INFO => libc::LOG_INFO,
        Level::DEBUG | Level::TRACE => libc::LOG_DEBUG,
    }
}

/// Turns one formatted record into a syslog message.
///
/// Trailing line breaks are dropped and interior NULs replaced, since the
/// message is handed to C as a string. Returns `None` for empty records.
pub fn syslog_message(buf: &[u8]) -> Option<CString> {
    let text = String::from_utf8_lossy(buf);
    let text = text.trim_end_matches(['\n', '\r']);
    if text.is_empty() {
        return None;
    }
    CString::new(text.replace('\0', "\u{fffd}")).ok()
}

/// Creates one [`SyslogWriter`] per event.
#[derive(Debug, Clone)]
pub struct SyslogMakeWriter {
    ident: CString,
}

impl SyslogMakeWriter {
    pub fn new(tag: &str) -> Self {
        let ident = CString::new(tag.replace('\0', "")).unwrap_or_default();
        Self { ident }
    }
}

impl<'a> MakeWriter<'a> for SyslogMakeWriter {
    type Writer = SyslogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogWriter::new(&self.ident, libc::LOG_INFO)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        SyslogWriter::new(&self.ident, priority_for(meta.level()))
    }
}

/// Buffers one formatted record and sends it to syslog when dropped.
#[derive(Debug)]
pub struct SyslogWriter<'a> {
    ident: &'a CString,
    priority: libc::c_int,
    buf: Vec<u8>,
}

impl<'a> SyslogWriter<'a> {
    fn new(ident: &'a CString, priority: libc::c_int) -> Self {
        Self {
            ident,
            priority,
            buf: Vec::new(),
        }
    }
}

impl io::Write for SyslogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogWriter<'_> {
    fn drop(&mut self) {
        let Some(message) = syslog_message(&self.buf) else {
            return;
        };
        // SAFETY: every pointer is a NUL-terminated string that outlives
        // the calls, and the format string consumes exactly one argument.
        unsafe {
            libc::openlog(self.ident.as_ptr(), libc::LOG_PID, libc::LOG_AUTHPRIV);
            libc::syslog(
                self.priority,
                SYSLOG_FORMAT.as_ptr().cast::<libc::c_char>(),
                message.as_ptr(),
            );
            libc::closelog();
        }
    }
}

/// Routes this thread's log events to syslog until the guard is dropped.
pub fn syslog_scope(tag: &str) -> DefaultGuard {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(SyslogMakeWriter::new(tag))
        .with_ansi(false)
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_default(subscriber)
}

/// Installs the global stderr subscriber for the command-line tool.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Calling this
/// twice keeps the first subscriber.
pub fn init_stderr() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
    if let Err(e) = result {
        tracing::debug!("logging already initialized: {}", e);
    }
}

#[cfg(test)]
#[path = "tests/logging_tests.rs"]
mod tests;
