use std::{
    io::{self, Write},
    sync::{Arc, Mutex},
};

#[cfg(feature = "log")]
use std::borrow::Cow;

/// Destination for finished access log lines.
///
/// Each call receives one complete, newline-terminated line. Errors are
/// reported back but never reach request handling.
pub trait LogSink {
    fn write_line(&self, line: &[u8]) -> io::Result<()>;
}

impl LogSink for io::Stdout {
    fn write_line(&self, line: &[u8]) -> io::Result<()> {
        self.lock().write_all(line)
    }
}

impl LogSink for io::Stderr {
    fn write_line(&self, line: &[u8]) -> io::Result<()> {
        self.lock().write_all(line)
    }
}

/// Any [`Write`] shared behind a mutex, e.g. an opened log file.
///
/// Clones write to the same writer, so one sink can be handed to every
/// worker's [`ProxyLogger`](crate::ProxyLogger).
///
/// # Examples
/// ```rust,no_run
/// use std::fs::OpenOptions;
/// use actix_web_middleware_proxylog::{ProxyLogger, WriterSink};
///
/// let file = OpenOptions::new().create(true).append(true).open("access.log").unwrap();
/// let sink = WriterSink::new(file);
/// let logger = ProxyLogger::new(sink.clone());
/// ```
#[derive(Debug)]
pub struct WriterSink<W>(Arc<Mutex<W>>);

impl<W> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        WriterSink(Arc::new(Mutex::new(writer)))
    }
}

impl<W> Clone for WriterSink<W> {
    fn clone(&self) -> Self {
        WriterSink(Arc::clone(&self.0))
    }
}

impl<W: Write> LogSink for WriterSink<W> {
    fn write_line(&self, line: &[u8]) -> io::Result<()> {
        let mut writer = self
            .0
            .lock()
            .map_err(|_| io::Error::other("access log writer poisoned"))?;
        writer.write_all(line)
    }
}

/// Forwards lines to the [`log`] facade as `Info` records, without the
/// trailing newline.
#[cfg(feature = "log")]
#[derive(Debug, Clone)]
pub struct LogFacade {
    target: Cow<'static, str>,
    level: log::Level,
}

#[cfg(feature = "log")]
impl LogFacade {
    pub fn new(target: impl Into<Cow<'static, str>>) -> Self {
        LogFacade {
            target: target.into(),
            level: log::Level::Info,
        }
    }

    pub fn level(mut self, level: log::Level) -> Self {
        self.level = level;
        self
    }

    pub fn target(&self) -> &str {
        self.target.as_ref()
    }
}

#[cfg(feature = "log")]
impl LogSink for LogFacade {
    fn write_line(&self, line: &[u8]) -> io::Result<()> {
        crate::wrapper::rust_log::log(
            self.level,
            self.target.as_ref(),
            module_path!(),
            std::panic::Location::caller(),
            line.strip_suffix(b"\n").unwrap_or(line),
        );
        Ok(())
    }
}
