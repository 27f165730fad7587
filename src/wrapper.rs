#[cfg(feature = "log")]
pub mod rust_log {
    use std::panic::Location;

    /// Hands one finished access log line to the global `log` logger.
    pub fn log(
        level: log::Level,
        target: &str,
        module_path: &'static str,
        loc: &'static Location,
        line: &[u8],
    ) {
        let line = String::from_utf8_lossy(line);

        // `format_args!` borrows temporaries, so the record is built and
        // logged in a single statement.
        log::logger().log(
            &log::Record::builder()
                .args(format_args!("{}", line))
                .level(level)
                .target(target)
                .module_path_static(Some(module_path))
                .file_static(Some(loc.file()))
                .line(Some(loc.line()))
                .build(),
        );
    }
}
