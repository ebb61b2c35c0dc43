use std::fmt;
use std::sync::Arc;

use log::{Level, Log, Metadata, Record};

/// Logging handle passed to the components of a calibration run.
///
/// Records are forwarded to the injected [`Log`] sink under the target of the
/// handle, which identifies the run. The default handle forwards to the
/// global `log` facade with target `transcal`.
///
/// ```rust
/// use transcal::Logger;
///
/// let logger = Logger::global("calibration-1");
/// logger.info(format_args!("starting"));
/// ```
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Log>,
    target: Arc<str>,
}

struct Facade;

impl Log for Facade {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level() && log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        log::logger().log(record);
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

impl Logger {
    /// Logger writing into the given sink.
    pub fn new(sink: Arc<dyn Log>, target: &str) -> Self {
        Self {
            sink,
            target: target.into(),
        }
    }

    /// Logger forwarding to the global `log` facade.
    pub fn global(target: &str) -> Self {
        Self::new(Arc::new(Facade), target)
    }

    /// Target of the emitted records.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Emits a record of given level.
    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let metadata = Metadata::builder().level(level).target(&self.target).build();

        if self.sink.enabled(&metadata) {
            self.sink
                .log(&Record::builder().metadata(metadata).args(args).build());
        }
    }

    /// Emits an error record.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    /// Emits a warning record.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    /// Emits an info record.
    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    /// Emits a debug record.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    /// Emits a trace record.
    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Trace, args);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::global("transcal")
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::Capture;

    use super::*;

    #[test]
    fn records_go_to_injected_sink() {
        let capture = Arc::new(Capture::default());
        let logger = Logger::new(capture.clone(), "run-7");

        logger.warn(format_args!("sigma = {}", 0.5));
        logger.debug(format_args!("detail"));

        let records = capture.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, Level::Warn);
        assert_eq!(records[0].target, "run-7");
        assert_eq!(records[0].message, "sigma = 0.5");
        assert_eq!(records[1].level, Level::Debug);
    }
}
