pub mod config;
pub mod error;
pub mod exporter;
pub mod negotiators;
pub mod printer;
pub mod proxy;
pub mod resolver;
pub mod validator;

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::PathBuf,
};

pub use config::Config;
pub use error::{Outcome, ProbeError};
pub use validator::ProxyValidator;

/// Initializes the logging system for the application.
///
/// This function configures the logging system with the specified verbosity level.
///
/// # Arguments
///
/// * `log_level`: The desired verbosity level for logging. Determines which log messages will be displayed.
///
/// # Returns
///
/// A result indicating the success or failure of the logging setup.
#[cfg(feature = "log")]
pub fn initialize_logging(log_level: log::LevelFilter) -> anyhow::Result<()> {
    stderrlog::new()
        .module(module_path!())
        .show_module_names(true)
        .verbosity(log_level)
        .init()?;
    Ok(())
}

/// Candidate addresses read line by line from a file or stdin.
///
/// Blank lines and lines starting with `#` are skipped; everything else is
/// yielded trimmed, to be parsed by [`ProxyValidator::insert`].
pub struct CandidateSource {
    lines: Box<dyn Iterator<Item = io::Result<String>> + Send>,
}

impl CandidateSource {
    /// Creates a `CandidateSource` from a specified file path.
    ///
    /// # Arguments
    ///
    /// * `filepath`: The path to the file containing one candidate per line.
    ///
    /// # Returns
    ///
    /// A result containing the `CandidateSource` or an error if the file cannot be opened.
    pub fn from_file(filepath: PathBuf) -> anyhow::Result<Self> {
        let file = File::open(filepath)?;
        Ok(Self::from_reader(BufReader::new(file)))
    }

    /// Creates a `CandidateSource` reading from standard input.
    pub fn from_stdin() -> Self {
        Self::from_reader(BufReader::new(io::stdin()))
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        Self {
            lines: Box::new(reader.lines()),
        }
    }
}

impl Iterator for CandidateSource {
    type Item = String;

    /// Retrieves the next candidate line.
    ///
    /// Reading stops at the first I/O error.
    fn next(&mut self) -> Option<Self::Item> {
        for line in self.lines.by_ref() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    #[cfg(feature = "log")]
                    log::error!("failed to read candidates: {}", e);
                    #[cfg(not(feature = "log"))]
                    let _ = e;
                    return None;
                }
            };
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            return Some(line.to_string());
        }
        None
    }
}
