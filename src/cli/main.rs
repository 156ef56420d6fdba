use std::{
    fmt::{Display, Formatter},
    fs::File,
    io::{self, Write},
    sync::Arc,
};

use argument::Cli;
use clap::Parser;
#[cfg(feature = "progress_bar")]
use colored::Colorize;
#[cfg(feature = "log")]
use proxysift::initialize_logging;
use proxysift::{
    exporter::{Exporter, LineExporter},
    printer::{ConsolePrinter, Printer},
    CandidateSource, Config, ProxyValidator,
};
#[cfg(feature = "progress_bar")]
use status_line::StatusLine;
use tokio::{runtime, task};

mod argument;

fn main() {
    if let Err(e) = run_application() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    }
}

/// Live view of the scanner counters.
struct Report {
    validator: ProxyValidator,
}

impl Display for Report {
    #[cfg(feature = "progress_bar")]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.validator.counters().snapshot();
        write!(
            f,
            "{} checked {} | {} {} | {} {} | {} {} | {} {} | in flight {} | pending {}",
            format!("{}:", self.validator.protocol()).bright_blue(),
            snapshot.checked,
            "good".bright_green(),
            snapshot.success,
            "conn".bright_red(),
            snapshot.connection_errors,
            "timeout".yellow(),
            snapshot.timeout_errors,
            "status".bright_magenta(),
            snapshot.status_errors,
            self.validator.in_flight(),
            self.validator.pending_len(),
        )
    }

    #[cfg(not(feature = "progress_bar"))]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.validator.counters().snapshot())
    }
}

fn load_config(options: &Cli) -> anyhow::Result<Config> {
    let mut config = match &options.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(proxy_type) = &options.proxy_type {
        config.proxy_type = proxy_type.clone();
    }
    if let Some(max_connections) = options.max_connections {
        config.threads = usize::try_from(max_connections)?;
    }
    if let Some(port) = options.default_port {
        config.default_port = port;
    }
    if let Some(timeout) = options.timeout {
        config.timeout.http = timeout;
        config.timeout.socks4 = timeout;
        config.timeout.socks5 = timeout;
    }
    Ok(config)
}

fn run_application() -> anyhow::Result<()> {
    let options = Cli::parse();

    #[cfg(feature = "log")]
    {
        let log_level = match options.log_level.as_str() {
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            "trace" => log::LevelFilter::Trace,
            _ => log::LevelFilter::Off,
        };
        initialize_logging(log_level)?;
    }

    let config = load_config(&options)?;

    let writer: Box<dyn Write + Send> = match &options.output_file {
        Some(path) => Box::new(
            File::options()
                .append(true)
                .create(true)
                .open(path)?,
        ),
        None => Box::new(io::stdout()),
    };
    let (exporter, writer_handle) = LineExporter::spawn(writer);
    let printer: Option<Arc<dyn Printer>> = if options.output_file.is_some() {
        Some(Arc::new(ConsolePrinter))
    } else {
        None
    };

    let validator = ProxyValidator::new(&config, Arc::new(exporter) as Arc<dyn Exporter>, printer)?;

    let runtime = runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async {
        #[cfg(feature = "progress_bar")]
        let status = StatusLine::new(Report {
            validator: validator.clone(),
        });

        let source = match options.file.clone() {
            Some(path) => CandidateSource::from_file(path)?,
            None => CandidateSource::from_stdin(),
        };

        let scheduler = {
            let validator = validator.clone();
            tokio::spawn(async move { validator.run().await })
        };

        let ingest = {
            let validator = validator.clone();
            task::spawn_blocking(move || {
                for line in source {
                    if let Err(e) = validator.insert(&line) {
                        #[cfg(feature = "log")]
                        log::warn!("skipping {:?}: {}", line, e);
                        #[cfg(not(feature = "log"))]
                        let _ = e;
                    }
                }
            })
        };
        ingest.await?;

        if options.watch {
            scheduler.await?;
        } else {
            scheduler.abort();
            validator.run_until_idle().await;
        }

        #[cfg(feature = "progress_bar")]
        drop(status);
        Ok::<_, anyhow::Error>(())
    })?;

    let snapshot = validator.counters().snapshot();
    #[cfg(feature = "log")]
    log::info!("{}", snapshot);
    eprintln!("{}", snapshot);

    drop(validator);
    drop(runtime);
    match writer_handle.join() {
        Ok(result) => {
            result?;
        }
        Err(_) => anyhow::bail!("result writer thread panicked"),
    }
    Ok(())
}
