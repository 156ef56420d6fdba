use clap::builder::styling::AnsiColor;
use clap::builder::{PossibleValue, Styles};
use clap::Parser;

fn get_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Green.on_default())
        .literal(AnsiColor::BrightGreen.on_default())
        .placeholder(AnsiColor::Cyan.on_default())
}

/// Command-line interface definition for the proxy scanner.
#[derive(Parser, Debug, Clone)]
#[command(version, about, styles = get_styles())]
pub struct Cli {
    /// JSON configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    pub config: Option<std::path::PathBuf>,

    /// File containing one candidate per line. Reads stdin when omitted.
    #[arg(short, long)]
    pub file: Option<std::path::PathBuf>,

    /// Protocol to check candidates with. Overrides the configuration.
    #[arg(
        short = 't',
        long = "type",
        value_parser([
            PossibleValue::new("http"),
            PossibleValue::new("socks4"),
            PossibleValue::new("socks5"),
        ])
    )]
    pub proxy_type: Option<String>,

    /// Maximum number of concurrent proxy checks.
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_connections: Option<u64>,

    /// Port assumed for candidates listed without one.
    #[arg(short = 'p', long = "port")]
    pub default_port: Option<u16>,

    /// Timeout in milliseconds, applied to every protocol.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Log level for application output.
    #[arg(
        long = "log",
        default_value = "off",
        value_parser([
            PossibleValue::new("debug"),
            PossibleValue::new("info"),
            PossibleValue::new("warn"),
            PossibleValue::new("error"),
            PossibleValue::new("trace"),
            PossibleValue::new("off"),
        ])
    )]
    pub log_level: String,

    /// File path to save the working proxies. If not provided, output will go to the console.
    #[arg(short, long)]
    pub output_file: Option<std::path::PathBuf>,

    /// Keep scanning after the input is exhausted, until interrupted.
    #[arg(short, long)]
    pub watch: bool,
}
