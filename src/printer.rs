#[cfg(feature = "progress_bar")]
use colored::Colorize;

use crate::proxy::models::{Candidate, Protocol};

/// Human-readable notification of a working proxy.
pub trait Printer: Send + Sync {
    fn print(&self, protocol: Protocol, candidate: &Candidate);
}

/// Prints each working proxy to stdout.
pub struct ConsolePrinter;

impl Printer for ConsolePrinter {
    fn print(&self, protocol: Protocol, candidate: &Candidate) {
        #[cfg(feature = "progress_bar")]
        println!(
            "{} {} {}",
            "[+]".bright_green(),
            format!("{:<6}", protocol).bright_blue(),
            candidate
        );
        #[cfg(not(feature = "progress_bar"))]
        println!("[+] {:<6} {}", protocol, candidate);
    }
}
