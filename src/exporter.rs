use std::{
    io::{self, Write},
    thread::{self, JoinHandle},
};

/// Durable sink for confirmed-good proxies.
pub trait Exporter: Send + Sync {
    /// Records one working proxy in its normalized `host:port` form.
    fn add(&self, address: String);
}

/// Exporter that appends one line per proxy to a writer.
///
/// Probes only push into a channel; a dedicated thread owns the writer and
/// flushes after every line, so a crash loses at most the line being written.
pub struct LineExporter {
    sender: kanal::Sender<String>,
}

impl LineExporter {
    /// Starts the writer thread.
    ///
    /// The thread ends once every clone of the exporter is dropped and the
    /// queue is drained.
    ///
    /// # Arguments
    ///
    /// * `writer`: Destination for the exported lines, e.g. a file or stdout.
    ///
    /// # Returns
    ///
    /// The exporter and the writer thread handle, which yields the number of
    /// lines written.
    pub fn spawn<W>(writer: W) -> (Self, JoinHandle<io::Result<usize>>)
    where
        W: Write + Send + 'static,
    {
        let (sender, receiver) = kanal::unbounded::<String>();
        let handle = thread::spawn(move || {
            let mut writer = writer;
            let mut written = 0;
            while let Ok(line) = receiver.recv() {
                writeln!(writer, "{}", line)?;
                writer.flush()?;
                written += 1;
            }
            Ok(written)
        });
        (Self { sender }, handle)
    }
}

impl Exporter for LineExporter {
    fn add(&self, address: String) {
        if let Err(e) = self.sender.send(address) {
            #[cfg(feature = "log")]
            log::error!("exporter is closed, dropping result: {}", e);
            #[cfg(not(feature = "log"))]
            let _ = e;
        }
    }
}
