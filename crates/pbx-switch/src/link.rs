use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};

/// Write-side seam between a telephone unit and its client connection.
///
/// The worker keeps the read half of the connection to itself; everything
/// the exchange sends travels through this trait, and registry shutdown
/// uses it to force the owning worker's reader to end-of-stream. Test
/// doubles record lines or inject write failures.
pub trait ClientLink: Send {
    /// Write one full notification line to the client.
    fn send_line(&mut self, line: &str) -> io::Result<()>;

    /// Half-close both directions of the underlying transport.
    fn shutdown_both(&self) -> io::Result<()>;
}

impl ClientLink for TcpStream {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.write_all(line.as_bytes())?;
        self.flush()
    }

    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}
