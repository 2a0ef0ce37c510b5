//! Human-readable swap report, written to stdout.
//!
//! Structured logs go through `tracing` to stderr and the log file; only the report lives here.

use std::io::Write as _;

pub struct Report<W> {
    out: W,
}

impl Report<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self {
            out: std::io::stdout(),
        }
    }
}

impl<W: std::io::Write> Report<W> {
    #[cfg(test)]
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn line(&mut self, s: &str) -> eyre::Result<()> {
        writeln!(self.out, "{s}").map_err(|e| eyre::eyre!("write report: {e}"))?;
        self.out
            .flush()
            .map_err(|e| eyre::eyre!("flush report: {e}"))
    }

    pub fn blank(&mut self) -> eyre::Result<()> {
        self.line("")
    }

    /// An indented detail line under the current section.
    pub fn item(&mut self, s: &str) -> eyre::Result<()> {
        self.line(&format!("   {s}"))
    }
}
