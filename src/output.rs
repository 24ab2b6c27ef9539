// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! User facing result reporting.
//!
//! Everything gkn wants the user to see goes through a [`Reporter`], never
//! through logging. A reporter writes one line per report in either of two
//! forms:
//!
//! - __plain__: `OK message` or `WARN message` on standard output, and
//!   `ERR message` on standard error. Attached data is dropped.
//! - __JSON__: one `{"level", "message", "data"}` envelope per line on
//!   standard output, for every level.

use serde::Serialize;
use std::io::{self, Stderr, Stdout, Write};

/// Severity of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Ok,
    Warn,
    Err,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warn => "WARN",
            Self::Err => "ERR",
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize + ?Sized> {
    level: Level,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
}

/// Line oriented report sink.
#[derive(Debug)]
pub struct Reporter<O = Stdout, E = Stderr>
where
    O: Write,
    E: Write,
{
    json: bool,
    out: O,
    err: E,
}

impl Reporter {
    /// Construct new reporter on standard output and standard error.
    pub fn new(json: bool) -> Self {
        Self::with_writers(json, io::stdout(), io::stderr())
    }
}

impl<O, E> Reporter<O, E>
where
    O: Write,
    E: Write,
{
    /// Construct new reporter on given writers.
    pub fn with_writers(json: bool, out: O, err: E) -> Self {
        Self { json, out, err }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn ok(&mut self, message: impl AsRef<str>) -> Result<()> {
        self.report::<()>(Level::Ok, message.as_ref(), None)
    }

    pub fn ok_with<T: Serialize + ?Sized>(&mut self, message: impl AsRef<str>, data: &T) -> Result<()> {
        self.report(Level::Ok, message.as_ref(), Some(data))
    }

    pub fn warn(&mut self, message: impl AsRef<str>) -> Result<()> {
        self.report::<()>(Level::Warn, message.as_ref(), None)
    }

    pub fn warn_with<T: Serialize + ?Sized>(&mut self, message: impl AsRef<str>, data: &T) -> Result<()> {
        self.report(Level::Warn, message.as_ref(), Some(data))
    }

    pub fn err(&mut self, message: impl AsRef<str>) -> Result<()> {
        self.report::<()>(Level::Err, message.as_ref(), None)
    }

    pub fn err_with<T: Serialize + ?Sized>(&mut self, message: impl AsRef<str>, data: &T) -> Result<()> {
        self.report(Level::Err, message.as_ref(), Some(data))
    }

    /// Write text verbatim, or as an OK envelope in JSON form.
    pub fn raw(&mut self, text: impl AsRef<str>) -> Result<()> {
        if self.json {
            return self.report::<()>(Level::Ok, text.as_ref(), None);
        }

        writeln!(self.out, "{}", text.as_ref())?;
        Ok(())
    }

    /// Report at level with optional attached data.
    ///
    /// # Errors
    ///
    /// - Return [`OutputError::Encode`] if data cannot be encoded.
    /// - Return [`OutputError::Write`] if the sink cannot be written to.
    pub fn report<T: Serialize + ?Sized>(
        &mut self,
        level: Level,
        message: &str,
        data: Option<&T>,
    ) -> Result<()> {
        if self.json {
            let envelope = Envelope {
                level,
                message,
                data,
            };
            serde_json::to_writer(&mut self.out, &envelope)?;
            writeln!(self.out)?;
            return Ok(());
        }

        match level {
            Level::Err => writeln!(self.err, "{} {message}", level.as_str())?,
            _ => writeln!(self.out, "{} {message}", level.as_str())?,
        }

        Ok(())
    }

    /// Take back underlying writers.
    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }
}

/// Report sink error types.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// Sink cannot be written to.
    #[error(transparent)]
    Write(#[from] io::Error),

    /// Attached data cannot be encoded.
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

/// Friendly result alias :3
pub type Result<T, E = OutputError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn reporter(json: bool) -> Reporter<Vec<u8>, Vec<u8>> {
        Reporter::with_writers(json, Vec::new(), Vec::new())
    }

    fn contents(reporter: Reporter<Vec<u8>, Vec<u8>>) -> anyhow::Result<(String, String)> {
        let (out, err) = reporter.into_inner();
        Ok((String::from_utf8(out)?, String::from_utf8(err)?))
    }

    #[test]
    fn plain_levels_split_streams() -> anyhow::Result<()> {
        let mut reporter = reporter(false);
        reporter.ok("synced alpha")?;
        reporter.warn_with("beta skipped", &["dirty"])?;
        reporter.err("gamma failed")?;
        reporter.raw("  raw text")?;

        let (out, err) = contents(reporter)?;
        assert_eq!(
            out,
            indoc! {"
                OK synced alpha
                WARN beta skipped
                  raw text
            "}
        );
        assert_eq!(err, "ERR gamma failed\n");

        Ok(())
    }

    #[test]
    fn json_envelope_per_line() -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Data {
            count: usize,
        }

        let mut reporter = reporter(true);
        reporter.ok_with("scan", &Data { count: 2 })?;
        reporter.err("boom")?;
        reporter.raw("text")?;

        let (out, err) = contents(reporter)?;
        assert_eq!(
            out,
            indoc! {r#"
                {"level":"OK","message":"scan","data":{"count":2}}
                {"level":"ERR","message":"boom"}
                {"level":"OK","message":"text"}
            "#}
        );
        assert!(err.is_empty());

        Ok(())
    }
}
