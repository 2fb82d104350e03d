//! Line-delimited transports for the MCP server.
//!
//! Both stdio and TCP carry the same framing:
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//!
//! On stdio, stderr is reserved for logging.

use std::io;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout,
};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::mcp::protocol::Reply;

/// Reading half of a transport.
///
/// [`LineReader::next_line`] is cancel-safe, so it can sit in a `select!`
/// next to a shutdown signal.
pub struct LineReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wraps a raw reader.
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }

    /// Reads the next message line.
    ///
    /// Returns `None` at end of input. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the line is not UTF-8.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            match self.lines.next_line().await? {
                None => return Ok(None),
                Some(line) => {
                    let line = line.trim_end_matches('\r');
                    if !line.trim().is_empty() {
                        return Ok(Some(line.to_string()));
                    }
                }
            }
        }
    }
}

/// Writing half of a transport.
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    /// Wraps a raw writer.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one reply followed by a newline, then flushes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation or writing fails.
    pub async fn write_reply(&mut self, reply: &Reply) -> io::Result<()> {
        let line = reply
            .to_line()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        debug_assert!(
            !line.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await
    }
}

/// Transport over the process's stdin and stdout.
#[must_use]
pub fn stdio() -> (LineReader<Stdin>, LineWriter<Stdout>) {
    (
        LineReader::new(tokio::io::stdin()),
        LineWriter::new(tokio::io::stdout()),
    )
}

/// Transport over an accepted TCP connection.
#[must_use]
pub fn tcp(stream: TcpStream) -> (LineReader<OwnedReadHalf>, LineWriter<OwnedWriteHalf>) {
    let (read, write) = stream.into_split();
    (LineReader::new(read), LineWriter::new(write))
}
