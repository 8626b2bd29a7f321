//! One TCP client session.
//!
//! The loop ends on peer close, on a read error or when shutdown is
//! signalled. Nothing is retried.

use super::{shutdown_requested, LineHandler};
use crate::core::{Result, TallyError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Rejection label for lines over the length limit
pub const LINE_TOO_LONG: &str = "line_too_long";

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line,
    TooLong,
    Eof,
}

pub(crate) struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<LineHandler>,
    max_line_bytes: usize,
}

impl Session {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr, handler: Arc<LineHandler>, max_line_bytes: usize) -> Self {
        Self {
            stream,
            peer,
            handler,
            max_line_bytes,
        }
    }

    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let Self {
            stream,
            peer,
            handler,
            max_line_bytes,
        } = self;

        let mut reader = BufReader::new(stream);
        let mut line = Vec::with_capacity(256);

        loop {
            line.clear();

            let read = tokio::select! {
                read = read_line(&mut reader, &mut line, max_line_bytes) => read,
                () = shutdown_requested(&mut shutdown) => {
                    tracing::debug!(peer = %peer, "Session closed by shutdown");
                    return Ok(());
                }
            };

            match read.map_err(|e| TallyError::connection(format!("read from {peer} failed: {e}")))? {
                LineRead::Line => {
                    handler.handle(&line, peer);
                },
                LineRead::TooLong => {
                    handler.reject(LINE_TOO_LONG, peer);
                },
                LineRead::Eof => {
                    tracing::debug!(peer = %peer, "Peer closed connection");
                    return Ok(());
                },
            }
        }
    }
}

/// Read one `\n`-terminated line of at most `limit` bytes into `line`.
///
/// A final line without terminator still counts as a line. Overlong lines
/// are consumed up to their terminator and reported as `TooLong`.
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>, limit: usize) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let budget = limit as u64 + 1;
    let read = (&mut *reader).take(budget).read_until(b'\n', line).await?;

    if read == 0 {
        return Ok(LineRead::Eof);
    }

    if line.last() == Some(&b'\n') || read < limit + 1 {
        return Ok(LineRead::Line);
    }

    skip_rest_of_line(reader).await?;
    Ok(LineRead::TooLong)
}

async fn skip_rest_of_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(());
        }

        let newline = buf.iter().position(|b| *b == b'\n');
        let available = buf.len();
        match newline {
            Some(index) => {
                reader.consume(index + 1);
                return Ok(());
            },
            None => reader.consume(available),
        }
    }
}
