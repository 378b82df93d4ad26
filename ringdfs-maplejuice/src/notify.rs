use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::task::TaskPhase;
use crate::JobError;

/// The line reported to the client once a job is over.
pub fn completion_message(phase: TaskPhase, result: &Result<(), JobError>) -> String {
    match result {
        Ok(()) => format!("[{phase} Task] Finished!"),
        Err(e) => format!("[{phase} Task] Failed: {e}"),
    }
}

/// Writes the message as a single line to the client listening on the address.
pub async fn notify_client(addr: &str, message: &str, timeout: Duration) -> io::Result<()> {
    let connect = tokio::time::timeout(timeout, TcpStream::connect(addr)).await;
    let mut stream = connect.map_err(|_| {
        io::Error::new(io::ErrorKind::TimedOut, format!("Connecting to {addr} timed out"))
    })??;

    stream.write_all(format!("{message}\n").as_bytes()).await?;
    stream.shutdown().await
}

/// Waits for a job to report its completion on the listener.
///
/// Returns the reported line without its line break.
pub async fn wait_for_completion(listener: &TcpListener) -> io::Result<String> {
    let (stream, _) = listener.accept().await?;
    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line).await?;
    Ok(line.trim_end().to_string())
}
