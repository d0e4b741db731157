// SPDX-License-Identifier: MIT

//! Tool-protocol server loop: line-delimited JSON over a byte stream pair
//! (standard streams in production).
//!
//! Requests are handled concurrently — the facade is reentrant — and
//! responses are funneled through a single writer task. Responses carry
//! the request id, so ordering across requests is not part of the
//! contract.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fm_adapters::ContainerRuntime;
use fm_core::Clock;
use fm_wire::{decode_request, encode_response, Response, WireError};

use crate::facade::Facade;

/// Serve until the reader reaches EOF or `shutdown` fires. In-flight
/// requests drain before the writer closes.
pub async fn serve<R, C, I, O>(
    facade: Arc<Facade<R, C>>,
    reader: I,
    writer: O,
    shutdown: CancellationToken,
) where
    R: ContainerRuntime,
    C: Clock,
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin + Send + 'static,
{
    let (resp_tx, mut resp_rx) = mpsc::channel::<Response>(64);

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(response) = resp_rx.recv().await {
            let mut line = encode_response(&response);
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = writer.flush().await;
        }
    });

    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.cancelled() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            // EOF or a broken pipe ends the session.
            Ok(None) | Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match decode_request(&line) {
            Ok(request) => request,
            Err(e) => {
                let _ = resp_tx
                    .send(Response::failure(
                        serde_json::Value::Null,
                        WireError::invalid_input(e.to_string()),
                    ))
                    .await;
                continue;
            }
        };

        let facade = Arc::clone(&facade);
        let resp_tx = resp_tx.clone();
        tokio::spawn(async move {
            let response = facade.handle(request).await;
            let _ = resp_tx.send(response).await;
        });
    }

    // Drop our sender so the writer drains in-flight responses and exits.
    drop(resp_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
