//! Line-oriented user loop.
//!
//! One request is answered before the next line is read. `exit` / `quit`
//! (any case) or end of input stops the loop without consulting the oracle.

use std::time::Instant;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::agent_core::DispatchOutcome;

use super::RoutingHost;

pub const PROMPT: &str = ">> ";

/// True for the commands that end the session.
pub fn is_exit_command(input: &str) -> bool {
    let input = input.trim();
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

/// Read requests from `input` and write answers to `output` until exit.
///
/// Returns the number of requests handled. Only I/O errors on the streams
/// end the loop early; a failed request is reported and the loop goes on.
pub async fn run<R, W>(host: &mut RoutingHost, input: R, mut output: W) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut handled = 0;

    tracing::info!("routing host ready, type 'exit' to quit");

    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            tracing::info!("input closed");
            break;
        };
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        if is_exit_command(request) {
            tracing::info!("exit requested");
            break;
        }

        let start = Instant::now();
        tracing::info!(input = %request, "processing user input");
        let outcome = host.handle_request(request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &outcome {
            DispatchOutcome::Answered { steps_used, .. } => {
                tracing::info!(steps_used, elapsed_ms, "request answered");
            }
            DispatchOutcome::BudgetExhausted { steps_used, .. } => {
                tracing::warn!(steps_used, elapsed_ms, "request ended on step budget");
            }
            DispatchOutcome::Failed { reason } => {
                tracing::error!(reason = %reason, elapsed_ms, "request failed");
            }
        }

        output.write_all(outcome.text().as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
        handled += 1;
    }

    Ok(handled)
}
