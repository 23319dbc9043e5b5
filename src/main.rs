mod api;
mod config;
mod connectivity;
mod db;
mod device;
mod error;
mod ipc;
mod logging;
mod model;
mod notices;
mod permissions;
mod platform;
mod qr;
mod scan;
mod store;
mod sync;
#[cfg(test)]
mod testing;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::Config;

async fn write_line(
    stdout: &mut tokio::io::Stdout,
    value: &serde_json::Value,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string());
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::global().clone();
    logging::init(&config.log_filter);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        api = %config.api_base_url,
        "attendanced starting"
    );

    let mut state = ipc::AppState::new(config)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(v)) => v,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                if write_line(&mut stdout, &ipc::bad_json(e.to_string())).await.is_err() {
                    break;
                }
                continue;
            }
        };

        tracing::debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req).await;
        if write_line(&mut stdout, &resp).await.is_err() {
            break;
        }
    }

    state.core = None;
    tracing::info!("stdin closed, shutting down");
    Ok(())
}
