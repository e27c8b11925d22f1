mod backup;
mod calc;
mod db;
mod ipc;
mod store;

use serde_json::json;
use std::io::{self, BufRead, Write};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    // stdout carries the IPC channel; diagnostics go to stderr only.
    let filter = EnvFilter::try_from_env("REGISTRARD_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_filter(filter),
        )
        .init();
}

fn main() {
    init_tracing();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "registrard started");

    let mut state = ipc::AppState::default();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed; shutting down");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request line");
                // Without a parsed id the reply cannot be correlated.
                json!({
                    "id": null,
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                })
            }
        };
        let text = serde_json::to_string(&resp)
            .unwrap_or_else(|_| "{\"ok\":false}".to_string());
        if writeln!(stdout, "{}", text).and_then(|_| stdout.flush()).is_err() {
            tracing::error!("stdout closed; shutting down");
            break;
        }
    }
    tracing::info!("registrard stopped");
}
