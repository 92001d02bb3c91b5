// One-shot invocation command

use anyhow::{Context, Result};
use coldstart_supervisor::Supervisor;
use tokio::io::AsyncReadExt;

use crate::output::OutputFormat;

/// Run one event through a fresh supervisor, print the response, stop the engine
pub async fn run(supervisor: Supervisor, event: Option<String>, output: OutputFormat) -> Result<()> {
    let raw = match event.as_deref() {
        None => String::new(),
        Some("-") => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read event from stdin")?;
            buf
        }
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read event file {path}"))?,
    };

    let response = supervisor.invoke(super::event_from_text(&raw)).await;
    supervisor.shutdown().await;

    println!("{}", output.render(&response)?);
    Ok(())
}
