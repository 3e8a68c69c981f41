use anyhow::{bail, Context, Result};
use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

const STARTUP_DEADLINE: Duration = Duration::from_secs(20);

/// Wait for the freshly launched browser to announce its DevTools endpoint
/// on stderr and return the websocket URL.
pub async fn extract_ws_url(child: &mut Child) -> Result<String> {
    let stderr = child
        .stderr
        .take()
        .context("launched browser has no stderr handle")?;

    let scan = async {
        let mut lines = BufReader::new(stderr).lines();
        let mut preview = String::new();
        while let Some(line) = lines.next().await {
            let line = line?;
            if let Some(url) = devtools_url_in(&line) {
                return Ok(url.to_owned());
            }
            if preview.len() < 512 {
                preview.push_str(&line);
                preview.push('\n');
            }
        }
        bail!("browser exited before announcing a DevTools endpoint; stderr began:\n{preview}");
    };

    match timeout(STARTUP_DEADLINE, scan).await {
        Ok(result) => result,
        Err(_) => bail!("timed out waiting for the DevTools websocket URL"),
    }
}

/// Chromium prints a line of the form
/// `DevTools listening on ws://127.0.0.1:9222/devtools/browser/<id>`.
fn devtools_url_in(line: &str) -> Option<&str> {
    let start = line.find("ws://").or_else(|| line.find("wss://"))?;
    let url = line[start..].trim_end();
    if url.contains("/devtools/browser/") {
        Some(url)
    } else {
        None
    }
}
