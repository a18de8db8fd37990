use std::time::Duration;

use bytes::Bytes;
use courier::http::HttpRequestBuilder;
use courier::transport::default_transport;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches every URL given on the command line concurrently and reports
/// status and size for each.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        anyhow::bail!("usage: courier <url>...");
    }

    let transport = default_transport()?;
    let mut pending = Vec::new();
    for url in &urls {
        let request = HttpRequestBuilder::new("GET", url.as_str()).build()?;
        let future = transport.issue_request(
            &request,
            Bytes::new(),
            Some(REQUEST_TIMEOUT),
            Some(CONNECT_TIMEOUT),
        );
        pending.push((url, future));
    }

    let mut failures = 0;
    for (url, future) in pending {
        match future.await {
            Ok(response) => {
                tracing::info!(
                    url = %url,
                    status = response.status_code,
                    bytes = response.payload.len(),
                    "Fetched"
                );
            }
            Err(e) => {
                failures += 1;
                tracing::error!(url = %url, error = %e, "Fetch failed");
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} requests failed", failures, urls.len());
    }
    Ok(())
}
