use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, REFERER, USER_AGENT};

const REQUEST_TIMEOUT_SECS: u64 = 20;

static CLIENT: OnceCell<Client> = OnceCell::new();

pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build http client")
    })
}

/// Browser-looking headers; some stat sites turn away default clients.
#[derive(Debug, Clone, Copy)]
pub struct RequestHeaders<'a> {
    pub user_agent: &'a str,
    pub referer: &'a str,
}

pub fn fetch_text(client: &Client, url: &str, headers: RequestHeaders<'_>) -> Result<String> {
    let resp = client
        .get(url)
        .header(USER_AGENT, headers.user_agent)
        .header(REFERER, headers.referer)
        .header(ACCEPT, "text/html,application/json;q=0.9,*/*;q=0.8")
        .send()
        .with_context(|| format!("request failed: {url}"))?;
    let status = resp.status();
    let body = resp.text().context("failed reading body")?;
    if !status.is_success() {
        return Err(anyhow!("http {status} for {url}"));
    }
    Ok(body)
}
