#[macro_use]
extern crate lazy_static;
pub mod attack;
pub mod commands;
pub mod config;
pub mod error;
pub mod export;

use std::time::Duration;

lazy_static! {
    static ref RE: regex::Regex = regex::Regex::new(r"\[[0-9]+\]").unwrap();
    static ref GROUP_ID_RE: regex::Regex = regex::Regex::new(r"^G[0-9]{4}$").unwrap();
    static ref TECHNIQUE_ID_RE: regex::Regex =
        regex::Regex::new(r"^T[0-9]{4}(\.[0-9]{3})?$").unwrap();
}

fn remove_ext_link_ref(text: &str) -> String {
    return RE
        .replace_all(text, "")
        .split_whitespace()
        .filter(|text| !text.is_empty())
        .collect::<Vec<&str>>()
        .join(" ");
}

fn collapse_whitespace(text: &str) -> String {
    return text.split_whitespace().collect::<Vec<&str>>().join(" ");
}

pub fn is_group_id(id: &str) -> bool {
    return GROUP_ID_RE.is_match(id);
}

pub fn is_technique_id(id: &str) -> bool {
    return TECHNIQUE_ID_RE.is_match(id);
}

pub trait WebFetch {
    fn fetch(&self, url: &str) -> Result<String, error::Error>;
}

pub struct HttpReqwest {
    client: reqwest::blocking::Client,
    retries: u32,
    retry_pause: Duration,
}

/// Transport errors (no status) and 5xx answers are worth another try,
/// 4xx answers will not change.
fn is_retryable(status: Option<reqwest::StatusCode>) -> bool {
    return status.map_or(true, |status| status.is_server_error());
}

impl WebFetch for HttpReqwest {
    fn fetch(&self, url: &str) -> Result<String, error::Error> {
        let mut attempt = 0;

        loop {
            log::debug!("GET {} (attempt {})", url, attempt + 1);

            let response = self
                .client
                .get(url)
                .send()
                .and_then(|resp| resp.error_for_status())
                .and_then(|resp| resp.text());

            match response {
                Ok(text) => return Ok(text),
                Err(err) => {
                    if !is_retryable(err.status()) || attempt >= self.retries {
                        return Err(error::Error::from(err));
                    }

                    log::warn!("Request to {} failed ({}), retrying", url, err);
                    attempt += 1;
                    std::thread::sleep(self.retry_pause);
                }
            }
        }
    }
}

impl HttpReqwest {
    pub fn new(config: &config::Config) -> Result<Self, error::Error> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .build()?;

        return Ok(Self {
            client,
            retries: config.retries,
            retry_pause: config.retry_delay(),
        });
    }
}
