use std::path::PathBuf;

use structopt::StructOpt;

use crate::config::Config;

mod attack;

#[derive(StructOpt)]
#[structopt(
    name = "mitre_groups",
    about = "Exports the techniques used by MITRE ATT&CK groups as CSV."
)]
pub struct Command {
    /// Settings file (defaults to ~/.mitre_groups/config.json)
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Times a failed request is retried before the page is skipped
    #[structopt(long)]
    retries: Option<u32>,

    /// Pause between two requests, in milliseconds
    #[structopt(long)]
    delay_ms: Option<u64>,

    /// ATT&CK website root
    #[structopt(long)]
    base_url: Option<String>,

    #[structopt(subcommand)]
    cmd: attack::AttackCommand,
}

impl Command {
    /// Settings file values, overridden by the flags given on the command line.
    pub fn load_config(&self) -> Result<Config, crate::error::Error> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(retries) = self.retries {
            config.retries = retries;
        }

        if let Some(delay_ms) = self.delay_ms {
            config.delay_ms = delay_ms;
        }

        if let Some(base_url) = &self.base_url {
            config.set_base_url(base_url);
        }

        return Ok(config);
    }

    pub fn handle(
        self,
        req_client: impl crate::WebFetch,
        config: &Config,
    ) -> Result<(), crate::error::Error> {
        self.cmd.handle(req_client, config)?;

        return Ok(());
    }
}
