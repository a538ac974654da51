use mitre_groups::commands;
use structopt::StructOpt;

fn main() -> Result<(), mitre_groups::error::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let arguments: commands::Command = StructOpt::from_args();
    let config = arguments.load_config()?;
    arguments.handle(mitre_groups::HttpReqwest::new(&config)?, &config)?;

    Ok(())
}
