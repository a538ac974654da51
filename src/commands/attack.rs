use std::{fmt::Display, path::PathBuf, str::FromStr};

use structopt::StructOpt;

use crate::{
    attack::{
        groups::GroupsTable,
        techniques::{self, Domain},
    },
    config::Config,
    export, is_group_id, WebFetch,
};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum Output {
    JSON,
    CSV,
    #[default]
    STDOUT,
}

impl FromStr for Output {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Output::JSON),
            "csv" => Ok(Output::CSV),
            "stdout" => Ok(Output::STDOUT),
            _ => Err(crate::error::Error::InvalidValue(format!(
                "output type {} is not valid",
                s
            ))),
        }
    }
}

impl Display for Output {
    fn fmt(&self, std_fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            std_fmt,
            "{}",
            match self {
                Output::STDOUT => "stdout",
                Output::JSON => "json",
                Output::CSV => "csv",
            }
        )
    }
}

#[derive(StructOpt)]
#[structopt(no_version)]
pub enum AttackCommand {
    /// List the groups tracked by Mitre ATT&CK
    Groups {
        /// Output command result to stdout, as JSON or to a CSV file
        #[structopt(long, default_value)]
        output: Output,

        /// Destination of the CSV output
        #[structopt(long, parse(from_os_str), default_value = "mitre_attack_groups.csv")]
        file: PathBuf,
    },
    /// Show the techniques used by a single group
    Group {
        /// Group ID (e.g. G0016)
        id: String,

        /// Only keep techniques of these domains (enterprise, mobile, ics)
        #[structopt(long)]
        domain: Vec<Domain>,

        /// Output command result to stdout, as JSON or as CSV
        #[structopt(long, default_value)]
        output: Output,
    },
    /// Export the techniques used by every group to a CSV file
    Export {
        /// Destination CSV file (defaults to the configured output)
        #[structopt(long, parse(from_os_str))]
        file: Option<PathBuf>,

        /// Only export these groups
        #[structopt(long)]
        group: Vec<String>,

        /// Only export techniques of these domains (enterprise, mobile, ics)
        #[structopt(long)]
        domain: Vec<Domain>,
    },
}

impl AttackCommand {
    pub(super) fn handle(
        self,
        req_client: impl WebFetch,
        config: &Config,
    ) -> Result<(), crate::error::Error> {
        match self {
            AttackCommand::Groups { output, ref file } => {
                self.handle_groups(output, file, &req_client, config)?
            }
            AttackCommand::Group {
                ref id,
                ref domain,
                output,
            } => self.handle_group(id, domain, output, &req_client, config)?,
            AttackCommand::Export {
                ref file,
                ref group,
                ref domain,
            } => self.handle_export(file.as_ref(), group, domain, &req_client, config)?,
        };

        return Ok(());
    }

    fn handle_groups(
        &self,
        output: Output,
        file: &PathBuf,
        req_client: &impl WebFetch,
        config: &Config,
    ) -> Result<(), crate::error::Error> {
        let groups_table = GroupsTable::fetch_groups(req_client, config)?;

        match output {
            Output::STDOUT => self.stdout_output(comfy_table::Table::from(&groups_table)),
            Output::JSON => self.json_output(&groups_table)?,
            Output::CSV => {
                export::write_csv_file(file, |writer| export::write_groups(writer, &groups_table))?;
                log::info!(
                    "Saved {} groups to '{}'",
                    groups_table.len(),
                    file.display()
                );
            }
        };

        Ok(())
    }

    fn handle_group(
        &self,
        id: &str,
        domains: &[Domain],
        output: Output,
        req_client: &impl WebFetch,
        config: &Config,
    ) -> Result<(), crate::error::Error> {
        if !is_group_id(&id.to_uppercase()) {
            return Err(crate::error::Error::InvalidValue(format!(
                "{} is not an ATT&CK group ID",
                id
            )));
        }

        let (group, mut group_techniques) = techniques::fetch_group_page(id, req_client, config)?;
        group_techniques.retain_domains(domains);

        match output {
            Output::STDOUT => {
                println!("[*] Group ID: {}", group.id);
                println!("[*] Group name: {}", group.name);
                println!("[*] Group URL: {}", group.url);

                if group_techniques.is_empty() {
                    println!("[!] No techniques associated");
                } else {
                    self.stdout_output(comfy_table::Table::from(&group_techniques));
                }
            }
            Output::JSON => self.json_output(group_techniques.as_slice())?,
            Output::CSV => {
                let _stdout = export::write_techniques(std::io::stdout().lock(), &group_techniques)?;
            }
        };

        Ok(())
    }

    fn handle_export(
        &self,
        file: Option<&PathBuf>,
        groups: &[String],
        domains: &[Domain],
        req_client: &impl WebFetch,
        config: &Config,
    ) -> Result<(), crate::error::Error> {
        let options = export::ExportOptions {
            groups: groups.to_vec(),
            domains: domains.to_vec(),
            delay: config.delay(),
        };
        let path = file.unwrap_or(&config.output);

        let summary = export::export_techniques(req_client, config, &options, path)?;

        if !summary.groups_skipped.is_empty() {
            log::warn!(
                "{} groups skipped: {}",
                summary.groups_skipped.len(),
                summary.groups_skipped.join(", ")
            );
        }

        Ok(())
    }

    fn stdout_output(&self, table: comfy_table::Table) {
        println!("{}", table);
    }

    fn json_output(&self, entity: impl serde::Serialize) -> Result<(), crate::error::Error> {
        println!("{}", serde_json::to_string_pretty(&entity)?);

        Ok(())
    }
}
