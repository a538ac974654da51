use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use crate::{
    attack::{
        groups::{Group, GroupsTable},
        techniques::{Domain, TechniqueUses},
    },
    config::Config,
    error, WebFetch,
};

pub const TECHNIQUE_HEADERS: [&'static str; 6] = [
    "group",
    "technique_id",
    "technique_name",
    "parent_id",
    "domain",
    "usage",
];

pub const GROUP_HEADERS: [&'static str; 5] =
    ["id", "name", "url", "associated_groups", "description"];

fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains(|c: char| c == ',' || c == '"' || c == '\n' || c == '\r') {
        return Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")));
    }

    return Cow::Borrowed(field);
}

/// Minimal CSV record writer: quotes a field only when it has to.
pub struct CsvWriter<W: Write> {
    inner: W,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(inner: W) -> Self {
        return Self { inner };
    }

    pub fn write_record<I, T>(&mut self, record: I) -> Result<(), error::Error>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let line = record
            .into_iter()
            .map(|field| escape_field(field.as_ref()).into_owned())
            .collect::<Vec<String>>()
            .join(",");

        self.inner.write_all(line.as_bytes())?;
        self.inner.write_all(b"\n")?;

        return Ok(());
    }

    pub fn into_inner(mut self) -> Result<W, error::Error> {
        self.inner.flush()?;

        return Ok(self.inner);
    }
}

pub fn write_techniques<W: Write>(writer: W, techniques: &TechniqueUses) -> Result<W, error::Error> {
    let mut csv = CsvWriter::new(writer);
    csv.write_record(TECHNIQUE_HEADERS)?;

    for technique in techniques.iter() {
        csv.write_record([
            technique.group.as_str(),
            technique.technique_id.as_str(),
            technique.technique_name.as_str(),
            technique.parent_id.as_deref().unwrap_or_default(),
            technique.domain.to_string().as_str(),
            technique.usage.as_str(),
        ])?;
    }

    return csv.into_inner();
}

pub fn write_groups<W: Write>(writer: W, groups: &GroupsTable) -> Result<W, error::Error> {
    let mut csv = CsvWriter::new(writer);
    csv.write_record(GROUP_HEADERS)?;

    for group in groups.iter() {
        csv.write_record([
            group.id.as_str(),
            group.name.as_str(),
            group.url.as_str(),
            group
                .assoc_groups
                .as_ref()
                .map(|assoc| assoc.join(", "))
                .unwrap_or_default()
                .as_str(),
            group.description.as_str(),
        ])?;
    }

    return csv.into_inner();
}

pub fn write_csv_file<F>(path: &Path, write: F) -> Result<(), error::Error>
where
    F: FnOnce(BufWriter<File>) -> Result<BufWriter<File>, error::Error>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            log::info!("Creating '{}' directory", parent.display());
            std::fs::create_dir_all(parent)?;
        }
    }

    write(BufWriter::new(File::create(path)?))?;

    return Ok(());
}

#[derive(Debug, Default, Clone)]
pub struct ExportOptions {
    /// Group IDs to export. Empty means every listed group.
    pub groups: Vec<String>,
    /// Domains to export. Empty means every domain.
    pub domains: Vec<Domain>,
    /// Pause before each group page request.
    pub delay: Duration,
}

#[derive(Debug, Default, PartialEq)]
pub struct ExportSummary {
    pub groups_processed: usize,
    pub groups_skipped: Vec<String>,
    pub rows: usize,
}

fn select_groups(groups: GroupsTable, wanted: &[String]) -> Vec<Group> {
    if wanted.is_empty() {
        return groups.into_iter().collect();
    }

    for group_id in wanted {
        if groups.get(group_id).is_none() {
            log::warn!("Group {} is not part of the ATT&CK listing", group_id);
        }
    }

    return groups
        .into_iter()
        .filter(|group| {
            wanted
                .iter()
                .any(|group_id| group.id.eq_ignore_ascii_case(group_id))
        })
        .collect();
}

/// Visits every selected group page in listing order and flattens their
/// technique tables. Pages that fail to download or parse are skipped.
pub fn collect_techniques(
    req_client: &impl WebFetch,
    groups: GroupsTable,
    options: &ExportOptions,
) -> (TechniqueUses, ExportSummary) {
    let mut techniques = TechniqueUses::default();
    let mut summary = ExportSummary::default();

    for group in select_groups(groups, &options.groups).iter() {
        // also spaces the first group page from the listing request
        if !options.delay.is_zero() {
            std::thread::sleep(options.delay);
        }

        log::info!("Processing group: {} ({})", group.id, group.name);

        match TechniqueUses::fetch_group_techniques(group, req_client) {
            Ok(mut group_techniques) => {
                group_techniques.retain_domains(&options.domains);
                let added = techniques.extend(group_techniques);

                log::debug!("{}: {} technique rows", group.id, added);
                summary.groups_processed += 1;
            }
            Err(err) => {
                log::warn!("Skipping group {}: {}", group.id, err);
                summary.groups_skipped.push(group.id.clone());
            }
        }
    }

    summary.rows = techniques.len();

    return (techniques, summary);
}

/// Full pipeline: listing, group pages, CSV file.
pub fn export_techniques(
    req_client: &impl WebFetch,
    config: &Config,
    options: &ExportOptions,
    path: &Path,
) -> Result<ExportSummary, error::Error> {
    let groups = GroupsTable::fetch_groups(req_client, config)?;
    log::info!("Found {} groups", groups.len());

    let (techniques, summary) = collect_techniques(req_client, groups, options);

    if techniques.is_empty() {
        log::warn!("No techniques data was collected");
    }

    write_csv_file(path, |writer| write_techniques(writer, &techniques))?;
    log::info!(
        "Saved {} rows from {} groups to '{}'",
        summary.rows,
        summary.groups_processed,
        path.display()
    );

    return Ok(summary);
}
