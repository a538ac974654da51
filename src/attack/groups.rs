use select::document::Document;
use serde::Serialize;

use crate::{config::Config, error, is_group_id, WebFetch};

use super::{scrape_tables, Row, Table};

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub url: String,
    pub assoc_groups: Option<Vec<String>>,
    pub description: String,
}

impl Group {
    fn from_row(row: Row, config: &Config) -> Self {
        let mut group = Self::default();

        if let Some(id) = row.get_cell(0) {
            group.id = id.link_or_text().to_uppercase();
            group.url = id
                .links
                .first()
                .map(|link| resolve_url(&config.base_url, &link.href))
                .unwrap_or_else(|| config.group_url(&group.id));
        }

        if let Some(name) = row.get_cell(1) {
            group.name = name.link_or_text().to_string();
        }

        if let Some(assoc_groups) = row.get_col(2) {
            if !assoc_groups.is_empty() {
                group.assoc_groups = Some(
                    assoc_groups
                        .split(",")
                        .map(|assoc| assoc.trim().to_string())
                        .filter(|assoc| !assoc.is_empty())
                        .collect(),
                );
            }
        }

        if let Some(desc) = row.get_col(3) {
            group.description = crate::remove_ext_link_ref(desc);
        }

        return group;
    }
}

fn resolve_url(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    let mut url = format!(
        "{}{}",
        base_url.trim_end_matches('/'),
        if href.starts_with('/') {
            href.to_string()
        } else {
            format!("/{}", href)
        }
    );

    if !url.ends_with('/') {
        url.push('/');
    }

    return url;
}

impl From<&Group> for comfy_table::Row {
    fn from(group: &Group) -> Self {
        let mut row = comfy_table::Row::new();
        row.add_cell(comfy_table::Cell::new(&group.id))
            .add_cell(comfy_table::Cell::new(&group.name))
            .add_cell(comfy_table::Cell::new(
                group
                    .assoc_groups
                    .as_ref()
                    .map(|assoc| assoc.join(", "))
                    .unwrap_or_default(),
            ))
            .add_cell(comfy_table::Cell::new(&group.url));

        return row;
    }
}

#[derive(Debug, Default, Serialize)]
pub struct GroupsTable(pub Vec<Group>);

impl GroupsTable {
    pub fn is_empty(&self) -> bool {
        return self.0.is_empty();
    }

    pub fn len(&self) -> usize {
        return self.0.len();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Group> {
        return self.0.iter();
    }

    pub fn get(&self, group_id: &str) -> Option<&Group> {
        return self
            .0
            .iter()
            .find(|group| group.id.eq_ignore_ascii_case(group_id));
    }

    fn from_table(table: Table, config: &Config) -> Self {
        return Self(
            table
                .into_iter()
                .map(|row| Group::from_row(row, config))
                .filter(|group| {
                    if is_group_id(&group.id) {
                        true
                    } else {
                        log::warn!("Ignoring listing row with unexpected ID '{}'", group.id);
                        false
                    }
                })
                .collect(),
        );
    }

    /// Fetches the group listing. The first table on the page holds the groups.
    pub fn fetch_groups(req_client: &impl WebFetch, config: &Config) -> Result<Self, error::Error> {
        let url = config.groups_url();
        let fetched_response = req_client.fetch(&url)?;
        let document = Document::from(fetched_response.as_str());

        return match scrape_tables(&document).into_iter().next() {
            Some(table) => Ok(Self::from_table(table, config)),
            None => Err(error::Error::MissingTable(url)),
        };
    }
}

impl IntoIterator for GroupsTable {
    type Item = Group;
    type IntoIter = std::vec::IntoIter<Group>;

    fn into_iter(self) -> Self::IntoIter {
        return self.0.into_iter();
    }
}

impl From<&GroupsTable> for comfy_table::Table {
    fn from(groups: &GroupsTable) -> Self {
        let mut table = comfy_table::Table::new();
        table
            .set_header(vec!["ID", "Name", "Associated Groups", "URL"])
            .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);

        for group in groups.iter() {
            table.add_row(comfy_table::Row::from(group));
        }

        return table;
    }
}
