use std::collections::HashSet;
use std::fmt::Display;
use std::str::FromStr;

use select::document::Document;
use serde::Serialize;

use crate::{config::Config, error, is_technique_id, remove_ext_link_ref, WebFetch};

use super::{groups::Group, scrape_entity_name, scrape_table_by_class, Row, Table};

const TECHNIQUES_USED_CLASS: &'static str = "techniques-used";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Domain {
    #[serde(rename = "Enterprise")]
    ENTERPRISE,
    #[serde(rename = "Mobile")]
    MOBILE,
    #[serde(rename = "ICS")]
    ICS,
}

impl FromStr for Domain {
    type Err = error::Error;

    fn from_str(dom_str: &str) -> Result<Self, Self::Err> {
        match dom_str.trim().to_lowercase().as_str() {
            "enterprise" => Ok(Self::ENTERPRISE),
            "mobile" => Ok(Self::MOBILE),
            "ics" => Ok(Self::ICS),
            _ => Err(error::Error::InvalidValue(format!(
                "{} is not a valid ATT&CK domain",
                dom_str
            ))),
        }
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::ENTERPRISE => "Enterprise",
                Self::MOBILE => "Mobile",
                Self::ICS => "ICS",
            }
        )
    }
}

impl Domain {
    fn from_row_classes(row: &Row) -> Option<Self> {
        return row
            .classes
            .iter()
            .find_map(|class| Domain::from_str(class).ok());
    }
}

/// A single (group, technique, domain) mapping, one line of the export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechniqueUse {
    pub group: String,
    pub technique_id: String,
    pub technique_name: String,
    pub parent_id: Option<String>,
    pub domain: Domain,
    pub usage: String,
}

impl TechniqueUse {
    pub fn is_sub_technique(&self) -> bool {
        return self.parent_id.is_some();
    }

    fn key(&self) -> (String, String, Domain) {
        return (self.group.clone(), self.technique_id.clone(), self.domain);
    }
}

impl From<&TechniqueUse> for comfy_table::Row {
    fn from(technique: &TechniqueUse) -> Self {
        let mut row = comfy_table::Row::new();
        row.add_cell(comfy_table::Cell::new(&technique.domain))
            .add_cell(comfy_table::Cell::new(&technique.technique_id))
            .add_cell(comfy_table::Cell::new(&technique.technique_name))
            .add_cell(comfy_table::Cell::new(&technique.usage));

        return row;
    }
}

/// Ordered technique rows, unique by (group, technique ID, domain).
#[derive(Debug, Default)]
pub struct TechniqueUses {
    rows: Vec<TechniqueUse>,
    keys: HashSet<(String, String, Domain)>,
}

impl TechniqueUses {
    /// Appends `technique` unless its key was already seen. The first
    /// occurrence wins.
    pub fn push(&mut self, technique: TechniqueUse) -> bool {
        if !self.keys.insert(technique.key()) {
            log::debug!(
                "Dropping duplicated row {} {} ({})",
                technique.group,
                technique.technique_id,
                technique.domain
            );
            return false;
        }

        self.rows.push(technique);

        return true;
    }

    pub fn extend(&mut self, techniques: TechniqueUses) -> usize {
        return techniques
            .into_iter()
            .map(|technique| self.push(technique))
            .filter(|pushed| *pushed)
            .count();
    }

    pub fn retain_domains(&mut self, domains: &[Domain]) {
        if domains.is_empty() {
            return;
        }

        self.rows
            .retain(|technique| domains.contains(&technique.domain));
        self.keys = self.rows.iter().map(TechniqueUse::key).collect();
    }

    pub fn is_empty(&self) -> bool {
        return self.rows.is_empty();
    }

    pub fn len(&self) -> usize {
        return self.rows.len();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TechniqueUse> {
        return self.rows.iter();
    }

    pub fn as_slice(&self) -> &[TechniqueUse] {
        return &self.rows;
    }
}

impl IntoIterator for TechniqueUses {
    type Item = TechniqueUse;
    type IntoIter = std::vec::IntoIter<TechniqueUse>;

    fn into_iter(self) -> Self::IntoIter {
        return self.rows.into_iter();
    }
}

impl From<&TechniqueUses> for comfy_table::Table {
    fn from(techniques: &TechniqueUses) -> Self {
        let mut table = comfy_table::Table::new();
        table
            .set_header(vec!["Domain", "ID", "Name", "Use"])
            .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);

        for technique in techniques.iter() {
            table.add_row(comfy_table::Row::from(technique));
        }

        return table;
    }
}

#[derive(Debug, PartialEq)]
enum RowKind {
    Technique,
    SubTechnique,
    Continuation,
}

impl RowKind {
    fn classify(row: &Row) -> Option<Self> {
        if row.len() < 2 {
            return None;
        }

        if row.has_class("sub") {
            if row.has_class("noparent") {
                return Some(Self::SubTechnique);
            }

            return Some(Self::Continuation);
        }

        if row.has_class("technique") {
            return Some(Self::Technique);
        }

        // Rows without markup classes are told apart by their shape.
        match row.len() {
            4 => Some(Self::Technique),
            5 if row.get_col(0).map_or(false, |domain| !domain.is_empty()) => {
                Some(Self::SubTechnique)
            }
            5 => Some(Self::Continuation),
            _ => None,
        }
    }
}

/// Walks a `techniques-used` table, carrying the last parent technique
/// across rows so sub-technique rows can be joined to it.
struct TechniqueTableParser<'a> {
    group_id: &'a str,
    last_technique_id: Option<String>,
    last_technique_name: Option<String>,
    last_domain: Option<Domain>,
}

impl<'a> TechniqueTableParser<'a> {
    fn new(group_id: &'a str) -> Self {
        return Self {
            group_id,
            last_technique_id: None,
            last_technique_name: None,
            last_domain: None,
        };
    }

    fn parse(mut self, table: Table) -> TechniqueUses {
        let mut techniques = TechniqueUses::default();

        for row in table {
            if let Some(technique) = self.parse_row(&row) {
                techniques.push(technique);
            }
        }

        return techniques;
    }

    fn parse_row(&mut self, row: &Row) -> Option<TechniqueUse> {
        match RowKind::classify(row)? {
            RowKind::Technique => self.technique_row(row),
            RowKind::SubTechnique => self.sub_technique_row(row),
            RowKind::Continuation => self.continuation_row(row),
        }
    }

    fn resolve_domain(&mut self, row: &Row) -> Domain {
        let domain = row
            .get_col(0)
            .and_then(|domain| Domain::from_str(domain).ok())
            .or_else(|| Domain::from_row_classes(row))
            .or(self.last_domain)
            .unwrap_or(Domain::ENTERPRISE);

        self.last_domain = Some(domain);

        return domain;
    }

    fn forget_parent(&mut self) {
        self.last_technique_id = None;
        self.last_technique_name = None;
    }

    fn usage(row: &Row, inx: usize) -> String {
        return row
            .get_col(inx)
            .map(remove_ext_link_ref)
            .unwrap_or_default();
    }

    fn technique_row(&mut self, row: &Row) -> Option<TechniqueUse> {
        let domain = self.resolve_domain(row);

        let mut technique_id = row
            .get_cell(1)
            .map(|cell| cell.link_or_text().to_uppercase())
            .unwrap_or_default();

        if technique_id.is_empty() {
            technique_id = self.last_technique_id.clone().unwrap_or_default();
        }

        if !is_technique_id(&technique_id) {
            log::warn!(
                "{}: skipping technique row with unexpected ID '{}'",
                self.group_id,
                technique_id
            );
            // sub-technique rows below it belong to the skipped row
            self.forget_parent();
            return None;
        }

        let technique_name = row
            .get_cell(2)
            .map(|cell| cell.link_or_text().to_string())
            .unwrap_or_default();

        self.last_technique_id = Some(technique_id.clone());
        self.last_technique_name = Some(technique_name.clone());

        return Some(TechniqueUse {
            group: self.group_id.to_string(),
            technique_id,
            technique_name,
            parent_id: None,
            domain,
            usage: Self::usage(row, 3),
        });
    }

    fn sub_technique_row(&mut self, row: &Row) -> Option<TechniqueUse> {
        let domain = self.resolve_domain(row);

        let mut parent_id = row
            .get_cell(1)
            .map(|cell| cell.link_or_text().to_uppercase())
            .unwrap_or_default();

        if parent_id.is_empty() {
            parent_id = self.last_technique_id.clone().unwrap_or_default();
        }

        let name_cell = row.get_cell(3).cloned().unwrap_or_default();
        let (parent_name, technique_name) = match name_cell.links.as_slice() {
            [parent, sub, ..] => (
                parent.text.clone(),
                format!("{}: {}", parent.text, sub.text),
            ),
            _ => (
                name_cell
                    .text
                    .split(':')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
                name_cell.text.clone(),
            ),
        };

        let technique_id = join_sub_technique_id(&parent_id, row);

        if !is_technique_id(&parent_id) || !is_technique_id(&technique_id) {
            log::warn!(
                "{}: skipping sub-technique row with unexpected ID '{}'",
                self.group_id,
                technique_id
            );
            self.forget_parent();
            return None;
        }

        self.last_technique_id = Some(parent_id.clone());
        self.last_technique_name = Some(parent_name);

        return Some(TechniqueUse {
            group: self.group_id.to_string(),
            technique_id,
            technique_name,
            parent_id: Some(parent_id),
            domain,
            usage: Self::usage(row, 4),
        });
    }

    fn continuation_row(&mut self, row: &Row) -> Option<TechniqueUse> {
        let parent_id = match &self.last_technique_id {
            Some(parent_id) => parent_id.clone(),
            None => {
                log::warn!(
                    "{}: skipping sub-technique row without a parent technique",
                    self.group_id
                );
                return None;
            }
        };

        let domain = self.resolve_domain(row);
        let technique_id = join_sub_technique_id(&parent_id, row);

        if !is_technique_id(&technique_id) {
            log::warn!(
                "{}: skipping sub-technique row with unexpected ID '{}'",
                self.group_id,
                technique_id
            );
            return None;
        }

        let sub_name = row
            .get_cell(3)
            .map(|cell| cell.link_or_text().to_string())
            .unwrap_or_default();

        let technique_name = match &self.last_technique_name {
            Some(parent_name) if !parent_name.is_empty() => format!("{}: {}", parent_name, sub_name),
            _ => sub_name,
        };

        return Some(TechniqueUse {
            group: self.group_id.to_string(),
            technique_id,
            technique_name,
            parent_id: Some(parent_id),
            domain,
            usage: Self::usage(row, 4),
        });
    }
}

/// Builds `T1234.001` from the parent ID and the `.001` cell. A cell that
/// already holds a full ID is taken as is.
fn join_sub_technique_id(parent_id: &str, row: &Row) -> String {
    let sub_id = row
        .get_cell(2)
        .map(|cell| cell.link_or_text().to_uppercase())
        .unwrap_or_default();

    if sub_id.starts_with('.') {
        return format!("{}{}", parent_id, sub_id);
    }

    return sub_id;
}

impl TechniqueUses {
    pub fn from_document(
        group_id: &str,
        document: &Document,
        url: &str,
    ) -> Result<Self, error::Error> {
        let table = scrape_table_by_class(document, TECHNIQUES_USED_CLASS)
            .ok_or_else(|| error::Error::MissingTable(url.to_string()))?;

        return Ok(TechniqueTableParser::new(group_id).parse(table));
    }

    pub fn fetch_group_techniques(
        group: &Group,
        req_client: &impl WebFetch,
    ) -> Result<Self, error::Error> {
        let fetched_response = req_client.fetch(&group.url)?;
        let document = Document::from(fetched_response.as_str());

        return Self::from_document(&group.id, &document, &group.url);
    }
}

/// Fetches a single group page by ID, without going through the listing.
pub fn fetch_group_page(
    group_id: &str,
    req_client: &impl WebFetch,
    config: &Config,
) -> Result<(Group, TechniqueUses), error::Error> {
    let group_id = group_id.to_uppercase();
    let url = config.group_url(&group_id);
    let fetched_response = req_client.fetch(&url)?;
    let document = Document::from(fetched_response.as_str());

    let techniques = TechniqueUses::from_document(&group_id, &document, &url)?;
    let group = Group {
        name: scrape_entity_name(&document),
        id: group_id,
        url,
        ..Group::default()
    };

    return Ok((group, techniques));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakers::FakeHttpReqwest;

    const TEST_GROUP_ID: &'static str = "G0016";
    const SCRAPED_TECHNIQUE_ROWS: usize = 10;
    const SCRAPED_SUB_TECHNIQUE_ROWS: usize = 5;

    fn apt29_techniques() -> Result<TechniqueUses, error::Error> {
        let document = Document::from(include_str!("html/attck/groups/G0016.html"));

        return TechniqueUses::from_document(TEST_GROUP_ID, &document, "G0016.html");
    }

    fn find<'a>(techniques: &'a TechniqueUses, id: &str, domain: Domain) -> &'a TechniqueUse {
        return techniques
            .iter()
            .find(|technique| technique.technique_id == id && technique.domain == domain)
            .unwrap();
    }

    #[test]
    fn test_parse_group_techniques() -> Result<(), error::Error> {
        let techniques = apt29_techniques()?;

        assert_eq!(techniques.len(), SCRAPED_TECHNIQUE_ROWS);
        assert_eq!(
            techniques
                .iter()
                .filter(|technique| technique.is_sub_technique())
                .count(),
            SCRAPED_SUB_TECHNIQUE_ROWS
        );

        let ids = techniques
            .iter()
            .map(|technique| technique.technique_id.as_str())
            .collect::<Vec<&str>>();
        assert_eq!(
            ids,
            vec![
                "T1087",
                "T1087.002",
                "T1098.002",
                "T1098.005",
                "T1071",
                "T1071.001",
                "T1437",
                "T1437.001",
                "T0817",
                "T1566"
            ]
        );

        Ok(())
    }

    #[test]
    fn test_parent_technique_row() -> Result<(), error::Error> {
        let techniques = apt29_techniques()?;

        assert_eq!(
            find(&techniques, "T1087", Domain::ENTERPRISE),
            &TechniqueUse {
                group: TEST_GROUP_ID.to_string(),
                technique_id: "T1087".to_string(),
                technique_name: "Account Discovery".to_string(),
                parent_id: None,
                domain: Domain::ENTERPRISE,
                usage: "APT29 has obtained a list of users and their roles from an Exchange server using Get-ManagementRoleAssignment.".to_string(),
            }
        );

        Ok(())
    }

    #[test]
    fn test_continuation_row_joins_parent() -> Result<(), error::Error> {
        let techniques = apt29_techniques()?;
        let domain_account = find(&techniques, "T1087.002", Domain::ENTERPRISE);

        assert_eq!(domain_account.parent_id.as_deref(), Some("T1087"));
        assert_eq!(
            domain_account.technique_name,
            "Account Discovery: Domain Account"
        );
        assert_eq!(
            domain_account.usage,
            "APT29 has used PowerShell to discover domain accounts."
        );

        let web_protocols = find(&techniques, "T1071.001", Domain::ENTERPRISE);
        assert_eq!(
            web_protocols.usage,
            "APT29 has used HTTPS for C2 and data exfiltration."
        );

        Ok(())
    }

    #[test]
    fn test_sub_technique_row_with_parent_id() -> Result<(), error::Error> {
        let techniques = apt29_techniques()?;
        let delegate = find(&techniques, "T1098.002", Domain::ENTERPRISE);

        assert_eq!(delegate.parent_id.as_deref(), Some("T1098"));
        assert_eq!(
            delegate.technique_name,
            "Account Manipulation: Additional Email Delegate Permissions"
        );
        assert_eq!(
            delegate.usage,
            "APT29 has used a compromised global administrator account in Azure AD to backdoor a service principal, adding \"Mail.Read\" permissions."
        );

        let registration = find(&techniques, "T1098.005", Domain::ENTERPRISE);
        assert_eq!(registration.parent_id.as_deref(), Some("T1098"));
        assert_eq!(
            registration.technique_name,
            "Account Manipulation: Device Registration"
        );

        Ok(())
    }

    #[test]
    fn test_domains_are_resolved() -> Result<(), error::Error> {
        let techniques = apt29_techniques()?;

        let mobile_web = find(&techniques, "T1437.001", Domain::MOBILE);
        assert_eq!(mobile_web.parent_id.as_deref(), Some("T1437"));

        assert_eq!(find(&techniques, "T0817", Domain::ICS).technique_name, "Drive-by Compromise");
        assert_eq!(find(&techniques, "T1566", Domain::ENTERPRISE).technique_name, "Phishing");

        Ok(())
    }

    #[test]
    fn test_duplicated_rows_keep_first() -> Result<(), error::Error> {
        let techniques = apt29_techniques()?;
        let c2 = techniques
            .iter()
            .filter(|technique| technique.technique_id == "T1071")
            .collect::<Vec<&TechniqueUse>>();

        assert_eq!(c2.len(), 1);
        assert_eq!(c2[0].usage, "APT29 has used HTTP for C2.");

        Ok(())
    }

    #[test]
    fn test_orphan_continuation_row_is_skipped() -> Result<(), error::Error> {
        let document = Document::from(
            r#"<table class="techniques-used"><tbody>
                <tr class="sub technique enterprise"><td></td><td></td><td>.001</td><td>Orphan</td><td>No parent.</td></tr>
                <tr class="technique enterprise"><td>Enterprise</td><td colspan="2">T1059</td><td>Command and Scripting Interpreter</td><td>Used PowerShell.</td></tr>
            </tbody></table>"#,
        );
        let techniques = TechniqueUses::from_document("G0001", &document, "inline")?;

        assert_eq!(techniques.len(), 1);
        assert_eq!(techniques.as_slice()[0].technique_id, "T1059");

        Ok(())
    }

    #[test]
    fn test_skipped_technique_row_drops_its_sub_techniques() -> Result<(), error::Error> {
        let document = Document::from(
            r#"<table class="techniques-used"><tbody>
                <tr class="technique enterprise"><td>Enterprise</td><td colspan="2">T1087</td><td>Account Discovery</td><td>Listed accounts.</td></tr>
                <tr class="technique enterprise"><td>Enterprise</td><td colspan="2">TBD</td><td>Pending</td><td>Not mapped yet.</td></tr>
                <tr class="sub technique enterprise"><td></td><td></td><td>.001</td><td>Child of TBD</td><td>Belongs to the pending row.</td></tr>
            </tbody></table>"#,
        );
        let techniques = TechniqueUses::from_document("G0001", &document, "inline")?;

        assert_eq!(techniques.len(), 1);
        assert_eq!(techniques.as_slice()[0].technique_id, "T1087");
        assert!(techniques
            .iter()
            .all(|technique| technique.technique_id != "T1087.001"));

        Ok(())
    }

    #[test]
    fn test_shape_inference() -> Result<(), error::Error> {
        let document = Document::from(
            r#"<table class="techniques-used"><tbody>
                <tr><td>Mobile</td><td>T1437</td><td>.001</td><td><a href="/techniques/T1437">Application Layer Protocol</a>: <a href="/techniques/T1437/001">Web Protocols</a></td><td>Used HTTPS.</td></tr>
                <tr><td></td><td></td><td>.002</td><td>DNS</td><td>Used DNS tunneling.</td></tr>
                <tr><td></td><td colspan="2"></td><td>Application Layer Protocol</td><td>Used custom protocols.</td></tr>
            </tbody></table>"#,
        );
        let techniques = TechniqueUses::from_document("G0001", &document, "inline")?;

        assert_eq!(techniques.len(), 3);

        let web = find(&techniques, "T1437.001", Domain::MOBILE);
        assert_eq!(web.parent_id, Some("T1437".to_string()));
        assert_eq!(web.technique_name, "Application Layer Protocol: Web Protocols");

        let dns = find(&techniques, "T1437.002", Domain::MOBILE);
        assert_eq!(dns.parent_id, Some("T1437".to_string()));
        assert_eq!(dns.technique_name, "Application Layer Protocol: DNS");

        // empty ID cell reuses the last technique ID
        let parent = find(&techniques, "T1437", Domain::MOBILE);
        assert_eq!(parent.parent_id, None);
        assert_eq!(parent.technique_name, "Application Layer Protocol");
        assert_eq!(parent.usage, "Used custom protocols.");

        Ok(())
    }

    #[test]
    fn test_domain_carried_from_previous_row() -> Result<(), error::Error> {
        let document = Document::from(
            r#"<table class="techniques-used"><tbody>
                <tr class="technique"><td></td><td colspan="2">T1059</td><td>Command and Scripting Interpreter</td><td>Used PowerShell.</td></tr>
                <tr class="technique mobile"><td></td><td colspan="2">T1398</td><td>Boot or Logon Initialization Scripts</td><td>Added boot scripts.</td></tr>
                <tr class="sub technique"><td></td><td></td><td>.001</td><td>Logon Script</td><td>Added a logon script.</td></tr>
            </tbody></table>"#,
        );
        let techniques = TechniqueUses::from_document("G0001", &document, "inline")?;
        let domains = techniques
            .iter()
            .map(|technique| (technique.technique_id.as_str(), technique.domain))
            .collect::<Vec<(&str, Domain)>>();

        assert_eq!(
            domains,
            vec![
                ("T1059", Domain::ENTERPRISE),
                ("T1398", Domain::MOBILE),
                ("T1398.001", Domain::MOBILE),
            ]
        );

        Ok(())
    }

    #[test]
    fn test_retain_domains() -> Result<(), error::Error> {
        let mut techniques = apt29_techniques()?;
        techniques.retain_domains(&[Domain::MOBILE]);

        assert_eq!(techniques.len(), 2);
        assert!(techniques
            .iter()
            .all(|technique| technique.domain == Domain::MOBILE));

        Ok(())
    }

    #[test]
    fn test_page_without_techniques_table() {
        let document = Document::from(include_str!("html/attck/groups/G0018.html"));
        let error = TechniqueUses::from_document("G0018", &document, "G0018.html").unwrap_err();

        assert_eq!(error, error::Error::MissingTable("G0018.html".to_string()));
    }

    #[test]
    fn test_fetch_group_page() -> Result<(), error::Error> {
        let fake_reqwest = FakeHttpReqwest::default().set_route(
            "https://attack.mitre.org/groups/G0016/",
            include_str!("html/attck/groups/G0016.html").to_string(),
        );
        let (group, techniques) = fetch_group_page("g0016", &fake_reqwest, &Config::default())?;

        assert_eq!(group.id, TEST_GROUP_ID);
        assert_eq!(group.name, "APT29");
        assert_eq!(techniques.len(), SCRAPED_TECHNIQUE_ROWS);

        Ok(())
    }

    #[test]
    fn test_domain_from_str() {
        assert_eq!(Domain::from_str("ICS"), Ok(Domain::ICS));
        assert_eq!(Domain::from_str(" enterprise "), Ok(Domain::ENTERPRISE));
        assert!(Domain::from_str("cloud").is_err());
        assert_eq!(Domain::MOBILE.to_string(), "Mobile");
    }
}
