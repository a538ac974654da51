use select::{
    document::Document,
    node::Node,
    predicate::{self, Predicate},
};

use crate::collapse_whitespace;

pub mod groups;
pub mod techniques;

#[derive(Default, Debug, Clone, PartialEq)]
pub struct Link {
    pub text: String,
    pub href: String,
}

#[derive(Default, Debug, Clone, PartialEq)]
pub struct Cell {
    pub text: String,
    pub links: Vec<Link>,
}

impl Cell {
    /// Text of the first link in the cell, falling back to the cell text.
    pub fn link_or_text(&self) -> &str {
        return self
            .links
            .first()
            .map(|link| link.text.as_str())
            .filter(|text| !text.is_empty())
            .unwrap_or(self.text.as_str());
    }
}

impl From<Node<'_>> for Cell {
    fn from(node: Node<'_>) -> Self {
        return Self {
            text: collapse_whitespace(&node.text()),
            links: node
                .find(predicate::Name("a"))
                .map(|link| Link {
                    text: collapse_whitespace(&link.text()),
                    href: link.attr("href").unwrap_or_default().to_string(),
                })
                .collect(),
        };
    }
}

#[derive(Default, Debug, Clone)]
pub struct Row {
    pub classes: Vec<String>,
    pub cells: Vec<Cell>,
}

impl Row {
    pub fn get_col(&self, inx: usize) -> Option<&str> {
        return self.cells.get(inx).map(|cell| cell.text.as_str());
    }

    pub fn get_cell(&self, inx: usize) -> Option<&Cell> {
        return self.cells.get(inx);
    }

    pub fn has_class(&self, class: &str) -> bool {
        return self.classes.iter().any(|row_class| row_class == class);
    }

    pub fn len(&self) -> usize {
        return self.cells.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.cells.is_empty();
    }
}

impl FromIterator<Cell> for Row {
    fn from_iter<T: IntoIterator<Item = Cell>>(iter: T) -> Self {
        let mut cells = Vec::new();

        for item in iter {
            cells.push(item);
        }

        return Self {
            classes: Vec::new(),
            cells,
        };
    }
}

#[derive(Default, Debug)]
pub struct Table {
    pub classes: Vec<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl IntoIterator for Table {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        return self.rows.into_iter();
    }
}

fn class_list(node: &Node) -> Vec<String> {
    return node
        .attr("class")
        .map(|classes| classes.split_whitespace().map(String::from).collect())
        .unwrap_or_default();
}

pub fn scrape_table(table_node: Node) -> Table {
    let mut table = Table::default();
    table.classes = class_list(&table_node);

    table.headers = table_node
        .find(predicate::Name("thead").descendant(predicate::Name("th")))
        .map(|header| collapse_whitespace(&header.text()))
        .collect::<Vec<String>>();

    table.rows.extend(
        table_node
            .find(predicate::Name("tbody").descendant(predicate::Name("tr")))
            .map(|row_node| {
                let mut row = row_node
                    .find(predicate::Name("td"))
                    .map(Cell::from)
                    .collect::<Row>();
                row.classes = class_list(&row_node);

                row
            })
            .filter(|row| !row.is_empty()),
    );

    return table;
}

pub fn scrape_tables(document: &Document) -> Vec<Table> {
    return document
        .find(predicate::Name("table"))
        .map(scrape_table)
        .collect();
}

pub fn scrape_table_by_class(document: &Document, class: &'static str) -> Option<Table> {
    return document
        .find(predicate::Name("table").and(predicate::Class(class)))
        .next()
        .map(scrape_table);
}

pub fn scrape_entity_name(document: &Document) -> String {
    return document
        .find(predicate::Name("h1"))
        .next()
        .map(|node| collapse_whitespace(&node.text()))
        .unwrap_or_default();
}
