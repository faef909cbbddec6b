//! Parser for the ASCII tables printed by OpenStack command-line clients.
//!
//! ```text
//! +----------+-------+
//! | Property | Value |
//! +----------+-------+
//! | id       | 1234  |
//! +----------+-------+
//! ```
//!
//! Lines made only of `+` and `-` separate the header from the rows. Nothing
//! before the first separator is read, and the third one ends the table.

use std::collections::BTreeMap;
use tracing::trace;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

fn is_separator(line: &str) -> bool {
    !line.is_empty() && line.chars().all(|c| c == '+' || c == '-')
}

/// Cells between the outer pipes, trimmed. `| a | b |` gives `["a", "b"]`.
fn split_row(line: &str) -> Vec<String> {
    let cells: Vec<&str> = line.split('|').collect();
    if cells.len() < 2 {
        return Vec::new();
    }
    cells[1..cells.len() - 1]
        .iter()
        .map(|c| c.trim().to_owned())
        .collect()
}

/// Parse the first table in `text`. Rows whose width differs from the
/// header are dropped.
pub fn parse_block(text: &str) -> Table {
    let mut table = Table::default();
    let mut separators = 0;
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        if is_separator(line) {
            separators += 1;
            if separators == 3 {
                break;
            }
            continue;
        }
        match separators {
            1 => table.header = split_row(line),
            2 => {
                let row = split_row(line);
                if row.len() == table.header.len() {
                    table.rows.push(row);
                } else {
                    trace!("dropping table row of width {}: {line}", row.len());
                }
            }
            _ => {}
        }
    }
    table
}

/// Two-column table as a map from first to second column. Tables of any
/// other width give an empty map. Later rows win on duplicate keys.
pub fn map_block(text: &str) -> BTreeMap<String, String> {
    let table = parse_block(text);
    if table.header.len() != 2 {
        return BTreeMap::new();
    }
    table
        .rows
        .into_iter()
        .filter_map(|row| {
            let mut cells = row.into_iter();
            Some((cells.next()?, cells.next()?))
        })
        .collect()
}
