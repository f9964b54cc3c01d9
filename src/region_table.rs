//! Functions for managing markdown tables of brain atlas regions.
//!
//! The tables list one row per region pair: lobe, gyrus, a display name for both hemispheres and the
//! atlas label ids of the left and right hemisphere region, plus further descriptive columns. They are
//! pipe-delimited markdown, with a header row and a separator row before the data rows.
//!
//! This module merges network assignments from a CSV lookup table into such a markdown table, fills
//! the hierarchical lobe and gyrus cells which are only given on the first row of their group, and
//! parses the result into [`RegionRecord`]s.

use serde::Serialize;
use tracing::{debug, warn};

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::{LightMindedError, Result};
use crate::util::{read_text_file, write_text_file};

/// Data rows with fewer pipe-split cells than this are passed through unmodified by [`annotate`].
pub const MIN_ANNOTATED_CELLS: usize = 6;
/// Data rows with fewer pipe-split cells than this are passed through unmodified by [`fill_table`].
pub const MIN_FILLED_CELLS: usize = 4;
/// Rows with fewer inner cells than this are skipped by [`RegionTable::parse`].
pub const MIN_REGION_CELLS: usize = 10;

const LEFT_ID_CELL: usize = 4;
const RIGHT_ID_CELL: usize = 5;
const LOBE_CELL: usize = 1;
const GYRUS_CELL: usize = 2;


/// A network column that can be merged into a region table: the CSV column it is read from, and the
/// header title it gets in the markdown table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkColumn {
    pub csv_column: &'static str,
    pub header_title: &'static str,
}

impl NetworkColumn {
    /// The network name, e.g. `Default` or `Visual`.
    pub const NAME: NetworkColumn = NetworkColumn {
        csv_column: "Network_nina",
        header_title: "Network Nina",
    };

    /// The numeric network id of the 7-network Yeo parcellation.
    pub const ID: NetworkColumn = NetworkColumn {
        csv_column: "Network_Yeo_7_nina",
        header_title: "Network Nina ID",
    };
}


/// Maps atlas region ids to the value of one network column of a CSV lookup table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkLookup {
    values: HashMap<i64, String>,
}

impl NetworkLookup {

    /// Read the lookup from a CSV file which has a numeric `ROI` column and the given value column.
    /// If the file's name ends with ".gz", the file is gunzipped first.
    pub fn from_csv<P: AsRef<Path>>(path: P, column: &str) -> Result<NetworkLookup> {
        let text = read_text_file(path)?;
        NetworkLookup::from_reader(text.as_bytes(), column)
    }

    /// Read the lookup from CSV data. Rows with a non-integer `ROI` cell are skipped.
    pub fn from_reader<R: std::io::Read>(input: R, column: &str) -> Result<NetworkLookup> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(input);

        let headers = rdr.headers()?.clone();
        let roi_idx = headers.iter().position(|h| h == "ROI")
            .ok_or_else(|| LightMindedError::MissingColumn(String::from("ROI")))?;
        let value_idx = headers.iter().position(|h| h == column)
            .ok_or_else(|| LightMindedError::MissingColumn(column.to_string()))?;

        let mut values = HashMap::new();
        for result in rdr.records() {
            let record = result?;
            let roi = record.get(roi_idx).unwrap_or("");
            match roi.parse::<i64>() {
                Ok(id) => {
                    values.insert(id, record.get(value_idx).unwrap_or("").to_string());
                }
                Err(_) => warn!("Skipping lookup row with non-integer ROI '{}'", roi),
            }
        }
        debug!("Read {} network values from column '{}'", values.len(), column);
        Ok(NetworkLookup { values })
    }

    /// The network value of the region, or the empty string if it is unknown.
    pub fn get(&self, id: i64) -> &str {
        self.values.get(&id).map(String::as_str).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolve the network value for a left/right hemisphere region pair. The left value wins if it is
    /// non-empty, otherwise the right value is used.
    pub fn resolve(&self, left: i64, right: i64) -> &str {
        let left_value = self.get(left);
        if !left_value.is_empty() {
            left_value
        } else {
            self.get(right)
        }
    }
}

impl FromIterator<(i64, String)> for NetworkLookup {
    fn from_iter<I: IntoIterator<Item = (i64, String)>>(iter: I) -> Self {
        NetworkLookup { values: iter.into_iter().collect() }
    }
}


fn split_header(table: &str) -> Result<(&str, &str, Vec<&str>)> {
    let mut lines = table.lines();
    let header = lines.next().ok_or_else(|| LightMindedError::InvalidTable(String::from("missing header row")))?;
    let separator = lines.next().ok_or_else(|| LightMindedError::InvalidTable(String::from("missing separator row")))?;
    Ok((header, separator, lines.collect()))
}

fn insert_before_last(line: &str, value: &str) -> String {
    let mut parts: Vec<&str> = line.split('|').collect();
    let at = parts.len() - 1;
    parts.insert(at, value);
    parts.join("|")
}


/// Insert a network column into a markdown region table.
///
/// The column is inserted before the last pipe-split cell of every row, which for a table with
/// trailing pipes makes it the new last column. For each data row, the left and right hemisphere
/// region ids are parsed from the fixed cell positions and resolved with [`NetworkLookup::resolve`].
/// Rows with a non-numeric id get an empty cell, rows with too few cells are kept as they are.
///
/// # Examples
///
/// ```
/// use light_minded::region_table::{annotate, NetworkLookup};
///
/// let lookup: NetworkLookup = vec![(1, String::from("Visual"))].into_iter().collect();
/// let table = "| Lobe | Gyrus | Name | L | R | Notes |\n|---|---|---|---|---|---|\n| Occ | Cun | V1 | 1 | 2 | x |\n";
/// let out = annotate(table, &lookup, "Network").unwrap();
/// assert!(out.lines().nth(2).unwrap().ends_with("| x |Visual|"));
/// ```
pub fn annotate(table: &str, lookup: &NetworkLookup, header_title: &str) -> Result<String> {
    let (header, separator, rows) = split_header(table)?;
    let rule = "-".repeat(header_title.len());

    let mut out = String::with_capacity(table.len() + rows.len() * 16);
    out.push_str(&insert_before_last(header.trim(), header_title));
    out.push('\n');
    out.push_str(&insert_before_last(separator.trim(), &rule));
    out.push('\n');

    for row in rows {
        let line = row.trim();
        let cells: Vec<&str> = line.split('|').collect();
        if cells.len() < MIN_ANNOTATED_CELLS {
            out.push_str(line);
            out.push('\n');
            continue;
        }
        let left = cells[LEFT_ID_CELL].trim().parse::<i64>();
        let right = cells[RIGHT_ID_CELL].trim().parse::<i64>();
        let value = match (left, right) {
            (Ok(left), Ok(right)) => lookup.resolve(left, right),
            _ => {
                debug!("Non-numeric region id in row '{}'", line);
                ""
            }
        };
        out.push_str(&insert_before_last(line, value));
        out.push('\n');
    }
    Ok(out)
}


/// Annotate the markdown table file `table_file` with the network column `column` read from
/// `csv_file`, and write the result to `output_file`.
pub fn annotate_file<P, Q, R>(table_file: P, csv_file: Q, output_file: R, column: NetworkColumn) -> Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: AsRef<Path>,
{
    let lookup = NetworkLookup::from_csv(csv_file, column.csv_column)?;
    let table = read_text_file(table_file)?;
    let annotated = annotate(&table, &lookup, column.header_title)?;
    write_text_file(output_file, &annotated)
}


/// Fill blank lobe and gyrus cells by carrying forward the nearest preceding non-blank value.
///
/// Region tables only name the lobe and gyrus on the first row of each group. Line endings and all
/// other cells are kept as they are; the header and separator rows are not touched.
pub fn fill_table(table: &str) -> Result<String> {
    let mut lines = table.split_inclusive('\n');
    let header = lines.next().ok_or_else(|| LightMindedError::InvalidTable(String::from("missing header row")))?;
    let separator = lines.next().ok_or_else(|| LightMindedError::InvalidTable(String::from("missing separator row")))?;

    let mut out = String::with_capacity(table.len());
    out.push_str(header);
    out.push_str(separator);

    let mut last_lobe = String::new();
    let mut last_gyrus = String::new();
    for row in lines {
        let mut cells: Vec<String> = row.split('|').map(String::from).collect();
        if cells.len() < MIN_FILLED_CELLS {
            out.push_str(row);
            continue;
        }
        carry_forward(&mut cells[LOBE_CELL], &mut last_lobe);
        carry_forward(&mut cells[GYRUS_CELL], &mut last_gyrus);
        out.push_str(&cells.join("|"));
    }
    Ok(out)
}

fn carry_forward(cell: &mut String, last: &mut String) {
    let value = cell.trim();
    if value.is_empty() {
        *cell = last.clone();
    } else {
        *last = value.to_string();
    }
}


/// Read the markdown table `input_file`, fill it with [`fill_table`] and write it to `output_file`.
pub fn fill_table_file<P: AsRef<Path>, Q: AsRef<Path>>(input_file: P, output_file: Q) -> Result<()> {
    let table = read_text_file(input_file)?;
    write_text_file(output_file, &fill_table(&table)?)
}


/// A brain hemisphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Hemisphere {
    Left,
    Right,
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Hemisphere::Left => write!(f, "Left"),
            Hemisphere::Right => write!(f, "Right"),
        }
    }
}


/// Descriptive metadata on one atlas region in one hemisphere.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionRecord {
    #[serde(skip)]
    pub id: i32,
    pub lobe: String,
    pub gyrus: String,
    pub hemisphere: Hemisphere,
    pub hemisphere_name: String,
    pub network: String,
    pub network_id: Option<String>,
}


/// The region records of a joined region table, keyed by atlas label id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionTable {
    records: HashMap<i32, RegionRecord>,
}

fn digits_only(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

impl RegionTable {

    /// Read a joined region table from a markdown file, see [`RegionTable::parse`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<RegionTable> {
        let table = read_text_file(path)?;
        Ok(RegionTable::parse(&table))
    }

    /// Parse a region table which contains both network columns.
    ///
    /// Each data row yields up to two records, one for the left and one for the right hemisphere
    /// label id. Ids that are not plain digits are ignored, and so are rows with fewer than
    /// [`MIN_REGION_CELLS`] cells between the outer pipes.
    pub fn parse(table: &str) -> RegionTable {
        let mut records = HashMap::new();
        for row in table.lines().skip(2) {
            let parts: Vec<&str> = row.split('|').collect();
            if parts.len() < 2 {
                continue;
            }
            let cells: Vec<&str> = parts[1..parts.len() - 1].iter().map(|c| c.trim()).collect();
            if cells.len() < MIN_REGION_CELLS {
                continue;
            }

            let network_id = if digits_only(cells[9]) { Some(cells[9].to_string()) } else { None };
            let sides = [(cells[3], Hemisphere::Left), (cells[4], Hemisphere::Right)];
            for (id_cell, hemisphere) in sides.iter() {
                if !digits_only(id_cell) {
                    continue;
                }
                let id = match id_cell.parse::<i32>() {
                    Ok(id) => id,
                    Err(_) => continue,
                };
                records.insert(id, RegionRecord {
                    id,
                    lobe: cells[0].to_string(),
                    gyrus: cells[1].to_string(),
                    hemisphere: *hemisphere,
                    hemisphere_name: cells[2].to_string(),
                    network: cells[8].to_string(),
                    network_id: network_id.clone(),
                });
            }
        }
        RegionTable { records }
    }

    pub fn get(&self, id: i32) -> Option<&RegionRecord> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl fmt::Display for RegionTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Region table with metadata for {} atlas regions.", self.records.len())
    }
}


#[cfg(test)]
mod test {
    use super::*;

    const TABLE: &str = "\
| Lobe | Gyrus | Name | Label ID.L | Label ID.R | Description |
|------|-------|------|------------|------------|-------------|
| Frontal Lobe | SFG | SFG_L_7_1 | 1 | 2 | A8m |
|  |  | SFG_L_7_2 | 3 | 4 | A8dl |
|  | MFG | MFG_L_7_1 | 5 | 6 | A9/46d |
| Temporal Lobe | STG | STG_L_6_1 | x | 8 | A38m |
| short | row |
";

    fn lookup() -> NetworkLookup {
        vec![
            (1, String::from("Default")),
            (2, String::from("Frontoparietal")),
            (4, String::from("Dorsal Attention")),
            (8, String::from("Limbic")),
        ].into_iter().collect()
    }

    #[test]
    fn the_left_network_value_is_preferred() {
        let out = annotate(TABLE, &lookup(), "Network").unwrap();
        let rows: Vec<&str> = out.lines().collect();
        assert_eq!(rows[2], "| Frontal Lobe | SFG | SFG_L_7_1 | 1 | 2 | A8m |Default|");
    }

    #[test]
    fn the_right_network_value_is_used_as_fallback() {
        let out = annotate(TABLE, &lookup(), "Network").unwrap();
        let rows: Vec<&str> = out.lines().collect();
        assert_eq!(rows[3], "|  |  | SFG_L_7_2 | 3 | 4 | A8dl |Dorsal Attention|");
        // Neither side is known.
        assert_eq!(rows[4], "|  | MFG | MFG_L_7_1 | 5 | 6 | A9/46d ||");
    }

    #[test]
    fn non_numeric_ids_give_an_empty_cell_and_short_rows_pass_through() {
        let out = annotate(TABLE, &lookup(), "Network").unwrap();
        let rows: Vec<&str> = out.lines().collect();
        assert_eq!(rows[5], "| Temporal Lobe | STG | STG_L_6_1 | x | 8 | A38m ||");
        assert_eq!(rows[6], "| short | row |");
    }

    #[test]
    fn the_header_and_separator_get_the_new_column() {
        let out = annotate(TABLE, &lookup(), "Network Nina ID").unwrap();
        let rows: Vec<&str> = out.lines().collect();
        assert!(rows[0].ends_with("| Description |Network Nina ID|"));
        assert!(rows[1].ends_with("|---------------|"));
        assert_eq!(TABLE.lines().count(), rows.len());
    }

    #[test]
    fn a_table_without_separator_is_rejected() {
        assert!(annotate("| only | header |", &lookup(), "Network").is_err());
        assert!(fill_table("").is_err());
    }

    #[test]
    fn blank_lobe_and_gyrus_cells_are_carried_forward() {
        let out = fill_table(TABLE).unwrap();
        let rows: Vec<Vec<String>> = out.lines()
            .map(|l| l.split('|').map(|c| c.trim().to_string()).collect())
            .collect();
        assert_eq!(rows[3][1], "Frontal Lobe");
        assert_eq!(rows[3][2], "SFG");
        assert_eq!(rows[4][1], "Frontal Lobe");
        assert_eq!(rows[4][2], "MFG");
        assert_eq!(rows[5][1], "Temporal Lobe");
        // Unchanged header and short rows.
        assert_eq!(out.lines().next(), TABLE.lines().next());
        assert_eq!(out.lines().nth(6), Some("| short | row |"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn csv_lookups_are_read_by_column_name() {
        let csv = "ROI,Network_nina,Network_Yeo_7_nina\n1,Default,7\n2,Visual,1\nbad,Limbic,5\n";
        let names = NetworkLookup::from_reader(csv.as_bytes(), NetworkColumn::NAME.csv_column).unwrap();
        let ids = NetworkLookup::from_reader(csv.as_bytes(), NetworkColumn::ID.csv_column).unwrap();
        assert_eq!(2, names.len());
        assert_eq!("Default", names.get(1));
        assert_eq!("1", ids.get(2));
        assert_eq!("", ids.get(99));
    }

    #[test]
    fn a_missing_lookup_column_is_an_error() {
        let csv = "ROI,Other\n1,x\n";
        let err = NetworkLookup::from_reader(csv.as_bytes(), "Network_nina").unwrap_err();
        assert!(matches!(err, LightMindedError::MissingColumn(ref c) if c == "Network_nina"));
    }

    #[test]
    fn region_records_are_parsed_for_both_hemispheres() {
        let table = "\
| Lobe | Gyrus | Name | L | R | a | b | c | Network | Network ID | Notes |
|---|---|---|---|---|---|---|---|---|---|---|
| Frontal Lobe | SFG | SFG_L_7_1 | 1 | 2 | . | . | . | Default | 7 | n |
| Frontal Lobe | SFG | SFG_L_7_2 | 3 | - | . | . | . | Visual | none | n |
| too | short |
";
        let regions = RegionTable::parse(table);
        assert_eq!(3, regions.len());

        let left = regions.get(1).unwrap();
        assert_eq!(Hemisphere::Left, left.hemisphere);
        assert_eq!("SFG_L_7_1", left.hemisphere_name);
        assert_eq!("Default", left.network);
        assert_eq!(Some(String::from("7")), left.network_id);

        assert_eq!(Hemisphere::Right, regions.get(2).unwrap().hemisphere);
        assert_eq!(None, regions.get(3).unwrap().network_id);
        assert!(regions.get(4).is_none());
    }
}
