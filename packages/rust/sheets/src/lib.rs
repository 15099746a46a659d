//! Spreadsheet input and the result-table writer.
//!
//! Identifier lists come from a user-chosen sheet/column of a workbook
//! (`.xlsx`/`.xls`/`.xlsb`/`.ods` via calamine). Delimited files
//! (`.csv`/`.txt`) are treated as single-sheet workbooks so the same
//! sheet/column addressing works everywhere. The first row of a sheet is
//! always the header.
//!
//! The result table is written as `datas.csv` next to the input file, two
//! columns: `esupid`, `dates`.

use std::path::{Path, PathBuf};

use calamine::{Data, Reader, open_workbook_auto};
use serde::Serialize;
use tracing::debug;

use extruder_shared::{ExtruderError, Result, ResultRow};

/// File name of the result table, placed next to the input file.
const RESULT_FILE_NAME: &str = "datas.csv";

/// Headers + the first rows of a sheet, for the front end's preview.
#[derive(Debug, Clone, Serialize)]
pub struct SheetPreview {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// List the sheet names of a workbook. Delimited files have one sheet.
pub fn sheet_names(path: &Path) -> Result<Vec<String>> {
    if is_delimited(path) {
        return Ok(vec!["Sheet1".to_string()]);
    }

    let workbook = open_workbook_auto(path)
        .map_err(|e| ExtruderError::Sheet(format!("{}: {e}", path.display())))?;
    Ok(workbook.sheet_names().to_vec())
}

/// Headers and the first five data rows of a sheet.
pub fn preview(path: &Path, sheet: usize) -> Result<SheetPreview> {
    let grid = load_grid(path, sheet)?;
    let mut rows = grid.into_iter();

    let headers = rows.next().unwrap_or_default();
    let rows = rows.take(5).collect();

    Ok(SheetPreview { headers, rows })
}

/// The identifier column of a sheet, in sheet order, header row skipped,
/// empty cells dropped.
pub fn identifier_column(path: &Path, sheet: usize, column: usize) -> Result<Vec<String>> {
    let grid = load_grid(path, sheet)?;

    let ids = grid
        .into_iter()
        .skip(1)
        .filter_map(|row| {
            row.get(column)
                .map(|cell| cell.trim().to_string())
                .filter(|cell| !cell.is_empty())
        })
        .collect();

    Ok(ids)
}

/// A two-column projection (identifier column, value column), header row
/// skipped, rows without an identifier dropped.
pub fn column_pair(
    path: &Path,
    sheet: usize,
    id_column: usize,
    value_column: usize,
) -> Result<Vec<(String, String)>> {
    let grid = load_grid(path, sheet)?;

    let pairs = grid
        .into_iter()
        .skip(1)
        .filter_map(|row| {
            let id = row.get(id_column)?.trim().to_string();
            if id.is_empty() {
                return None;
            }
            let value = row.get(value_column).cloned().unwrap_or_default();
            Some((id, value))
        })
        .collect();

    Ok(pairs)
}

/// Load a whole sheet as strings, header row included.
fn load_grid(path: &Path, sheet: usize) -> Result<Vec<Vec<String>>> {
    if is_delimited(path) {
        if sheet != 0 {
            return Err(ExtruderError::Sheet(format!(
                "sheet index {sheet} out of range (delimited file has one sheet)"
            )));
        }
        return load_delimited(path);
    }

    let mut workbook = open_workbook_auto(path)
        .map_err(|e| ExtruderError::Sheet(format!("{}: {e}", path.display())))?;

    let names = workbook.sheet_names().to_vec();
    let name = names.get(sheet).ok_or_else(|| {
        ExtruderError::Sheet(format!(
            "sheet index {sheet} out of range ({} sheets)",
            names.len()
        ))
    })?;

    let range = workbook
        .worksheet_range(name)
        .map_err(|e| ExtruderError::Sheet(format!("{}: {e}", path.display())))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect())
}

fn load_delimited(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ExtruderError::Sheet(format!("{}: {e}", path.display())))?;

    let mut grid = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ExtruderError::Sheet(e.to_string()))?;
        grid.push(record.iter().map(str::to_string).collect());
    }
    Ok(grid)
}

fn is_delimited(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("csv") | Some("txt")
    )
}

/// Render a workbook cell as text. Whole-number floats lose the trailing
/// `.0` so numeric identifiers match their string form.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write the result table next to the input file. Returns the output path.
pub fn write_results(input: &Path, rows: &[ResultRow]) -> Result<PathBuf> {
    let out_path = input
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join(RESULT_FILE_NAME);

    let mut writer = csv::Writer::from_path(&out_path)
        .map_err(|e| ExtruderError::Sheet(format!("{}: {e}", out_path.display())))?;

    writer
        .write_record(["esupid", "dates"])
        .map_err(|e| ExtruderError::Sheet(e.to_string()))?;

    for row in rows {
        writer
            .write_record([
                row.esupid.as_str(),
                &row.date.format("%Y-%m-%d %H:%M:%S").to_string(),
            ])
            .map_err(|e| ExtruderError::Sheet(e.to_string()))?;
    }

    writer
        .flush()
        .map_err(|e| ExtruderError::Sheet(e.to_string()))?;

    debug!(rows = rows.len(), path = %out_path.display(), "result table written");
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn temp_csv(tag: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("extruder-sheets-{}-{tag}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("input.csv");
        std::fs::write(&path, content).unwrap();
        path
    }

    const SAMPLE: &str = "esupid,region,status\n\
                          111,north,ok\n\
                          222,south,ok\n\
                          ,east,skip me\n\
                          333,west,ok\n\
                          444,north,ok\n\
                          555,south,ok\n\
                          666,east,ok\n";

    #[test]
    fn delimited_file_is_a_single_sheet() {
        let path = temp_csv("names", SAMPLE);
        assert_eq!(sheet_names(&path).unwrap(), vec!["Sheet1"]);
    }

    #[test]
    fn preview_caps_at_five_rows() {
        let path = temp_csv("preview", SAMPLE);
        let preview = preview(&path, 0).unwrap();

        assert_eq!(preview.headers, vec!["esupid", "region", "status"]);
        assert_eq!(preview.rows.len(), 5);
        assert_eq!(preview.rows[0][0], "111");
    }

    #[test]
    fn identifier_column_skips_header_and_empties() {
        let path = temp_csv("ids", SAMPLE);
        let ids = identifier_column(&path, 0, 0).unwrap();
        assert_eq!(ids, vec!["111", "222", "333", "444", "555", "666"]);
    }

    #[test]
    fn out_of_range_sheet_is_an_error() {
        let path = temp_csv("range", SAMPLE);
        let result = identifier_column(&path, 3, 0);
        assert!(matches!(result, Err(ExtruderError::Sheet(_))));
    }

    #[test]
    fn column_pair_projects_two_columns() {
        let path = temp_csv("pairs", SAMPLE);
        let pairs = column_pair(&path, 0, 0, 1).unwrap();
        assert_eq!(pairs.len(), 6);
        assert_eq!(pairs[0], ("111".to_string(), "north".to_string()));
    }

    #[test]
    fn numeric_cells_render_without_trailing_zero() {
        assert_eq!(cell_to_string(&Data::Float(111.0)), "111");
        assert_eq!(cell_to_string(&Data::Float(1.5)), "1.5");
        assert_eq!(cell_to_string(&Data::Int(222)), "222");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }

    #[test]
    fn write_results_lands_next_to_input() {
        let path = temp_csv("write", SAMPLE);
        let rows = vec![
            ResultRow {
                esupid: "111".into(),
                date: Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(),
            },
            ResultRow {
                esupid: "333".into(),
                date: Utc.with_ymd_and_hms(2023, 6, 15, 12, 30, 0).unwrap(),
            },
        ];

        let out = write_results(&path, &rows).unwrap();
        assert_eq!(out.parent(), path.parent());

        let written = std::fs::read_to_string(&out).unwrap();
        let mut lines = written.lines();
        assert_eq!(lines.next(), Some("esupid,dates"));
        assert_eq!(lines.next(), Some("111,2022-01-01 00:00:00"));
        assert_eq!(lines.next(), Some("333,2023-06-15 12:30:00"));
    }
}
