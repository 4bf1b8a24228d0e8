//! CSV export of the merged symbol table.
//!
//! Columns: symbol, shortName, exchange, type, rank. One row per symbol, in
//! symbol order. The header is written even when there are no rows.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use symharvest_core::domain::Instrument;
use symharvest_core::ResultMap;

pub const CSV_HEADER: [&str; 5] = ["symbol", "shortName", "exchange", "type", "rank"];

/// Write every instrument as CSV to `writer`. Returns the number of rows.
pub fn write_instruments<W: Write>(writer: W, results: &ResultMap) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(CSV_HEADER)?;
    for inst in results.values() {
        write_row(&mut wtr, inst)?;
    }
    wtr.flush().context("failed to flush CSV writer")?;
    Ok(results.len())
}

fn write_row<W: Write>(wtr: &mut csv::Writer<W>, inst: &Instrument) -> Result<()> {
    wtr.write_record([
        inst.symbol.as_str(),
        inst.display_name.as_str(),
        inst.exchange.as_str(),
        inst.instrument_type.as_str(),
        &inst.rank.to_string(),
    ])?;
    Ok(())
}

/// Render the table as a CSV string.
pub fn export_csv(results: &ResultMap) -> Result<String> {
    let mut buf = Vec::new();
    write_instruments(&mut buf, results)?;
    String::from_utf8(buf).context("CSV output is not valid UTF-8")
}

/// Write the table to `path`.
///
/// Rows go to a sibling temporary file that is renamed over `path` once
/// complete, so a failed write leaves any previous output intact.
pub fn save_csv(results: &ResultMap, path: &Path) -> Result<usize> {
    let tmp = temp_path(path)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output dir: {}", dir.display()))?;
    }

    let file = File::create(&tmp)
        .with_context(|| format!("failed to create {}", tmp.display()))?;
    let rows = match write_instruments(file, results) {
        Ok(rows) => rows,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.context(format!("failed to write {}", tmp.display())));
        }
    };

    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move output into place: {}", path.display()))?;
    Ok(rows)
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("output path has no file name: {}", path.display()))?;
    let mut tmp_name = name.to_os_string();
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use symharvest_core::domain::LookupRecord;
    use symharvest_core::Aggregator;

    fn sample() -> ResultMap {
        let mut agg = Aggregator::new();
        agg.merge(LookupRecord::new("BBB", "NYQ", "ETF").with_short_name("Bravo, Inc.").with_rank(4))
            .unwrap();
        agg.merge(LookupRecord::new("AAA", "NMS", "EQUITY")).unwrap();
        agg.into_results()
    }

    #[test]
    fn header_and_rows_in_symbol_order() {
        let csv = export_csv(&sample()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "symbol,shortName,exchange,type,rank");
        assert_eq!(lines[1], "AAA,AAA,NMS,EQUITY,-1");
        assert_eq!(lines[2], "BBB,\"Bravo, Inc.\",NYQ,ETF,4");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn empty_table_still_has_header() {
        let csv = export_csv(&ResultMap::new()).unwrap();
        assert_eq!(csv, "symbol,shortName,exchange,type,rank\n");
    }

    #[test]
    fn temp_path_is_a_sibling() {
        let tmp = temp_path(Path::new("out/symbols.csv")).unwrap();
        assert_eq!(tmp, PathBuf::from("out/symbols.csv.tmp"));
        assert!(temp_path(Path::new("/")).is_err());
    }
}
