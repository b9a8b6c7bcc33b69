// src/process/mod.rs
pub mod columns;
pub mod consolidate;
pub mod filter;
pub mod numeric;
pub mod period;
pub mod utils;

mod raw_table;

pub use raw_table::RawTable;

use csv::ReaderBuilder;
use std::{
    fs::File,
    io::{Cursor, Read, Seek},
    path::Path,
};
use tracing::{debug, trace};
use zip::ZipArchive;

use crate::config::InputConfig;
use crate::error::ArchiveError;

/// The tabular entry pulled out of an archive, still as raw bytes.
#[derive(Debug, Clone)]
pub struct TabularEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// True when `name` is a file entry outside the reserved metadata paths and
/// carries one of the delimited-text extensions (case-insensitive).
pub fn is_tabular_name(name: &str, input: &InputConfig) -> bool {
    if name.ends_with('/') {
        return false;
    }
    if input
        .reserved_prefixes
        .iter()
        .any(|prefix| name.starts_with(prefix.as_str()) || name.contains(&format!("/{}", prefix)))
    {
        return false;
    }
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| {
            input
                .tabular_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
}

/// Walk the archive in entry order and return the first delimited-text entry.
pub fn find_tabular_entry<R: Read + Seek>(
    archive_name: &str,
    reader: R,
    input: &InputConfig,
) -> Result<TabularEntry, ArchiveError> {
    let corrupt = |source| ArchiveError::Corrupt {
        archive: archive_name.to_string(),
        source,
    };

    let mut archive = ZipArchive::new(reader).map_err(corrupt)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(corrupt)?;
        let name = entry.name().to_string();

        if entry.is_dir() || !is_tabular_name(&name, input) {
            trace!(entry = %name, "skipping entry");
            continue;
        }

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| corrupt(e.into()))?;
        debug!(entry = %name, bytes = bytes.len(), "found tabular entry");
        return Ok(TabularEntry { name, bytes });
    }

    Err(ArchiveError::NoTabularEntry {
        archive: archive_name.to_string(),
    })
}

/// Decode and split delimited text into a `RawTable`. The first record is the header row.
pub fn parse_delimited(
    source: &str,
    bytes: &[u8],
    input: &InputConfig,
) -> Result<RawTable, ArchiveError> {
    let text = input.encoding.decode(bytes);
    let unparseable = |reason: String| ArchiveError::Unparseable {
        archive: source.to_string(),
        reason,
    };

    let mut rdr = ReaderBuilder::new()
        .delimiter(input.delimiter_byte())
        .has_headers(true)
        .flexible(true)
        .from_reader(Cursor::new(text.as_bytes()));

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| unparseable(format!("header row: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(unparseable("empty header row".into()));
    }

    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| unparseable(format!("record {}: {}", idx, e)))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(RawTable {
        source: source.to_string(),
        headers,
        rows,
    })
}

/// Open `zip_path`, locate its tabular entry and parse it.
#[tracing::instrument(level = "info", skip(zip_path, input), fields(path = %zip_path.as_ref().display()))]
pub fn load_tabular_zip<P: AsRef<Path>>(
    zip_path: P,
    input: &InputConfig,
) -> Result<RawTable, ArchiveError> {
    let archive_name = zip_path
        .as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| zip_path.as_ref().display().to_string());

    let file = File::open(&zip_path).map_err(|e| ArchiveError::Corrupt {
        archive: archive_name.clone(),
        source: e.into(),
    })?;
    let entry = find_tabular_entry(&archive_name, file, input)?;
    let table = parse_delimited(&entry.name, &entry.bytes, input)?;
    debug!(
        entry = %entry.name,
        columns = table.headers.len(),
        rows = table.rows.len(),
        "parsed tabular entry"
    );
    Ok(table)
}


#[cfg(test)]
mod tests {
    use super::test_support::{latin1, zip_bytes};
    use super::*;
    use anyhow::Result;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn input() -> InputConfig {
        InputConfig::default()
    }

    #[test]
    fn skips_directories_and_metadata_entries() -> Result<()> {
        let data = zip_bytes(&[
            ("1T2024/", b""),
            ("__MACOSX/1T2024/._1T2024.csv", b"junk"),
            ("leiame.pdf", b"%PDF"),
            ("1T2024/1T2024.CSV", b"REG_ANS;VL_SALDO_FINAL\n1;2\n"),
            ("outro.csv", b"ignored"),
        ])?;

        let entry = find_tabular_entry("1T2024.zip", Cursor::new(data), &input())?;
        assert_eq!(entry.name, "1T2024/1T2024.CSV");
        assert!(entry.bytes.starts_with(b"REG_ANS"));
        Ok(())
    }

    #[test]
    fn reports_missing_tabular_entry() -> Result<()> {
        let data = zip_bytes(&[("docs/", b""), ("leiame.pdf", b"%PDF")])?;
        let err = find_tabular_entry("4T2023.zip", Cursor::new(data), &input()).unwrap_err();
        assert!(matches!(err, ArchiveError::NoTabularEntry { .. }));
        assert_eq!(err.archive(), "4T2023.zip");
        Ok(())
    }

    #[test]
    fn corrupt_container_is_an_archive_error() {
        let err = find_tabular_entry("bad.zip", Cursor::new(b"not a zip".to_vec()), &input())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Corrupt { .. }));
    }

    #[test]
    fn parses_latin1_semicolon_text() -> Result<()> {
        let text = "\"DATA\";\"REG_ANS\";\"CD_CONTA_CONTABIL\";\"DESCRIÇÃO\";\"VL_SALDO_FINAL\"\n\
                    2024-01-01;\"419761\";\"41111\";\"Eventos/Sinistros Conhecidos\";\"1.234,56\"\n\
                    2024-01-01;\"419761\";\"31\"\n";
        let table = parse_delimited("1T2024.csv", &latin1(text), &input())?;

        assert_eq!(
            table.headers,
            vec!["DATA", "REG_ANS", "CD_CONTA_CONTABIL", "DESCRIÇÃO", "VL_SALDO_FINAL"]
        );
        assert_eq!(table.len(), 2);
        assert_eq!(RawTable::cell(&table.rows[0], 4), Some("1.234,56"));
        // short rows are kept; missing fields read as None
        assert_eq!(RawTable::cell(&table.rows[1], 4), None);
        Ok(())
    }

    #[test]
    fn load_tabular_zip_from_disk() -> Result<()> {
        let data = zip_bytes(&[("2T2024.csv", b"REG_ANS;DESCRICAO\n123;DESPESA\n")])?;
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(&data)?;

        let table = load_tabular_zip(tmp.path(), &input())?;
        assert_eq!(table.source, "2T2024.csv");
        assert_eq!(table.rows, vec![vec!["123".to_string(), "DESPESA".to_string()]]);
        Ok(())
    }
}
