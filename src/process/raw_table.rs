/// One delimited-text entry as read from an archive, before any canonicalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    /// Name of the archive entry the table came from.
    pub source: String,
    /// Column names exactly as the file's header row spells them.
    pub headers: Vec<String>,
    /// Each data row, one String per field. Rows may be shorter than `headers`.
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Field `idx` of `row`, trimmed, or `None` when absent or blank.
    pub fn cell(row: &[String], idx: usize) -> Option<&str> {
        row.get(idx).map(|s| s.trim()).filter(|s| !s.is_empty())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
