use std::fs;

use camino::Utf8Path;

use crate::error::MindbidsError;

/// In-memory tabular data: one header row plus string-valued data rows.
///
/// This is the table half of an entity payload. Tables are read from the
/// comma-separated files MindLogger exports and always written back out
/// tab-separated with a header and no index column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    /// Single-column table, used for `participants.tsv` and `value:` responses.
    pub fn single_column(name: &str, values: impl IntoIterator<Item = String>) -> Self {
        Self {
            header: vec![name.to_string()],
            rows: values.into_iter().map(|value| vec![value]).collect(),
        }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), MindbidsError> {
        if row.len() != self.header.len() {
            return Err(MindbidsError::ExportParse(format!(
                "row has {} fields, header has {}",
                row.len(),
                self.header.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|column| column == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index).map(String::as_str)
    }

    /// Append another table's rows. Pure concatenation: no dedup, no
    /// key-based upsert. The receiver's header is kept.
    pub fn append_rows(&mut self, other: &Table) {
        self.rows.extend(other.rows.iter().cloned());
    }

    pub fn from_csv_path(path: &Utf8Path) -> Result<Self, MindbidsError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| MindbidsError::Filesystem(format!("read {path}: {err}")))?;
        Self::parse_delimited(&content, ',').map_err(|message| MindbidsError::TableParse {
            path: path.to_owned(),
            message,
        })
    }

    pub fn from_tsv_path(path: &Utf8Path) -> Result<Self, MindbidsError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| MindbidsError::Filesystem(format!("read {path}: {err}")))?;
        Self::parse_delimited(&content, '\t').map_err(|message| MindbidsError::TableParse {
            path: path.to_owned(),
            message,
        })
    }

    pub fn to_tsv(&self) -> String {
        let mut out = String::new();
        write_record(&mut out, &self.header);
        for row in &self.rows {
            write_record(&mut out, row);
        }
        out
    }

    /// Minimal RFC-4180 parser: quoted fields, doubled-quote escapes,
    /// delimiters and line breaks inside quotes, optional CRLF line endings.
    fn parse_delimited(content: &str, delimiter: char) -> Result<Self, String> {
        let mut records: Vec<Vec<String>> = Vec::new();
        let mut record: Vec<String> = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut chars = content.chars().peekable();

        while let Some(ch) = chars.next() {
            if in_quotes {
                match ch {
                    '"' => {
                        if chars.peek() == Some(&'"') {
                            chars.next();
                            field.push('"');
                        } else {
                            in_quotes = false;
                        }
                    }
                    _ => field.push(ch),
                }
                continue;
            }
            match ch {
                '"' if field.is_empty() => in_quotes = true,
                ch if ch == delimiter => {
                    record.push(std::mem::take(&mut field));
                }
                '\r' => {
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                '\n' => {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                _ => field.push(ch),
            }
        }
        if in_quotes {
            return Err("unterminated quoted field".to_string());
        }
        if !field.is_empty() || !record.is_empty() {
            record.push(field);
            records.push(record);
        }

        let mut records = records.into_iter();
        let header = records.next().ok_or_else(|| "empty table".to_string())?;
        let width = header.len();
        let mut table = Self::new(header);
        for (line, mut row) in records.enumerate() {
            // Tolerate trailing short rows the way the exports produce them:
            // pad missing fields with empty strings.
            if row.len() < width {
                row.resize(width, String::new());
            }
            if row.len() != width {
                return Err(format!(
                    "row {} has {} fields, header has {width}",
                    line + 2,
                    row.len()
                ));
            }
            table.rows.push(row);
        }
        Ok(table)
    }
}

/// Write one tab-separated record, quoting fields that carry a tab, a line
/// break, or a quote so they survive reparsing.
fn write_record(out: &mut String, record: &[String]) {
    for (index, field) in record.iter().enumerate() {
        if index > 0 {
            out.push('\t');
        }
        if field.contains(['\t', '\n', '\r', '"']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_csv() {
        let table = Table::parse_delimited("a,b\n1,2\n3,4\n", ',').unwrap();
        assert_eq!(table.header(), ["a", "b"]);
        assert_eq!(table.rows().len(), 2);
        assert_eq!(table.value(1, "b"), Some("4"));
    }

    #[test]
    fn parse_quoted_fields() {
        let table = Table::parse_delimited("a,b\r\n\"x,y\",\"he said \"\"hi\"\"\"\r\n", ',').unwrap();
        assert_eq!(table.rows()[0][0], "x,y");
        assert_eq!(table.rows()[0][1], "he said \"hi\"");
    }

    #[test]
    fn parse_newline_inside_quotes() {
        let table = Table::parse_delimited("a,b\n\"line1\nline2\",z\n", ',').unwrap();
        assert_eq!(table.rows().len(), 1);
        assert_eq!(table.rows()[0][0], "line1\nline2");
    }

    #[test]
    fn short_rows_are_padded() {
        let table = Table::parse_delimited("a,b,c\n1,2\n", ',').unwrap();
        assert_eq!(table.rows()[0], ["1", "2", ""]);
    }

    #[test]
    fn tsv_round_trip() {
        let mut table = Table::new(vec!["participant".to_string()]);
        table.push_row(vec!["A".to_string()]).unwrap();
        table.push_row(vec!["B".to_string()]).unwrap();
        let tsv = table.to_tsv();
        assert_eq!(tsv, "participant\nA\nB\n");
        let parsed = Table::parse_delimited(&tsv, '\t').unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn to_tsv_quotes_embedded_breaks_and_tabs() {
        let parsed = Table::parse_delimited("prompt,z\n\"line1\nline2\",a\n", ',').unwrap();
        assert_eq!(parsed.rows().len(), 1);

        let mut table = parsed.clone();
        table
            .push_row(vec!["tab\there".to_string(), "quo\"te".to_string()])
            .unwrap();
        let reparsed = Table::parse_delimited(&table.to_tsv(), '\t').unwrap();
        assert_eq!(reparsed, table);
        assert_eq!(reparsed.rows()[0][0], "line1\nline2");
        assert_eq!(reparsed.rows()[1][0], "tab\there");
        assert_eq!(reparsed.rows()[1][1], "quo\"te");
    }

    #[test]
    fn append_rows_concatenates_without_dedup() {
        let mut first = Table::single_column("participant", vec!["A".to_string()]);
        let second = Table::single_column("participant", vec!["A".to_string(), "B".to_string()]);
        first.append_rows(&second);
        assert_eq!(first.rows().len(), 3);
    }
}
