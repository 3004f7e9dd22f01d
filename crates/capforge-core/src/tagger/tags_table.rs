//! The tagger vocabulary: the `name` column of `selected_tags.csv`.
//!
//! Row order matters: row `i` labels output index `i` of the model.

use std::path::Path;

use crate::error::PipelineError;

/// Tag names aligned with a tagger model's output vector.
#[derive(Debug, Clone, PartialEq)]
pub struct TagsTable {
    names: Vec<String>,
}

impl TagsTable {
    /// Load a tags table from a CSV file with a `name` column.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| PipelineError::Model {
            message: format!("Cannot read tags table {}: {e}", path.display()),
        })?;
        Self::parse(&content).map_err(|message| PipelineError::Model {
            message: format!("{}: {message}", path.display()),
        })
    }

    /// Parse CSV text. The first line is the header.
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());

        let header = lines.next().ok_or("tags table is empty")?;
        let column = split_csv_line(header)
            .iter()
            .position(|h| h.trim() == "name")
            .ok_or("tags table has no 'name' column")?;

        let names = lines
            .enumerate()
            .map(|(row, line)| {
                split_csv_line(line)
                    .into_iter()
                    .nth(column)
                    .ok_or_else(|| format!("row {} has no 'name' field", row + 2))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { names })
    }

    /// Tag names in output-index order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Split one CSV record, honouring double-quoted fields and `""` escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', _) => in_quotes = !in_quotes,
            (',', false) => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "tag_id,name,category,count\n\
                          9999999,general,9,807690\n\
                          470575,1girl,0,4224700\n\
                          212816,\"solo, focus\",0,3426446\n\
                          1,\"say \"\"cheese\"\"\",0,10\n";

    #[test]
    fn test_parse_name_column_in_order() {
        let table = TagsTable::parse(SAMPLE).unwrap();
        assert_eq!(
            table.names(),
            &["general", "1girl", "solo, focus", "say \"cheese\""]
        );
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_missing_name_column() {
        assert!(TagsTable::parse("tag_id,category\n1,0\n").is_err());
    }

    #[test]
    fn test_empty_table() {
        assert!(TagsTable::parse("").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selected_tags.csv");
        std::fs::write(&path, SAMPLE).unwrap();
        let table = TagsTable::load(&path).unwrap();
        assert_eq!(table.names()[1], "1girl");
    }

    #[test]
    fn test_split_csv_line() {
        assert_eq!(split_csv_line("a,,b"), vec!["a", "", "b"]);
        assert_eq!(split_csv_line("\"x,y\",z"), vec!["x,y", "z"]);
    }
}
