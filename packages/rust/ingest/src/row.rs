//! Header normalization, the delimited reader, and [`ImportRow`].

use std::io::Read;

use larder_shared::{LarderError, RecordDraft, Result};

use crate::fields::{LIST_SEPARATORS, STEP_SEPARATORS, parse_ingredient_cell, split_list};
use crate::links::canonicalize;

/// One raw import row with a named slot for every recognized header.
///
/// Cells are trimmed; empty cells are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportRow {
    /// 1-based data line number (header excluded), for diagnostics.
    pub line: usize,
    pub name: Option<String>,
    pub category: Option<String>,
    pub ingredients: Option<String>,
    pub tools: Option<String>,
    pub steps: Option<String>,
    pub description: Option<String>,
    pub media_url: Option<String>,
    pub serving_note: Option<String>,
}

/// Recognized columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Name,
    Category,
    Ingredients,
    Tools,
    Steps,
    Description,
    MediaUrl,
    ServingNote,
}

impl Column {
    fn from_header(normalized: &str) -> Option<Self> {
        Some(match normalized {
            "name" | "nama" => Self::Name,
            "category" | "category_name" | "kategori" | "kategori_nama" => Self::Category,
            "ingredients" | "bahan" => Self::Ingredients,
            "tools" | "alat" => Self::Tools,
            "steps" | "langkah" => Self::Steps,
            "description" | "deskripsi" => Self::Description,
            "media_url" | "foto_url" => Self::MediaUrl,
            "serving_note" | "potongan" => Self::ServingNote,
            _ => return None,
        })
    }
}

/// Normalize a header cell: trim, strip a leading byte-order marker, case-fold.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .trim_start_matches(['\u{FEFF}', '\u{FFFE}'])
        .trim()
        .to_lowercase()
}

/// Read every data row of a delimited file.
///
/// The outer error covers an unreadable header row. Each inner item is one
/// data row; a row that cannot be decoded is an `Err` so the caller can count
/// it and move on. Ragged rows are tolerated.
pub fn read_rows<R: Read>(reader: R, delimiter: u8) -> Result<Vec<Result<ImportRow>>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns: Vec<Option<Column>> = rdr
        .headers()
        .map_err(|e| LarderError::parse(format!("unreadable header row: {e}")))?
        .iter()
        .map(|h| Column::from_header(&normalize_header(h)))
        .collect();

    if !columns.contains(&Some(Column::Name)) {
        tracing::warn!("import header has no name column; every row will be skipped");
    }

    let rows: Vec<Result<ImportRow>> = rdr
        .records()
        .enumerate()
        .map(|(i, record)| -> Result<ImportRow> {
            let record =
                record.map_err(|e| LarderError::parse(format!("line {}: {e}", i + 1)))?;
            let mut row = ImportRow {
                line: i + 1,
                ..ImportRow::default()
            };
            for (cell, column) in record.iter().zip(&columns) {
                if let Some(column) = column {
                    row.set(*column, cell);
                }
            }
            Ok(row)
        })
        .collect();

    Ok(rows)
}

impl ImportRow {
    fn set(&mut self, column: Column, cell: &str) {
        let cell = cell.trim();
        if cell.is_empty() {
            return;
        }
        let slot = match column {
            Column::Name => &mut self.name,
            Column::Category => &mut self.category,
            Column::Ingredients => &mut self.ingredients,
            Column::Tools => &mut self.tools,
            Column::Steps => &mut self.steps,
            Column::Description => &mut self.description,
            Column::MediaUrl => &mut self.media_url,
            Column::ServingNote => &mut self.serving_note,
        };
        // First occurrence wins when a header is repeated
        if slot.is_none() {
            *slot = Some(cell.to_string());
        }
    }

    /// Whether the row has no name and must be skipped.
    pub fn is_blank(&self) -> bool {
        self.name.as_deref().is_none_or(|n| n.trim().is_empty())
    }

    /// Display name for progress and diagnostics.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Parse the row into a draft for the given category.
    pub fn into_draft(self, category_id: &str) -> Result<RecordDraft> {
        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| LarderError::parse(format!("line {}: missing name", self.line)))?;

        Ok(RecordDraft {
            name,
            description: self.description,
            media_url: self.media_url.as_deref().map(canonicalize).unwrap_or_default(),
            category_id: category_id.to_string(),
            ingredients: self
                .ingredients
                .as_deref()
                .map(parse_ingredient_cell)
                .unwrap_or_default(),
            tools: self
                .tools
                .as_deref()
                .map(|t| split_list(t, LIST_SEPARATORS))
                .unwrap_or_default(),
            steps: self
                .steps
                .as_deref()
                .map(|s| split_list(s, STEP_SEPARATORS))
                .unwrap_or_default(),
            serving_note: self.serving_note,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_normalization() {
        assert_eq!(normalize_header("\u{FEFF}Name "), "name");
        assert_eq!(normalize_header("  MEDIA_URL"), "media_url");
    }

    #[test]
    fn reads_rows_with_bom_and_aliases() {
        let data = "\u{FEFF}nama;Kategori;bahan;langkah;unknown\n\
                    Es Teh;Minuman;Teh|1|kantong;Seduh teh.;ignored\n";
        let rows = read_rows(data.as_bytes(), b';').expect("header");
        assert_eq!(rows.len(), 1);
        let row = rows[0].as_ref().expect("row");
        assert_eq!(row.name.as_deref(), Some("Es Teh"));
        assert_eq!(row.category.as_deref(), Some("Minuman"));
        // `;` is the field delimiter, so the ingredient cell holds one item
        assert_eq!(row.ingredients.as_deref(), Some("Teh|1|kantong"));
        assert_eq!(row.steps.as_deref(), Some("Seduh teh."));
    }

    #[test]
    fn quoted_cells_and_ragged_rows() {
        let data = "name,category,steps,tools\n\
                    \"Nasi Goreng\",Rice,\"Panaskan minyak; Tumis bumbu, aduk.\"\n\
                    Mie Ayam\n";
        let rows = read_rows(data.as_bytes(), b',').expect("header");
        assert_eq!(rows.len(), 2);

        let first = rows[0].as_ref().unwrap().clone();
        let draft = first.into_draft("cat-1").expect("draft");
        assert_eq!(draft.steps, vec!["Panaskan minyak", "Tumis bumbu, aduk."]);
        assert!(draft.tools.is_empty());

        let second = rows[1].as_ref().unwrap();
        assert_eq!(second.name.as_deref(), Some("Mie Ayam"));
        assert!(second.category.is_none());
        assert_eq!(second.line, 2);
    }

    #[test]
    fn blank_rows_are_detected() {
        let row = ImportRow {
            name: Some("   ".into()),
            ..ImportRow::default()
        };
        assert!(row.is_blank());
        assert!(ImportRow::default().is_blank());
        assert!(row.into_draft("c").is_err());
    }

    #[test]
    fn into_draft_parses_every_field() {
        let row = ImportRow {
            line: 1,
            name: Some("Telur Dadar".into()),
            category: Some("Lauk".into()),
            ingredients: Some("Telur|2|butir;Garam".into()),
            tools: Some("Wajan, Spatula".into()),
            steps: Some("Kocok telur; Goreng".into()),
            description: Some("Omelet sederhana".into()),
            media_url: Some("https://drive.google.com/file/d/ABC123/view".into()),
            serving_note: Some("2 porsi".into()),
        };
        let draft = row.into_draft("cat-9").unwrap();
        assert_eq!(draft.category_id, "cat-9");
        assert_eq!(draft.ingredients.len(), 2);
        assert_eq!(draft.ingredients[1].unit, larder_shared::UNIT_AS_NEEDED);
        assert_eq!(draft.tools, vec!["Wajan", "Spatula"]);
        assert_eq!(draft.steps.len(), 2);
        assert_eq!(draft.media_url, "https://lh3.googleusercontent.com/d/ABC123");
        assert_eq!(draft.serving_note.as_deref(), Some("2 porsi"));
    }

    #[test]
    fn empty_input_has_no_rows() {
        let rows = read_rows("name;category\n".as_bytes(), b';').unwrap();
        assert!(rows.is_empty());
    }
}
