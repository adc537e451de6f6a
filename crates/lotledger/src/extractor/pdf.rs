use std::collections::BTreeMap;

use lopdf::content::Content;
use lopdf::{Document, Encoding, Object, ObjectId};

use crate::error::ExtractionError;
use crate::extractor::{
    ends_with_amount, DocumentExtractor, DocumentKind, Extraction, RawLineRecord, RecordPosition,
};

/// Baselines closer than this (in PDF points) belong to the same line.
const LINE_TOLERANCE: f32 = 2.0;

/// `TJ` adjustments more negative than this (thousandths of an em) are
/// treated as a word gap.
const TJ_SPACE_THRESHOLD: f32 = -250.0;

/// Text encodings of a page's fonts, keyed by resource name (`F1`).
type FontEncodings<'a> = BTreeMap<Vec<u8>, Encoding<'a>>;

/// Leading words of lines that are invoice furniture rather than items.
const NON_ITEM_LABELS: &[&str] = &[
    "subtotal",
    "sub-total",
    "total",
    "grand",
    "balance",
    "amount",
    "tax",
    "sales",
    "premium",
    "buyer's",
    "buyers",
    "payment",
    "paid",
    "due",
    "invoice",
    "date",
    "page",
    "phone",
    "tel",
    "fax",
];

pub struct PdfExtractor;

impl PdfExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentExtractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractionError> {
        let _span = tracing::info_span!("extractor.pdf", bytes = bytes.len()).entered();

        let doc = Document::load_mem(bytes)
            .map_err(|e| ExtractionError::CorruptDocument(format!("Failed to load PDF: {}", e)))?;

        let mut extraction = Extraction::default();
        let mut line_ordinal = 0u32;

        for (page_num, page_id) in doc.get_pages() {
            let encodings = page_encodings(&doc, page_num, page_id);
            let fragments = match doc.get_page_content(page_id) {
                Ok(raw) => match Content::decode(&raw) {
                    Ok(content) => collect_fragments(&content, &encodings),
                    Err(e) => {
                        log::warn!("Page {} content stream is unreadable: {}", page_num, e);
                        Vec::new()
                    }
                },
                Err(e) => {
                    log::warn!("Page {} has no content stream: {}", page_num, e);
                    Vec::new()
                }
            };

            if fragments.iter().all(|f| f.text.trim().is_empty()) {
                extraction.low_confidence_pages.push(page_num);
                continue;
            }

            for line in group_into_lines(fragments) {
                let tokens: Vec<String> = line
                    .text
                    .split_whitespace()
                    .map(|t| t.to_string())
                    .collect();

                if !is_item_row(&tokens) {
                    continue;
                }

                extraction.records.push(RawLineRecord::from_tokens(
                    RecordPosition {
                        page: page_num,
                        line: line_ordinal,
                        y: Some(line.y),
                    },
                    tokens,
                ));
                line_ordinal += 1;
            }
        }

        if extraction.records.is_empty() {
            return Err(ExtractionError::NoExtractableContent {
                low_confidence_pages: extraction.low_confidence_pages,
            });
        }

        log::debug!(
            "Extracted {} item rows ({} low-confidence pages)",
            extraction.records.len(),
            extraction.low_confidence_pages.len()
        );

        Ok(extraction)
    }

    fn supports(&self, kind: DocumentKind) -> bool {
        matches!(kind, DocumentKind::Pdf)
    }
}

/// Resolves every font on the page to its text encoding. Fonts whose
/// encoding lopdf cannot build are left out, and their text is skipped.
fn page_encodings(doc: &Document, page_num: u32, page_id: ObjectId) -> FontEncodings<'_> {
    let fonts = match doc.get_page_fonts(page_id) {
        Ok(fonts) => fonts,
        Err(e) => {
            log::warn!("Page {} fonts are unreadable: {}", page_num, e);
            return FontEncodings::new();
        }
    };

    fonts
        .into_iter()
        .filter_map(|(name, font)| match font.get_font_encoding(doc) {
            Ok(encoding) => Some((name, encoding)),
            Err(e) => {
                log::warn!(
                    "Page {} font {} has no usable encoding: {}",
                    page_num,
                    String::from_utf8_lossy(&name),
                    e
                );
                None
            }
        })
        .collect()
}

/// A run of text drawn at a single position.
#[derive(Debug, Clone, PartialEq)]
struct Fragment {
    x: f32,
    y: f32,
    text: String,
}

#[derive(Debug, Clone, PartialEq)]
struct Line {
    y: f32,
    text: String,
}

/// Affine text matrix `[a b c d e f]`.
#[derive(Debug, Clone, Copy)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(self, tx: f32, ty: f32) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        Matrix([a, b, c, d, tx * a + ty * c + e, tx * b + ty * d + f])
    }
}

struct TextState {
    matrix: Matrix,
    line_matrix: Matrix,
    font: Option<Vec<u8>>,
    font_size: f32,
    leading: f32,
}

impl TextState {
    fn new() -> Self {
        Self {
            matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            font: None,
            font_size: 12.0,
            leading: 0.0,
        }
    }

    /// Decodes a string operand with the current font's encoding.
    fn decode(&self, encodings: &FontEncodings, obj: &Object) -> Option<String> {
        let Object::String(bytes, _) = obj else {
            return None;
        };
        let Some(encoding) = self.font.as_ref().and_then(|name| encodings.get(name)) else {
            log::debug!(
                "Skipping text drawn in unknown font {:?}",
                self.font.as_deref().map(String::from_utf8_lossy)
            );
            return None;
        };
        match Document::decode_text(encoding, bytes) {
            Ok(text) => Some(text),
            Err(e) => {
                log::debug!("Undecodable text operand: {}", e);
                None
            }
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = self.line_matrix.translate(tx, ty);
        self.matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        let leading = self.leading;
        self.move_line(0.0, -leading);
    }

    fn show(&mut self, text: String, out: &mut Vec<Fragment>) {
        let [_, _, _, _, e, f] = self.matrix.0;
        // Glyph widths are unknown without font metrics; half an em per
        // character keeps consecutive Tj runs in order.
        let advance = text.chars().count() as f32 * self.font_size * 0.5;
        out.push(Fragment { x: e, y: f, text });
        self.matrix = self.matrix.translate(advance, 0.0);
    }
}

fn collect_fragments(content: &Content, encodings: &FontEncodings) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    let mut state = TextState::new();

    for op in &content.operations {
        let operands = &op.operands;
        match op.operator.as_str() {
            "BT" => {
                state.matrix = Matrix::IDENTITY;
                state.line_matrix = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(name) = operands.first().and_then(|o| o.as_name().ok()) {
                    state.font = Some(name.to_vec());
                }
                if let Some(size) = operands.get(1).and_then(number) {
                    state.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(number) {
                    state.leading = leading;
                }
            }
            "Td" => {
                if let (Some(tx), Some(ty)) = (
                    operands.first().and_then(number),
                    operands.get(1).and_then(number),
                ) {
                    state.move_line(tx, ty);
                }
            }
            "TD" => {
                if let (Some(tx), Some(ty)) = (
                    operands.first().and_then(number),
                    operands.get(1).and_then(number),
                ) {
                    state.leading = -ty;
                    state.move_line(tx, ty);
                }
            }
            "Tm" => {
                let values: Vec<f32> = operands.iter().filter_map(number).collect();
                if values.len() == 6 {
                    let m = Matrix([
                        values[0], values[1], values[2], values[3], values[4], values[5],
                    ]);
                    state.matrix = m;
                    state.line_matrix = m;
                }
            }
            "T*" => state.next_line(),
            "Tj" => {
                if let Some(text) = operands.first().and_then(|o| state.decode(encodings, o)) {
                    state.show(text, &mut fragments);
                }
            }
            "'" => {
                state.next_line();
                if let Some(text) = operands.first().and_then(|o| state.decode(encodings, o)) {
                    state.show(text, &mut fragments);
                }
            }
            "\"" => {
                state.next_line();
                if let Some(text) = operands.get(2).and_then(|o| state.decode(encodings, o)) {
                    state.show(text, &mut fragments);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    let mut text = String::new();
                    for item in items {
                        if let Some(adjust) = number(item) {
                            if adjust < TJ_SPACE_THRESHOLD {
                                text.push(' ');
                            }
                        } else if let Some(part) = state.decode(encodings, item) {
                            text.push_str(&part);
                        }
                    }
                    state.show(text, &mut fragments);
                }
            }
            _ => {}
        }
    }

    fragments
}

/// Orders fragments top-to-bottom, left-to-right and merges those sharing a
/// baseline.
fn group_into_lines(mut fragments: Vec<Fragment>) -> Vec<Line> {
    fragments.retain(|f| !f.text.trim().is_empty());
    fragments.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));

    let mut rows: Vec<(f32, Vec<Fragment>)> = Vec::new();
    for fragment in fragments {
        match rows.last_mut() {
            Some((y, row)) if (*y - fragment.y).abs() <= LINE_TOLERANCE => row.push(fragment),
            _ => rows.push((fragment.y, vec![fragment])),
        }
    }

    rows.into_iter()
        .map(|(y, mut row)| {
            row.sort_by(|a, b| a.x.total_cmp(&b.x));
            let text = row
                .iter()
                .map(|f| f.text.trim())
                .collect::<Vec<_>>()
                .join(" ");
            Line { y, text }
        })
        .collect()
}

/// A line is an item row when it has a descriptive word, ends in an amount and
/// does not start with an invoice summary label.
fn is_item_row(tokens: &[String]) -> bool {
    if !ends_with_amount(tokens) {
        return false;
    }

    let Some(first_word) = tokens.iter().find(|t| t.chars().any(|c| c.is_alphabetic())) else {
        return false;
    };

    let label = first_word
        .trim_end_matches(|c: char| c == ':' || c == '.')
        .to_lowercase();
    !NON_ITEM_LABELS.contains(&label.as_str())
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}
