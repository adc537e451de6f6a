//! Builders for fixture documents and rules.

#![allow(dead_code)]

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};

use lotledger::config::ClassificationRule;
use lotledger::{Category, Condition};

const LEFT_MARGIN: i64 = 72;
const TOP: i64 = 720;
const LINE_HEIGHT: i64 = 20;

/// Builder for invoice PDFs with a text layer.
///
/// Each line is drawn at the left margin, top to bottom. A page without
/// lines has no content stream, like a scanned page without OCR.
pub struct PdfBuilder {
    pages: Vec<Vec<String>>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self { pages: Vec::new() }
    }

    /// Start a new page.
    pub fn page(mut self) -> Self {
        self.pages.push(Vec::new());
        self
    }

    /// Add a line to the current page, starting one if needed.
    pub fn line(mut self, text: &str) -> Self {
        if self.pages.is_empty() {
            self.pages.push(Vec::new());
        }
        if let Some(page) = self.pages.last_mut() {
            page.push(text.to_string());
        }
        self
    }

    pub fn lines(self, texts: &[&str]) -> Self {
        texts.iter().fold(self, |builder, text| builder.line(text))
    }

    pub fn build(&self) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font = dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        };
        let encoding = font
            .get_font_encoding(&doc)
            .expect("WinAnsi font has an encoding");
        let font_id = doc.add_object(font.clone());
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for lines in &self.pages {
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
            };

            if !lines.is_empty() {
                let mut operations = Vec::new();
                for (i, text) in lines.iter().enumerate() {
                    let y = TOP - LINE_HEIGHT * i as i64;
                    operations.push(Operation::new("BT", vec![]));
                    operations.push(Operation::new("Tf", vec!["F1".into(), 11.into()]));
                    operations.push(Operation::new(
                        "Td",
                        vec![Object::Integer(LEFT_MARGIN), Object::Integer(y)],
                    ));
                    operations.push(Operation::new(
                        "Tj",
                        vec![Object::String(
                            Document::encode_text(&encoding, text),
                            StringFormat::Literal,
                        )],
                    ));
                    operations.push(Operation::new("ET", vec![]));
                }
                let content = Content { operations };
                let stream = Stream::new(
                    dictionary! {},
                    content.encode().expect("Failed to encode content stream"),
                );
                page.set("Contents", doc.add_object(stream));
            }

            kids.push(Object::from(doc.add_object(page)));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("Failed to write PDF");
        bytes
    }
}

/// The two-line invoice used across the suite.
pub fn teapot_invoice() -> Vec<u8> {
    PdfBuilder::new()
        .lines(&["Victorian Teapot — $150.00", "Glass Vase — $45.00"])
        .build()
}

/// Builder for auction metadata CSV sheets.
pub struct CsvBuilder {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvBuilder {
    pub fn new(header: &[&str]) -> Self {
        Self {
            header: header.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// The canonical five metadata columns.
    pub fn metadata() -> Self {
        Self::new(&[
            "invoice_id",
            "auction_id",
            "date",
            "buyers_premium_percent",
            "sales_tax_percent",
        ])
    }

    pub fn row(mut self, cells: &[&str]) -> Self {
        self.rows.push(cells.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&self.header)
            .expect("Failed to write header");
        for row in &self.rows {
            writer.write_record(row).expect("Failed to write row");
        }
        writer.into_inner().expect("Failed to flush CSV")
    }
}

/// Builder for classification rules.
pub struct RuleBuilder {
    id: String,
    priority: i32,
    keywords: Vec<String>,
    category: Option<Category>,
    condition: Option<Condition>,
}

impl RuleBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            priority: 0,
            keywords: Vec::new(),
            category: None,
            condition: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn keyword(mut self, keyword: &str) -> Self {
        self.keywords.push(keyword.to_string());
        self
    }

    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords
            .extend(keywords.iter().map(|k| k.to_string()));
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn build(self) -> ClassificationRule {
        ClassificationRule {
            id: self.id,
            priority: self.priority,
            keywords: self.keywords,
            category: self.category,
            condition: self.condition,
        }
    }
}
