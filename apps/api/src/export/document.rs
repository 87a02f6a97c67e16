//! PDF rendering for analysis reports.
//!
//! Markdown is reduced to a flat block list (headings, paragraphs, bullets,
//! breaks), laid out greedily on A4 pages with the base-14 Helvetica faces,
//! and written with `lopdf`. Text is transliterated into WinAnsi before
//! layout so the measured string is exactly the string that gets drawn.

use std::panic::{self, AssertUnwindSafe};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use tracing::debug;

use super::font_metrics::{get_metrics, FontFace};
use super::{ExportError, ReportMeta};

pub const PAGE_WIDTH: f32 = 595.0;
pub const PAGE_HEIGHT: f32 = 842.0;
pub const MARGIN: f32 = 56.0;
/// Documents that would need more pages are refused.
pub const MAX_PAGES: usize = 200;

const REPORT_TITLE: &str = "Resume Analysis Report";
const BODY_SIZE: f32 = 10.5;
const META_SIZE: f32 = 9.5;
const FOOTER_SIZE: f32 = 9.0;
const FOOTER_Y: f32 = 30.0;
const BREAK_GAP: f32 = 6.0;
const BULLET_INDENT: f32 = 18.0;

// ────────────────────────────────────────────────────────────────────────────
// Markdown blocks
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph(String),
    Bullet(String),
    Break,
}

/// Splits markdown into blocks, one per source line. Inline emphasis
/// markers are stripped; rule lines (`---`) become breaks.
pub fn parse_blocks(markdown: &str) -> Vec<Block> {
    markdown
        .lines()
        .map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() || is_rule(trimmed) {
                return Block::Break;
            }

            let hashes = trimmed.chars().take_while(|c| *c == '#').count();
            if (1..=6).contains(&hashes) {
                let rest = &trimmed[hashes..];
                if rest.is_empty() || rest.starts_with(' ') {
                    return Block::Heading {
                        level: hashes as u8,
                        text: strip_inline(rest.trim()),
                    };
                }
            }

            for marker in ["- ", "* ", "+ "] {
                if let Some(rest) = trimmed.strip_prefix(marker) {
                    return Block::Bullet(strip_inline(rest.trim()));
                }
            }
            Block::Paragraph(strip_inline(trimmed))
        })
        .collect()
}

fn is_rule(line: &str) -> bool {
    line.len() >= 3
        && ['-', '*', '_']
            .iter()
            .any(|m| line.chars().all(|c| c == *m))
}

fn strip_inline(text: &str) -> String {
    text.replace("**", "").replace("__", "").replace('`', "")
}

// ────────────────────────────────────────────────────────────────────────────
// WinAnsi
// ────────────────────────────────────────────────────────────────────────────

/// Maps `text` onto characters the WinAnsi-encoded standard fonts can draw.
/// Common symbols get ASCII stand-ins, control characters are dropped, and
/// anything else becomes `?`.
pub fn transliterate(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\t' => out.push(' '),
            '\u{A0}' => out.push(' '),
            c if c.is_control() => {}
            '\u{200B}'..='\u{200D}' | '\u{FE0E}' | '\u{FE0F}' => {}
            c if win_ansi_byte(c).is_some() => out.push(c),
            '\u{2713}' | '\u{2714}' | '\u{2705}' | '\u{2611}' => out.push_str("[x]"),
            '\u{2717}' | '\u{2718}' | '\u{274C}' | '\u{2610}' => out.push_str("[ ]"),
            '\u{2192}' | '\u{27A1}' => out.push_str("->"),
            '\u{2190}' => out.push_str("<-"),
            '\u{2265}' => out.push_str(">="),
            '\u{2264}' => out.push_str("<="),
            '\u{2248}' => out.push('~'),
            '\u{2212}' => out.push('-'),
            '\u{25CF}' | '\u{25AA}' | '\u{25E6}' => out.push('\u{2022}'),
            _ => out.push('?'),
        }
    }
    out
}

/// Encodes already-transliterated text as WinAnsi bytes.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars().map(|c| win_ansi_byte(c).unwrap_or(b'?')).collect()
}

fn win_ansi_byte(c: char) -> Option<u8> {
    let code = c as u32;
    match code {
        0x20..=0x7E | 0xA0..=0xFF => Some(code as u8),
        _ => match c {
            '\u{20AC}' => Some(0x80),
            '\u{2026}' => Some(0x85),
            '\u{2018}' => Some(0x91),
            '\u{2019}' => Some(0x92),
            '\u{201C}' => Some(0x93),
            '\u{201D}' => Some(0x94),
            '\u{2022}' => Some(0x95),
            '\u{2013}' => Some(0x96),
            '\u{2014}' => Some(0x97),
            '\u{2122}' => Some(0x99),
            _ => None,
        },
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Layout
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PlacedLine {
    face: FontFace,
    size: f32,
    x: f32,
    y: f32,
    text: String,
}

#[derive(Debug, Default)]
struct Page {
    lines: Vec<PlacedLine>,
    rules: Vec<f32>,
}

struct Layout {
    pages: Vec<Page>,
    y: f32,
}

impl Layout {
    fn new() -> Self {
        Self {
            pages: vec![Page::default()],
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn at_page_top(&self) -> bool {
        self.y >= PAGE_HEIGHT - MARGIN
    }

    fn new_page(&mut self) -> Result<(), ExportError> {
        if self.pages.len() >= MAX_PAGES {
            return Err(ExportError::TooLarge {
                pages: self.pages.len() + 1,
            });
        }
        self.pages.push(Page::default());
        self.y = PAGE_HEIGHT - MARGIN;
        Ok(())
    }

    fn gap(&mut self, height: f32) {
        if !self.at_page_top() {
            self.y = (self.y - height).max(MARGIN);
        }
    }

    fn line(&mut self, face: FontFace, size: f32, x: f32, text: String) -> Result<(), ExportError> {
        let leading = size * 1.35;
        if self.y - leading < MARGIN {
            self.new_page()?;
        }
        self.y -= leading;
        let y = self.y;
        if let Some(page) = self.pages.last_mut() {
            page.lines.push(PlacedLine { face, size, x, y, text });
        }
        Ok(())
    }

    fn wrapped(
        &mut self,
        face: FontFace,
        size: f32,
        x: f32,
        text: &str,
    ) -> Result<(), ExportError> {
        let width = PAGE_WIDTH - MARGIN - x;
        for line in get_metrics(face).wrap(text, size, width) {
            self.line(face, size, x, line)?;
        }
        Ok(())
    }

    /// Draws a bullet glyph beside the first line placed at or after
    /// `(page_idx, line_idx)`, which may have moved to the next page.
    fn mark_bullet(&mut self, page_idx: usize, line_idx: usize) {
        let target = match self.pages[page_idx].lines.get(line_idx) {
            Some(line) => Some((page_idx, line.y)),
            None => self
                .pages
                .get(page_idx + 1)
                .and_then(|p| p.lines.first())
                .map(|line| (page_idx + 1, line.y)),
        };
        if let Some((idx, y)) = target {
            self.pages[idx].lines.push(PlacedLine {
                face: FontFace::Helvetica,
                size: BODY_SIZE,
                x: MARGIN + 6.0,
                y,
                text: "\u{2022}".to_string(),
            });
        }
    }

    fn rule(&mut self) {
        self.y -= 4.0;
        let y = self.y;
        if let Some(page) = self.pages.last_mut() {
            page.rules.push(y);
        }
        self.y -= 8.0;
    }
}

fn heading_size(level: u8) -> f32 {
    match level {
        1 => 15.0,
        2 => 13.0,
        _ => 11.5,
    }
}

fn lay_out(analysis: &str, meta: &ReportMeta) -> Result<Vec<Page>, ExportError> {
    let mut layout = Layout::new();

    layout.line(FontFace::HelveticaBold, 18.0, MARGIN, REPORT_TITLE.to_string())?;
    layout.gap(4.0);
    if let Some(model) = &meta.model {
        layout.wrapped(
            FontFace::Helvetica,
            META_SIZE,
            MARGIN,
            &transliterate(&format!("Model: {model}")),
        )?;
    }
    let generated = format!("Generated: {} UTC", meta.generated_at.format("%Y-%m-%d %H:%M:%S"));
    layout.line(FontFace::Helvetica, META_SIZE, MARGIN, generated)?;
    if let Some(summary) = meta.summary.as_deref().filter(|s| !s.trim().is_empty()) {
        layout.gap(4.0);
        layout.wrapped(
            FontFace::HelveticaBold,
            BODY_SIZE,
            MARGIN,
            &transliterate(summary),
        )?;
    }
    layout.rule();

    let mut last_was_break = true;
    for block in parse_blocks(analysis) {
        match block {
            Block::Break => {
                if !last_was_break {
                    layout.gap(BREAK_GAP);
                }
                last_was_break = true;
                continue;
            }
            Block::Heading { level, text } => {
                let size = heading_size(level);
                layout.gap(size * 0.5);
                layout.wrapped(FontFace::HelveticaBold, size, MARGIN, &transliterate(&text))?;
                layout.gap(2.0);
            }
            Block::Paragraph(text) => {
                layout.wrapped(FontFace::Helvetica, BODY_SIZE, MARGIN, &transliterate(&text))?;
            }
            Block::Bullet(text) => {
                let page_idx = layout.pages.len() - 1;
                let line_idx = layout.pages[page_idx].lines.len();
                layout.wrapped(
                    FontFace::Helvetica,
                    BODY_SIZE,
                    MARGIN + BULLET_INDENT,
                    &transliterate(&text),
                )?;
                layout.mark_bullet(page_idx, line_idx);
            }
        }
        last_was_break = false;
    }

    add_footers(&mut layout.pages);
    Ok(layout.pages)
}

fn add_footers(pages: &mut [Page]) {
    let total = pages.len();
    let metrics = get_metrics(FontFace::Helvetica);
    for (idx, page) in pages.iter_mut().enumerate() {
        let text = format!("Page {} of {}", idx + 1, total);
        let x = (PAGE_WIDTH - metrics.measure_pt(&text, FOOTER_SIZE)) / 2.0;
        page.lines.push(PlacedLine {
            face: FontFace::Helvetica,
            size: FOOTER_SIZE,
            x,
            y: FOOTER_Y,
            text,
        });
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PDF writing
// ────────────────────────────────────────────────────────────────────────────

fn write_pdf(pages: &[Page]) -> Result<Vec<u8>, ExportError> {
    let render = |e: lopdf::Error| ExportError::Render(e.to_string());

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut fonts = lopdf::Dictionary::new();
    for face in [FontFace::Helvetica, FontFace::HelveticaBold] {
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => face.base_font(),
            "Encoding" => "WinAnsiEncoding",
        });
        fonts.set(face.resource_name(), font_id);
    }
    let resources_id = doc.add_object(dictionary! { "Font" => fonts });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for page in pages {
        let mut operations = Vec::with_capacity(page.lines.len() * 5 + page.rules.len() * 4);
        for line in &page.lines {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new(
                "Tf",
                vec![line.face.resource_name().into(), line.size.into()],
            ));
            operations.push(Operation::new("Td", vec![line.x.into(), line.y.into()]));
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(encode_win_ansi(&line.text), StringFormat::Literal)],
            ));
            operations.push(Operation::new("ET", vec![]));
        }
        for y in &page.rules {
            operations.push(Operation::new("w", vec![0.75_f32.into()]));
            operations.push(Operation::new("m", vec![MARGIN.into(), (*y).into()]));
            operations.push(Operation::new(
                "l",
                vec![(PAGE_WIDTH - MARGIN).into(), (*y).into()],
            ));
            operations.push(Operation::new("S", vec![]));
        }

        let content = Content { operations }.encode().map_err(render)?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(REPORT_TITLE),
        "Producer" => Object::string_literal(env!("CARGO_PKG_NAME")),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| ExportError::Render(e.to_string()))?;
    Ok(out)
}

/// Renders `analysis` as a paginated PDF. CPU-bound; async callers use
/// `spawn_blocking`. A panic inside the renderer is reported as an error.
pub fn render_pdf(analysis: &str, meta: &ReportMeta) -> Result<Vec<u8>, ExportError> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        let pages = lay_out(analysis, meta)?;
        debug!(pages = pages.len(), "Laid out PDF report");
        write_pdf(&pages)
    }))
    .map_err(|_| ExportError::Render("renderer panicked".to_string()))?
}
