use anyhow::{Context, Result};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;
use tracing::debug;

use crate::config::PdfLayout;

const POINTS_PER_MM: f32 = 72.0 / 25.4;
/// Horizontal padding inside a cell, as a fraction of the left margin.
const CELL_PADDING_RATIO: f32 = 0.1;

/// Helvetica advance widths (1/1000 em) for ASCII 32..=126.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
];
const DEFAULT_WIDTH: u16 = 556;

/// Byte of `ch` in WinAnsiEncoding, `?` when it has none.
fn win_ansi(ch: char) -> u8 {
    match ch {
        ' '..='~' => ch as u8,
        '\u{A0}'..='\u{FF}' => ch as u32 as u8,
        '€' => 0x80,
        '…' => 0x85,
        '‘' => 0x91,
        '’' => 0x92,
        '“' => 0x93,
        '”' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '\t' => b' ',
        _ => b'?',
    }
}

fn glyph_width(byte: u8) -> u16 {
    match byte {
        32..=126 => HELVETICA_WIDTHS[(byte - 32) as usize],
        _ => DEFAULT_WIDTH,
    }
}

/// Width in points of WinAnsi-encoded `bytes` at `font_size`.
fn text_width(bytes: &[u8], font_size: f32) -> f32 {
    bytes.iter().map(|&b| glyph_width(b) as f32).sum::<f32>() * font_size / 1000.0
}

/// Greedy word wrap of one encoded line into rows no wider than `max_width`.
/// Words that do not fit on a row of their own are broken between characters.
/// An empty line still produces one (empty) row.
fn wrap_line(line: &[u8], max_width: f32, font_size: f32) -> Vec<Vec<u8>> {
    let fits = |bytes: &[u8]| text_width(bytes, font_size) <= max_width;
    let mut rows = Vec::new();
    let mut current: Vec<u8> = Vec::new();

    for word in line.split(|&b| b == b' ') {
        let mut candidate = current.clone();
        if !current.is_empty() {
            candidate.push(b' ');
        }
        candidate.extend_from_slice(word);

        if fits(&candidate) {
            current = candidate;
            continue;
        }

        if !current.is_empty() {
            rows.push(std::mem::take(&mut current));
        }
        current = word.to_vec();

        while !fits(&current) {
            let mut split = current.len() - 1;
            while split > 1 && !fits(&current[..split]) {
                split -= 1;
            }
            let rest = current.split_off(split.max(1));
            rows.push(std::mem::replace(&mut current, rest));
        }
    }

    rows.push(current);
    rows
}

/// Lay out `text` into pages of encoded rows.
fn paginate(text: &str, layout: &PdfLayout) -> Vec<Vec<Vec<u8>>> {
    let padding_mm = layout.margin_mm * CELL_PADDING_RATIO;
    let max_width = (layout.cell_width_mm - 2.0 * padding_mm) * POINTS_PER_MM;
    let page_bottom = layout.page_height_mm - layout.bottom_margin_mm;

    let mut pages = vec![Vec::new()];
    let mut y = layout.margin_mm;

    for line in text.split('\n') {
        let encoded: Vec<u8> = line.chars().filter(|&c| c != '\r').map(win_ansi).collect();
        for row in wrap_line(&encoded, max_width, layout.font_size) {
            if y + layout.line_height_mm > page_bottom && !pages.last().map_or(true, Vec::is_empty) {
                pages.push(Vec::new());
                y = layout.margin_mm;
            }
            if let Some(page) = pages.last_mut() {
                page.push(row);
            }
            y += layout.line_height_mm;
        }
    }

    pages
}

fn page_content(rows: &[Vec<u8>], layout: &PdfLayout) -> Content {
    let padding_mm = layout.margin_mm * CELL_PADDING_RATIO;
    let x = (layout.margin_mm + padding_mm) * POINTS_PER_MM;
    let font_size_mm = layout.font_size / POINTS_PER_MM;

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), layout.font_size.into()]),
    ];

    let mut previous: Option<(f32, f32)> = None;
    for (idx, row) in rows.iter().enumerate() {
        // Baseline sits a little below the vertical middle of the row.
        let top_mm = layout.margin_mm + idx as f32 * layout.line_height_mm;
        let baseline_mm = top_mm + 0.5 * layout.line_height_mm + 0.3 * font_size_mm;
        let y = (layout.page_height_mm - baseline_mm) * POINTS_PER_MM;

        // Td moves relative to the start of the previous row.
        let (dx, dy) = match previous {
            Some((px, py)) => (x - px, y - py),
            None => (x, y),
        };
        previous = Some((x, y));

        operations.push(Operation::new("Td", vec![dx.into(), dy.into()]));
        operations.push(Operation::new("Tj", vec![Object::string_literal(row.clone())]));
    }

    operations.push(Operation::new("ET", vec![]));
    Content { operations }
}

/// Build a PDF document holding `text` with Helvetica on fixed-size pages.
pub fn render_pdf(text: &str, layout: &PdfLayout) -> Result<Document> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let pages = paginate(text, layout);
    debug!("PDF layout: {} pages", pages.len());

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for rows in &pages {
        let content = page_content(rows, layout)
            .encode()
            .with_context(|| "Failed to encode PDF page content")?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id: ObjectId = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let media_box: Vec<Object> = vec![
        0i64.into(),
        0i64.into(),
        (layout.page_width_mm * POINTS_PER_MM).into(),
        (layout.page_height_mm * POINTS_PER_MM).into(),
    ];
    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "Resources" => resources_id,
            "MediaBox" => media_box,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    Ok(doc)
}

/// Write `text` as a PDF at `path`.
pub fn write_pdf(text: &str, path: &Path, layout: &PdfLayout) -> Result<()> {
    let mut doc = render_pdf(text, layout)?;
    doc.save(path)
        .with_context(|| format!("Failed to write PDF: {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows_text(rows: &[Vec<u8>]) -> Vec<String> {
        rows.iter().map(|r| String::from_utf8_lossy(r).into_owned()).collect()
    }

    #[test]
    fn test_win_ansi_replaces_unknown() {
        assert_eq!(win_ansi('a'), b'a');
        assert_eq!(win_ansi('é'), 0xE9);
        assert_eq!(win_ansi('’'), 0x92);
        assert_eq!(win_ansi('狐'), b'?');
    }

    #[test]
    fn test_text_width() {
        // "Hi" = H(722) + i(222)
        assert!((text_width(b"Hi", 10.0) - 9.44).abs() < 1e-4);
    }

    #[test]
    fn test_wrap_breaks_on_spaces() {
        // Each "aaaa" is 4 * 556 * 10 / 1000 = 22.24pt wide, a space 2.78pt.
        let rows = wrap_line(b"aaaa aaaa aaaa", 50.0, 10.0);
        assert_eq!(rows_text(&rows), vec!["aaaa aaaa", "aaaa"]);
    }

    #[test]
    fn test_wrap_breaks_long_words() {
        let rows = wrap_line(b"aaaaaaaaaa", 12.0, 10.0);
        assert_eq!(rows_text(&rows), vec!["aa", "aa", "aa", "aa", "aa"]);
    }

    #[test]
    fn test_empty_line_keeps_a_row() {
        assert_eq!(wrap_line(b"", 100.0, 12.0), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_paginate_starts_new_pages() {
        let layout = PdfLayout::default();
        // (297 - 20 - 10) / 10 -> 26 rows per page
        let text = vec!["line"; 30].join("\n");
        let pages = paginate(&text, &layout);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].len(), 26);
        assert_eq!(pages[1].len(), 4);
    }

    #[test]
    fn test_empty_text_single_blank_page() {
        let pages = paginate("", &PdfLayout::default());
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0], vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_written_pdf_is_well_formed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdf");
        let text = format!("Short first line\n{}", "word ".repeat(200));
        write_pdf(&text, &path, &PdfLayout::default()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));

        let mut doc = Document::load(&path).unwrap();
        doc.decompress();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);

        let page_id = *pages.values().next().unwrap();
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let shown: Vec<Vec<u8>> = content
            .operations
            .iter()
            .filter(|op| op.operator == "Tj")
            .filter_map(|op| op.operands.first()?.as_str().ok().map(<[u8]>::to_vec))
            .collect();

        assert_eq!(shown[0], b"Short first line");
        assert!(shown.len() > 2);
        let words: usize = shown.iter().map(|row| row.split(|&b| b == b' ').filter(|w| *w == b"word").count()).sum();
        assert_eq!(words, 200);
    }
}
