//! Page layout for reports, written directly with lopdf.
//!
//! The writer keeps a vertical cursor on an A4 page and flows text blocks
//! and images down it. Anything that does not fit in the remaining space
//! starts a new page. Text uses the standard Helvetica faces with
//! WinAnsiEncoding, so no font is embedded; characters outside that
//! encoding print as `?`.
//!
//! Images are embedded as JPEG (`DCTDecode`), which the PDF format accepts
//! unchanged.

use crate::error::PlanmarkError;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, RgbImage, RgbaImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

pub const PAGE_WIDTH: f64 = 595.0;
pub const PAGE_HEIGHT: f64 = 842.0;
pub const MARGIN: f64 = 50.0;
const FOOTER_SIZE: f64 = 8.0;
const LINE_FACTOR: f64 = 1.3;
const JPEG_QUALITY: u8 = 85;

/// A JPEG ready to be placed.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    jpeg: Vec<u8>,
    width_px: u32,
    height_px: u32,
}

impl EncodedImage {
    /// Flatten onto white, shrink to `max_px` on the longest edge, encode.
    pub fn from_image(image: &DynamicImage, max_px: u32) -> Result<Self, image::ImageError> {
        let mut rgba = image.to_rgba8();
        let (w, h) = rgba.dimensions();
        if w.max(h) > max_px {
            let scale = f64::from(max_px) / f64::from(w.max(h));
            let nw = ((f64::from(w) * scale).round() as u32).max(1);
            let nh = ((f64::from(h) * scale).round() as u32).max(1);
            rgba = imageops::resize(&rgba, nw, nh, imageops::FilterType::Triangle);
        }
        Self::from_rgba(&rgba)
    }

    pub fn from_rgba(rgba: &RgbaImage) -> Result<Self, image::ImageError> {
        let rgb = flatten_on_white(rgba);
        let mut jpeg = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY))?;
        Ok(Self {
            jpeg,
            width_px: rgb.width(),
            height_px: rgb.height(),
        })
    }

    pub fn width_px(&self) -> u32 {
        self.width_px
    }

    pub fn height_px(&self) -> u32 {
        self.height_px
    }
}

fn flatten_on_white(rgba: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y);
        let a = u32::from(p[3]);
        let mix = |c: u8| ((u32::from(c) * a + 255 * (255 - a) + 127) / 255) as u8;
        image::Rgb([mix(p[0]), mix(p[1]), mix(p[2])])
    })
}

#[derive(Default)]
struct PageBuf {
    ops: Vec<Operation>,
    xobjects: Vec<(String, ObjectId)>,
}

/// Where an image ended up, in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub page: usize,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

pub struct ReportWriter {
    doc: Document,
    pages_id: ObjectId,
    regular_id: ObjectId,
    bold_id: ObjectId,
    pages: Vec<PageBuf>,
    cursor: f64,
    image_count: usize,
    title: String,
}

impl ReportWriter {
    pub fn new(title: impl Into<String>) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let regular_id = doc.add_object(font("Helvetica"));
        let bold_id = doc.add_object(font("Helvetica-Bold"));
        Self {
            doc,
            pages_id,
            regular_id,
            bold_id,
            pages: vec![PageBuf::default()],
            cursor: PAGE_HEIGHT - MARGIN,
            image_count: 0,
            title: title.into(),
        }
    }

    pub fn content_width() -> f64 {
        PAGE_WIDTH - 2.0 * MARGIN
    }

    /// Usable height of an empty page.
    pub fn page_body_height() -> f64 {
        PAGE_HEIGHT - 2.0 * MARGIN - FOOTER_SIZE * 2.0
    }

    fn bottom() -> f64 {
        MARGIN + FOOTER_SIZE * 2.0
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Vertical space left on the current page.
    pub fn remaining(&self) -> f64 {
        self.cursor - Self::bottom()
    }

    fn at_page_top(&self) -> bool {
        self.cursor >= PAGE_HEIGHT - MARGIN
    }

    pub fn new_page(&mut self) {
        self.pages.push(PageBuf::default());
        self.cursor = PAGE_HEIGHT - MARGIN;
    }

    /// Start a new page unless `needed` points fit on this one. Returns
    /// whether a break happened.
    pub fn ensure_space(&mut self, needed: f64) -> bool {
        if needed > self.remaining() && !self.at_page_top() {
            self.new_page();
            return true;
        }
        false
    }

    pub fn spacer(&mut self, height: f64) {
        if height >= self.remaining() {
            self.new_page();
        } else {
            self.cursor -= height;
        }
    }

    fn current(&mut self) -> &mut PageBuf {
        // `pages` starts with one entry and only grows.
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    /// Wrapped text at the cursor. Lines that do not fit move to a new page.
    pub fn text(&mut self, text: &str, size: f64, bold: bool) {
        let line_height = size * LINE_FACTOR;
        let font = if bold { "F2" } else { "F1" };
        for line in wrap(text, size, Self::content_width()) {
            self.ensure_space(line_height);
            self.cursor -= line_height;
            let baseline = self.cursor + (line_height - size);
            let encoded = to_win_ansi(&line);
            self.current().ops.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![font.into(), size.into()]),
                Operation::new("Td", vec![MARGIN.into(), baseline.into()]),
                Operation::new("Tj", vec![Object::String(encoded, StringFormat::Literal)]),
                Operation::new("ET", vec![]),
            ]);
        }
    }

    /// A thin horizontal rule across the content width.
    pub fn rule(&mut self) {
        self.ensure_space(6.0);
        self.cursor -= 3.0;
        let y = self.cursor;
        self.current().ops.extend([
            Operation::new("q", vec![]),
            Operation::new("w", vec![0.5.into()]),
            Operation::new("RG", vec![0.6.into(), 0.6.into(), 0.6.into()]),
            Operation::new("m", vec![MARGIN.into(), y.into()]),
            Operation::new("l", vec![(PAGE_WIDTH - MARGIN).into(), y.into()]),
            Operation::new("S", vec![]),
            Operation::new("Q", vec![]),
        ]);
        self.cursor -= 3.0;
    }

    /// Place an image at the cursor, scaled to fit `max_width` × `max_height`
    /// points (and the page), breaking to a new page when it does not fit.
    pub fn image(&mut self, image: &EncodedImage, max_width: f64, max_height: f64) -> Placement {
        let (wpx, hpx) = (f64::from(image.width_px.max(1)), f64::from(image.height_px.max(1)));
        let max_w = max_width.min(Self::content_width());
        let max_h = max_height.min(Self::page_body_height());
        let scale = (max_w / wpx).min(max_h / hpx);
        let (width, height) = (wpx * scale, hpx * scale);

        self.ensure_space(height);

        self.image_count += 1;
        let name = format!("Im{}", self.image_count);
        let id = self.doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(image.width_px),
                "Height" => i64::from(image.height_px),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            image.jpeg.clone(),
        ));

        self.cursor -= height;
        let (x, y) = (MARGIN, self.cursor);
        let page = self.pages.len();
        let buf = self.current();
        buf.xobjects.push((name.clone(), id));
        buf.ops.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![width.into(), 0.into(), 0.into(), height.into(), x.into(), y.into()],
            ),
            Operation::new("Do", vec![Object::Name(name.into_bytes())]),
            Operation::new("Q", vec![]),
        ]);

        Placement {
            page,
            x,
            y,
            width,
            height,
        }
    }

    /// Write page footers, assemble the page tree and serialise.
    pub fn finish(mut self) -> Result<Vec<u8>, PlanmarkError> {
        let total = self.pages.len();
        let mut kids: Vec<Object> = Vec::with_capacity(total);

        for (i, page) in std::mem::take(&mut self.pages).into_iter().enumerate() {
            let mut ops = page.ops;
            let footer = format!("{}  ·  page {} of {}", self.title, i + 1, total);
            ops.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), FOOTER_SIZE.into()]),
                Operation::new("Td", vec![MARGIN.into(), (MARGIN - FOOTER_SIZE).into()]),
                Operation::new(
                    "Tj",
                    vec![Object::String(to_win_ansi(&footer), StringFormat::Literal)],
                ),
                Operation::new("ET", vec![]),
            ]);
            let content = Content { operations: ops }
                .encode()
                .map_err(|e| PlanmarkError::Internal(format!("content stream: {e}")))?;
            let content_id = self.doc.add_object(Stream::new(dictionary! {}, content));

            let mut xobjects = Dictionary::new();
            for (name, id) in page.xobjects {
                xobjects.set(name, id);
            }
            let resources = dictionary! {
                "Font" => dictionary! {
                    "F1" => self.regular_id,
                    "F2" => self.bold_id,
                },
                "XObject" => xobjects,
            };
            let page_id = self.doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => self.pages_id,
                "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
                "Contents" => content_id,
                "Resources" => resources,
            });
            kids.push(page_id.into());
        }

        let tree = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => total as i64,
        };
        self.doc.objects.insert(self.pages_id, Object::Dictionary(tree));
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        let info_id = self.doc.add_object(dictionary! {
            "Title" => Object::String(to_win_ansi(&self.title), StringFormat::Literal),
            "Producer" => Object::string_literal(concat!("planmark ", env!("CARGO_PKG_VERSION"))),
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.trailer.set("Info", info_id);

        let mut out = Vec::new();
        self.doc
            .save_to(&mut out)
            .map_err(|e| PlanmarkError::Internal(format!("serialising report: {e}")))?;
        Ok(out)
    }
}

fn font(base: &str) -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base,
        "Encoding" => "WinAnsiEncoding",
    }
}

/// Helvetica advance widths for 0x20..=0x7E, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0'..'?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@'..'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P'..'_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`'..'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p'..'~'
];

/// Width of `text` in points at `size`. Bold is measured as regular, which
/// slightly under-estimates; wrapping keeps a margin for that.
pub fn text_width(text: &str, size: f64) -> f64 {
    let units: u32 = text
        .chars()
        .map(|c| match c as u32 {
            cp @ 0x20..=0x7E => u32::from(HELVETICA_WIDTHS[(cp - 0x20) as usize]),
            _ => 556,
        })
        .sum();
    f64::from(units) * size / 1000.0
}

/// Greedy word wrap to `max_width` points. Explicit newlines are kept; a
/// word longer than a line is split by characters.
pub fn wrap(text: &str, size: f64, max_width: f64) -> Vec<String> {
    let limit = max_width * 0.95;
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{line} {word}")
            };
            if text_width(&candidate, size) <= limit {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            if text_width(word, size) <= limit {
                line = word.to_string();
            } else {
                for c in word.chars() {
                    line.push(c);
                    if text_width(&line, size) > limit {
                        line.pop();
                        lines.push(std::mem::take(&mut line));
                        line.push(c);
                    }
                }
            }
        }
        lines.push(line);
    }
    lines
}

/// Encode for WinAnsiEncoding. Latin-1 passes through, a few common
/// typographic characters are mapped, the rest becomes `?`.
pub fn to_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{20AC}' => 0x80,
            '\u{2026}' => 0x85,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\t' => b' ',
            c if (c as u32) < 0x20 => b'?',
            c if (0x80..0xA0).contains(&(c as u32)) => b'?',
            c if (c as u32) <= 0xFF => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}
