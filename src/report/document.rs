//! The combined PDF: two cards per letter page, one card per page report.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use log::warn;
use printpdf::image_crate;
use printpdf::{BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};

use super::images::{read_png, top_thumbnail};
use super::{OutputLayout, PageReport};
use crate::error::{Error, Result};

const PAGE_W: f32 = 215.9;
const PAGE_H: f32 = 279.4;
const MARGIN: f32 = 14.0;
const CARD_H: f32 = (PAGE_H - 2.0 * MARGIN) / 2.0;
const IMG_W: f32 = 90.0;
const IMG_H: f32 = 60.0;
const GUTTER: f32 = 8.0;
const SWATCH_W: f32 = 75.0;
const CHIP_MM: f32 = 4.0;
const LINE_STEP: f32 = 5.5;

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
}

fn pdf_error(e: impl std::fmt::Display) -> Error {
    Error::OutputError(format!("PDF: {}", e))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
        out.push_str("...");
        out
    }
}

/// printpdf links its own `image` release, so pixels are handed over raw.
fn to_pdf_image(img: &image::RgbImage) -> Option<Image> {
    let (w, h) = img.dimensions();
    let buf = image_crate::RgbImage::from_raw(w, h, img.as_raw().clone())?;
    Some(Image::from_dynamic_image(&image_crate::DynamicImage::ImageRgb8(buf)))
}

/// Place `img` with its top-left corner at (`x`, `top`), scaled to fit in
/// `max_w` x `max_h` millimetres. Returns the height used.
fn place(layer: &PdfLayerReference, img: &image::RgbImage, x: f32, top: f32, max_w: f32, max_h: f32) -> f32 {
    let (w, h) = img.dimensions();
    let Some(pdf_img) = to_pdf_image(img) else {
        return 0.0;
    };
    // Physical size is pixels / dpi inches
    let dpi = (w as f32 * 25.4 / max_w).max(h as f32 * 25.4 / max_h);
    let height_mm = h as f32 * 25.4 / dpi;
    pdf_img.add_to_layer(
        layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(x)),
            translate_y: Some(Mm(top - height_mm)),
            dpi: Some(dpi),
            ..Default::default()
        },
    );
    height_mm
}

fn load(layout: &OutputLayout, rel: Option<&String>) -> Option<image::RgbImage> {
    let rel = rel?;
    match read_png(&layout.resolve(rel)) {
        Ok(img) => Some(img),
        Err(e) => {
            warn!("leaving {} out of the summary: {}", rel, e);
            None
        }
    }
}

fn draw_card(layer: &PdfLayerReference, fonts: &Fonts, layout: &OutputLayout, report: &PageReport, top: f32) {
    let bottom = top - CARD_H;
    layer.use_text(truncate(&report.url, 90), 11.0, Mm(MARGIN), Mm(top - 6.0), &fonts.bold);

    let mut status = format!("{} after {} attempt(s)", report.status, report.attempts);
    if let Some(reason) = &report.reason {
        status.push_str(": ");
        status.push_str(reason);
    }
    layer.use_text(truncate(&status, 110), 9.0, Mm(MARGIN), Mm(top - 12.0), &fonts.regular);

    let images_top = top - 16.0;
    let screenshot = load(layout, report.artifacts.screenshot.as_ref());
    let heatmap = load(layout, report.artifacts.heatmap.as_ref());
    if screenshot.is_none() && heatmap.is_none() {
        layer.use_text("No capture available", 10.0, Mm(MARGIN), Mm(images_top - 8.0), &fonts.regular);
    }
    if let Some(img) = screenshot {
        place(layer, &top_thumbnail(&img, 720, 480), MARGIN, images_top, IMG_W, IMG_H);
    }
    if let Some(img) = heatmap {
        place(layer, &top_thumbnail(&img, 720, 480), MARGIN + IMG_W + GUTTER, images_top, IMG_W, IMG_H);
    }

    let palette_top = images_top - IMG_H - 6.0;
    if let Some(swatch) = load(layout, report.artifacts.palette.as_ref()) {
        place(layer, &swatch, MARGIN, palette_top, SWATCH_W, CARD_H);
    }

    let text_x = MARGIN + IMG_W + GUTTER;
    let mut y = palette_top;
    for cluster in &report.clusters {
        if y - CHIP_MM < bottom + 2.0 {
            break;
        }
        let chip = image::RgbImage::from_pixel(4, 4, image::Rgb(cluster.rgb));
        place(layer, &chip, text_x, y, CHIP_MM, CHIP_MM);
        let line = format!("{} - {:.1}%", cluster.hex, cluster.proportion * 100.0);
        layer.use_text(line, 9.0, Mm(text_x + CHIP_MM + 2.0), Mm(y - CHIP_MM + 0.6), &fonts.regular);
        y -= LINE_STEP;
    }
}

/// Write the summary document for `reports` to `path`.
pub fn write_summary(path: &Path, layout: &OutputLayout, reports: &[PageReport]) -> Result<()> {
    let (doc, first_page, first_layer) = PdfDocument::new("Visual analysis summary", Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
    let fonts = Fonts {
        regular: doc.add_builtin_font(BuiltinFont::Helvetica).map_err(pdf_error)?,
        bold: doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(pdf_error)?,
    };

    let mut layer = doc.get_page(first_page).get_layer(first_layer);
    if reports.is_empty() {
        layer.use_text("No pages were processed.", 12.0, Mm(MARGIN), Mm(PAGE_H - MARGIN - 6.0), &fonts.regular);
    }
    for (i, report) in reports.iter().enumerate() {
        if i > 0 && i % 2 == 0 {
            let (page, page_layer) = doc.add_page(Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
            layer = doc.get_page(page).get_layer(page_layer);
        }
        let top = PAGE_H - MARGIN - (i % 2) as f32 * CARD_H;
        draw_card(&layer, &fonts, layout, report, top);
    }

    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    doc.save(&mut writer).map_err(pdf_error)
}
