//! Block layout for the browser-less renderer
//!
//! Elements are stacked vertically in document order. Inline `style`
//! backgrounds, `bgcolor` attributes and text colors are honoured; text is
//! wrapped into fixed-size character cells. The page grows downwards to fit
//! its content, so the result is always a full-page capture.

use crate::rendering::paint::{parse_css_color, PaintCommand, CELL};
use crate::rendering::MAX_PAGE_HEIGHT;
use crate::Viewport;
use scraper::{ElementRef, Html, Selector};

const PAGE_MARGIN: u32 = 8;
const BLOCK_PADDING: u32 = 6;
const BLOCK_GAP: u32 = 6;

const SKIPPED: &[&str] = &["head", "script", "style", "noscript", "template", "title", "meta", "link"];
const TEXT_BLOCKS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "blockquote", "pre", "td", "th", "dt", "dd", "figcaption", "button", "label"];

#[derive(Debug, Clone)]
pub struct PageLayout {
    pub width: u32,
    pub height: u32,
    pub background: [u8; 3],
    pub commands: Vec<PaintCommand>,
}

#[derive(Debug, Clone, Copy)]
struct InlineStyle {
    background: Option<[u8; 3]>,
    color: Option<[u8; 3]>,
    min_height: Option<u32>,
    hidden: bool,
}

fn inline_style(el: &ElementRef) -> InlineStyle {
    let mut style = InlineStyle {
        background: el.value().attr("bgcolor").and_then(parse_css_color),
        color: el.value().attr("text").and_then(parse_css_color),
        min_height: el
            .value()
            .attr("height")
            .and_then(|h| h.trim().trim_end_matches("px").parse::<u32>().ok())
            .map(|h| h.min(MAX_PAGE_HEIGHT)),
        hidden: el.value().attr("hidden").is_some(),
    };
    if let Some(decls) = el.value().attr("style") {
        for decl in decls.split(';') {
            let Some((prop, value)) = decl.split_once(':') else { continue };
            let value = value.trim();
            match prop.trim().to_ascii_lowercase().as_str() {
                "background" | "background-color" => {
                    // shorthand: take the first token that parses as a color
                    let color = parse_css_color(value)
                        .or_else(|| value.split_whitespace().find_map(parse_css_color));
                    if color.is_some() {
                        style.background = color;
                    }
                }
                "color" => style.color = parse_css_color(value).or(style.color),
                "height" | "min-height" => {
                    if let Ok(px) = value.trim_end_matches("px").trim().parse::<f32>() {
                        style.min_height = Some((px.max(0.0) as u32).min(MAX_PAGE_HEIGHT));
                    }
                }
                "display" if value.eq_ignore_ascii_case("none") => style.hidden = true,
                _ => {}
            }
        }
    }
    style
}

struct LayoutState {
    width: u32,
    y: u32,
    commands: Vec<PaintCommand>,
}

impl LayoutState {
    fn push_text(&mut self, text: &str, scale: u32, rgb: [u8; 3]) {
        let content_w = self.width.saturating_sub(PAGE_MARGIN * 2 + BLOCK_PADDING * 2);
        let cell = CELL * scale;
        let chars_per_line = if content_w >= cell { (content_w / cell) as usize } else { 1 };
        let mut lines = Vec::new();
        let mut cur = String::new();
        for word in text.split_whitespace() {
            if cur.chars().count() + word.chars().count() + 1 > chars_per_line && !cur.is_empty() {
                lines.push(std::mem::take(&mut cur));
            }
            if !cur.is_empty() {
                cur.push(' ');
            }
            cur.push_str(word);
        }
        if !cur.is_empty() {
            lines.push(cur);
        }
        if lines.is_empty() {
            return;
        }
        let box_h = (lines.len() as u32).saturating_mul(cell).saturating_add(BLOCK_PADDING * 2);
        self.commands.push(PaintCommand::Text {
            x: (PAGE_MARGIN + BLOCK_PADDING) as i32,
            y: (self.y + BLOCK_PADDING) as i32,
            lines,
            scale,
            rgb,
        });
        self.advance(box_h.saturating_add(BLOCK_GAP));
    }

    /// Move the cursor down, never past the page height cap.
    fn advance(&mut self, dy: u32) {
        self.y = self.y.saturating_add(dy).min(MAX_PAGE_HEIGHT);
    }
}

fn heading_scale(name: &str) -> u32 {
    match name {
        "h1" => 3,
        "h2" | "h3" => 2,
        _ => 1,
    }
}

fn layout_element(el: ElementRef, color: [u8; 3], state: &mut LayoutState) {
    let name = el.value().name();
    if SKIPPED.contains(&name) {
        return;
    }
    let style = inline_style(&el);
    if style.hidden || state.y >= MAX_PAGE_HEIGHT {
        return;
    }
    let color = style.color.unwrap_or(color);
    let start_y = state.y;
    let backdrop_at = state.commands.len();

    if TEXT_BLOCKS.contains(&name) {
        let text = el.text().collect::<String>();
        state.push_text(&text, heading_scale(name), color);
    } else if name == "img" || name == "hr" {
        let w = el.value().attr("width").and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
        let h = style.min_height.unwrap_or(if name == "hr" { 2 } else { 0 });
        if w > 0 || name == "hr" {
            let width = if w > 0 { w.min(state.width.saturating_sub(PAGE_MARGIN * 2)) } else { state.width.saturating_sub(PAGE_MARGIN * 2) };
            state.commands.push(PaintCommand::SolidRect {
                x: PAGE_MARGIN as i32,
                y: state.y as i32,
                width,
                height: h,
                rgb: [128, 128, 128],
            });
            state.advance(h.saturating_add(BLOCK_GAP));
        }
    } else {
        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                layout_element(child_el, color, state);
            } else if let Some(text) = child.value().as_text() {
                let text: &str = text;
                if !text.trim().is_empty() {
                    state.push_text(text, 1, color);
                }
            }
        }
    }

    if let Some(min_h) = style.min_height {
        let bottom = start_y.saturating_add(min_h).min(MAX_PAGE_HEIGHT);
        if state.y < bottom {
            state.y = bottom;
        }
    }
    if let Some(bg) = style.background {
        let height = state.y.saturating_sub(start_y);
        if height > 0 {
            state.commands.insert(
                backdrop_at,
                PaintCommand::SolidRect {
                    x: 0,
                    y: start_y as i32,
                    width: state.width,
                    height,
                    rgb: bg,
                },
            );
        }
    }
}

/// Lay out `document` at the viewport width. Body (or html) background and
/// text colors apply to the whole page; black text on white otherwise.
pub fn layout_document(document: &Html, viewport: Viewport) -> PageLayout {
    let mut background = [255, 255, 255];
    let mut color = [0, 0, 0];

    let root = document.root_element();
    let root_style = inline_style(&root);
    if let Some(bg) = root_style.background {
        background = bg;
    }
    let body = Selector::parse("body").ok().and_then(|sel| document.select(&sel).next());
    let body_style = body.as_ref().map(inline_style);
    if let Some(style) = body_style {
        if let Some(bg) = style.background {
            background = bg;
        }
        if let Some(c) = style.color.or(root_style.color) {
            color = c;
        }
    }

    let mut state = LayoutState {
        width: viewport.width,
        y: PAGE_MARGIN,
        commands: Vec::new(),
    };
    if let Some(body) = body {
        for child in body.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                layout_element(child_el, color, &mut state);
            } else if let Some(text) = child.value().as_text() {
                let text: &str = text;
                if !text.trim().is_empty() {
                    state.push_text(text, 1, color);
                }
            }
        }
    }

    let height = state.y.saturating_add(PAGE_MARGIN).max(viewport.height).min(MAX_PAGE_HEIGHT);
    PageLayout {
        width: viewport.width,
        height,
        background,
        commands: state.commands,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn layout_document_places_headings_and_paragraphs() {
        let html = "<html><head><title>Test Title</title></head><body><h1>Heading</h1><p>Hello world</p><p>More text</p></body></html>";
        let doc = Html::parse_document(html);
        let v = Viewport { width: 200, height: 100 };
        let page = layout_document(&doc, v);
        assert_eq!(page.commands.len(), 3);
        match &page.commands[0] {
            PaintCommand::Text { scale, lines, .. } => {
                assert_eq!(*scale, 3);
                assert_eq!(lines[0], "Heading");
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(page.background, [255, 255, 255]);
    }

    #[test]
    fn body_background_and_text_color_apply() {
        let html = r#"<html><body style="background: #102030; color: white"><p>hi</p></body></html>"#;
        let page = layout_document(&Html::parse_document(html), Viewport { width: 100, height: 50 });
        assert_eq!(page.background, [16, 32, 48]);
        match &page.commands[0] {
            PaintCommand::Text { rgb, .. } => assert_eq!(*rgb, [255, 255, 255]),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn page_grows_past_viewport() {
        let mut html = String::from("<html><body>");
        for _ in 0..40 {
            html.push_str("<p>line of text</p>");
        }
        html.push_str("</body></html>");
        let page = layout_document(&Html::parse_document(&html), Viewport { width: 200, height: 100 });
        assert!(page.height > 100);
    }

    #[test]
    fn section_backdrop_is_painted_first() {
        let html = r#"<html><body><div style="background-color: red; height: 40px"><p>x</p></div></body></html>"#;
        let page = layout_document(&Html::parse_document(html), Viewport { width: 100, height: 100 });
        match &page.commands[0] {
            PaintCommand::SolidRect { rgb, height, .. } => {
                assert_eq!(*rgb, [255, 0, 0]);
                assert!(*height >= 40);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn absurd_heights_are_capped() {
        let html = r#"<html><body>
            <div height="4294967295"></div>
            <div style="height: 1e12px; background: red"><p>x</p></div>
            <hr style="height: 99999999px">
            <p>after</p>
        </body></html>"#;
        let page = layout_document(&Html::parse_document(html), Viewport { width: 40, height: 30 });
        assert_eq!(page.height, MAX_PAGE_HEIGHT);
        for cmd in &page.commands {
            if let PaintCommand::SolidRect { y, height, .. } = cmd {
                assert!(*y >= 0);
                assert!(*height <= MAX_PAGE_HEIGHT);
            }
        }
    }

    #[test]
    fn hidden_and_script_content_is_skipped() {
        let html = r#"<html><body><script>var x = 1;</script><p style="display:none">gone</p></body></html>"#;
        let page = layout_document(&Html::parse_document(html), Viewport { width: 100, height: 100 });
        assert!(page.commands.is_empty());
    }
}
