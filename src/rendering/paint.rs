//! Paint command set consumed by the rasterizer

/// Width and height of one character cell at scale 1, in pixels.
pub const CELL: u32 = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rgb: [u8; 3],
    },
    /// Pre-wrapped text. Every non-blank character paints one glyph block.
    Text {
        x: i32,
        y: i32,
        lines: Vec<String>,
        scale: u32,
        rgb: [u8; 3],
    },
}

/// Parse the CSS color forms that show up in inline styles and legacy
/// `bgcolor`/`text` attributes: `#rgb`, `#rrggbb`, `rgb(r, g, b)` and a
/// handful of named colors.
pub fn parse_css_color(value: &str) -> Option<[u8; 3]> {
    let v = value.trim().trim_end_matches("!important").trim().to_ascii_lowercase();
    if let Some(hex) = v.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(args) = v.strip_prefix("rgb(").or_else(|| v.strip_prefix("rgba(")) {
        let args = args.trim_end_matches(')');
        let parts: Vec<u8> = args
            .split(',')
            .take(3)
            .filter_map(|p| p.trim().parse::<f32>().ok())
            .map(|n| n.clamp(0.0, 255.0).round() as u8)
            .collect();
        if parts.len() == 3 {
            return Some([parts[0], parts[1], parts[2]]);
        }
        return None;
    }
    named_color(&v)
}

fn parse_hex(hex: &str) -> Option<[u8; 3]> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        3 => {
            let mut out = [0u8; 3];
            for (i, c) in hex.chars().enumerate() {
                let d = c.to_digit(16)? as u8;
                out[i] = d * 17;
            }
            Some(out)
        }
        6 => {
            let mut out = [0u8; 3];
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
            }
            Some(out)
        }
        _ => None,
    }
}

fn named_color(name: &str) -> Option<[u8; 3]> {
    let rgb = match name {
        "black" => [0, 0, 0],
        "white" => [255, 255, 255],
        "red" => [255, 0, 0],
        "green" => [0, 128, 0],
        "lime" => [0, 255, 0],
        "blue" => [0, 0, 255],
        "navy" => [0, 0, 128],
        "yellow" => [255, 255, 0],
        "orange" => [255, 165, 0],
        "purple" => [128, 0, 128],
        "fuchsia" | "magenta" => [255, 0, 255],
        "aqua" | "cyan" => [0, 255, 255],
        "teal" => [0, 128, 128],
        "maroon" => [128, 0, 0],
        "olive" => [128, 128, 0],
        "silver" => [192, 192, 192],
        "gray" | "grey" => [128, 128, 128],
        "pink" => [255, 192, 203],
        _ => return None,
    };
    Some(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_forms() {
        assert_eq!(parse_css_color("#fff"), Some([255, 255, 255]));
        assert_eq!(parse_css_color("#1E90FF"), Some([30, 144, 255]));
        assert_eq!(parse_css_color("#12345"), None);
    }

    #[test]
    fn parses_rgb_and_names() {
        assert_eq!(parse_css_color("rgb(10, 20, 300)"), Some([10, 20, 255]));
        assert_eq!(parse_css_color(" Teal !important"), Some([0, 128, 128]));
        assert_eq!(parse_css_color("transparent"), None);
    }
}
