//! Watermark font lookup.
//!
//! Tier one is an outline font: the configured file, else the first entry of
//! [`SYSTEM_FONT_CANDIDATES`] that covers the text. Tier two is the bitmap font compiled
//! into the binary, which always loads.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle};
use fontdue::{Font, FontSettings};
use tracing::{debug, warn};

use crate::font_data::{
    ASCII_END, ASCII_START, BUILTIN_GLYPHS, GLYPH_HEIGHT, GLYPH_WIDTH,
};

/// Latin fonts first, then CJK-capable ones. Each is skipped unless it covers
/// every glyph of the watermark text.
pub const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
    "C:\\Windows\\Fonts\\segoeui.ttf",
    "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/noto-cjk/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/google-noto-cjk/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/truetype/wqy/wqy-microhei.ttc",
    "/System/Library/Fonts/PingFang.ttc",
    "/System/Library/Fonts/STHeiti Medium.ttc",
    "C:\\Windows\\Fonts\\msyh.ttc",
    "C:\\Windows\\Fonts\\simsun.ttc",
];

/// Coverage mask of rendered text, cropped to its ink bounding box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMask {
    pub width: u32,
    pub height: u32,
    pub coverage: Vec<u8>,
}

impl TextMask {
    fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            coverage: vec![0; (width as usize) * (height as usize)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn at(&self, x: u32, y: u32) -> u8 {
        self.coverage[(y * self.width + x) as usize]
    }

    fn max_into(&mut self, x: u32, y: u32, value: u8) {
        if x < self.width && y < self.height {
            let idx = (y * self.width + x) as usize;
            self.coverage[idx] = self.coverage[idx].max(value);
        }
    }
}

pub enum WatermarkFont {
    Outline { font: Font, origin: PathBuf },
    Builtin,
}

impl std::fmt::Debug for WatermarkFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outline { origin, .. } => f
                .debug_struct("Outline")
                .field("origin", origin)
                .finish_non_exhaustive(),
            Self::Builtin => f.write_str("Builtin"),
        }
    }
}

impl WatermarkFont {
    pub fn label(&self) -> String {
        match self {
            Self::Outline { origin, .. } => origin.display().to_string(),
            Self::Builtin => "builtin 5x7".to_owned(),
        }
    }

    pub fn rasterize(&self, text: &str, size: f32) -> TextMask {
        match self {
            Self::Outline { font, .. } => rasterize_outline(font, text, size),
            Self::Builtin => rasterize_builtin(text, size),
        }
    }
}

pub fn load_outline_font(path: &Path) -> Result<Font> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read font file '{}'", path.display()))?;
    Font::from_bytes(bytes, FontSettings::default())
        .map_err(|error| anyhow!("failed to parse font '{}': {error}", path.display()))
}

/// Pick the watermark font for `text`: the explicit font, then the system
/// candidates, then the builtin font. Never fails: any outline font that is
/// missing, unparsable or lacks a glyph for `text` is skipped.
pub fn resolve_watermark_font(explicit: Option<&Path>, text: &str) -> WatermarkFont {
    if let Some(path) = explicit {
        match load_outline_font(path) {
            Ok(font) if supports_text(&font, text) => {
                debug!(font = %path.display(), "watermark font resolved");
                return WatermarkFont::Outline {
                    font,
                    origin: path.to_path_buf(),
                };
            }
            Ok(_) => warn!(
                font = %path.display(),
                "font lacks glyphs for the watermark text, trying system fonts"
            ),
            Err(error) => warn!("{error:#}; trying system fonts"),
        }
    }

    for candidate in SYSTEM_FONT_CANDIDATES {
        let path = Path::new(candidate);
        if !path.is_file() {
            continue;
        }
        match load_outline_font(path) {
            Ok(font) if supports_text(&font, text) => {
                debug!(font = %path.display(), "watermark font resolved");
                return WatermarkFont::Outline {
                    font,
                    origin: path.to_path_buf(),
                };
            }
            Ok(_) => debug!(font = %path.display(), "font lacks glyphs, skipping"),
            Err(error) => debug!("{error:#}"),
        }
    }

    warn!("no outline font covers the watermark text, using builtin font");
    WatermarkFont::Builtin
}

pub fn supports_text(font: &Font, text: &str) -> bool {
    text.chars()
        .filter(|ch| !ch.is_whitespace())
        .all(|ch| font.lookup_glyph_index(ch) != 0)
}

fn rasterize_outline(font: &Font, text: &str, size: f32) -> TextMask {
    let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
    layout.reset(&LayoutSettings {
        x: 0.0,
        y: 0.0,
        max_width: None,
        max_height: None,
        horizontal_align: fontdue::layout::HorizontalAlign::Left,
        vertical_align: fontdue::layout::VerticalAlign::Top,
        line_height: 1.0,
        wrap_style: fontdue::layout::WrapStyle::Letter,
        wrap_hard_breaks: true,
    });
    layout.append(&[font], &TextStyle::new(text, size, 0));

    let inked = layout
        .glyphs()
        .iter()
        .filter(|glyph| glyph.width > 0 && glyph.height > 0)
        .map(|glyph| {
            (
                glyph.x.round() as i32,
                glyph.y.round() as i32,
                glyph,
            )
        })
        .collect::<Vec<_>>();
    if inked.is_empty() {
        return TextMask::blank(0, 0);
    }

    let min_x = inked.iter().map(|(x, _, _)| *x).min().unwrap_or(0);
    let min_y = inked.iter().map(|(_, y, _)| *y).min().unwrap_or(0);
    let max_x = inked
        .iter()
        .map(|(x, _, glyph)| x + glyph.width as i32)
        .max()
        .unwrap_or(0);
    let max_y = inked
        .iter()
        .map(|(_, y, glyph)| y + glyph.height as i32)
        .max()
        .unwrap_or(0);

    let mut mask = TextMask::blank((max_x - min_x) as u32, (max_y - min_y) as u32);
    for (x, y, glyph) in inked {
        let (_, bitmap) = font.rasterize_config(glyph.key);
        for row in 0..glyph.height {
            for col in 0..glyph.width {
                let value = bitmap[row * glyph.width + col];
                if value > 0 {
                    mask.max_into(
                        (x - min_x) as u32 + col as u32,
                        (y - min_y) as u32 + row as u32,
                        value,
                    );
                }
            }
        }
    }
    mask
}

/// Integer magnification of the 5x7 cell that best matches `size` pixels.
pub fn builtin_scale(size: f32) -> u32 {
    ((size / 8.0).round() as u32).max(1)
}

fn rasterize_builtin(text: &str, size: f32) -> TextMask {
    let scale = builtin_scale(size);
    let count = text.chars().count() as u32;
    if count == 0 {
        return TextMask::blank(0, 0);
    }

    let advance = (GLYPH_WIDTH + 1) * scale;
    let width = advance * count - scale;
    let height = GLYPH_HEIGHT * scale;
    let mut mask = TextMask::blank(width, height);

    for (index, ch) in text.chars().enumerate() {
        let rows = builtin_glyph(ch);
        let origin_x = index as u32 * advance;
        for (y, row_mask) in rows.iter().enumerate() {
            for x in 0..GLYPH_WIDTH {
                if (row_mask >> (GLYPH_WIDTH - 1 - x)) & 1 == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        mask.max_into(
                            origin_x + x * scale + dx,
                            y as u32 * scale + dy,
                            255,
                        );
                    }
                }
            }
        }
    }
    mask
}

fn builtin_glyph(ch: char) -> &'static [u8] {
    let code = u32::from(ch);
    let index = if (u32::from(ASCII_START)..=u32::from(ASCII_END)).contains(&code) {
        (code - u32::from(ASCII_START)) as usize
    } else {
        usize::from(b'?' - ASCII_START)
    };
    &BUILTIN_GLYPHS[index]
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{
        builtin_scale, load_outline_font, resolve_watermark_font, supports_text, WatermarkFont,
        SYSTEM_FONT_CANDIDATES,
    };

    #[test]
    fn builtin_mask_has_expected_extent() {
        let mask = WatermarkFont::Builtin.rasterize("AB", 12.0);
        assert_eq!(builtin_scale(12.0), 2);
        assert_eq!((mask.width, mask.height), (22, 14));
        // top row of 'A' is .###. so column 0 is empty and column 1 is inked
        assert_eq!(mask.at(0, 0), 0);
        assert_eq!(mask.at(2, 0), 255);
        // the gap column between glyphs stays clear
        assert!((0..mask.height).all(|y| mask.at(10, y) == 0 && mask.at(11, y) == 0));
    }

    #[test]
    fn unknown_characters_render_as_question_mark() {
        let unknown = WatermarkFont::Builtin.rasterize("\u{00e9}", 8.0);
        let question = WatermarkFont::Builtin.rasterize("?", 8.0);
        assert_eq!(unknown, question);
    }

    #[test]
    fn empty_text_has_no_extent() {
        assert!(WatermarkFont::Builtin.rasterize("", 20.0).is_empty());
    }

    #[test]
    fn unreadable_explicit_font_is_skipped() {
        let missing = Path::new("/no/such/font.ttf");
        let font = resolve_watermark_font(Some(missing), "hello");
        assert!(!is_outline_from(&font, missing));

        let dir = tempfile::tempdir().unwrap();
        let junk = dir.path().join("junk.ttf");
        std::fs::write(&junk, b"not a font").unwrap();
        let font = resolve_watermark_font(Some(&junk), "hello");
        assert!(!is_outline_from(&font, &junk));
    }

    #[test]
    fn candidates_include_cjk_fonts() {
        assert!(SYSTEM_FONT_CANDIDATES
            .iter()
            .any(|path| path.contains("NotoSansCJK")));
        assert!(SYSTEM_FONT_CANDIDATES.iter().any(|path| path.contains("msyh")));
        assert!(SYSTEM_FONT_CANDIDATES
            .iter()
            .any(|path| path.contains("PingFang")));
    }

    #[test]
    fn cjk_text_uses_an_installed_cjk_font() {
        let text = "\u{6c34}\u{5370}";
        let installed = SYSTEM_FONT_CANDIDATES.iter().any(|candidate| {
            load_outline_font(Path::new(candidate))
                .map(|font| supports_text(&font, text))
                .unwrap_or(false)
        });
        let font = resolve_watermark_font(None, text);
        assert_eq!(matches!(font, WatermarkFont::Outline { .. }), installed);
        if installed {
            let mask = font.rasterize(text, 24.0);
            assert_ne!(mask, WatermarkFont::Builtin.rasterize("??", 24.0));
        }
    }

    fn is_outline_from(font: &WatermarkFont, path: &Path) -> bool {
        matches!(font, WatermarkFont::Outline { origin, .. } if origin == path)
    }
}
