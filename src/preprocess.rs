use std::path::Path;

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{ImageReader, RgbImage};
use tracing::{debug, info};

use crate::error_codes::CodedError;
use crate::geometry::{reconcile_window, WindowGeometry};

/// Decoded source image, normalised to RGB8. Read-only once loaded.
#[derive(Debug, Clone)]
pub struct SourceImage {
    image: RgbImage,
}

impl SourceImage {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// The resampled image plus the window geometry reconciled against its width.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub scaled: RgbImage,
    pub geometry: WindowGeometry,
}

pub fn load_source(path: &Path) -> Result<SourceImage> {
    let unavailable = |reason: String| {
        anyhow!(CodedError::source_unavailable(format!(
            "cannot read source image {}: {reason}",
            path.display()
        )))
    };

    if !path.is_file() {
        return Err(unavailable("file does not exist".to_owned()));
    }

    let reader = ImageReader::open(path).map_err(|error| unavailable(error.to_string()))?;
    let reader = reader
        .with_guessed_format()
        .map_err(|error| unavailable(error.to_string()))?;
    let decoded = reader
        .decode()
        .map_err(|error| unavailable(error.to_string()))?;
    let image = decoded.to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(unavailable("image has no pixels".to_owned()));
    }

    info!(
        width = image.width(),
        height = image.height(),
        "loaded source image"
    );
    Ok(SourceImage { image })
}

/// Pixel size after applying `target_width / source_width * quality`.
pub fn scaled_dimensions(source: (u32, u32), target_width: u32, quality: f64) -> (u32, u32) {
    let (source_width, source_height) = source;
    let scale = f64::from(target_width) / f64::from(source_width) * quality;
    let width = (f64::from(source_width) * scale).round().max(1.0) as u32;
    let height = (f64::from(source_height) * scale).round().max(1.0) as u32;
    (width, height)
}

/// Resample the source with Lanczos3 and rebase the window onto the
/// resampled width. `target_width` is provisional; the returned geometry's
/// width is the effective width every later stage uses.
pub fn prepare(
    source: &SourceImage,
    target_width: u32,
    window_height: u32,
    quality: f64,
) -> PreparedImage {
    let (new_width, new_height) = scaled_dimensions(source.dimensions(), target_width, quality);

    let scaled = if (new_width, new_height) == source.dimensions() {
        source.image.clone()
    } else {
        imageops::resize(&source.image, new_width, new_height, FilterType::Lanczos3)
    };

    let geometry = reconcile_window(target_width, window_height, new_width);
    if geometry.width != target_width {
        debug!(
            target_width,
            effective_width = geometry.width,
            "window rebased onto resampled width"
        );
    }
    info!(
        scaled_width = scaled.width(),
        scaled_height = scaled.height(),
        window_width = geometry.width,
        window_height = geometry.height,
        "prepared scaled image"
    );

    PreparedImage { scaled, geometry }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use crate::error_codes::{find_coded_error, CodedErrorKind};
    use crate::geometry::WindowGeometry;

    use super::{load_source, prepare, scaled_dimensions, SourceImage};

    #[test]
    fn quality_factor_shrinks_output() {
        assert_eq!(scaled_dimensions((800, 3000), 800, 1.0), (800, 3000));
        assert_eq!(scaled_dimensions((800, 3000), 800, 0.8), (640, 2400));
        assert_eq!(scaled_dimensions((1600, 4000), 800, 1.0), (800, 2000));
        // 333 * (500 / 333) * 0.5 = 250
        assert_eq!(scaled_dimensions((333, 1000), 500, 0.5), (250, 751));
    }

    #[test]
    fn prepare_rebases_window_after_resampling() {
        let source = SourceImage::from_rgb(RgbImage::from_pixel(100, 400, Rgb([10, 20, 30])));
        let prepared = prepare(&source, 100, 56, 0.5);

        assert_eq!(prepared.scaled.dimensions(), (50, 200));
        assert_eq!(
            prepared.geometry,
            WindowGeometry {
                width: 50,
                height: 28
            }
        );
    }

    #[test]
    fn unchanged_size_keeps_pixels_exact() {
        let mut image = RgbImage::new(8, 32);
        for (_, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgb([y as u8 * 7, 0, 255 - y as u8]);
        }
        let source = SourceImage::from_rgb(image.clone());
        let prepared = prepare(&source, 8, 8, 1.0);
        assert_eq!(prepared.scaled, image);
    }

    #[test]
    fn missing_file_is_source_unavailable() {
        let error = load_source(std::path::Path::new("/no/such/image.png")).unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.kind),
            Some(CodedErrorKind::SourceUnavailable)
        );
    }

    #[test]
    fn undecodable_file_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();

        let error = load_source(&path).unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.kind),
            Some(CodedErrorKind::SourceUnavailable)
        );
    }
}
