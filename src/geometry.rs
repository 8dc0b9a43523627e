use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::config::AspectMode;
use crate::error_codes::{CodedError, CodedErrorKind};

pub const DEFAULT_RATIO: (u32, u32) = (16, 9);

/// Canvas size shared by every frame of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowGeometry {
    pub width: u32,
    pub height: u32,
}

/// Parse a `w:h` token into two positive integers.
pub fn parse_ratio_token(token: &str) -> Result<(u32, u32)> {
    let invalid = || {
        anyhow!(CodedError::new(
            CodedErrorKind::InvalidGeometry,
            format!("invalid aspect ratio '{token}', expected w:h with positive integers"),
        )
        .with_details(json!({ "provided": token })))
    };

    let (w, h) = token.trim().split_once(':').ok_or_else(invalid)?;
    let w = w.trim().parse::<u32>().map_err(|_| invalid())?;
    let h = h.trim().parse::<u32>().map_err(|_| invalid())?;
    if w == 0 || h == 0 {
        return Err(invalid());
    }
    Ok((w, h))
}

/// `round(value * numerator / denominator)`, never below one pixel.
pub fn scale_rounded(value: u32, numerator: u32, denominator: u32) -> u32 {
    let scaled = (f64::from(value) * f64::from(numerator) / f64::from(denominator)).round();
    scaled.clamp(1.0, f64::from(u32::MAX)) as u32
}

/// Window height for `target_width` under `aspect`.
///
/// `source_dims` is the loaded source image size; the `source` mode fails
/// with `NOT_READY` without it. A malformed ratio token is not an error: it
/// degrades to 16:9.
pub fn resolve_window_height(
    target_width: u32,
    aspect: &AspectMode,
    explicit_height: Option<u32>,
    source_dims: Option<(u32, u32)>,
) -> Result<u32> {
    match aspect {
        AspectMode::Source => {
            let (source_width, source_height) = source_dims.ok_or_else(|| {
                anyhow!(CodedError::new(
                    CodedErrorKind::NotReady,
                    "aspect ratio 'source' needs the source image loaded first",
                ))
            })?;
            if source_width == 0 {
                return Err(anyhow!(CodedError::source_unavailable(
                    "source image has zero width"
                )));
            }
            Ok(scale_rounded(target_width, source_height, source_width))
        }
        AspectMode::Custom => match explicit_height {
            Some(height) if height > 0 => Ok(height),
            _ => Err(anyhow!(CodedError::usage(
                "aspect ratio 'custom' requires a positive output_height"
            ))),
        },
        AspectMode::Ratio(token) => {
            let (w, h) = parse_ratio_token(token).unwrap_or_else(|error| {
                warn!("{error}; falling back to 16:9");
                DEFAULT_RATIO
            });
            Ok(scale_rounded(target_width, h, w))
        }
    }
}

/// Rebase the provisional window onto the width the resampler actually produced.
pub fn reconcile_window(
    target_width: u32,
    window_height: u32,
    effective_width: u32,
) -> WindowGeometry {
    let height = if effective_width == target_width {
        window_height
    } else {
        scale_rounded(window_height, effective_width, target_width)
    };
    WindowGeometry {
        width: effective_width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use crate::config::AspectMode;
    use crate::error_codes::{find_coded_error, CodedErrorKind};

    use super::{parse_ratio_token, reconcile_window, resolve_window_height, WindowGeometry};

    fn ratio(token: &str) -> AspectMode {
        AspectMode::Ratio(token.to_owned())
    }

    #[test]
    fn ratio_tokens_scale_width() {
        assert_eq!(resolve_window_height(800, &ratio("16:9"), None, None).unwrap(), 450);
        assert_eq!(resolve_window_height(800, &ratio("4:3"), None, None).unwrap(), 600);
        assert_eq!(resolve_window_height(800, &ratio("1:1"), None, None).unwrap(), 800);
        // 100 * 2 / 3 = 66.67
        assert_eq!(resolve_window_height(100, &ratio("3:2"), None, None).unwrap(), 67);
    }

    #[test]
    fn malformed_tokens_fall_back_to_sixteen_nine() {
        for token in ["", "16x9", "a:b", "16:", ":9", "0:9", "16:0", "-4:3", "1:2:3"] {
            let height = resolve_window_height(800, &ratio(token), None, None)
                .unwrap_or_else(|error| panic!("token {token:?} must not fail: {error}"));
            assert_eq!(height, 450, "token {token:?}");
        }
    }

    #[test]
    fn parse_reports_invalid_geometry() {
        let error = parse_ratio_token("wide").unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.kind),
            Some(CodedErrorKind::InvalidGeometry)
        );
        assert_eq!(parse_ratio_token(" 21 : 9 ").unwrap(), (21, 9));
    }

    #[test]
    fn source_mode_requires_loaded_image() {
        let error = resolve_window_height(800, &AspectMode::Source, None, None).unwrap_err();
        assert_eq!(
            find_coded_error(&error).map(|coded| coded.kind),
            Some(CodedErrorKind::NotReady)
        );

        let height =
            resolve_window_height(800, &AspectMode::Source, None, Some((1600, 900))).unwrap();
        assert_eq!(height, 450);
    }

    #[test]
    fn custom_mode_uses_explicit_height() {
        let height = resolve_window_height(800, &AspectMode::Custom, Some(321), None).unwrap();
        assert_eq!(height, 321);
        assert!(resolve_window_height(800, &AspectMode::Custom, None, None).is_err());
    }

    #[test]
    fn reconcile_rescales_height_to_effective_width() {
        assert_eq!(
            reconcile_window(800, 450, 640),
            WindowGeometry {
                width: 640,
                height: 360
            }
        );
        assert_eq!(
            reconcile_window(800, 450, 800),
            WindowGeometry {
                width: 800,
                height: 450
            }
        );
    }
}
