//! Millimeter to pixel conversion for the scan window

use crate::types::{NegotiationResult, ScanOptions};

/// Millimeters per inch
pub const MM_PER_INCH: f64 = 25.4;

/// Convert a length in millimeters to whole pixels at `dpi`
///
/// Rounds toward zero. Negative or NaN input yields 0 and results beyond
/// `u16::MAX` saturate.
///
/// ```
/// use protocol::mm_to_pixels;
///
/// assert_eq!(mm_to_pixels(25.4, 300), 300);
/// assert_eq!(mm_to_pixels(0.0, 300), 0);
/// ```
pub fn mm_to_pixels(mm: f64, dpi: u16) -> u16 {
    (mm * f64::from(dpi) / MM_PER_INCH).floor() as u16
}

/// Pixel geometry of a scan window, in command order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanWindow {
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
}

impl ScanWindow {
    /// Build the window for `opts` at the negotiated resolution
    ///
    /// Horizontal values use the horizontal DPI and vertical values the
    /// vertical DPI. Width and height never exceed the scan area the device
    /// reported, converted through the same formula.
    pub fn clamped(opts: &ScanOptions, neg: &NegotiationResult) -> Self {
        let h = neg.horizontal_dpi;
        let v = neg.vertical_dpi;

        let max_width = mm_to_pixels(f64::from(neg.scan_width), h);
        let max_height = mm_to_pixels(f64::from(neg.scan_height), v);

        Self {
            left: mm_to_pixels(opts.left, h),
            top: mm_to_pixels(opts.top, v),
            width: mm_to_pixels(opts.width, h).min(max_width),
            height: mm_to_pixels(opts.height, v).min(max_height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Compression, ScanMode};

    fn negotiated(dpi: u16, scan_width: u16, scan_height: u16) -> NegotiationResult {
        NegotiationResult {
            horizontal_dpi: dpi,
            vertical_dpi: dpi,
            scan_width,
            scan_height,
            ..Default::default()
        }
    }

    fn options(width: f64, height: f64) -> ScanOptions {
        ScanOptions {
            dpi: 300,
            mode: ScanMode::CGray,
            compression: Compression::Jpeg,
            top: 0.0,
            left: 0.0,
            width,
            height,
        }
    }

    #[test]
    fn test_one_inch_is_dpi_pixels() {
        assert_eq!(mm_to_pixels(25.4, 300), 300);
        assert_eq!(mm_to_pixels(25.4, 600), 600);
        assert_eq!(mm_to_pixels(0.0, 300), 0);
    }

    #[test]
    fn test_rounds_toward_zero() {
        // 211.881mm at 300dpi is 2502.53 pixels
        assert_eq!(mm_to_pixels(211.881, 300), 2502);
    }

    #[test]
    fn test_exact_pixel_boundaries() {
        // Multiply before dividing so whole-pixel lengths are not lost to rounding
        assert_eq!(mm_to_pixels(64.77, 100), 255);
        assert_eq!(mm_to_pixels(110.49, 100), 435);
        assert_eq!(mm_to_pixels(167.64, 75), (167.64 * 75.0 / MM_PER_INCH).floor() as u16);
    }

    #[test]
    fn test_negative_and_huge_saturate() {
        assert_eq!(mm_to_pixels(-5.0, 300), 0);
        assert_eq!(mm_to_pixels(1.0e9, 600), u16::MAX);
    }

    #[test]
    fn test_non_decreasing_in_mm() {
        for dpi in [75u16, 100, 150, 200, 300, 400, 600] {
            let mut last = 0;
            for step in 0..5000 {
                let px = mm_to_pixels(f64::from(step) * 0.1, dpi);
                assert!(px >= last, "dpi {} step {}", dpi, step);
                last = px;
            }
        }
    }

    #[test]
    fn test_window_clamped_to_device_area() {
        // Device reports 100 x 100, i.e. 1181 x 1181 pixels at 300dpi
        let window = ScanWindow::clamped(&options(211.881, 355.567), &negotiated(300, 100, 100));
        assert_eq!(window.width, 1181);
        assert_eq!(window.height, 1181);
    }

    #[test]
    fn test_window_below_limit_passes_through() {
        let window = ScanWindow::clamped(&options(50.8, 25.4), &negotiated(300, 2480, 3437));
        assert_eq!(window.width, 600);
        assert_eq!(window.height, 300);
    }

    #[test]
    fn test_window_uses_axis_dpi() {
        let neg = NegotiationResult {
            horizontal_dpi: 300,
            vertical_dpi: 600,
            scan_width: 2480,
            scan_height: 3437,
            ..Default::default()
        };
        let mut opts = options(25.4, 25.4);
        opts.left = 25.4;
        opts.top = 25.4;

        let window = ScanWindow::clamped(&opts, &neg);
        assert_eq!(window.left, 300);
        assert_eq!(window.top, 600);
        assert_eq!(window.width, 300);
        assert_eq!(window.height, 600);
    }
}
