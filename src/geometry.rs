//! Scroll depth derivation

use crate::host::GeometryProbe;

/// Percentage of the scrollable distance reached, in `[0, 100]`.
///
/// Pages without a vertical scrollbar always report 100.
pub fn scroll_depth(probe: &dyn GeometryProbe, scroll_max: f64) -> u8 {
    if !probe.has_vertical_scroll() {
        return 100;
    }

    let scrollable = probe.document_height() - probe.viewport_height();
    if scrollable <= 0.0 {
        return 100;
    }

    let pct = (scroll_max / scrollable * 100.0).floor();
    if pct.is_nan() || pct <= 0.0 {
        0
    } else if pct >= 100.0 {
        100
    } else {
        pct as u8
    }
}

/// Scroll depth bucketed to tenths (0-10), as kept in the scroll cache
pub fn scroll_decile(depth: u8) -> u8 {
    depth.min(100) / 10
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedGeometry {
        document: f64,
        viewport: f64,
        scrolls: bool,
    }

    impl GeometryProbe for FixedGeometry {
        fn document_height(&self) -> f64 {
            self.document
        }
        fn viewport_height(&self) -> f64 {
            self.viewport
        }
        fn has_vertical_scroll(&self) -> bool {
            self.scrolls
        }
    }

    fn tall_page() -> FixedGeometry {
        FixedGeometry {
            document: 3000.0,
            viewport: 1000.0,
            scrolls: true,
        }
    }

    #[test]
    fn test_no_vertical_scroll_reports_full_depth() {
        let probe = FixedGeometry {
            document: 800.0,
            viewport: 1000.0,
            scrolls: false,
        };
        assert_eq!(scroll_depth(&probe, 0.0), 100);
    }

    #[test]
    fn test_partial_depth_is_floored() {
        assert_eq!(scroll_depth(&tall_page(), 0.0), 0);
        assert_eq!(scroll_depth(&tall_page(), 999.0), 49);
        assert_eq!(scroll_depth(&tall_page(), 1000.0), 50);
    }

    #[test]
    fn test_depth_is_clamped() {
        assert_eq!(scroll_depth(&tall_page(), 5000.0), 100);
        assert_eq!(scroll_depth(&tall_page(), -20.0), 0);
    }

    #[test]
    fn test_degenerate_geometry() {
        let probe = FixedGeometry {
            document: 1000.0,
            viewport: 1000.0,
            scrolls: true,
        };
        assert_eq!(scroll_depth(&probe, 10.0), 100);
    }

    #[test]
    fn test_decile() {
        assert_eq!(scroll_decile(0), 0);
        assert_eq!(scroll_decile(59), 5);
        assert_eq!(scroll_decile(100), 10);
    }
}
