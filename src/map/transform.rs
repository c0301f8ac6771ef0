//! Planar coordinate to viewport pixel mapping.
//!
//! A floor plan image is fitted into its container with "contain" scaling,
//! which yields a [`DrawBox`]. A [`Calibration`] rectangle then maps the
//! building's metric coordinates onto that box. The planar y axis grows
//! upward while pixel rows grow downward, so y is inverted.

use serde::{Deserialize, Serialize};

use crate::models::{PlanarPoint, Xy};

/// Nudge applied to a collapsed calibration axis.
pub const CAL_EPSILON: f64 = 0.001;

// ---

/// Width and height in pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    // ---
    pub w: f64,
    pub h: f64,
}

impl Size {
    pub fn new(w: f64, h: f64) -> Self {
        Self { w, h }
    }
}

/// Pixel coordinate relative to the container's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pixel {
    // ---
    pub left: f64,
    pub top: f64,
}

impl Pixel {
    /// Snap to whole pixels, as used for overlay markers.
    pub fn rounded(self) -> Pixel {
        Pixel {
            left: self.left.round(),
            top: self.top.round(),
        }
    }
}

/// Region of the container actually covered by the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawBox {
    // ---
    pub off_x: f64,
    pub off_y: f64,
    pub draw_w: f64,
    pub draw_h: f64,
    pub scale: f64,
}

impl DrawBox {
    /// Box of zero extent at the container origin.
    pub const EMPTY: DrawBox = DrawBox {
        off_x: 0.0,
        off_y: 0.0,
        draw_w: 0.0,
        draw_h: 0.0,
        scale: 1.0,
    };

    /// Fit an image of intrinsic size `image` into `container`, preserving
    /// its aspect ratio and centering it on both axes.
    ///
    /// A zero-size container (not yet laid out) or a zero-size image yields
    /// [`DrawBox::EMPTY`]; every point then collapses onto the origin.
    pub fn contain(container: Size, image: Size) -> DrawBox {
        // ---
        if container.w <= 0.0 || container.h <= 0.0 || image.w <= 0.0 || image.h <= 0.0 {
            return DrawBox::EMPTY;
        }

        let scale = (container.w / image.w).min(container.h / image.h);
        let draw_w = image.w * scale;
        let draw_h = image.h * scale;

        DrawBox {
            off_x: (container.w - draw_w) / 2.0,
            off_y: (container.h - draw_h) / 2.0,
            draw_w,
            draw_h,
            scale,
        }
    }

    /// Box placed at the origin with the given extent, no fitting involved.
    pub fn at_origin(extent: Size) -> DrawBox {
        DrawBox {
            off_x: 0.0,
            off_y: 0.0,
            draw_w: extent.w,
            draw_h: extent.h,
            scale: 1.0,
        }
    }

    pub fn contains(&self, px: Pixel) -> bool {
        // ---
        px.left >= self.off_x
            && px.left <= self.off_x + self.draw_w
            && px.top >= self.off_y
            && px.top <= self.off_y + self.draw_h
    }
}

/// Planar bounds mapped onto the draw box.
///
/// Always satisfies `x1 > x0` and `y1 > y0` when built through
/// [`Calibration::new`]; the transform relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    // ---
    pub x0: f64,
    pub x1: f64,
    pub y0: f64,
    pub y1: f64,
}

/// One bound of a [`Calibration`], for single-edge adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    // ---
    X0,
    X1,
    Y0,
    Y1,
}

impl Calibration {
    // ---
    /// Build a calibration, nudging a collapsed or inverted axis so that the
    /// upper bound sits [`CAL_EPSILON`] past the lower one.
    pub fn new(x0: f64, x1: f64, y0: f64, y1: f64) -> Calibration {
        // ---
        let x1 = if x1 <= x0 { x0 + CAL_EPSILON } else { x1 };
        let y1 = if y1 <= y0 { y0 + CAL_EPSILON } else { y1 };
        Calibration { x0, x1, y0, y1 }
    }

    /// Re-apply the axis guard, e.g. after deserializing untrusted bounds.
    pub fn sanitized(self) -> Calibration {
        Calibration::new(self.x0, self.x1, self.y0, self.y1)
    }

    /// Bounding calibration of a node manifest, padded on every side.
    ///
    /// Returns `None` for an empty manifest.
    pub fn from_points(points: &[PlanarPoint], pad: f64) -> Option<Calibration> {
        // ---
        let first = points.first()?;
        let init = (first.x, first.x, first.y, first.y);
        let (min_x, max_x, min_y, max_y) = points.iter().fold(init, |(x0, x1, y0, y1), p| {
            (x0.min(p.x), x1.max(p.x), y0.min(p.y), y1.max(p.y))
        });
        Some(Calibration::new(min_x - pad, max_x + pad, min_y - pad, max_y + pad))
    }

    /// Copy with one bound moved by `delta`, guarded.
    pub fn bumped(&self, edge: Edge, delta: f64) -> Calibration {
        // ---
        let Calibration { mut x0, mut x1, mut y0, mut y1 } = *self;
        match edge {
            Edge::X0 => x0 += delta,
            Edge::X1 => x1 += delta,
            Edge::Y0 => y0 += delta,
            Edge::Y1 => y1 += delta,
        }
        Calibration::new(x0, x1, y0, y1)
    }

    /// Map a planar coordinate into the draw box.
    pub fn to_pixel(&self, p: Xy, draw: &DrawBox) -> Pixel {
        // ---
        let nx = (p.x - self.x0) / (self.x1 - self.x0);
        let ny = (self.y1 - p.y) / (self.y1 - self.y0);
        Pixel {
            left: draw.off_x + nx * draw.draw_w,
            top: draw.off_y + ny * draw.draw_h,
        }
    }
}

/// SVG-style `points` attribute for a path: `"x,y x,y ..."`.
///
/// Fewer than two points cannot form a line and render as an empty string.
pub fn polyline(path: &[Xy], cal: &Calibration, draw: &DrawBox) -> String {
    // ---
    if path.len() < 2 {
        return String::new();
    }

    path.iter()
        .map(|p| {
            let px = cal.to_pixel(*p, draw);
            format!("{:.2},{:.2}", px.left, px.top)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Diameter of node markers, scaled with the drawn map width.
pub fn marker_size(draw: &DrawBox) -> f64 {
    (draw.draw_w / 48.0).clamp(5.0, 12.0)
}
