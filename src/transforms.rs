//! Crop selection and the stochastic transform pipeline.
//!
//! Every iteration evaluates the objective through a freshly sampled crop
//! window and, when enabled, a jitter / scale / rotate / jitter chain. All
//! stages are linear in the image, so each records its sampled parameters
//! and exposes an exact adjoint for the backward pass.

use ndarray::{s, Array3};
use rand::Rng;

/// Jitter translation magnitude in pixels.
pub const JITTER: i64 = 2;

/// Rotation bound in integer degrees.
pub const ROTATE_DEGREES: i64 = 10;

/// Sample a crop window origin: both offsets uniform in `[0, full - crop)`.
///
/// Precondition: `crop < full`.
pub fn crop_offsets(full: usize, crop: usize, rng: &mut impl Rng) -> (usize, usize) {
    debug_assert!(crop < full);
    let oy = rng.gen_range(0..full - crop);
    let ox = rng.gen_range(0..full - crop);
    (oy, ox)
}

/// Extract a square `crop`-sized window at `(oy, ox)`.
pub fn crop(img: &Array3<f32>, oy: usize, ox: usize, crop: usize) -> Array3<f32> {
    img.slice(s![oy..oy + crop, ox..ox + crop, ..]).to_owned()
}

/// Adjoint of [`crop`]: embed the window gradient into zeros at the offset.
pub fn crop_adjoint(grad: &Array3<f32>, full: usize, oy: usize, ox: usize) -> Array3<f32> {
    let (ch, cw, c) = grad.dim();
    let mut out = Array3::zeros((full, full, c));
    out.slice_mut(s![oy..oy + ch, ox..ox + cw, ..]).assign(grad);
    out
}

/// The discrete scale set spanning `[min, max]` in 0.1 steps.
///
/// A degenerate range (`max <= min`) collapses to the single value `{min}`
/// rather than failing.
pub fn scale_set(min: f32, max: f32) -> Vec<f32> {
    let steps = ((max - min) * 10.0).round() as i64;
    if steps <= 0 {
        return vec![min];
    }
    (0..steps).map(|k| min + 0.1 * k as f32).collect()
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Jitter {
        dy: i64,
        dx: i64,
    },
    Scale {
        factor: f32,
        in_dim: (usize, usize),
    },
    Rotate {
        degrees: i64,
        dim: (usize, usize),
    },
}

/// The sampled parameters of one pipeline invocation, kept so the gradient
/// can be pulled back through exactly the transforms that were applied.
pub struct TransformStack {
    stages: Vec<Stage>,
}

impl TransformStack {
    /// The identity pipeline (`use_transforms = false`).
    pub fn identity() -> Self {
        Self { stages: Vec::new() }
    }

    /// Apply jitter, random scale, random rotate, jitter — redrawing every
    /// random parameter — and record the draws.
    pub fn apply(
        img: &Array3<f32>,
        transform_min: f32,
        transform_max: f32,
        rng: &mut impl Rng,
    ) -> (Array3<f32>, Self) {
        let mut stages = Vec::with_capacity(4);
        let mut out = img.clone();

        let (dy, dx) = (rng.gen_range(-JITTER..=JITTER), rng.gen_range(-JITTER..=JITTER));
        out = shift(&out, dy, dx);
        stages.push(Stage::Jitter { dy, dx });

        let set = scale_set(transform_min, transform_max);
        let factor = set[rng.gen_range(0..set.len())];
        let in_dim = (out.dim().0, out.dim().1);
        out = resize(&out, factor);
        stages.push(Stage::Scale { factor, in_dim });

        let degrees = rng.gen_range(-ROTATE_DEGREES..=ROTATE_DEGREES);
        let dim = (out.dim().0, out.dim().1);
        out = rotate(&out, degrees);
        stages.push(Stage::Rotate { degrees, dim });

        let (dy, dx) = (rng.gen_range(-JITTER..=JITTER), rng.gen_range(-JITTER..=JITTER));
        out = shift(&out, dy, dx);
        stages.push(Stage::Jitter { dy, dx });

        (out, Self { stages })
    }

    /// Pull a gradient back through the recorded stages in reverse order.
    pub fn backward(&self, grad: &Array3<f32>) -> Array3<f32> {
        let mut g = grad.clone();
        for stage in self.stages.iter().rev() {
            g = match *stage {
                Stage::Jitter { dy, dx } => shift(&g, -dy, -dx),
                Stage::Scale { factor, in_dim } => resize_adjoint(&g, factor, in_dim),
                Stage::Rotate { degrees, dim } => rotate_adjoint(&g, degrees, dim),
            };
        }
        g
    }
}

/// Integer translation with zero fill. Its transpose is the opposite shift.
fn shift(img: &Array3<f32>, dy: i64, dx: i64) -> Array3<f32> {
    let (h, w, c) = img.dim();
    let mut out = Array3::zeros((h, w, c));
    for y in 0..h as i64 {
        let sy = y - dy;
        if sy < 0 || sy >= h as i64 {
            continue;
        }
        for x in 0..w as i64 {
            let sx = x - dx;
            if sx < 0 || sx >= w as i64 {
                continue;
            }
            for ch in 0..c {
                out[[y as usize, x as usize, ch]] = img[[sy as usize, sx as usize, ch]];
            }
        }
    }
    out
}

/// Map an output coordinate to its clamped source span for bilinear
/// interpolation: `(lo, hi, frac)` with weight `1 - frac` on `lo`.
fn src_span(o: usize, in_len: usize, out_len: usize) -> (usize, usize, f32) {
    let s = (o as f32 + 0.5) * in_len as f32 / out_len as f32 - 0.5;
    let s = s.clamp(0.0, (in_len - 1) as f32);
    let lo = s.floor() as usize;
    let hi = (lo + 1).min(in_len - 1);
    (lo, hi, s - lo as f32)
}

fn scaled_len(len: usize, factor: f32) -> usize {
    ((len as f32 * factor).round() as usize).max(1)
}

/// Bilinear resize by `factor`.
fn resize(img: &Array3<f32>, factor: f32) -> Array3<f32> {
    let (h, w, c) = img.dim();
    let (oh, ow) = (scaled_len(h, factor), scaled_len(w, factor));
    let mut out = Array3::zeros((oh, ow, c));
    for y in 0..oh {
        let (y0, y1, fy) = src_span(y, h, oh);
        for x in 0..ow {
            let (x0, x1, fx) = src_span(x, w, ow);
            for ch in 0..c {
                out[[y, x, ch]] = (1.0 - fy) * (1.0 - fx) * img[[y0, x0, ch]]
                    + (1.0 - fy) * fx * img[[y0, x1, ch]]
                    + fy * (1.0 - fx) * img[[y1, x0, ch]]
                    + fy * fx * img[[y1, x1, ch]];
            }
        }
    }
    out
}

/// Transpose of [`resize`]: scatter each output gradient through the same
/// bilinear weights.
fn resize_adjoint(grad: &Array3<f32>, factor: f32, in_dim: (usize, usize)) -> Array3<f32> {
    let (h, w) = in_dim;
    let (oh, ow, c) = grad.dim();
    debug_assert_eq!((oh, ow), (scaled_len(h, factor), scaled_len(w, factor)));
    let mut out = Array3::zeros((h, w, c));
    for y in 0..oh {
        let (y0, y1, fy) = src_span(y, h, oh);
        for x in 0..ow {
            let (x0, x1, fx) = src_span(x, w, ow);
            for ch in 0..c {
                let g = grad[[y, x, ch]];
                out[[y0, x0, ch]] += (1.0 - fy) * (1.0 - fx) * g;
                out[[y0, x1, ch]] += (1.0 - fy) * fx * g;
                out[[y1, x0, ch]] += fy * (1.0 - fx) * g;
                out[[y1, x1, ch]] += fy * fx * g;
            }
        }
    }
    out
}

/// Source coordinates for rotating the output grid back by `degrees`.
fn rotate_source(y: usize, x: usize, degrees: i64, h: usize, w: usize) -> (f32, f32) {
    let theta = (degrees as f32).to_radians();
    let (sin, cos) = theta.sin_cos();
    let cy = (h as f32 - 1.0) / 2.0;
    let cx = (w as f32 - 1.0) / 2.0;
    let ry = y as f32 - cy;
    let rx = x as f32 - cx;
    // Inverse rotation of the output point gives its source location.
    let sy = -sin * rx + cos * ry + cy;
    let sx = cos * rx + sin * ry + cx;
    (sy, sx)
}

/// Up to four in-bounds bilinear taps at a fractional source location.
fn bilinear_taps(sy: f32, sx: f32, h: usize, w: usize) -> [(i64, i64, f32); 4] {
    let y0 = sy.floor() as i64;
    let x0 = sx.floor() as i64;
    let fy = sy - y0 as f32;
    let fx = sx - x0 as f32;
    [
        (y0, x0, (1.0 - fy) * (1.0 - fx)),
        (y0, x0 + 1, (1.0 - fy) * fx),
        (y0 + 1, x0, fy * (1.0 - fx)),
        (y0 + 1, x0 + 1, fy * fx),
    ]
    .map(|(ty, tx, wgt)| {
        if ty < 0 || ty >= h as i64 || tx < 0 || tx >= w as i64 {
            (0, 0, 0.0)
        } else {
            (ty, tx, wgt)
        }
    })
}

/// Rotate about the image center by an integer number of degrees, sampling
/// bilinearly; regions swinging in from outside the source are zero.
fn rotate(img: &Array3<f32>, degrees: i64) -> Array3<f32> {
    let (h, w, c) = img.dim();
    let mut out = Array3::zeros((h, w, c));
    for y in 0..h {
        for x in 0..w {
            let (sy, sx) = rotate_source(y, x, degrees, h, w);
            for (ty, tx, wgt) in bilinear_taps(sy, sx, h, w) {
                if wgt == 0.0 {
                    continue;
                }
                for ch in 0..c {
                    out[[y, x, ch]] += wgt * img[[ty as usize, tx as usize, ch]];
                }
            }
        }
    }
    out
}

/// Transpose of [`rotate`]: scatter through the same taps.
fn rotate_adjoint(grad: &Array3<f32>, degrees: i64, dim: (usize, usize)) -> Array3<f32> {
    let (h, w) = dim;
    let c = grad.dim().2;
    let mut out = Array3::zeros((h, w, c));
    for y in 0..h {
        for x in 0..w {
            let (sy, sx) = rotate_source(y, x, degrees, h, w);
            for (ty, tx, wgt) in bilinear_taps(sy, sx, h, w) {
                if wgt == 0.0 {
                    continue;
                }
                for ch in 0..c {
                    out[[ty as usize, tx as usize, ch]] += wgt * grad[[y, x, ch]];
                }
            }
        }
    }
    out
}
