//! Colors for brain regions: evenly spread hues for atlas meshes, and a diverging colormap for
//! statistical values that are symmetric around zero.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::traits::Colormap;


/// An 8 bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Rgb {
        Rgb { r, g, b }
    }

    /// Convert channels in `[0, 1]` to bytes.
    pub fn from_unit(rgb: [f64; 3]) -> Rgb {
        let byte = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        Rgb::new(byte(rgb[0]), byte(rgb[1]), byte(rgb[2]))
    }

    /// CSS style hex representation, e.g. `#ff0000`.
    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}


/// Convert a color given by hue, lightness and saturation (all in `[0, 1]`) to RGB channels in
/// `[0, 1]`.
pub fn hls_to_rgb(h: f64, l: f64, s: f64) -> [f64; 3] {
    if s == 0.0 {
        return [l, l, l];
    }
    let m2 = if l <= 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let m1 = 2.0 * l - m2;
    [
        hue_channel(m1, m2, h + 1.0 / 3.0),
        hue_channel(m1, m2, h),
        hue_channel(m1, m2, h - 1.0 / 3.0),
    ]
}

fn hue_channel(m1: f64, m2: f64, hue: f64) -> f64 {
    let hue = hue.rem_euclid(1.0);
    if hue < 1.0 / 6.0 {
        m1 + (m2 - m1) * hue * 6.0
    } else if hue < 0.5 {
        m2
    } else if hue < 2.0 / 3.0 {
        m1 + (m2 - m1) * (2.0 / 3.0 - hue) * 6.0
    } else {
        m1
    }
}

/// Fully saturated color of medium lightness for a hue in degrees.
pub fn hue_color(hue_degrees: f64) -> Rgb {
    Rgb::from_unit(hls_to_rgb(hue_degrees / 360.0, 0.5, 1.0))
}

/// Hue in degrees for the label with 0-based `rank` among `count` labels. The first label gets 0°,
/// the last one 360°, and the hues in between are spread linearly.
pub fn rank_hue(rank: usize, count: usize) -> f64 {
    if count <= 1 {
        0.0
    } else {
        rank as f64 / (count - 1) as f64 * 360.0
    }
}


/// A colormap given by color stops at increasing positions, linearly interpolated in between.
#[derive(Debug, Clone, PartialEq)]
pub struct DivergingColormap {
    name: &'static str,
    stops: Vec<(f64, [f64; 3])>,
}

const RDBU_R_HEX: [&str; 11] = [
    "#053061", "#2166ac", "#4393c3", "#92c5de", "#d1e5f0", "#f7f7f7",
    "#fddbc7", "#f4a582", "#d6604d", "#b2182b", "#67001f",
];

fn parse_hex(hex: &str) -> [f64; 3] {
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).unwrap_or(0) as f64 / 255.0;
    [channel(1), channel(3), channel(5)]
}

impl DivergingColormap {

    /// Blue through white to red, the reversed ColorBrewer RdBu scheme.
    pub fn rd_bu_r() -> DivergingColormap {
        let n = RDBU_R_HEX.len();
        let stops = RDBU_R_HEX.iter()
            .enumerate()
            .map(|(i, hex)| (i as f64 / (n - 1) as f64, parse_hex(hex)))
            .collect();
        DivergingColormap { name: "RdBu_r", stops }
    }

    /// Cyan through blue to black at zero, then red to yellow.
    pub fn cold_hot() -> DivergingColormap {
        DivergingColormap {
            name: "cold_hot",
            stops: vec![
                (0.0, [0.0, 1.0, 1.0]),
                (0.25, [0.0, 0.0, 1.0]),
                (0.5, [0.0, 0.0, 0.0]),
                (0.75, [1.0, 0.0, 0.0]),
                (1.0, [1.0, 1.0, 0.0]),
            ],
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The interpolated color at `position`, with channels in `[0, 1]`.
    pub fn unit_rgb(&self, position: f64) -> [f64; 3] {
        let t = if position.is_nan() { 0.5 } else { position.clamp(0.0, 1.0) };
        for pair in self.stops.windows(2) {
            let (t0, c0) = pair[0];
            let (t1, c1) = pair[1];
            if t <= t1 {
                let w = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
                return [
                    c0[0] + w * (c1[0] - c0[0]),
                    c0[1] + w * (c1[1] - c0[1]),
                    c0[2] + w * (c1[2] - c0[2]),
                ];
            }
        }
        self.stops.last().map(|(_, c)| *c).unwrap_or([0.0; 3])
    }
}

impl Default for DivergingColormap {
    fn default() -> DivergingColormap {
        DivergingColormap::rd_bu_r()
    }
}

impl Colormap for DivergingColormap {
    fn rgb(&self, position: f64) -> Rgb {
        Rgb::from_unit(self.unit_rgb(position))
    }
}

impl FromStr for DivergingColormap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RdBu_r" => Ok(DivergingColormap::rd_bu_r()),
            "cold_hot" => Ok(DivergingColormap::cold_hot()),
            other => Err(format!("Unknown colormap '{}', expected 'RdBu_r' or 'cold_hot'", other)),
        }
    }
}


/// Normalizes values into `[0, 1]` symmetrically around zero: `-vmax` maps to 0, zero to 0.5 and
/// `vmax` to 1. Values beyond the bounds saturate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymmetricNorm {
    pub vmax: f64,
}

impl Default for SymmetricNorm {
    fn default() -> SymmetricNorm {
        SymmetricNorm { vmax: 5.0 }
    }
}

impl SymmetricNorm {
    pub fn new(vmax: f64) -> SymmetricNorm {
        SymmetricNorm { vmax: vmax.abs() }
    }

    pub fn position(&self, value: f64) -> f64 {
        if self.vmax == 0.0 || value.is_nan() {
            return 0.5;
        }
        (value.clamp(-self.vmax, self.vmax) + self.vmax) / (2.0 * self.vmax)
    }

    /// Color for `value`, looked up in `cmap` after normalization.
    pub fn color<C: Colormap + ?Sized>(&self, cmap: &C, value: f64) -> Rgb {
        cmap.rgb(self.position(value))
    }
}
