//! The region color records exchanged between the query pipeline, the server and the viewer.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::path::Path;

use crate::color::{Rgb, SymmetricNorm};
use crate::error::Result;
use crate::parcellate::ParcelValue;
use crate::traits::Colormap;
use crate::util::{read_text_file, write_json_file};


/// The display color of one atlas region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiColor {
    pub id: i32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RoiColor {
    pub fn new(id: i32, color: Rgb) -> RoiColor {
        RoiColor { id, r: color.r, g: color.g, b: color.b }
    }

    pub fn rgb(&self) -> Rgb {
        Rgb::new(self.r, self.g, self.b)
    }
}


/// A set of region colors, serialized as `{"data": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiData {
    pub data: Vec<RoiColor>,
}

impl RoiData {

    /// Color each region value with `cmap` after normalizing it with `norm`.
    pub fn from_parcels<C: Colormap + ?Sized>(parcels: &[ParcelValue], norm: &SymmetricNorm, cmap: &C) -> RoiData {
        let data = parcels.iter()
            .map(|p| RoiColor::new(p.label, norm.color(cmap, p.value)))
            .collect();
        RoiData { data }
    }

    /// Read a record set from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<RoiData> {
        let text = read_text_file(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json_file(path, self)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Display for RoiData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ROI data with colors for {} regions.", self.data.len())
    }
}
