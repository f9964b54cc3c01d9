use crate::color::Rgb;

/// Maps a normalized position in `[0, 1]` to a display color.
pub trait Colormap {
    fn rgb(&self, position: f64) -> Rgb;
}
