//! Figure rendering for the plotting module

pub mod figure;
pub mod png;
pub mod raster;

pub use figure::{Axes, Figure, FigureRegistry, LineStyle, Series, SeriesKind};

use crate::error::Result;
use crate::output::collector::ImageArtifact;

/// Rasterise a figure and encode it as a PNG artifact.
pub fn render_png(figure: &Figure) -> Result<ImageArtifact> {
    let canvas = raster::render(figure);
    Ok(ImageArtifact::png(png::encode(&canvas)?))
}
