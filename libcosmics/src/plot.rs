use plotters::prelude::*;
use std::path::Path;

use super::error::MaskError;
use super::mask::{Mask, UNDEFINED};

const IMAGE_SIZE: (u32, u32) = (800, 800);

fn color_for(value: i32) -> RGBColor {
    // White: undefined, yellow: unmasked, black: masked
    match value {
        UNDEFINED => WHITE,
        0 => YELLOW,
        _ => BLACK,
    }
}

/// Render one z-layer of the channel mask as a cell map over the x/y bin
/// edges. Rendering is text-free so the bitmap backend needs no font stack.
pub fn render_layer(mask: &Mask, layer: usize, path: &Path) -> Result<(), MaskError> {
    let x_min = mask.bins_x[0];
    let x_max = mask.bins_x[mask.bins_x.len() - 1];
    let y_min = mask.bins_y[0];
    let y_max = mask.bins_y[mask.bins_y.len() - 1];

    let root = BitMapBackend::new(path, IMAGE_SIZE).into_drawing_area();
    root.fill(&WHITE)
        .map_err(|e| MaskError::PlotError(e.to_string()))?;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)
        .map_err(|e| MaskError::PlotError(e.to_string()))?;

    let mut cells = Vec::with_capacity(mask.x.len() * mask.y.len());
    for x_id in 0..mask.x.len() {
        for y_id in 0..mask.y.len() {
            let color = color_for(mask.values[[x_id, y_id, layer]]);
            cells.push(Rectangle::new(
                [
                    (mask.bins_x[x_id], mask.bins_y[y_id]),
                    (mask.bins_x[x_id + 1], mask.bins_y[y_id + 1]),
                ],
                color.filled(),
            ));
        }
    }
    chart
        .draw_series(cells)
        .map_err(|e| MaskError::PlotError(e.to_string()))?;
    // Cell outlines so undefined (white) channels stay visible
    let border = RGBColor(180, 180, 180);
    let mut outlines = Vec::with_capacity(mask.x.len() * mask.y.len());
    for x_id in 0..mask.x.len() {
        for y_id in 0..mask.y.len() {
            outlines.push(Rectangle::new(
                [
                    (mask.bins_x[x_id], mask.bins_y[y_id]),
                    (mask.bins_x[x_id + 1], mask.bins_y[y_id + 1]),
                ],
                border.stroke_width(1),
            ));
        }
    }
    chart
        .draw_series(outlines)
        .map_err(|e| MaskError::PlotError(e.to_string()))?;
    root.present()
        .map_err(|e| MaskError::PlotError(e.to_string()))?;
    Ok(())
}
