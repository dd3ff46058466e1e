//! Rasteriser
//!
//! Draws a [`Figure`] onto an RGB canvas: frame, ticks, optional grid,
//! series and legend swatches. Text (titles, labels) is not rasterised.

use crate::plot::figure::{Axes, Figure, LineStyle, SeriesKind};

const WHITE: [u8; 3] = [255, 255, 255];
const BLACK: [u8; 3] = [0, 0, 0];
const GRID: [u8; 3] = [220, 220, 220];
const TICKS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u32, height: u32, background: [u8; 3]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&background);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]])
    }

    pub fn set(&mut self, x: i64, y: i64, color: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        self.pixels[i..i + 3].copy_from_slice(&color);
    }

    pub fn fill_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: [u8; 3]) {
        let (x0, x1) = (x0.min(x1).max(0), x0.max(x1).min(self.width as i64 - 1));
        let (y0, y1) = (y0.min(y1).max(0), y0.max(y1).min(self.height as i64 - 1));
        for y in y0..=y1 {
            for x in x0..=x1 {
                self.set(x, y, color);
            }
        }
    }

    pub fn stroke_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: [u8; 3]) {
        self.line(x0, y0, x1, y0, color, 1, LineStyle::Solid);
        self.line(x1, y0, x1, y1, color, 1, LineStyle::Solid);
        self.line(x1, y1, x0, y1, color, 1, LineStyle::Solid);
        self.line(x0, y1, x0, y0, color, 1, LineStyle::Solid);
    }

    /// Bresenham line with square pens and optional dash pattern.
    #[allow(clippy::too_many_arguments)]
    pub fn line(
        &mut self,
        x0: i64,
        y0: i64,
        x1: i64,
        y1: i64,
        color: [u8; 3],
        thickness: i64,
        style: LineStyle,
    ) {
        if style == LineStyle::None {
            return;
        }
        let (mut x, mut y) = (x0, y0);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let half = thickness / 2;
        let mut step = 0usize;
        // Guard against absurd coordinates from degenerate views.
        let max_steps = (self.width as usize + self.height as usize) * 4;
        loop {
            let visible = match style {
                LineStyle::Dashed => step % 12 < 8,
                LineStyle::Dotted => step % 4 < 2,
                _ => true,
            };
            if visible {
                self.fill_rect(x - half, y - half, x - half + thickness - 1, y - half + thickness - 1, color);
            }
            if (x == x1 && y == y1) || step > max_steps {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
            step += 1;
        }
    }

    pub fn disc(&mut self, cx: i64, cy: i64, radius: i64, color: [u8; 3]) {
        for y in -radius..=radius {
            for x in -radius..=radius {
                if x * x + y * y <= radius * radius {
                    self.set(cx + x, cy + y, color);
                }
            }
        }
    }
}

/// Render a figure to a canvas.
pub fn render(figure: &Figure) -> Canvas {
    let mut canvas = Canvas::new(figure.width, figure.height, WHITE);
    let cell_w = figure.width as f64 / figure.cols as f64;
    let cell_h = figure.height as f64 / figure.rows as f64;
    for (index, axes) in figure.axes.iter().enumerate() {
        let row = index / figure.cols;
        let col = index % figure.cols;
        let area = PlotArea {
            left: (col as f64 * cell_w + cell_w * 0.125) as i64,
            right: (col as f64 * cell_w + cell_w * 0.9) as i64,
            top: (row as f64 * cell_h + cell_h * 0.11) as i64,
            bottom: (row as f64 * cell_h + cell_h * 0.88) as i64,
        };
        draw_axes(&mut canvas, axes, &area);
    }
    canvas
}

struct PlotArea {
    left: i64,
    right: i64,
    top: i64,
    bottom: i64,
}

struct Transform {
    x: (f64, f64),
    y: (f64, f64),
    left: f64,
    width: f64,
    bottom: f64,
    height: f64,
}

impl Transform {
    fn px(&self, x: f64) -> i64 {
        let t = (x - self.x.0) / (self.x.1 - self.x.0);
        (self.left + t * self.width).round().clamp(-1e6, 1e6) as i64
    }

    fn py(&self, y: f64) -> i64 {
        let t = (y - self.y.0) / (self.y.1 - self.y.0);
        (self.bottom - t * self.height).round().clamp(-1e6, 1e6) as i64
    }
}

fn draw_axes(canvas: &mut Canvas, axes: &Axes, area: &PlotArea) {
    let (xr, yr) = axes.view();
    let xr = non_degenerate(xr);
    let yr = non_degenerate(yr);
    let transform = Transform {
        x: xr,
        y: yr,
        left: area.left as f64,
        width: (area.right - area.left) as f64,
        bottom: area.bottom as f64,
        height: (area.bottom - area.top) as f64,
    };

    for i in 0..=TICKS {
        let fx = area.left + (area.right - area.left) * i as i64 / TICKS as i64;
        let fy = area.top + (area.bottom - area.top) * i as i64 / TICKS as i64;
        if axes.grid {
            canvas.line(fx, area.top, fx, area.bottom, GRID, 1, LineStyle::Solid);
            canvas.line(area.left, fy, area.right, fy, GRID, 1, LineStyle::Solid);
        }
        canvas.line(fx, area.bottom, fx, area.bottom + 4, BLACK, 1, LineStyle::Solid);
        canvas.line(area.left - 4, fy, area.left, fy, BLACK, 1, LineStyle::Solid);
    }

    for series in &axes.series {
        let thickness = series.linewidth.round().clamp(1.0, 10.0) as i64;
        match series.kind {
            SeriesKind::Line { style, markers } => {
                let points: Vec<(i64, i64)> = series
                    .xs
                    .iter()
                    .zip(series.ys.iter())
                    .filter(|(x, y)| x.is_finite() && y.is_finite())
                    .map(|(&x, &y)| (transform.px(x), transform.py(y)))
                    .collect();
                for pair in points.windows(2) {
                    let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
                    canvas.line(x0, y0, x1, y1, series.color, thickness, style);
                }
                if markers || points.len() == 1 {
                    for &(x, y) in &points {
                        canvas.disc(x, y, 3, series.color);
                    }
                }
            }
            SeriesKind::Scatter { size } => {
                let radius = (size.max(1.0).sqrt() / 2.0).round().clamp(1.0, 20.0) as i64;
                for (&x, &y) in series.xs.iter().zip(series.ys.iter()) {
                    if x.is_finite() && y.is_finite() {
                        canvas.disc(transform.px(x), transform.py(y), radius, series.color);
                    }
                }
            }
            SeriesKind::Bar { width } => {
                for (&x, &y) in series.xs.iter().zip(series.ys.iter()) {
                    if x.is_finite() && y.is_finite() {
                        let x0 = transform.px(x - width / 2.0);
                        let x1 = transform.px(x + width / 2.0);
                        canvas.fill_rect(x0, transform.py(0.0), x1, transform.py(y), series.color);
                    }
                }
            }
        }
    }

    canvas.stroke_rect(area.left, area.top, area.right, area.bottom, BLACK);

    if axes.legend {
        let mut y = area.top + 8;
        for series in axes.series.iter().filter(|s| s.label.is_some()) {
            canvas.fill_rect(area.right - 24, y, area.right - 10, y + 6, series.color);
            y += 12;
        }
    }
}

fn non_degenerate((lo, hi): (f64, f64)) -> (f64, f64) {
    if !lo.is_finite() || !hi.is_finite() || (hi - lo).abs() < f64::EPSILON {
        let mid = if lo.is_finite() { lo } else { 0.0 };
        return (mid - 0.5, mid + 0.5);
    }
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::figure::{Series, DEFAULT_SIZE, TAB10};

    #[test]
    fn test_empty_figure_is_white_with_frame() {
        let figure = Figure::new(1, DEFAULT_SIZE, 1, 1);
        let canvas = render(&figure);
        assert_eq!(canvas.pixels.len(), 640 * 480 * 3);
        assert_eq!(canvas.pixel(0, 0), Some(WHITE));
        assert_eq!(canvas.pixel(80, 240), Some(BLACK));
    }

    #[test]
    fn test_line_series_is_drawn() {
        let mut figure = Figure::new(1, DEFAULT_SIZE, 1, 1);
        figure.axes[0].series.push(Series {
            kind: SeriesKind::Line {
                style: LineStyle::Solid,
                markers: false,
            },
            xs: vec![0.0, 1.0],
            ys: vec![0.0, 1.0],
            color: TAB10[0],
            label: None,
            linewidth: 2.0,
        });
        let canvas = render(&figure);
        let coloured = canvas.pixels.chunks(3).filter(|p| *p == TAB10[0]).count();
        assert!(coloured > 100);
    }

    #[test]
    fn test_offscreen_pixels_are_ignored() {
        let mut canvas = Canvas::new(4, 4, WHITE);
        canvas.set(-1, 2, BLACK);
        canvas.set(4, 0, BLACK);
        assert!(canvas.pixels.iter().all(|&b| b == 255));
    }
}
