//! Figure state
//!
//! Figures and their axes live in a per-execution [`FigureRegistry`]; script
//! objects only hold the figure id.

/// Default colour cycle (matplotlib's `tab10`).
pub const TAB10: [[u8; 3]; 10] = [
    [0x1f, 0x77, 0xb4],
    [0xff, 0x7f, 0x0e],
    [0x2c, 0xa0, 0x2c],
    [0xd6, 0x27, 0x28],
    [0x94, 0x67, 0xbd],
    [0x8c, 0x56, 0x4b],
    [0xe3, 0x77, 0xc2],
    [0x7f, 0x7f, 0x7f],
    [0xbc, 0xbd, 0x22],
    [0x17, 0xbe, 0xcf],
];

pub const DPI: f64 = 100.0;
pub const DEFAULT_SIZE: (f64, f64) = (6.4, 4.8);
const MAX_PIXELS: f64 = 2000.0;
/// Upper bound on open figures per execution.
pub const MAX_FIGURES: usize = 32;
/// Upper bound on subplot cells per figure.
pub const MAX_AXES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Solid,
    Dashed,
    Dotted,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeriesKind {
    /// Connected points, optionally with markers
    Line { style: LineStyle, markers: bool },
    Scatter { size: f64 },
    Bar { width: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub kind: SeriesKind,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub color: [u8; 3],
    pub label: Option<String>,
    pub linewidth: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Axes {
    pub title: Option<String>,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
    pub series: Vec<Series>,
    pub grid: bool,
    pub legend: bool,
    pub xlim: Option<(f64, f64)>,
    pub ylim: Option<(f64, f64)>,
}

impl Axes {
    pub fn next_color(&self) -> [u8; 3] {
        TAB10[self.series.len() % TAB10.len()]
    }

    /// Data range covered by all series, widened to include bar baselines.
    pub fn data_bounds(&self) -> Option<((f64, f64), (f64, f64))> {
        let mut bounds: Option<((f64, f64), (f64, f64))> = None;
        for series in &self.series {
            let half_width = match series.kind {
                SeriesKind::Bar { width } => width / 2.0,
                _ => 0.0,
            };
            for (&x, &y) in series.xs.iter().zip(series.ys.iter()) {
                if !x.is_finite() || !y.is_finite() {
                    continue;
                }
                let ((x0, x1), (y0, y1)) = bounds.get_or_insert(((x, x), (y, y)));
                *x0 = x0.min(x - half_width);
                *x1 = x1.max(x + half_width);
                *y0 = y0.min(y);
                *y1 = y1.max(y);
                if half_width > 0.0 {
                    *y0 = y0.min(0.0);
                    *y1 = y1.max(0.0);
                }
            }
        }
        bounds
    }

    /// Axis ranges after applying explicit limits and padding.
    pub fn view(&self) -> ((f64, f64), (f64, f64)) {
        let ((dx0, dx1), (dy0, dy1)) = self.data_bounds().unwrap_or(((0.0, 1.0), (0.0, 1.0)));
        let x = self.xlim.unwrap_or_else(|| pad(dx0, dx1));
        let y = self.ylim.unwrap_or_else(|| pad(dy0, dy1));
        (x, y)
    }
}

fn pad(lo: f64, hi: f64) -> (f64, f64) {
    if (hi - lo).abs() < f64::EPSILON {
        return (lo - 0.5, hi + 0.5);
    }
    let margin = (hi - lo) * 0.05;
    (lo - margin, hi + margin)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    pub id: usize,
    pub width: u32,
    pub height: u32,
    pub rows: usize,
    pub cols: usize,
    pub axes: Vec<Axes>,
    pub current_axes: usize,
    pub suptitle: Option<String>,
}

impl Figure {
    pub fn new(id: usize, size: (f64, f64), rows: usize, cols: usize) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        Self {
            id,
            width: to_pixels(size.0),
            height: to_pixels(size.1),
            rows,
            cols,
            axes: vec![Axes::default(); rows * cols],
            current_axes: 0,
            suptitle: None,
        }
    }

    pub fn current_axes_mut(&mut self) -> &mut Axes {
        if self.axes.is_empty() {
            self.axes.push(Axes::default());
            self.current_axes = 0;
        }
        let index = self.current_axes.min(self.axes.len() - 1);
        &mut self.axes[index]
    }

    pub fn clear(&mut self) {
        self.axes = vec![Axes::default(); self.rows * self.cols];
        self.current_axes = 0;
        self.suptitle = None;
    }
}

fn to_pixels(inches: f64) -> u32 {
    (inches * DPI).clamp(16.0, MAX_PIXELS) as u32
}

/// Open figures of one execution.
#[derive(Debug, Clone, Default)]
pub struct FigureRegistry {
    figures: Vec<Figure>,
    next_id: usize,
    current: Option<usize>,
}

impl FigureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a figure and make it current. `None` when too many are open.
    pub fn open(&mut self, size: (f64, f64), rows: usize, cols: usize) -> Option<usize> {
        if self.figures.len() >= MAX_FIGURES || rows.max(1) * cols.max(1) > MAX_AXES {
            return None;
        }
        self.next_id += 1;
        let id = self.next_id;
        self.figures.push(Figure::new(id, size, rows, cols));
        self.current = Some(id);
        Some(id)
    }

    /// The current figure, opening a default one if there is none.
    pub fn current_id(&mut self) -> Option<usize> {
        match self.current {
            Some(id) if self.get(id).is_some() => Some(id),
            _ => self.open(DEFAULT_SIZE, 1, 1),
        }
    }

    /// Id of the current figure, without opening one.
    pub fn current(&self) -> Option<usize> {
        self.current.filter(|id| self.get(*id).is_some())
    }

    /// Ids of all open figures, oldest first.
    pub fn ids(&self) -> Vec<usize> {
        self.figures.iter().map(|f| f.id).collect()
    }

    pub fn set_current(&mut self, id: usize) {
        if self.get(id).is_some() {
            self.current = Some(id);
        }
    }

    pub fn get(&self, id: usize) -> Option<&Figure> {
        self.figures.iter().find(|f| f.id == id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Figure> {
        self.figures.iter_mut().find(|f| f.id == id)
    }

    pub fn close(&mut self, id: usize) {
        self.figures.retain(|f| f.id != id);
        if self.current == Some(id) {
            self.current = self.figures.last().map(|f| f.id);
        }
    }

    pub fn close_all(&mut self) {
        self.figures.clear();
        self.current = None;
    }

    pub fn len(&self) -> usize {
        self.figures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }
}

/// Parse a colour name, single-letter code, `C<n>` cycle reference or
/// `#rrggbb` string.
pub fn parse_color(spec: &str) -> Option<[u8; 3]> {
    let spec = spec.trim();
    if let Some(hex) = spec.strip_prefix('#') {
        if hex.len() == 6 {
            let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
            return Some([channel(0)?, channel(2)?, channel(4)?]);
        }
        return None;
    }
    if let Some(index) = spec.strip_prefix('C').and_then(|n| n.parse::<usize>().ok()) {
        return Some(TAB10[index % TAB10.len()]);
    }
    let rgb = match spec.to_ascii_lowercase().as_str() {
        "b" | "blue" => [0, 0, 255],
        "g" | "green" => [0, 128, 0],
        "r" | "red" => [255, 0, 0],
        "c" | "cyan" => [0, 191, 191],
        "m" | "magenta" => [191, 0, 191],
        "y" | "yellow" => [191, 191, 0],
        "k" | "black" => [0, 0, 0],
        "w" | "white" => [255, 255, 255],
        "orange" => [255, 165, 0],
        "purple" => [128, 0, 128],
        "gray" | "grey" => [128, 128, 128],
        "brown" => [165, 42, 42],
        "pink" => [255, 192, 203],
        "navy" => [0, 0, 128],
        _ => return None,
    };
    Some(rgb)
}

/// Parse a matplotlib format string such as `"r--"` or `"bo"` into
/// colour, line style and marker flag.
pub fn parse_format(fmt: &str) -> (Option<[u8; 3]>, LineStyle, bool) {
    let mut color = None;
    let mut markers = false;
    let mut style = None;
    let mut rest = fmt;
    while !rest.is_empty() {
        if let Some(r) = rest.strip_prefix("--") {
            style = Some(LineStyle::Dashed);
            rest = r;
            continue;
        }
        if let Some(r) = rest.strip_prefix("-.") {
            style = Some(LineStyle::Dashed);
            rest = r;
            continue;
        }
        let mut chars = rest.chars();
        let Some(c) = chars.next() else { break };
        match c {
            '-' => style = Some(LineStyle::Solid),
            ':' => style = Some(LineStyle::Dotted),
            'o' | '.' | 's' | '^' | 'v' | '*' | '+' | 'x' | 'D' | 'd' => markers = true,
            c => {
                if let Some(rgb) = parse_color(&c.to_string()) {
                    color = Some(rgb);
                }
            }
        }
        rest = chars.as_str();
    }
    let style = match style {
        Some(style) => style,
        None if markers => LineStyle::None,
        None => LineStyle::Solid,
    };
    (color, style, markers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_figure_size() {
        let figure = Figure::new(1, DEFAULT_SIZE, 1, 1);
        assert_eq!((figure.width, figure.height), (640, 480));
        assert_eq!(figure.axes.len(), 1);
    }

    #[test]
    fn test_registry_current_opens_lazily() {
        let mut registry = FigureRegistry::new();
        assert!(registry.is_empty());
        let id = registry.current_id().unwrap();
        assert_eq!(registry.current_id(), Some(id));
        registry.close(id);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_parse_color_forms() {
        assert_eq!(parse_color("red"), Some([255, 0, 0]));
        assert_eq!(parse_color("#102030"), Some([0x10, 0x20, 0x30]));
        assert_eq!(parse_color("C1"), Some(TAB10[1]));
        assert_eq!(parse_color("nope"), None);
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format("r--"), (Some([255, 0, 0]), LineStyle::Dashed, false));
        assert_eq!(parse_format("bo"), (Some([0, 0, 255]), LineStyle::None, true));
        assert_eq!(parse_format("o-"), (None, LineStyle::Solid, true));
    }

    #[test]
    fn test_bar_bounds_include_baseline() {
        let mut axes = Axes::default();
        axes.series.push(Series {
            kind: SeriesKind::Bar { width: 0.8 },
            xs: vec![0.0, 1.0],
            ys: vec![3.0, 5.0],
            color: TAB10[0],
            label: None,
            linewidth: 1.5,
        });
        let ((x0, x1), (y0, y1)) = axes.data_bounds().unwrap();
        assert!((x0 + 0.4).abs() < 1e-9 && (x1 - 1.4).abs() < 1e-9);
        assert_eq!((y0, y1), (0.0, 5.0));
    }
}
