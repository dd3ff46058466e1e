//! `matplotlib.pyplot`
//!
//! A stateful plotting surface over the per-execution [`FigureRegistry`].
//! Script-visible figure and axes objects carry ids only; the drawing state
//! lives in the registry. Rendering appends PNG artifacts to the output.
//!
//! [`FigureRegistry`]: crate::plot::FigureRegistry

use std::any::Any;
use std::rc::Rc;

use tracing::debug;

use crate::engine::args::Args;
use crate::engine::interpreter::Interpreter;
use crate::engine::modules::numbers;
use crate::engine::value::{NativeObject, Value};
use crate::error::{ExceptionKind, Result, SandboxError};
use crate::plot::figure::{parse_color, parse_format, DEFAULT_SIZE, MAX_FIGURES};
use crate::plot::{render_png, Axes, LineStyle, Series, SeriesKind};

pub const EXPORTS: &[&str] = &[
    "figure", "subplots", "subplot", "plot", "scatter", "bar", "hist", "title", "suptitle",
    "xlabel", "ylabel", "legend", "grid", "xlim", "ylim", "show", "savefig", "close", "clf",
    "gca", "gcf", "tight_layout",
];

/// Keyword arguments accepted for compatibility and ignored by the renderer.
const COSMETIC_KEYWORDS: &[&str] = &[
    "alpha", "zorder", "markersize", "ms", "markerfacecolor", "mfc", "markeredgecolor", "mec",
    "edgecolor", "edgecolors", "ec", "align", "fontsize", "fontweight", "loc", "pad",
    "rotation", "dpi", "bbox_inches", "format", "facecolor", "transparent", "which", "axis",
    "cmap", "sharex", "sharey", "squeeze", "constrained_layout", "frameon", "ncol",
];

const DEFAULT_LINEWIDTH: f64 = 1.5;
const DEFAULT_MARKER_SIZE: f64 = 20.0;
const DEFAULT_BAR_WIDTH: f64 = 0.8;
const DEFAULT_BINS: i64 = 10;

fn too_many_figures() -> SandboxError {
    SandboxError::runtime(
        ExceptionKind::RuntimeError,
        format!("too many open figures (at most {})", MAX_FIGURES),
    )
}

fn figure_closed(id: usize) -> SandboxError {
    SandboxError::runtime(
        ExceptionKind::RuntimeError,
        format!("figure {} has been closed", id),
    )
}

fn drop_cosmetic(args: &mut Args) {
    args.keywords.retain(|(name, _)| !COSMETIC_KEYWORDS.contains(&name.as_str()));
}

// ============================================================================
// Script objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FigureObject {
    id: usize,
}

impl FigureObject {
    fn for_id(interp: &Interpreter<'_>, id: usize) -> Result<Self> {
        interp.state.figures.get(id).ok_or_else(|| figure_closed(id))?;
        Ok(Self { id })
    }

    fn value(self) -> Value {
        Value::Object(Rc::new(self))
    }
}

impl NativeObject for FigureObject {
    fn type_name(&self) -> &'static str {
        "Figure"
    }

    fn repr(&self) -> String {
        format!("<Figure {}>", self.id)
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "number" => Some(Value::Int(self.id as i64)),
            _ => None,
        }
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(
            name,
            "savefig" | "add_subplot" | "suptitle" | "gca" | "clf" | "clear" | "tight_layout"
                | "show" | "get_axes"
        )
    }

    fn call_method(&self, interp: &mut Interpreter, name: &str, mut args: Args) -> Result<Value> {
        match name {
            "savefig" | "show" => {
                drop_cosmetic(&mut args);
                args.take(0, "fname");
                args.check(name, 0, 1)?;
                render_figure(interp, self.id)?;
                Ok(Value::None)
            }
            "add_subplot" => {
                drop_cosmetic(&mut args);
                let index = subplot_index(interp, self.id, &args)?;
                interp.state.figures.set_current(self.id);
                if let Some(figure) = interp.state.figures.get_mut(self.id) {
                    figure.current_axes = index;
                }
                Ok(AxesObject { figure: self.id, index }.value())
            }
            "suptitle" => {
                drop_cosmetic(&mut args);
                args.check(name, 1, 1)?;
                let text = args.positional[0].to_str();
                let figure = interp.state.figures.get_mut(self.id).ok_or_else(|| figure_closed(self.id))?;
                figure.suptitle = Some(text);
                Ok(Value::None)
            }
            "gca" => {
                args.check(name, 0, 0)?;
                let figure = interp.state.figures.get(self.id).ok_or_else(|| figure_closed(self.id))?;
                Ok(AxesObject {
                    figure: self.id,
                    index: figure.current_axes,
                }
                .value())
            }
            "get_axes" => {
                args.check(name, 0, 0)?;
                let figure = interp.state.figures.get(self.id).ok_or_else(|| figure_closed(self.id))?;
                Ok(Value::list(
                    (0..figure.axes.len())
                        .map(|index| AxesObject { figure: self.id, index }.value())
                        .collect(),
                ))
            }
            "clf" | "clear" => {
                args.check(name, 0, 0)?;
                let figure = interp.state.figures.get_mut(self.id).ok_or_else(|| figure_closed(self.id))?;
                figure.clear();
                Ok(Value::None)
            }
            "tight_layout" => {
                drop_cosmetic(&mut args);
                args.check(name, 0, 0)?;
                Ok(Value::None)
            }
            _ => Err(SandboxError::runtime(
                ExceptionKind::AttributeError,
                format!("'Figure' object has no attribute '{}'", name),
            )),
        }
    }

    fn equals(&self, other: &dyn NativeObject) -> Option<bool> {
        let other = other.as_any().downcast_ref::<FigureObject>()?;
        Some(self.id == other.id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxesObject {
    figure: usize,
    index: usize,
}

impl AxesObject {
    fn value(self) -> Value {
        Value::Object(Rc::new(self))
    }
}

const AXES_METHODS: &[&str] = &[
    "plot", "scatter", "bar", "hist", "set_title", "set_xlabel", "set_ylabel", "legend", "grid",
    "set_xlim", "set_ylim", "get_xlim", "get_ylim", "clear",
];

impl NativeObject for AxesObject {
    fn type_name(&self) -> &'static str {
        "Axes"
    }

    fn repr(&self) -> String {
        format!("<Axes {} of figure {}>", self.index + 1, self.figure)
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "figure" => Some(FigureObject { id: self.figure }.value()),
            _ => None,
        }
    }

    fn has_method(&self, name: &str) -> bool {
        AXES_METHODS.contains(&name)
    }

    fn call_method(&self, interp: &mut Interpreter, name: &str, args: Args) -> Result<Value> {
        let target = Target {
            figure: self.figure,
            axes: Some(self.index),
        };
        let operation = match name {
            "set_title" => "title",
            "set_xlabel" => "xlabel",
            "set_ylabel" => "ylabel",
            "set_xlim" => "xlim",
            "set_ylim" => "ylim",
            "get_xlim" => "get_xlim",
            "get_ylim" => "get_ylim",
            other => other,
        };
        if operation == "clear" {
            args.check(name, 0, 0)?;
            with_axes(interp, target, |axes| *axes = Axes::default())?;
            return Ok(Value::None);
        }
        draw(interp, target, operation, args)
    }

    fn equals(&self, other: &dyn NativeObject) -> Option<bool> {
        let other = other.as_any().downcast_ref::<AxesObject>()?;
        Some(self == other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Drawing
// ============================================================================

/// Axes a drawing call applies to; `None` means the figure's current axes.
#[derive(Debug, Clone, Copy)]
struct Target {
    figure: usize,
    axes: Option<usize>,
}

fn current_target(interp: &mut Interpreter<'_>) -> Result<Target> {
    let figure = interp.state.figures.current_id().ok_or_else(too_many_figures)?;
    Ok(Target { figure, axes: None })
}

fn with_axes<T>(interp: &mut Interpreter<'_>, target: Target, f: impl FnOnce(&mut Axes) -> T) -> Result<T> {
    let figure = interp
        .state
        .figures
        .get_mut(target.figure)
        .ok_or_else(|| figure_closed(target.figure))?;
    let axes = match target.axes {
        Some(index) => figure
            .axes
            .get_mut(index)
            .ok_or_else(|| figure_closed(target.figure))?,
        None => figure.current_axes_mut(),
    };
    Ok(f(axes))
}

fn color_argument(value: Option<Value>) -> Result<Option<[u8; 3]>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(Value::Str(spec)) => parse_color(&spec).map(Some).ok_or_else(|| {
            SandboxError::value_error(format!("Invalid RGBA argument: '{}'", spec))
        }),
        Some(Value::Tuple(parts)) if parts.len() == 3 || parts.len() == 4 => {
            let mut rgb = [0u8; 3];
            for (slot, part) in rgb.iter_mut().zip(parts.iter()) {
                let f = part
                    .as_float()
                    .filter(|f| (0.0..=1.0).contains(f))
                    .ok_or_else(|| SandboxError::value_error("RGBA values should be within 0-1 range"))?;
                *slot = (f * 255.0).round() as u8;
            }
            Ok(Some(rgb))
        }
        Some(other) => Err(SandboxError::value_error(format!(
            "Invalid RGBA argument: {}",
            other.repr()
        ))),
    }
}

fn text_argument(value: Option<Value>) -> Option<String> {
    match value {
        None | Some(Value::None) => None,
        Some(v) => Some(v.to_str()),
    }
}

fn float_keyword(args: &mut Args, names: &[&str], default: f64) -> Result<f64> {
    let mut found = None;
    for name in names {
        if let Some(v) = args.take_keyword(name) {
            found = Some(v);
        }
    }
    match found {
        None => Ok(default),
        Some(v) => v.as_float().ok_or_else(|| {
            SandboxError::type_error(format!("{} must be a number, not {}", names[0], v.type_name()))
        }),
    }
}

fn same_length(xs: &[f64], ys: &[f64]) -> Result<()> {
    if xs.len() != ys.len() {
        return Err(SandboxError::value_error(format!(
            "x and y must have same first dimension, but have shapes ({},) and ({},)",
            xs.len(),
            ys.len()
        )));
    }
    Ok(())
}

fn positions(count: usize) -> Vec<f64> {
    (0..count).map(|i| i as f64).collect()
}

/// `(x, y, fmt)` groups of a `plot` call: `plot(y)`, `plot(x, y)`,
/// `plot(x, y, fmt)`, repeated.
fn plot_groups(interp: &mut Interpreter<'_>, positional: &[Value]) -> Result<Vec<(Vec<f64>, Vec<f64>, Option<String>)>> {
    let mut groups = Vec::new();
    let mut i = 0;
    while i < positional.len() {
        if matches!(positional[i], Value::Str(_)) {
            return Err(SandboxError::value_error(
                "plot() format string must follow the data",
            ));
        }
        let (xs, ys) = match positional.get(i + 1) {
            Some(next) if !matches!(next, Value::Str(_)) => {
                let xs = numbers(interp, &positional[i], "plot")?;
                let ys = numbers(interp, next, "plot")?;
                i += 2;
                (xs, ys)
            }
            _ => {
                let ys = numbers(interp, &positional[i], "plot")?;
                i += 1;
                (positions(ys.len()), ys)
            }
        };
        same_length(&xs, &ys)?;
        let fmt = match positional.get(i) {
            Some(Value::Str(fmt)) => {
                i += 1;
                Some(fmt.to_string())
            }
            _ => None,
        };
        groups.push((xs, ys, fmt));
    }
    Ok(groups)
}

fn line_style(value: Option<Value>) -> Result<Option<LineStyle>> {
    let Some(value) = value else { return Ok(None) };
    let style = match value.to_str().as_str() {
        "-" | "solid" => LineStyle::Solid,
        "--" | "-." | "dashed" | "dashdot" => LineStyle::Dashed,
        ":" | "dotted" => LineStyle::Dotted,
        "" | " " | "None" | "none" => LineStyle::None,
        other => {
            return Err(SandboxError::value_error(format!(
                "'{}' is not a valid value for linestyle",
                other
            )))
        }
    };
    Ok(Some(style))
}

/// Histogram counts and bin edges.
fn histogram(data: &[f64], bins: usize) -> (Vec<f64>, Vec<f64>) {
    let finite: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    let (mut lo, mut hi) = finite
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if finite.is_empty() {
        (lo, hi) = (0.0, 1.0);
    } else if lo == hi {
        (lo, hi) = (lo - 0.5, hi + 0.5);
    }
    let width = (hi - lo) / bins as f64;
    let edges: Vec<f64> = (0..=bins).map(|i| lo + width * i as f64).collect();
    let mut counts = vec![0.0; bins];
    for v in finite {
        let index = (((v - lo) / width).floor() as usize).min(bins - 1);
        counts[index] += 1.0;
    }
    (counts, edges)
}

fn draw(interp: &mut Interpreter<'_>, target: Target, name: &str, mut args: Args) -> Result<Value> {
    drop_cosmetic(&mut args);
    match name {
        "plot" => {
            let color = color_argument(args.take_keyword("color").or_else(|| args.take_keyword("c")))?;
            let label = text_argument(args.take_keyword("label"));
            let linewidth = float_keyword(&mut args, &["linewidth", "lw"], DEFAULT_LINEWIDTH)?;
            let style = line_style(args.take_keyword("linestyle").or_else(|| args.take_keyword("ls")))?;
            let marker = args.take_keyword("marker");
            args.check(name, 1, usize::MAX)?;
            let groups = plot_groups(interp, &args.positional)?;
            with_axes(interp, target, |axes| {
                for (xs, ys, fmt) in groups {
                    let (fmt_color, fmt_style, fmt_markers) = parse_format(fmt.as_deref().unwrap_or(""));
                    let markers = fmt_markers || matches!(&marker, Some(Value::Str(m)) if !m.is_empty());
                    let style = style.unwrap_or(fmt_style);
                    let series = Series {
                        kind: SeriesKind::Line { style, markers },
                        xs,
                        ys,
                        color: color.or(fmt_color).unwrap_or_else(|| axes.next_color()),
                        label: label.clone(),
                        linewidth,
                    };
                    axes.series.push(series);
                }
            })?;
            Ok(Value::None)
        }
        "scatter" => {
            let color = color_argument(args.take_keyword("c").or_else(|| args.take_keyword("color")))?;
            let label = text_argument(args.take_keyword("label"));
            let size = args.take(2, "s");
            args.take_keyword("marker");
            args.positional.truncate(2);
            args.check(name, 2, 2)?;
            let size = size.and_then(|v| v.as_float()).unwrap_or(DEFAULT_MARKER_SIZE);
            let xs = numbers(interp, &args.positional[0], name)?;
            let ys = numbers(interp, &args.positional[1], name)?;
            same_length(&xs, &ys)?;
            with_axes(interp, target, |axes| {
                let color = color.unwrap_or_else(|| axes.next_color());
                axes.series.push(Series {
                    kind: SeriesKind::Scatter { size },
                    xs,
                    ys,
                    color,
                    label,
                    linewidth: DEFAULT_LINEWIDTH,
                });
            })?;
            Ok(Value::None)
        }
        "bar" => {
            let color = color_argument(args.take_keyword("color"))?;
            let label = text_argument(args.take_keyword("label"));
            let width = args.take(2, "width");
            args.positional.truncate(2);
            let heights = args.take(1, "height");
            args.check(name, 1, 2)?;
            let width = width.and_then(|v| v.as_float()).unwrap_or(DEFAULT_BAR_WIDTH);
            let heights = heights.ok_or_else(|| {
                SandboxError::type_error("bar() missing required argument 'height'")
            })?;
            let ys = numbers(interp, &heights, name)?;
            let categories = interp.iterate(&args.positional[0])?;
            let xs = if categories.iter().all(|v| v.as_float().is_some()) {
                numbers(interp, &Value::list(categories), name)?
            } else {
                positions(categories.len())
            };
            same_length(&xs, &ys)?;
            with_axes(interp, target, |axes| {
                let color = color.unwrap_or_else(|| axes.next_color());
                axes.series.push(Series {
                    kind: SeriesKind::Bar { width },
                    xs,
                    ys,
                    color,
                    label,
                    linewidth: DEFAULT_LINEWIDTH,
                });
            })?;
            Ok(Value::None)
        }
        "hist" => {
            let color = color_argument(args.take_keyword("color"))?;
            let label = text_argument(args.take_keyword("label"));
            let density = args.take_keyword("density").is_some_and(|v| v.truthy());
            let bins = args.take(1, "bins");
            args.positional.truncate(1);
            args.check(name, 1, 1)?;
            let bins = match bins {
                None | Some(Value::None) => DEFAULT_BINS,
                Some(v) => v.as_int().ok_or_else(|| {
                    SandboxError::type_error("bins must be an integer")
                })?,
            };
            if bins < 1 {
                return Err(SandboxError::value_error(format!(
                    "`bins` must be positive, when an integer, got {}",
                    bins
                )));
            }
            let bins = bins as usize;
            interp.state.check_sequence_len(bins)?;
            let data = numbers(interp, &args.positional[0], name)?;
            let (mut counts, edges) = histogram(&data, bins);
            let width = edges[1] - edges[0];
            if density {
                let total: f64 = counts.iter().sum();
                if total > 0.0 {
                    counts.iter_mut().for_each(|c| *c /= total * width);
                }
            }
            let centers: Vec<f64> = edges.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
            let bar_heights = counts.clone();
            with_axes(interp, target, |axes| {
                let color = color.unwrap_or_else(|| axes.next_color());
                axes.series.push(Series {
                    kind: SeriesKind::Bar { width },
                    xs: centers,
                    ys: bar_heights,
                    color,
                    label,
                    linewidth: DEFAULT_LINEWIDTH,
                });
            })?;
            Ok(Value::tuple(vec![
                Value::list(counts.into_iter().map(Value::Float).collect()),
                Value::list(edges.into_iter().map(Value::Float).collect()),
                Value::None,
            ]))
        }
        "title" | "xlabel" | "ylabel" => {
            let text = args.take(0, "label");
            args.positional.truncate(1);
            args.check(name, 0, 1)?;
            let text = text.map(|v| v.to_str()).ok_or_else(|| {
                SandboxError::type_error(format!("{}() missing required argument 'label'", name))
            })?;
            let result = Value::from(text.as_str());
            with_axes(interp, target, |axes| {
                let slot = match name {
                    "title" => &mut axes.title,
                    "xlabel" => &mut axes.xlabel,
                    _ => &mut axes.ylabel,
                };
                *slot = Some(text);
            })?;
            Ok(result)
        }
        "legend" => {
            args.take_keyword("labels");
            args.positional.clear();
            args.check(name, 0, 0)?;
            with_axes(interp, target, |axes| axes.legend = true)?;
            Ok(Value::None)
        }
        "grid" => {
            let visible = args.take(0, "visible");
            args.take_keyword("b");
            args.take_keyword("color");
            args.take_keyword("linestyle");
            args.take_keyword("linewidth");
            args.positional.truncate(1);
            args.check(name, 0, 1)?;
            let visible = visible.map_or(true, |v| v.truthy());
            with_axes(interp, target, |axes| axes.grid = visible)?;
            Ok(Value::None)
        }
        "xlim" | "ylim" | "get_xlim" | "get_ylim" => {
            let is_x = name.ends_with("xlim");
            let (low_key, high_key) = if is_x { ("left", "right") } else { ("bottom", "top") };
            let low_kw = args.take_keyword(low_key);
            let high_kw = args.take_keyword(high_key);
            args.check(name, 0, 2)?;
            let (view_x, view_y) = with_axes(interp, target, |axes| axes.view())?;
            let current = if is_x { view_x } else { view_y };
            let (low, high) = match args.positional.as_slice() {
                [single] => match interp.iterate(single)?.as_slice() {
                    [a, b] => (Some(a.clone()), Some(b.clone())),
                    _ => {
                        return Err(SandboxError::type_error(format!(
                            "{}() expects a (low, high) pair",
                            name
                        )))
                    }
                },
                [a, b] => (Some(a.clone()), Some(b.clone())),
                _ => (low_kw, high_kw),
            };
            let limit = |value: Option<Value>, fallback: f64| -> Result<f64> {
                match value {
                    None | Some(Value::None) => Ok(fallback),
                    Some(v) => v.as_float().ok_or_else(|| {
                        SandboxError::type_error(format!("axis limits must be numbers, not {}", v.type_name()))
                    }),
                }
            };
            let setting = low.is_some() || high.is_some();
            let range = (limit(low, current.0)?, limit(high, current.1)?);
            if setting && !name.starts_with("get_") {
                with_axes(interp, target, |axes| {
                    if is_x {
                        axes.xlim = Some(range);
                    } else {
                        axes.ylim = Some(range);
                    }
                })?;
            }
            Ok(Value::tuple(vec![Value::Float(range.0), Value::Float(range.1)]))
        }
        _ => Err(SandboxError::runtime(
            ExceptionKind::AttributeError,
            format!("'Axes' object has no attribute '{}'", name),
        )),
    }
}

// ============================================================================
// Figures and rendering
// ============================================================================

fn render_figure(interp: &mut Interpreter<'_>, id: usize) -> Result<()> {
    let figure = interp.state.figures.get(id).ok_or_else(|| figure_closed(id))?;
    let image = render_png(figure)?;
    debug!(figure = id, bytes = image.payload.len(), "rendered figure");
    interp.state.output.push_image(image);
    Ok(())
}

fn figure_size(value: Option<Value>) -> Result<(f64, f64)> {
    match value {
        None | Some(Value::None) => Ok(DEFAULT_SIZE),
        Some(v) => {
            let parts = match &v {
                Value::Tuple(items) => items.to_vec(),
                Value::List(items) => items.borrow().clone(),
                _ => Vec::new(),
            };
            match parts.as_slice() {
                [w, h] => match (w.as_float(), h.as_float()) {
                    (Some(w), Some(h)) if w > 0.0 && h > 0.0 => Ok((w, h)),
                    _ => Err(SandboxError::value_error("figure size must be positive numbers")),
                },
                _ => Err(SandboxError::type_error("figsize must be a (width, height) pair")),
            }
        }
    }
}

fn grid_dimension(value: Option<Value>, name: &str) -> Result<usize> {
    match value {
        None => Ok(1),
        Some(v) => v
            .as_int()
            .filter(|n| *n >= 1)
            .map(|n| n as usize)
            .ok_or_else(|| {
                SandboxError::value_error(format!("Number of {} must be a positive integer", name))
            }),
    }
}

/// Index of the cell selected by `subplot(rows, cols, index)` or
/// `subplot(RCI)`, re-laying the figure out if its grid changes.
fn subplot_index(interp: &mut Interpreter<'_>, id: usize, args: &Args) -> Result<usize> {
    args.check("subplot", 1, 3)?;
    let (rows, cols, index) = match args.positional.as_slice() {
        [code] => {
            let code = code.as_int().filter(|c| (111..=999).contains(c)).ok_or_else(|| {
                SandboxError::value_error("single-argument subplot must be a three-digit integer")
            })?;
            (code / 100, code / 10 % 10, code % 10)
        }
        [rows, cols, index] => {
            let int = |v: &Value| {
                v.as_int()
                    .ok_or_else(|| SandboxError::type_error("subplot() arguments must be integers"))
            };
            (int(rows)?, int(cols)?, int(index)?)
        }
        _ => {
            return Err(SandboxError::type_error(
                "subplot() takes 1 or 3 positional arguments",
            ))
        }
    };
    if rows < 1 || cols < 1 || index < 1 || index > rows * cols {
        return Err(SandboxError::value_error(format!(
            "num must be an integer with 1 <= num <= {}, not {}",
            (rows * cols).max(1),
            index
        )));
    }
    let (rows, cols) = (rows as usize, cols as usize);
    if rows * cols > crate::plot::figure::MAX_AXES {
        return Err(too_many_figures());
    }
    let figure = interp.state.figures.get_mut(id).ok_or_else(|| figure_closed(id))?;
    if figure.rows != rows || figure.cols != cols {
        figure.rows = rows;
        figure.cols = cols;
        figure.axes.resize_with(rows * cols, Axes::default);
    }
    Ok(index as usize - 1)
}

/// `send_image_to_client(fig)`: render a figure (the current one by default)
/// into the output.
pub fn send_image_to_client(interp: &mut Interpreter<'_>, mut args: Args) -> Result<Value> {
    let figure = args.take(0, "fig");
    args.check("send_image_to_client", 0, 1)?;
    let id = match figure {
        None | Some(Value::None) => interp.state.figures.current_id().ok_or_else(too_many_figures)?,
        Some(Value::Object(object)) => match object.as_any().downcast_ref::<FigureObject>() {
            Some(figure) => figure.id,
            None => {
                return Err(SandboxError::type_error(format!(
                    "send_image_to_client() expects a Figure, not {}",
                    object.type_name()
                )))
            }
        },
        Some(other) => {
            return Err(SandboxError::type_error(format!(
                "send_image_to_client() expects a Figure, not {}",
                other.type_name()
            )))
        }
    };
    render_figure(interp, id)?;
    Ok(Value::None)
}

pub fn call(interp: &mut Interpreter<'_>, name: &str, mut args: Args) -> Result<Value> {
    match name {
        "figure" => {
            drop_cosmetic(&mut args);
            let size = figure_size(args.take_keyword("figsize"))?;
            let num = args.take(0, "num");
            args.check(name, 0, 1)?;
            if let Some(existing) = num.and_then(|n| n.as_int()).and_then(|n| usize::try_from(n).ok()) {
                if interp.state.figures.get(existing).is_some() {
                    interp.state.figures.set_current(existing);
                    return Ok(FigureObject::for_id(interp, existing)?.value());
                }
            }
            let id = interp.state.figures.open(size, 1, 1).ok_or_else(too_many_figures)?;
            Ok(FigureObject::for_id(interp, id)?.value())
        }
        "subplots" => {
            drop_cosmetic(&mut args);
            let size = figure_size(args.take_keyword("figsize"))?;
            let rows = grid_dimension(args.take(0, "nrows"), "rows")?;
            let cols = grid_dimension(args.take(1, "ncols"), "columns")?;
            args.check(name, 0, 2)?;
            let id = interp.state.figures.open(size, rows, cols).ok_or_else(too_many_figures)?;
            let figure = FigureObject::for_id(interp, id)?.value();
            let cell = |index: usize| AxesObject { figure: id, index }.value();
            let axes = match (rows, cols) {
                (1, 1) => cell(0),
                (1, _) | (_, 1) => Value::list((0..rows * cols).map(cell).collect()),
                _ => Value::list(
                    (0..rows)
                        .map(|r| Value::list((0..cols).map(|c| cell(r * cols + c)).collect()))
                        .collect(),
                ),
            };
            Ok(Value::tuple(vec![figure, axes]))
        }
        "subplot" => {
            drop_cosmetic(&mut args);
            let id = current_target(interp)?.figure;
            let index = subplot_index(interp, id, &args)?;
            if let Some(figure) = interp.state.figures.get_mut(id) {
                figure.current_axes = index;
            }
            Ok(AxesObject { figure: id, index }.value())
        }
        "gcf" => {
            args.check(name, 0, 0)?;
            let id = current_target(interp)?.figure;
            Ok(FigureObject::for_id(interp, id)?.value())
        }
        "gca" => {
            args.check(name, 0, 0)?;
            let id = current_target(interp)?.figure;
            let index = interp.state.figures.get(id).map_or(0, |f| f.current_axes);
            Ok(AxesObject { figure: id, index }.value())
        }
        "suptitle" => {
            drop_cosmetic(&mut args);
            args.check(name, 1, 1)?;
            let id = current_target(interp)?.figure;
            let text = args.positional[0].to_str();
            if let Some(figure) = interp.state.figures.get_mut(id) {
                figure.suptitle = Some(text);
            }
            Ok(Value::None)
        }
        "tight_layout" => {
            drop_cosmetic(&mut args);
            args.check(name, 0, 0)?;
            Ok(Value::None)
        }
        "show" => {
            args.take_keyword("block");
            args.check(name, 0, 0)?;
            let ids = interp.state.figures.ids();
            for id in &ids {
                render_figure(interp, *id)?;
            }
            interp.state.figures.close_all();
            Ok(Value::None)
        }
        "savefig" => {
            drop_cosmetic(&mut args);
            args.take(0, "fname");
            args.check(name, 0, 1)?;
            let id = current_target(interp)?.figure;
            render_figure(interp, id)?;
            Ok(Value::None)
        }
        "close" => {
            args.check(name, 0, 1)?;
            match args.get(0) {
                Some(Value::Str(s)) if &**s == "all" => interp.state.figures.close_all(),
                None | Some(Value::None) => {
                    if let Some(id) = interp.state.figures.current() {
                        interp.state.figures.close(id);
                    }
                }
                Some(Value::Object(object)) => {
                    if let Some(figure) = object.as_any().downcast_ref::<FigureObject>() {
                        interp.state.figures.close(figure.id);
                    }
                }
                Some(other) => match other.as_int() {
                    Some(n) if n > 0 => interp.state.figures.close(n as usize),
                    _ => {
                        return Err(SandboxError::type_error(format!(
                            "close() argument must be a Figure, an int, a str or None, not {}",
                            other.type_name()
                        )))
                    }
                },
            }
            Ok(Value::None)
        }
        "clf" => {
            args.check(name, 0, 0)?;
            let id = current_target(interp)?.figure;
            if let Some(figure) = interp.state.figures.get_mut(id) {
                figure.clear();
            }
            Ok(Value::None)
        }
        _ => {
            let target = current_target(interp)?;
            draw(interp, target, name, args)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_histogram_bins() {
        let (counts, edges) = histogram(&[1.0, 2.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(counts, vec![1.0, 2.0, 2.0]);
        assert_eq!(edges.len(), 4);
        assert_eq!(edges[0], 1.0);
        assert_eq!(edges[3], 4.0);
    }

    #[test]
    fn test_histogram_constant_data() {
        let (counts, edges) = histogram(&[5.0, 5.0], 2);
        assert_eq!(counts, vec![0.0, 2.0]);
        assert_eq!((edges[0], edges[2]), (4.5, 5.5));
    }

    #[test]
    fn test_color_argument_forms() {
        assert_eq!(color_argument(Some(Value::from("red"))).unwrap(), Some([255, 0, 0]));
        let rgb = Value::tuple(vec![Value::Float(0.0), Value::Float(1.0), Value::Float(0.0)]);
        assert_eq!(color_argument(Some(rgb)).unwrap(), Some([0, 255, 0]));
        assert!(color_argument(Some(Value::from("nope"))).is_err());
        assert_eq!(color_argument(None).unwrap(), None);
    }

    #[test]
    fn test_line_style_names() {
        assert_eq!(line_style(Some(Value::from("--"))).unwrap(), Some(LineStyle::Dashed));
        assert_eq!(line_style(None).unwrap(), None);
        assert!(line_style(Some(Value::from("wavy"))).is_err());
    }

    #[test]
    fn test_figure_size() {
        let size = Value::tuple(vec![Value::Int(8), Value::Int(4)]);
        assert_eq!(figure_size(Some(size)).unwrap(), (8.0, 4.0));
        assert_eq!(figure_size(None).unwrap(), DEFAULT_SIZE);
        assert!(figure_size(Some(Value::Int(3))).is_err());
    }
}
