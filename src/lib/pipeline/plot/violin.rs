//! Grouped violin plots of per-cell metrics

use super::{PlotFormat, PlotSettings};
use crate::core::error::{Result, ScprepError};
use crate::core::fs::make_parent_dirs;
use log::{debug, info};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::PathBuf;

/// Points along each violin's density curve.
const GRID_POINTS: usize = 128;
/// Widest half-width of a violin, in category units.
const MAX_HALF_WIDTH: f64 = 0.4;

const PALETTE: [RGBColor; 8] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
];

/// Outline of one violin: half-widths along ascending `ys`.
#[derive(Debug, Clone, PartialEq)]
pub struct ViolinShape {
    pub center: f64,
    pub ys: Vec<f64>,
    pub half_widths: Vec<f64>,
}

impl ViolinShape {
    /// Closed polygon: up the left side, back down the right.
    pub fn polygon(&self) -> Vec<(f64, f64)> {
        let left = self
            .ys
            .iter()
            .zip(&self.half_widths)
            .map(|(&y, &w)| (self.center - w, y));
        let right = self
            .ys
            .iter()
            .zip(&self.half_widths)
            .rev()
            .map(|(&y, &w)| (self.center + w, y));
        left.chain(right).collect()
    }
}

/// Gaussian kernel density of `values`, cut at the data range and scaled so
/// the densest point spans `max_half_width`.
///
/// The bandwidth follows Scott's rule. NaNs are ignored; `None` when nothing
/// finite remains.
pub fn violin_shape(values: &[f64], center: f64, max_half_width: f64) -> Option<ViolinShape> {
    let finite: Vec<f64> = values.iter().cloned().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }

    let n = finite.len() as f64;
    let lo = finite.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = finite.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = finite.iter().sum::<f64>() / n;
    let std = if finite.len() > 1 {
        (finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };

    if std == 0.0 || hi == lo {
        return Some(ViolinShape {
            center,
            ys: vec![lo, hi],
            half_widths: vec![max_half_width, max_half_width],
        });
    }

    let bandwidth = std * n.powf(-0.2);
    let step = (hi - lo) / (GRID_POINTS - 1) as f64;
    let ys: Vec<f64> = (0..GRID_POINTS).map(|i| lo + step * i as f64).collect();
    let densities: Vec<f64> = ys
        .iter()
        .map(|&y| {
            finite
                .iter()
                .map(|&v| {
                    let z = (y - v) / bandwidth;
                    (-0.5 * z * z).exp()
                })
                .sum::<f64>()
        })
        .collect();

    let peak = densities.iter().cloned().fold(0.0f64, f64::max);
    let half_widths = densities
        .iter()
        .map(|d| if peak > 0.0 { d / peak * max_half_width } else { 0.0 })
        .collect();

    Some(ViolinShape {
        center,
        ys,
        half_widths,
    })
}

/// Render one violin per group to `<figdir>/violin_<metric>.<ext>`.
pub fn render_violin_plot(
    metric: &str,
    groups: &[(String, Vec<f64>)],
    settings: &PlotSettings,
) -> Result<PathBuf> {
    let path = settings
        .figdir
        .join(format!("violin_{}.{}", metric, settings.format.extension()));
    make_parent_dirs(&path).map_err(|e| ScprepError::Plot(e.to_string()))?;

    let size = settings.pixel_size();
    match settings.format {
        PlotFormat::Png => {
            let root = BitMapBackend::new(&path, size).into_drawing_area();
            draw_violins(root, metric, groups, settings.font_scale())?;
        }
        PlotFormat::Svg => {
            let root = SVGBackend::new(&path, size).into_drawing_area();
            draw_violins(root, metric, groups, settings.font_scale())?;
        }
    }

    info!("Saved violin plot for '{}' to {}", metric, path.display());
    Ok(path)
}

fn draw_violins<DB: DrawingBackend>(
    root: DrawingArea<DB, Shift>,
    metric: &str,
    groups: &[(String, Vec<f64>)],
    font_scale: f64,
) -> Result<()> {
    let plot_err = |e: DrawingAreaErrorKind<DB::ErrorType>| ScprepError::Plot(e.to_string());

    let (y_lo, y_hi) = value_range(groups);
    let n_groups = groups.len().max(1) as f64;
    let font = |pt: f64| ("sans-serif", pt * font_scale);

    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin((10.0 * font_scale) as u32)
        .x_label_area_size((60.0 * font_scale) as u32)
        .y_label_area_size((80.0 * font_scale) as u32)
        .build_cartesian_2d(-0.5..n_groups - 0.5, y_lo..y_hi)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(groups.len().max(1))
        .x_label_formatter(&|val: &f64| {
            let idx = val.round();
            if idx >= 0.0 && (idx as usize) < groups.len() {
                groups[idx as usize].0.clone()
            } else {
                String::new()
            }
        })
        .x_label_style(font(12.0))
        .y_label_style(font(12.0))
        .y_desc(metric)
        .axis_desc_style(font(14.0))
        .draw()
        .map_err(plot_err)?;

    for (idx, (name, values)) in groups.iter().enumerate() {
        let shape = match violin_shape(values, idx as f64, MAX_HALF_WIDTH) {
            Some(shape) => shape,
            None => {
                debug!("No finite '{}' values for group {}", metric, name);
                continue;
            }
        };
        let color = PALETTE[idx % PALETTE.len()];
        let outline = shape.polygon();
        chart
            .draw_series(std::iter::once(Polygon::new(
                outline.clone(),
                color.mix(0.8).filled(),
            )))
            .map_err(plot_err)?;
        let mut closed = outline;
        if let Some(&first) = closed.first() {
            closed.push(first);
        }
        chart
            .draw_series(std::iter::once(PathElement::new(closed, BLACK.stroke_width(1))))
            .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    Ok(())
}

/// Finite value range over every group, padded by 5%.
fn value_range(groups: &[(String, Vec<f64>)]) -> (f64, f64) {
    let (lo, hi) = groups
        .iter()
        .flat_map(|(_, values)| values.iter())
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    if (hi - lo).abs() < 1e-9 {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn density_is_width_scaled_and_cut_at_range() {
        let values = vec![1.0, 2.0, 2.0, 2.0, 3.0];
        let shape = violin_shape(&values, 0.0, 0.4).unwrap();
        assert_eq!(shape.ys.first(), Some(&1.0));
        assert!((shape.ys.last().unwrap() - 3.0).abs() < 1e-12);
        let peak = shape.half_widths.iter().cloned().fold(0.0, f64::max);
        assert!((peak - 0.4).abs() < 1e-12);
        // symmetric data peaks in the middle of the grid
        let mid = shape.half_widths[GRID_POINTS / 2];
        assert!(mid > shape.half_widths[0]);
    }

    #[test]
    fn constant_values_draw_a_flat_band() {
        let shape = violin_shape(&[5.0, 5.0], 0.0, 0.5).unwrap();
        assert_eq!(shape.ys, vec![5.0, 5.0]);
        assert_eq!(
            shape.polygon(),
            vec![(-0.5, 5.0), (-0.5, 5.0), (0.5, 5.0), (0.5, 5.0)]
        );
    }

    #[test]
    fn nan_only_groups_have_no_shape() {
        assert!(violin_shape(&[f64::NAN], 0.0, 0.4).is_none());
    }

    #[test]
    fn range_is_padded() {
        let groups = vec![
            ("a".to_string(), vec![0.0, 10.0]),
            ("b".to_string(), vec![f64::NAN, 5.0]),
        ];
        assert_eq!(value_range(&groups), (-0.5, 10.5));
    }
}
