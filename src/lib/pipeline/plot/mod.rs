//! QC plotting with `plotters`

pub mod violin;

pub use violin::{render_violin_plot, violin_shape, ViolinShape};

use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotFormat {
    Png,
    Svg,
}

impl PlotFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            PlotFormat::Png => "png",
            PlotFormat::Svg => "svg",
        }
    }
}

impl FromStr for PlotFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(PlotFormat::Png),
            "svg" => Ok(PlotFormat::Svg),
            other => Err(format!("Unsupported plot format '{}': use png or svg", other)),
        }
    }
}

/// Where and how figures are written.
#[derive(Debug, Clone)]
pub struct PlotSettings {
    pub figdir: PathBuf,
    pub format: PlotFormat,
    /// Raster resolution; vector output is laid out at 100 dpi.
    pub dpi: u32,
    pub width_in: f64,
    pub height_in: f64,
}

impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            figdir: PathBuf::from("plots"),
            format: PlotFormat::Png,
            dpi: 300,
            width_in: 12.0,
            height_in: 8.0,
        }
    }
}

impl PlotSettings {
    fn effective_dpi(&self) -> f64 {
        match self.format {
            PlotFormat::Png => self.dpi as f64,
            PlotFormat::Svg => 100.0,
        }
    }

    pub fn pixel_size(&self) -> (u32, u32) {
        let dpi = self.effective_dpi();
        (
            (self.width_in * dpi).round() as u32,
            (self.height_in * dpi).round() as u32,
        )
    }

    /// Text and margin multiplier relative to 100 dpi.
    pub fn font_scale(&self) -> f64 {
        self.effective_dpi() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_size_follows_dpi() {
        let settings = PlotSettings::default();
        assert_eq!(settings.pixel_size(), (3600, 2400));
        assert_eq!(settings.font_scale(), 3.0);

        let svg = PlotSettings {
            format: PlotFormat::Svg,
            ..PlotSettings::default()
        };
        assert_eq!(svg.pixel_size(), (1200, 800));
    }

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!("SVG".parse::<PlotFormat>(), Ok(PlotFormat::Svg));
        assert!("pdf".parse::<PlotFormat>().is_err());
    }
}
