pub mod common;
pub mod filter;
pub mod plot_qc;
pub mod process;

pub use filter::{run_filter, FilterArgs};
pub use plot_qc::{run_plot_qc, PlotQcArgs};
pub use process::{run_process, ProcessArgs};
