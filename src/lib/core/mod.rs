pub mod concurrency;
pub mod error;
pub mod fs;
pub mod io;
pub mod sparse;

pub mod prelude {
    pub use super::concurrency::determine_allowed_cpus;
    pub use super::error::{is_broken_pipe, Result, ScprepError};
    pub use super::fs::{is_gzipped, make_parent_dirs, resolve_against};
    pub use super::io::{get_raw_writer, get_reader, get_writer, open_text, read_fofn};
    pub use super::sparse::{ColumnMoments, SparseOps};
}
