//! Shared helpers re-exported from `crate::core` for the binary.

pub use crate::core::concurrency::determine_allowed_cpus;
pub use crate::core::error::is_broken_pipe;
pub use crate::core::fs::{is_gzipped, make_parent_dirs, resolve_against};
pub use crate::core::io::{get_reader, get_writer, read_fofn};
