//! Setup shared by the subcommands

use anyhow::Result;
use log::{debug, warn};
use once_cell::sync::OnceCell;
use rayon::ThreadPoolBuilder;
use scprep_lib::utils;

/// Worker count of rayon's global pool, fixed by the first subcommand that sizes it.
static WORKER_POOL_SIZE: OnceCell<usize> = OnceCell::new();

/// Size rayon's global pool for `threads` workers and return the size in effect.
///
/// Only the first call builds the pool. A later request for a different size
/// is logged and ignored, as is a pool some other caller already built.
pub fn init_worker_pool(threads: usize) -> Result<usize> {
    let wanted = utils::determine_allowed_cpus(threads)?;
    let size = *WORKER_POOL_SIZE.get_or_init(|| build_worker_pool(wanted));
    if size != wanted {
        warn!(
            "Worker pool already runs {} threads, request for {} ignored",
            size, wanted
        );
    }
    Ok(size)
}

fn build_worker_pool(threads: usize) -> usize {
    let built = ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|idx| format!("scprep-worker-{}", idx))
        .build_global();
    match built {
        Ok(()) => threads,
        Err(err) => {
            debug!("Keeping the existing global pool: {}", err);
            rayon::current_num_threads()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_fixes_the_pool_size() {
        let first = init_worker_pool(1).unwrap();
        let second = init_worker_pool(first + 1).unwrap();
        assert_eq!(first, second);
        assert_eq!(rayon::current_num_threads(), first);
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(init_worker_pool(0).is_err());
    }
}
