use anyhow::{Error, Result};
use log::{error, warn};

/// Validate and normalize a requested CPU count.
///
/// Requests above the machine's core count are honoured with a warning.
pub fn determine_allowed_cpus(desired: usize) -> Result<usize> {
    if desired == 0 {
        error!("Must select > 0 threads");
        Err(Error::msg("Too few threads selected. Min 1"))
    } else if desired > num_cpus::get() {
        warn!(
            "Specified {} threads but only {} cores are available",
            desired,
            num_cpus::get()
        );
        Ok(desired)
    } else {
        Ok(desired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_threads_is_rejected() {
        assert!(determine_allowed_cpus(0).is_err());
    }

    #[test]
    fn positive_thread_counts_pass_through() {
        assert_eq!(determine_allowed_cpus(1).unwrap(), 1);
        let many = num_cpus::get() * 4;
        assert_eq!(determine_allowed_cpus(many).unwrap(), many);
    }
}
