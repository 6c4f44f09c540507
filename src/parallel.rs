use rayon::ThreadPoolBuilder;

use crate::error::Result;

/// Runs `f` inside a dedicated pool when a thread count is given
pub fn run_in_pool<T, F>(threads: Option<usize>, f: F) -> Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    if let Some(threads) = threads {
        let pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
        Ok(pool.install(f))
    } else {
        Ok(f())
    }
}

pub fn resolve_threads(threads: Option<usize>, tasks: usize) -> Option<usize> {
    if let Some(threads) = threads {
        let capped = threads.min(tasks.max(1));
        if threads > capped {
            tracing::warn!(
                "Requested threads ({threads}) exceed the number of loci ({tasks}); using {capped}"
            );
        }
        Some(capped)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_threads() {
        assert_eq!(resolve_threads(None, 10), None);
        assert_eq!(resolve_threads(Some(4), 10), Some(4));
        assert_eq!(resolve_threads(Some(8), 3), Some(3));
        assert_eq!(resolve_threads(Some(8), 0), Some(1));
    }

    #[test]
    fn test_run_in_pool() {
        let value = run_in_pool(Some(2), || rayon::current_num_threads()).unwrap();
        assert_eq!(value, 2);
        assert_eq!(run_in_pool(None, || 7).unwrap(), 7);
    }
}
