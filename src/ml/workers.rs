//! Scoped worker threads for embarrassingly parallel model work.

/// Resolve a requested worker count; `0` means one worker per available core.
pub fn resolve_workers(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Evaluate `job(i)` for every `i in 0..count` on up to `workers` threads.
///
/// Work is split into contiguous index ranges and results come back in index
/// order, so the output does not depend on the worker count.
pub fn map_indexed<R, F>(count: usize, workers: usize, job: F) -> Vec<R>
where
    R: Send,
    F: Fn(usize) -> R + Sync,
{
    let worker_count = resolve_workers(workers).min(count).max(1);
    if worker_count == 1 {
        return (0..count).map(&job).collect();
    }
    let chunk = count.div_ceil(worker_count);
    let job = &job;
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..worker_count)
            .map(|worker| {
                let start = worker * chunk;
                let end = (start + chunk).min(count);
                scope.spawn(move || (start..end).map(job).collect::<Vec<R>>())
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(results) => results,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_all_cores() {
        assert!(resolve_workers(0) >= 1);
        assert_eq!(resolve_workers(3), 3);
    }

    #[test]
    fn results_keep_index_order_for_any_worker_count() {
        let expected: Vec<usize> = (0..37).map(|i| i * i).collect();
        for workers in [1, 2, 4, 64] {
            assert_eq!(map_indexed(37, workers, |i| i * i), expected);
        }
        assert!(map_indexed(0, 4, |i| i).is_empty());
    }
}
