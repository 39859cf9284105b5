use crossbeam::channel::{bounded, unbounded};
use tracing::{debug, info};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{KfreqError, Result};
use crate::functions::kmer_counter::KmerCountTable;
use crate::utils::count_type::CountType;

/// Runs `job` once per input path on `threads` workers.
///
/// Every worker exclusively owns one table built by `factory`, cleared before
/// each file it takes. Results are returned in input order regardless of
/// which worker finished first. The first failure (lowest file index) aborts
/// the run; files not yet started are skipped.
pub fn run_pool<C, T, F, J>(paths: &[PathBuf], threads: usize, factory: F, job: J) -> Result<Vec<T>>
where
    C: CountType,
    T: Send,
    F: Fn() -> Result<KmerCountTable<C>>,
    J: Fn(&mut KmerCountTable<C>, usize, &Path) -> Result<T> + Sync,
{
    let threads = threads.clamp(1, paths.len().max(1));
    // Build every table up front so a bad configuration fails before any
    // file is opened
    let tables = (0..threads).map(|_| factory()).collect::<Result<Vec<_>>>()?;
    info!("Processing {} files on {} workers", paths.len(), threads);

    let (job_tx, job_rx) = bounded::<(usize, &Path)>(paths.len().max(1));
    for (index, path) in paths.iter().enumerate() {
        job_tx
            .send((index, path.as_path()))
            .map_err(|_| KfreqError::Config("job queue closed before every path was queued".into()))?;
    }
    drop(job_tx);

    let (result_tx, result_rx) = unbounded::<(usize, Result<T>)>();
    let shutdown_flag = AtomicBool::new(false);

    std::thread::scope(|scope| {
        for (worker, mut kf) in tables.into_iter().enumerate() {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let shutdown_flag = &shutdown_flag;
            let job = &job;
            scope.spawn(move || {
                for (index, path) in job_rx.iter() {
                    if shutdown_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    debug!("Worker {worker} takes {}", path.display());
                    kf.clear();
                    let result = job(&mut kf, index, path);
                    if result.is_err() {
                        shutdown_flag.store(true, Ordering::Relaxed);
                    }
                    if result_tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(paths.len()).collect();
    let mut first_error: Option<(usize, _)> = None;
    for (index, result) in result_rx.iter() {
        match result {
            Ok(value) => slots[index] = Some(value),
            Err(e) => {
                if first_error.as_ref().is_none_or(|(i, _)| index < *i) {
                    first_error = Some((index, e));
                }
            }
        }
    }
    if let Some((_, e)) = first_error {
        return Err(e);
    }

    // With no error every job ran and reported
    Ok(slots.into_iter().flatten().collect())
}
