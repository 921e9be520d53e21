use crate::{config::MAX_WORKERS, error::Error};
use core::{convert::Infallible, fmt};

/// A statically typed filter over work units.
///
/// Any `Fn(u64) -> bool` is a predicate that never fails. Wrap a closure that
/// returns `Result<bool, E>` in [`Fallible`] to let the pipeline record
/// failures as worker faults instead of aborting.
///
/// Predicates are shared by every worker of a job, hence `Send + Sync`.
pub trait Predicate: Send + Sync {
    type Err: fmt::Display;

    /// Returns whether `value` should be published to the result channel.
    ///
    /// # Errors
    ///
    /// Implementations return an error when `value` cannot be evaluated. The
    /// worker stops at that value and reports a fault.
    fn test(&self, value: u64) -> Result<bool, Self::Err>;
}

impl<F> Predicate for F
where
    F: Fn(u64) -> bool + Send + Sync,
{
    type Err = Infallible;

    fn test(&self, value: u64) -> Result<bool, Self::Err> {
        Ok(self(value))
    }
}

/// Adapter for predicates that can fail.
///
/// ```
/// use fanline::{Fallible, Predicate};
///
/// let checked = Fallible(|v: u64| {
///     if v == 13 { Err("unlucky") } else { Ok(v % 2 == 1) }
/// });
/// assert_eq!(checked.test(3).ok(), Some(true));
/// assert!(checked.test(13).is_err());
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Fallible<F>(pub F);

impl<F, E> Predicate for Fallible<F>
where
    F: Fn(u64) -> Result<bool, E> + Send + Sync,
    E: fmt::Display,
{
    type Err = E;

    fn test(&self, value: u64) -> Result<bool, Self::Err> {
        (self.0)(value)
    }
}

/// A single unit of work for the pipeline: filter `[0, total)` with
/// `predicate` across `worker_count` workers.
///
/// Jobs are consumed by the pipeline and cannot be reused.
pub struct Job<P> {
    total: u64,
    worker_count: usize,
    predicate: P,
}

impl<P> fmt::Debug for Job<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("total", &self.total)
            .field("worker_count", &self.worker_count)
            .finish_non_exhaustive()
    }
}

impl<P: Predicate> Job<P> {
    /// Creates a job, validating its arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `worker_count` is zero or above
    /// [`MAX_WORKERS`].
    pub fn new(total: u64, worker_count: usize, predicate: P) -> crate::Result<Self> {
        check_worker_count(worker_count)?;
        Ok(Self {
            total,
            worker_count,
            predicate,
        })
    }

    /// Creates a job sized to the machine's available parallelism.
    pub fn with_default_workers(total: u64, predicate: P) -> Self {
        Self {
            total,
            worker_count: default_worker_count().min(MAX_WORKERS),
            predicate,
        }
    }

    pub const fn total(&self) -> u64 {
        self.total
    }

    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub(crate) fn into_parts(self) -> (u64, usize, P) {
        (self.total, self.worker_count, self.predicate)
    }
}

pub(crate) fn check_worker_count(worker_count: usize) -> crate::Result<()> {
    if worker_count == 0 {
        return Err(Error::invalid("worker count must be greater than 0"));
    }
    if worker_count > MAX_WORKERS {
        return Err(Error::invalid(format!(
            "worker count {worker_count} exceeds the maximum of {MAX_WORKERS}"
        )));
    }
    Ok(())
}

/// Number of workers used when the caller does not pick one.
pub fn default_worker_count() -> usize {
    num_cpus::get().max(1)
}

/// Trial-division primality test used by demos, benches and tests.
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n < 4 {
        return true;
    }
    if n % 2 == 0 {
        return false;
    }
    let mut divisor = 3;
    while divisor <= n / divisor {
        if n % divisor == 0 {
            return false;
        }
        divisor += 2;
    }
    true
}
