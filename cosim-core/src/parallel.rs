//! Scoped control of nested solver parallelism.
//!
//! Unit responses of implicit domains are computed with one linear solve per
//! interface DOF, fanned out over the rayon pool. The solvers themselves must
//! then run serially: faer's global parallelism, which every faer solver
//! reads, is switched to sequential for the duration of the fan-out and
//! restored afterwards, on every exit path including errors and panics.
//!
//! Only one fan-out may own the global setting at a time, so the guard also
//! holds a process-wide permit. The permit is reentrant: a rayon worker that
//! holds it and steals another fan-out's task while waiting on its own
//! columns acquires it again instead of deadlocking. Fan-outs started from
//! different threads still run one after another.

use parking_lot::{const_reentrant_mutex, ReentrantMutex, ReentrantMutexGuard};

static SOLVER_PERMIT: ReentrantMutex<()> = const_reentrant_mutex(());

/// Forces faer solvers to run sequentially until dropped.
pub struct SerialSolverGuard {
    previous_par: faer::Par,
    _permit: ReentrantMutexGuard<'static, ()>,
}

impl SerialSolverGuard {
    /// Acquire the global permit and force solvers to run serially.
    pub fn acquire() -> Self {
        let permit = SOLVER_PERMIT.lock();
        let previous_par = faer::get_global_parallelism();
        faer::set_global_parallelism(faer::Par::Seq);
        tracing::trace!("nested solver parallelism disabled");

        Self {
            previous_par,
            _permit: permit,
        }
    }
}

impl Drop for SerialSolverGuard {
    fn drop(&mut self) {
        faer::set_global_parallelism(self.previous_par);
        tracing::trace!("nested solver parallelism restored");
    }
}
