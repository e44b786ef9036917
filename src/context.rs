//! The process context: which rank this process is, how many ranks take part
//! in the run, and the two collective primitives (barrier and broadcast) the
//! rest of the crate needs.
//!
//! Every component that is aware of the parallel decomposition takes a context
//! by reference rather than reaching for a global. [`SerialContext`] is the
//! single-process case; [`ThreadGroup`] runs several ranks as threads sharing
//! a barrier, which is how the multi-rank behavior is tested.
use std::any::Any;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

pub trait ProcessContext {
    /// 0-based rank of the current process.
    fn rank(&self) -> usize;

    /// Total number of processes in the run.
    fn size(&self) -> usize;

    /// Block until every process has reached this point.
    fn barrier(&self);

    /// Return the value passed by `root` on every process. Non-root processes
    /// must still call this, their `value` is ignored.
    fn broadcast<T: Clone + Send + 'static>(&self, value: T, root: usize) -> T;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

/// Collect one value from every rank, in rank order, on every rank.
pub fn all_gather<C: ProcessContext, T: Clone + Send + 'static>(ctx: &C, value: T) -> Vec<T> {
    let mut out = Vec::with_capacity(ctx.size());
    for root in 0..ctx.size() {
        out.push(ctx.broadcast(value.clone(), root));
    }
    out
}

/// Context for a run with a single process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialContext;

impl ProcessContext for SerialContext {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn broadcast<T: Clone + Send + 'static>(&self, value: T, _root: usize) -> T {
        value
    }
}

/// Panic payload of a rank that gave up because a peer panicked.
#[derive(Debug)]
struct PeerPanicked;

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    broken: bool,
}

/// A reusable barrier that can be broken, releasing every waiter.
struct GroupBarrier {
    size: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl GroupBarrier {
    fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(BarrierState::default()),
            cvar: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.broken {
            state.arrived += 1;
            if state.arrived == self.size {
                state.arrived = 0;
                state.generation += 1;
                self.cvar.notify_all();
                return;
            }
            let generation = state.generation;
            while state.generation == generation && !state.broken {
                state = self.cvar.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            if !state.broken {
                return;
            }
        }
        drop(state);
        std::panic::panic_any(PeerPanicked);
    }

    fn break_all(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.broken = true;
        self.cvar.notify_all();
    }
}

struct Shared {
    barrier: GroupBarrier,
    slot: Mutex<Option<Box<dyn Any + Send>>>,
}

/// Breaks the group's barrier if its rank unwinds.
struct BreakOnPanic<'a>(&'a Shared);

impl Drop for BreakOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.barrier.break_all();
        }
    }
}

/// One rank of a [`ThreadGroup`].
#[derive(Clone)]
pub struct ThreadGroupContext {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl ProcessContext for ThreadGroupContext {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn broadcast<T: Clone + Send + 'static>(&self, value: T, root: usize) -> T {
        // The slot is only overwritten after the previous broadcast's second
        // barrier, so every reader has finished with the old value by then.
        if self.rank == root {
            let mut slot = self.shared.slot.lock().expect("broadcast slot poisoned");
            *slot = Some(Box::new(value));
        }
        self.barrier();
        let out = {
            let slot = self.shared.slot.lock().expect("broadcast slot poisoned");
            slot.as_ref()
                .and_then(|v| v.downcast_ref::<T>())
                .cloned()
                .expect("all ranks must broadcast the same type from the same root (this is a bug)")
        };
        self.barrier();
        out
    }
}

/// A set of ranks backed by OS threads.
pub struct ThreadGroup {
    contexts: Vec<ThreadGroupContext>,
}

impl ThreadGroup {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            barrier: GroupBarrier::new(size),
            slot: Mutex::new(None),
        });
        let contexts = (0..size)
            .map(|rank| ThreadGroupContext {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect();
        Self { contexts }
    }

    /// Run `f` once per rank, each on its own thread, and return the results
    /// in rank order. A panic on any rank releases the others from their
    /// barriers and is propagated once every thread has finished.
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(&ThreadGroupContext) -> R + Sync,
        R: Send,
    {
        let group = Self::new(size);
        std::thread::scope(|s| {
            let handles: Vec<_> = group
                .contexts
                .iter()
                .map(|ctx| {
                    let f = &f;
                    s.spawn(move || {
                        let _guard = BreakOnPanic(&ctx.shared);
                        f(ctx)
                    })
                })
                .collect();
            let joined: Vec<std::thread::Result<R>> = handles.into_iter().map(|h| h.join()).collect();

            let mut results = Vec::with_capacity(joined.len());
            let mut first_panic = None;
            for res in joined {
                match res {
                    Ok(r) => results.push(r),
                    Err(e) if e.is::<PeerPanicked>() => {}
                    Err(e) => {
                        first_panic.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_panic {
                std::panic::resume_unwind(e);
            }
            results
        })
    }
}
