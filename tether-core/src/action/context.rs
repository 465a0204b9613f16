//! Per-thread stack of in-flight async action steps.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::reactive::{ActionRunInfo, Runtime};

thread_local! {
    static STACK: RefCell<Vec<ActionContext>> = const { RefCell::new(Vec::new()) };
    static NEXT_RUN_ID: Cell<u64> = const { Cell::new(0) };
}

/// Name of the action boundary opened for one step of a run.
pub fn boundary_name(name: &str, run_id: u64, step: u32) -> String {
    format!("{name} - runid {run_id} - step {step}")
}

/// Snapshot of the step currently on top of the action stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionStep {
    pub run_id: u64,
    pub step: u32,
    pub name: String,
}

impl ActionStep {
    pub fn boundary_name(&self) -> String {
        boundary_name(&self.name, self.run_id, self.step)
    }
}

/// The step on top of this thread's action stack, if any.
pub fn current_action() -> Option<ActionStep> {
    STACK
        .try_with(|stack| {
            stack.borrow().last().map(|ctx| ActionStep {
                run_id: ctx.run_id,
                step: ctx.step,
                name: ctx.name.to_string(),
            })
        })
        .ok()
        .flatten()
}

/// Number of steps currently open on this thread.
pub fn open_steps() -> usize {
    STACK.try_with(|stack| stack.borrow().len()).unwrap_or(0)
}

/// Shared by every step of one run.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    finished: AtomicBool,
}

impl RunState {
    pub(crate) fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

/// One step of a run, with its open action boundary.
pub(crate) struct ActionContext {
    pub(crate) run_id: u64,
    pub(crate) step: u32,
    pub(crate) name: Arc<str>,
    pub(crate) run: Arc<RunState>,
    info: ActionRunInfo,
}

impl ActionContext {
    /// Open the boundary for `step` and push it.
    pub(crate) fn open(run_id: u64, step: u32, name: Arc<str>, run: Arc<RunState>) {
        let info = Runtime::start_action(&boundary_name(&name, run_id, step));
        tracing::trace!(action = %name, run_id, step, "step started");
        push(ActionContext {
            run_id,
            step,
            name,
            run,
            info,
        });
    }

    /// End the boundary of this step.
    pub(crate) fn close(self, failed: bool) -> Suspended {
        let ActionContext {
            run_id,
            step,
            name,
            run,
            mut info,
        } = self;
        if failed {
            info.mark_failed();
        }
        Runtime::end_action(info);
        tracing::trace!(action = %name, run_id, step, failed, "step ended");
        Suspended {
            run_id,
            step,
            name,
            run,
        }
    }
}

/// A run between two steps.
pub(crate) struct Suspended {
    run_id: u64,
    step: u32,
    name: Arc<str>,
    run: Arc<RunState>,
}

impl Suspended {
    /// Open the next step, unless the run has already finished.
    pub(crate) fn resume(self) {
        if self.run.is_finished() {
            return;
        }
        ActionContext::open(self.run_id, self.step + 1, self.name, self.run);
    }
}

pub(crate) fn next_run_id() -> u64 {
    NEXT_RUN_ID
        .try_with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        })
        .unwrap_or(0)
}

pub(crate) fn push(ctx: ActionContext) {
    let (run_id, step) = (ctx.run_id, ctx.step);
    if STACK.try_with(|stack| stack.borrow_mut().push(ctx)).is_err() {
        tracing::warn!(run_id, step, "action stack torn down, step context dropped");
    }
}

pub(crate) fn pop() -> Option<ActionContext> {
    STACK.try_with(|stack| stack.borrow_mut().pop()).ok().flatten()
}

/// Take the context of `run_id` out of the stack wherever it sits.
pub(crate) fn remove_run(run_id: u64) -> Option<ActionContext> {
    STACK
        .try_with(|stack| {
            let mut stack = stack.borrow_mut();
            let pos = stack.iter().rposition(|ctx| ctx.run_id == run_id)?;
            Some(stack.remove(pos))
        })
        .ok()
        .flatten()
}
