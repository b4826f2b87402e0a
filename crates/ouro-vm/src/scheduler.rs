//! Cooperative async scheduling (spec section 4.6/C7, "Async"): a
//! single-threaded round-robin scheduler over a set of `Vm` tasks.
//!
//! A task's continuation is nothing but its `Vm` struct — `Suspend::Await`
//! and `Suspend::Yield` both just return from `Vm::run()` with frames,
//! operand stack and globals untouched, so resuming a task is calling
//! `run()` again. This mirrors the "continuation records, not host
//! coroutines" design note: there's no native-thread or green-thread
//! primitive here at all, just a queue of structs taking turns.

use std::collections::VecDeque;

use ouro_core::Value;

use crate::error::VmError;
use crate::vm::{RunOutcome, Suspend, Vm};

pub type TaskId = usize;

/// What became of a task once it stopped appearing in the run queue.
#[derive(Debug, Clone)]
pub enum TaskResult {
    Completed(Value),
    Threw(Value),
    Failed(VmError),
}

pub struct Scheduler {
    queue: VecDeque<(TaskId, Vm)>,
    next_id: TaskId,
    results: Vec<(TaskId, TaskResult)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            queue: VecDeque::new(),
            next_id: 0,
            results: Vec::new(),
        }
    }

    /// Enqueue a task, returning the id later used to find its result.
    pub fn spawn(&mut self, vm: Vm) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push_back((id, vm));
        id
    }

    /// Request cancellation of a still-running task. A no-op if the task
    /// already completed (it will simply not be found in the queue).
    pub fn cancel(&mut self, id: TaskId) {
        if let Some((_, vm)) = self.queue.iter_mut().find(|(tid, _)| *tid == id) {
            vm.cancel();
        }
    }

    /// Run one round: every currently-queued task gets one `run()` turn.
    /// Tasks that halt or throw are moved into `self.results`; tasks that
    /// suspend go to the back of the queue for the next round.
    pub fn run_round(&mut self) {
        let round_len = self.queue.len();
        for _ in 0..round_len {
            let Some((id, mut vm)) = self.queue.pop_front() else {
                break;
            };
            match vm.run() {
                Ok(RunOutcome::Halted(v)) => self.results.push((id, TaskResult::Completed(v))),
                Ok(RunOutcome::Threw(v)) => self.results.push((id, TaskResult::Threw(v))),
                Ok(RunOutcome::Suspended(Suspend::Await)) | Ok(RunOutcome::Suspended(Suspend::Yield(_))) => {
                    self.queue.push_back((id, vm));
                }
                Err(e) => self.results.push((id, TaskResult::Failed(e))),
            }
        }
    }

    /// Drive every spawned task to completion, round-robin.
    pub fn run_to_completion(&mut self) {
        while !self.queue.is_empty() {
            self.run_round();
        }
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn take_result(&mut self, id: TaskId) -> Option<TaskResult> {
        let pos = self.results.iter().position(|(tid, _)| *tid == id)?;
        Some(self.results.remove(pos).1)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ouro_compiler::compile;
    use std::rc::Rc;

    fn vm_for(src: &str) -> Vm {
        let program = compile(src, "test.ouro").unwrap();
        Vm::new(Rc::new(program))
    }

    #[test]
    fn single_task_runs_to_completion() {
        let mut sched = Scheduler::new();
        let id = sched.spawn(vm_for("return 1 + 1;"));
        sched.run_to_completion();
        assert!(matches!(sched.take_result(id), Some(TaskResult::Completed(Value::Int(2)))));
    }

    #[test]
    fn two_tasks_interleave_round_robin() {
        let mut sched = Scheduler::new();
        let a = sched.spawn(vm_for("let x = await 1; return x + 10;"));
        let b = sched.spawn(vm_for("return 5;"));
        assert_eq!(sched.queue.len(), 2);
        sched.run_round();
        // `b` has no suspension point, so it finishes in the first round;
        // `a` suspends once and is still queued.
        assert!(matches!(sched.take_result(b), Some(TaskResult::Completed(Value::Int(5)))));
        assert_eq!(sched.queue.len(), 1);
        sched.run_to_completion();
        assert!(matches!(sched.take_result(a), Some(TaskResult::Completed(Value::Int(11)))));
    }

    #[test]
    fn cancelling_a_suspended_task_fails_on_resume() {
        let mut sched = Scheduler::new();
        let id = sched.spawn(vm_for("let x = await 1; return x;"));
        sched.run_round();
        assert_eq!(sched.queue.len(), 1);
        sched.cancel(id);
        sched.run_to_completion();
        assert!(matches!(sched.take_result(id), Some(TaskResult::Failed(_))));
    }
}
