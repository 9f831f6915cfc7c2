//! Thread scheduling boundary
//!
//! The core consumes the scheduler through three entry points: a fork
//! queues a kernel thread bound to the child process, the platform's
//! trap-return loop pops the next runnable thread and enters user mode
//! with its frame, and an exiting process tears itself down before
//! handing the CPU back. Scheduling *policy* is not part of the core;
//! the queue is plain FIFO.

use alloc::boxed::Box;
use alloc::collections::VecDeque;

use crate::arch::trapframe::{enter_forked_process, Trapframe};
use crate::proc::{self, Pid};
use crate::sync::Mutex;

/// A thread queued to enter user mode for the first time.
pub struct PendingThread {
    pub pid: Pid,
    pub trapframe: Box<Trapframe>,
}

lazy_static::lazy_static! {
    static ref RUN_QUEUE: Mutex<VecDeque<PendingThread>> = Mutex::new(VecDeque::new());
}

/// Queue a kernel thread that will run `enter_forked_process` for the
/// given child. Called from fork, step 5.
pub fn spawn_user_thread(pid: Pid, trapframe: Box<Trapframe>) {
    log::trace!("sched: queueing first run of pid {}", pid);
    RUN_QUEUE.lock().push_back(PendingThread { pid, trapframe });
}

/// Pop the next pending thread, make its process current, and produce
/// the finalized trapframe the trap-return path restores.
pub fn run_next() -> Option<(Pid, Trapframe)> {
    let pending = RUN_QUEUE.lock().pop_front()?;
    let proc = proc::get(pending.pid)
        .expect("queued thread's process vanished before first run");
    proc::set_current(Some(proc));
    let tf = enter_forked_process(pending.trapframe);
    Some((pending.pid, tf))
}

/// Threads waiting for their first run.
pub fn pending_count() -> usize {
    RUN_QUEUE.lock().len()
}

/// Drop everything queued (test resets).
pub fn clear_queue() {
    RUN_QUEUE.lock().clear();
}

/// Final step of `_exit`: release the current process's resources and
/// give up the CPU. The pid-table entry has already been settled by
/// the exit path; this destroys the process object itself.
pub fn thread_exit_destroy_proc() {
    let proc = proc::set_current(None).expect("exiting thread has no current process");
    log::trace!("sched: destroying process {} ({})", proc.pid, proc.name);

    proc.files().close_all();
    let old_space = proc.set_addrspace(None);
    drop(old_space);

    proc::unregister(proc.pid);
}
