//! Live build progress.
//!
//! On a tty the currently running tasks are rendered as a fixed window of
//! slots plus a totals line, redrawn in place with CSI cursor moves. A task
//! that finishes frees its slot for the next task to start, so lines stay
//! vertically stable. On a pipe, each completed non-cached task prints one
//! line with its duration and progress counter.
//!
//! All entry points lock a single mutex, so handles can be used from any
//! thread.

use std::{
    io::Write,
    sync::Mutex,
    time::{Duration, Instant},
};

use console::Term;

/// Identifies a task registered with [`ProgressUI::add_task`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TaskHandle(usize);

#[derive(Debug)]
struct TaskState {
    name: String,
    started_at: Option<Instant>,
    done: bool,
}

#[derive(Debug, Default)]
struct State {
    tasks: Vec<TaskState>,
    // One entry per display slot; None marks a reusable hole.
    running_slots: Vec<Option<usize>>,
    shown_lines: Vec<String>,
    finished: usize,
    cached: usize,
}

pub struct ProgressUI {
    term: Term,
    is_tty: bool,
    state: Mutex<State>,
}

impl Default for ProgressUI {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressUI {
    pub fn new() -> Self {
        let term = Term::stdout();
        let is_tty = term.is_term();
        Self {
            term,
            is_tty,
            state: Mutex::new(State::default()),
        }
    }

    pub fn add_task(&self, name: impl Into<String>) -> TaskHandle {
        let mut state = self.state.lock().expect("progress mutex poisoned");
        state.tasks.push(TaskState {
            name: name.into(),
            started_at: None,
            done: false,
        });
        TaskHandle(state.tasks.len() - 1)
    }

    pub fn task_started(&self, handle: TaskHandle) {
        let mut state = self.state.lock().expect("progress mutex poisoned");
        let task = &mut state.tasks[handle.0];
        debug_assert!(task.started_at.is_none(), "task started twice");
        debug_assert!(!task.done, "task already done");
        task.started_at = Some(Instant::now());

        let slot = state.running_slots.iter().position(Option::is_none);
        match slot {
            Some(slot) => state.running_slots[slot] = Some(handle.0),
            None => state.running_slots.push(Some(handle.0)),
        }
        self.render(&mut state);
    }

    pub fn task_done(&self, handle: TaskHandle, cached: bool) {
        let mut state = self.state.lock().expect("progress mutex poisoned");
        let task = &mut state.tasks[handle.0];
        debug_assert!(!task.done, "task finished twice");
        let took = task
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        task.done = true;
        state.finished += 1;
        if cached {
            state.cached += 1;
        }

        if !self.is_tty && !cached {
            let name = state.tasks[handle.0].name.clone();
            let total = state.tasks.len();
            let finished = state.finished;
            let _ = writeln!(
                &self.term,
                "{name} {:.2}s ({finished}/{total})",
                took.as_secs_f64()
            );
        }

        let slot = state
            .running_slots
            .iter()
            .position(|s| *s == Some(handle.0))
            .expect("finished task held a slot");
        state.running_slots[slot] = None;
        self.render(&mut state);
    }

    /// Counts of (finished, cached) tasks so far.
    pub fn counters(&self) -> (usize, usize) {
        let state = self.state.lock().expect("progress mutex poisoned");
        (state.finished, state.cached)
    }

    fn render(&self, state: &mut State) {
        if !self.is_tty {
            return;
        }

        let mut lines = Vec::with_capacity(state.running_slots.len() + 1);
        for slot in &state.running_slots {
            match slot {
                Some(ix) => lines.push(format!("* {}", state.tasks[*ix].name)),
                None => lines.push("*".to_owned()),
            }
        }
        let total = state.tasks.len();
        lines.push(format!(
            "Todo:{}/{} Ran:{} Cached:{}",
            total - state.finished,
            total,
            state.finished - state.cached,
            state.cached,
        ));

        // Move back over the previous window and overwrite it, hiding the
        // cursor for the duration of the write. Lines are padded out to the
        // previous width so stale text never shows through.
        let mut buffer = format!("\x1b[{}A\x1b[?25l", state.shown_lines.len());
        let rows = lines.len().max(state.shown_lines.len());
        for i in 0..rows {
            let mut line = lines.get(i).cloned().unwrap_or_default();
            if i >= lines.len() {
                lines.push(String::new());
            }
            if let Some(prev) = state.shown_lines.get(i) {
                while line.len() < prev.len() {
                    line.push(' ');
                }
            }
            buffer.push_str(&line);
            buffer.push('\n');
        }
        buffer.push_str("\x1b[?25h");

        let _ = self.term.write_str(&buffer);
        state.shown_lines = lines;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_cached_and_ran() {
        let ui = ProgressUI::new();
        let a = ui.add_task("/a.compile");
        let b = ui.add_task("/b.compile");
        ui.task_started(a);
        ui.task_done(a, false);
        ui.task_started(b);
        ui.task_done(b, true);
        assert_eq!(ui.counters(), (2, 1));
    }

    #[test]
    fn slots_are_reused() {
        let ui = ProgressUI::new();
        let a = ui.add_task("/a");
        let b = ui.add_task("/b");
        let c = ui.add_task("/c");
        ui.task_started(a);
        ui.task_started(b);
        ui.task_done(a, false);
        ui.task_started(c);
        let state = ui.state.lock().unwrap();
        // c took over a's slot instead of growing the window.
        assert_eq!(state.running_slots, vec![Some(2), Some(1)]);
    }
}
