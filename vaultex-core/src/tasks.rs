//! Hierarchical store-manager task tree.
//!
//! Tasks form a forest: roots are keyed by the data name they operate on,
//! children by parent task id. A parent's outcome is a function of quorum
//! among its children; terminal transitions cascade, cancelling still-active
//! descendants and rolling success/failure counts up the ancestry.
//!
//! Callbacks never run under the handler mutex. Each public method collects
//! the callbacks its mutations made due, releases the lock, then delivers
//! them in the order the transitions were observed - leaf to root within a
//! cascade.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;
use vaultex_model::{Id, TaskId};

use crate::error::{Result, ReturnCode, VaultError};
use crate::time::Clock;

/// What a task is doing to its data item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    StoreChunk,
    LoadChunk,
    DeleteChunk,
    StorePacket,
    LoadPacket,
    DeletePacket,
    ModifyPacket,
}

impl TaskKind {
    /// Whether a newly added task of kind `self` supersedes an active task
    /// of kind `existing` on the same name.
    fn supersedes(self, existing: TaskKind) -> bool {
        match existing {
            TaskKind::StoreChunk | TaskKind::LoadChunk => self == TaskKind::DeleteChunk,
            TaskKind::StorePacket | TaskKind::LoadPacket | TaskKind::ModifyPacket => {
                self == TaskKind::DeletePacket
            }
            TaskKind::DeleteChunk | TaskKind::DeletePacket => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Active,
    Succeeded,
    Failed,
    Cancelled,
}

pub type TaskCallback = Box<dyn FnOnce(ReturnCode) + Send>;

struct Task {
    /// Natural key; only root tasks carry one.
    name: Option<Id>,
    parent: TaskId,
    kind: TaskKind,
    status: TaskStatus,
    /// Creation time, to enable purging after timeout.
    timestamp: u32,
    successes_required: u8,
    max_failures: u8,
    success_count: u8,
    failures_count: u8,
    child_count: u8,
    callback: Option<TaskCallback>,
}

struct TaskState {
    next_id: u64,
    tasks: HashMap<TaskId, Task>,
    names: HashMap<Id, TaskId>,
}

impl TaskState {
    fn mint_id(&mut self) -> TaskId {
        let id = TaskId::from_raw(self.next_id);
        self.next_id += 1;
        id
    }
}

type DueCallbacks = Vec<(TaskCallback, ReturnCode)>;

/// Task-tree handler. All mutation is mutex-guarded; callbacks are
/// delivered after the lock is released.
pub struct TasksHandler {
    clock: Arc<dyn Clock>,
    inner: Mutex<TaskState>,
}

impl std::fmt::Debug for TasksHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("TasksHandler");
        match self.inner.try_lock() {
            Ok(state) => {
                debug
                    .field("task_count", &state.tasks.len())
                    .field("next_id", &state.next_id);
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl TasksHandler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(TaskState {
                next_id: 1,
                tasks: HashMap::new(),
                names: HashMap::new(),
            }),
        }
    }

    pub fn task_count(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Kind and status of the task currently registered under `name`.
    pub fn has_task(&self, name: &Id) -> Option<(TaskKind, TaskStatus)> {
        let state = self.lock();
        let id = state.names.get(name)?;
        state.tasks.get(id).map(|t| (t.kind, t.status))
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.lock().tasks.get(&id).map(|t| t.status)
    }

    pub fn progress(&self, id: TaskId) -> Option<(u8, u8)> {
        self.lock()
            .tasks
            .get(&id)
            .map(|t| (t.success_count, t.failures_count))
    }

    /// Creation (or last refresh) time of a task, for purge decisions.
    pub fn created_at(&self, id: TaskId) -> Option<u32> {
        self.lock().tasks.get(&id).map(|t| t.timestamp)
    }

    /// Add a root task operating on `name`.
    ///
    /// A delete supersedes an active store/load of the same family on the
    /// same name: the old task is removed and its callback fired with
    /// `CancelledOrDone`. Re-adding over any other active task refreshes its
    /// timestamp and fails `TaskAlreadyExists`. A terminal leftover under
    /// the same name is silently replaced.
    pub fn add_task(
        &self,
        name: Id,
        kind: TaskKind,
        successes_required: u8,
        max_failures: u8,
        callback: Option<TaskCallback>,
    ) -> Result<TaskId> {
        let now = self.clock.epoch_seconds();
        let mut due = DueCallbacks::new();
        let result = {
            let mut state = self.lock();
            self.do_add_task(
                &mut state,
                name,
                kind,
                successes_required,
                max_failures,
                callback,
                now,
                &mut due,
            )
        };
        deliver(due);
        result
    }

    /// Add a child under `parent`, which must exist and still be active.
    pub fn add_child_task(
        &self,
        parent: TaskId,
        kind: TaskKind,
        successes_required: u8,
        max_failures: u8,
        callback: Option<TaskCallback>,
    ) -> Result<TaskId> {
        if successes_required == 0 {
            return Err(VaultError::TaskIncorrectParameter);
        }
        let now = self.clock.epoch_seconds();
        let mut state = self.lock();
        let parent_task = state.tasks.get_mut(&parent).ok_or(VaultError::TaskNotFound)?;
        if parent_task.status != TaskStatus::Active {
            return Err(VaultError::TaskParentNotActive);
        }
        parent_task.child_count += 1;
        let id = state.mint_id();
        state.tasks.insert(id, Task {
            name: None,
            parent,
            kind,
            status: TaskStatus::Active,
            timestamp: now,
            successes_required,
            max_failures,
            success_count: 0,
            failures_count: 0,
            child_count: 0,
            callback,
        });
        Ok(id)
    }

    /// Count one success on a leaf task. No-op when the task is no longer
    /// active (a late RPC completion, for example).
    pub fn notify_task_success(&self, id: TaskId) -> Result<()> {
        let mut due = DueCallbacks::new();
        let result = {
            let mut state = self.lock();
            let task = state.tasks.get_mut(&id).ok_or(VaultError::TaskNotFound)?;
            if task.child_count > 0 {
                return Err(VaultError::TaskIncorrectOperation);
            }
            if task.status == TaskStatus::Active {
                task.success_count += 1;
                if task.success_count >= task.successes_required {
                    task.status = TaskStatus::Succeeded;
                    on_terminal(&mut state, id, Ok(()), &mut due);
                }
            }
            Ok(())
        };
        deliver(due);
        result
    }

    /// Count one failure on a leaf task. No-op when the task is no longer
    /// active.
    pub fn notify_task_failure(&self, id: TaskId, reason: VaultError) -> Result<()> {
        let mut due = DueCallbacks::new();
        let result = {
            let mut state = self.lock();
            let task = state.tasks.get_mut(&id).ok_or(VaultError::TaskNotFound)?;
            if task.child_count > 0 {
                return Err(VaultError::TaskIncorrectOperation);
            }
            if task.status == TaskStatus::Active {
                task.failures_count += 1;
                if task.failures_count > task.max_failures {
                    task.status = TaskStatus::Failed;
                    on_terminal(&mut state, id, Err(reason), &mut due);
                }
            }
            Ok(())
        };
        deliver(due);
        result
    }

    /// Zero a leaf task's counters for a retry.
    pub fn reset_task_progress(&self, id: TaskId) -> Result<()> {
        let mut state = self.lock();
        let task = state.tasks.get_mut(&id).ok_or(VaultError::TaskNotFound)?;
        if task.child_count > 0 {
            return Err(VaultError::TaskIncorrectOperation);
        }
        task.success_count = 0;
        task.failures_count = 0;
        Ok(())
    }

    /// Mark the task and every active descendant `Cancelled`, firing their
    /// callbacks with `reason`. Tasks stay in the map.
    pub fn cancel_task(&self, id: TaskId, reason: VaultError) -> Result<()> {
        let mut due = DueCallbacks::new();
        let result = {
            let mut state = self.lock();
            let task = state.tasks.get_mut(&id).ok_or(VaultError::TaskNotFound)?;
            if task.status == TaskStatus::Active {
                task.status = TaskStatus::Cancelled;
                on_terminal(&mut state, id, Err(reason), &mut due);
            }
            Ok(())
        };
        deliver(due);
        result
    }

    /// Remove the task and its whole subtree, firing the callbacks of any
    /// still-active members with `reason`.
    pub fn delete_task(&self, id: TaskId, reason: VaultError) -> Result<()> {
        let mut due = DueCallbacks::new();
        let result = {
            let mut state = self.lock();
            if !state.tasks.contains_key(&id) {
                return Err(VaultError::TaskNotFound);
            }
            delete_subtree(&mut state, id, reason, &mut due);
            Ok(())
        };
        deliver(due);
        result
    }

    /// Cancel every active task. Parents are cancelled before their
    /// children so no ancestor counts a cancellation as a child failure;
    /// every active member's callback fires exactly once with `reason`.
    pub fn cancel_all_pending(&self, reason: VaultError) {
        let mut due = DueCallbacks::new();
        {
            let mut state = self.lock();
            let mut active: Vec<(usize, TaskId)> = state
                .tasks
                .iter()
                .filter(|(_, t)| t.status == TaskStatus::Active)
                .map(|(id, _)| (depth(&state, *id), *id))
                .collect();
            active.sort();
            for (_, id) in active {
                if let Some(task) = state.tasks.get_mut(&id)
                    && task.status == TaskStatus::Active
                {
                    task.status = TaskStatus::Cancelled;
                    on_terminal(&mut state, id, Err(reason), &mut due);
                }
            }
        }
        deliver(due);
    }

    /// Drop every task without running callbacks.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.tasks.clear();
        state.names.clear();
    }

    #[allow(clippy::too_many_arguments)]
    fn do_add_task(
        &self,
        state: &mut TaskState,
        name: Id,
        kind: TaskKind,
        successes_required: u8,
        max_failures: u8,
        callback: Option<TaskCallback>,
        now: u32,
        due: &mut DueCallbacks,
    ) -> Result<TaskId> {
        if successes_required == 0 {
            return Err(VaultError::TaskIncorrectParameter);
        }

        if let Some(existing_id) = state.names.get(&name).copied() {
            let (existing_kind, existing_status) = {
                let existing = state.tasks.get(&existing_id).ok_or(VaultError::HandlerError)?;
                (existing.kind, existing.status)
            };
            if existing_status == TaskStatus::Active && !kind.supersedes(existing_kind) {
                if let Some(existing) = state.tasks.get_mut(&existing_id) {
                    existing.timestamp = now;
                }
                return Err(VaultError::TaskAlreadyExists);
            }
            if existing_status == TaskStatus::Active {
                debug!(task = %existing_id, "superseding active task with delete");
            }
            delete_subtree(state, existing_id, VaultError::CancelledOrDone, due);
        }

        let id = state.mint_id();
        state.tasks.insert(id, Task {
            name: Some(name),
            parent: TaskId::ROOT,
            kind,
            status: TaskStatus::Active,
            timestamp: now,
            successes_required,
            max_failures,
            success_count: 0,
            failures_count: 0,
            child_count: 0,
            callback,
        });
        state.names.insert(name, id);
        Ok(id)
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle a task that just reached a terminal state: cancel its active
/// descendants, roll the outcome up to an active parent, then queue its own
/// callback. Queue order is the delivery order - leaf to root.
fn on_terminal(state: &mut TaskState, id: TaskId, outcome: ReturnCode, due: &mut DueCallbacks) {
    cancel_children(state, id, outcome, due);

    let (parent_id, callback) = match state.tasks.get_mut(&id) {
        Some(task) => (task.parent, task.callback.take()),
        None => return,
    };

    let mut parent_transition = None;
    if !parent_id.is_root()
        && let Some(parent) = state.tasks.get_mut(&parent_id)
        && parent.status == TaskStatus::Active
    {
        if outcome.is_ok() {
            parent.success_count += 1;
            if parent.success_count >= parent.successes_required {
                parent.status = TaskStatus::Succeeded;
                parent_transition = Some(Ok(()));
            }
        } else {
            parent.failures_count += 1;
            if parent.failures_count > parent.max_failures {
                parent.status = TaskStatus::Failed;
                parent_transition = Some(outcome);
            }
        }
    }

    if let Some(callback) = callback {
        due.push((callback, outcome));
    }

    if let Some(parent_outcome) = parent_transition {
        on_terminal(state, parent_id, parent_outcome, due);
    }
}

/// Cancel every still-active child of `parent`, depth first.
fn cancel_children(state: &mut TaskState, parent: TaskId, reason: ReturnCode, due: &mut DueCallbacks) {
    let children: Vec<TaskId> = state
        .tasks
        .iter()
        .filter(|(_, t)| t.parent == parent && t.status == TaskStatus::Active)
        .map(|(id, _)| *id)
        .collect();
    for child in children {
        if let Some(task) = state.tasks.get_mut(&child)
            && task.status == TaskStatus::Active
        {
            task.status = TaskStatus::Cancelled;
            on_terminal(state, child, reason, due);
        }
    }
}

/// Remove `id` and its whole subtree, queueing callbacks of active members.
fn delete_subtree(state: &mut TaskState, id: TaskId, reason: VaultError, due: &mut DueCallbacks) {
    let Some(mut task) = state.tasks.remove(&id) else {
        return;
    };
    if task.status == TaskStatus::Active
        && let Some(callback) = task.callback.take()
    {
        due.push((callback, Err(reason)));
    }
    if let Some(name) = task.name
        && state.names.get(&name) == Some(&id)
    {
        state.names.remove(&name);
    }

    let children: Vec<TaskId> = state
        .tasks
        .iter()
        .filter(|(_, t)| t.parent == id)
        .map(|(child_id, _)| *child_id)
        .collect();
    for child in children {
        delete_subtree(state, child, reason, due);
    }

    if !task.parent.is_root()
        && let Some(parent) = state.tasks.get_mut(&task.parent)
    {
        parent.child_count = parent.child_count.saturating_sub(1);
    }
}

fn depth(state: &TaskState, mut id: TaskId) -> usize {
    let mut depth = 0;
    while let Some(task) = state.tasks.get(&id) {
        if task.parent.is_root() {
            break;
        }
        id = task.parent;
        depth += 1;
    }
    depth
}

fn deliver(due: DueCallbacks) {
    for (callback, code) in due {
        callback(code);
    }
}
