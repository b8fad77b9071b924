// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pausing the tasks that share the storage bus while an update owns it.
//!
//! The controller never touches other tasks directly: it flips the
//! coordinator, which broadcasts [`TaskCommand`]s to every registered
//! [`TaskGate`]. Tasks check their gate between work items.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::pubsub::{PubSubChannel, Subscriber};
use heapless::Vec;

/// Broadcast to cooperating tasks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskCommand {
    Pause,
    Resume,
}

/// What the session controller needs from the coordinator.
pub trait TaskControl {
    fn suspend_all(&self);
    fn resume_all(&self);
}

const QUEUE: usize = 4;

struct Registry<const TASKS: usize> {
    suspended: bool,
    names: Vec<&'static str, TASKS>,
}

/// Registry of up to `TASKS` cooperating tasks.
pub struct SuspendCoordinator<M: RawMutex, const TASKS: usize> {
    channel: PubSubChannel<M, TaskCommand, QUEUE, TASKS, 1>,
    registry: Mutex<M, RefCell<Registry<TASKS>>>,
}

impl<M: RawMutex, const TASKS: usize> Default for SuspendCoordinator<M, TASKS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const TASKS: usize> SuspendCoordinator<M, TASKS> {
    pub const fn new() -> Self {
        Self {
            channel: PubSubChannel::new(),
            registry: Mutex::new(RefCell::new(Registry {
                suspended: false,
                names: Vec::new(),
            })),
        }
    }

    /// Register a task. `None` once `TASKS` tasks are registered.
    pub fn register(&self, name: &'static str) -> Option<TaskGate<'_, M, TASKS>> {
        let subscriber = self.channel.subscriber().ok()?;
        let paused = self.registry.lock(|registry| {
            let mut registry = registry.borrow_mut();
            registry.names.push(name).ok()?;
            Some(registry.suspended)
        })?;
        debug!("task {} registered", name);
        Some(TaskGate {
            name,
            subscriber,
            paused,
        })
    }

    pub fn is_suspended(&self) -> bool {
        self.registry.lock(|registry| registry.borrow().suspended)
    }

    pub fn task_count(&self) -> usize {
        self.registry.lock(|registry| registry.borrow().names.len())
    }

    /// Returns whether the state changed.
    fn transition(&self, suspended: bool) -> bool {
        self.registry.lock(|registry| {
            let mut registry = registry.borrow_mut();
            let changed = registry.suspended != suspended;
            registry.suspended = suspended;
            changed
        })
    }
}

impl<M: RawMutex, const TASKS: usize> TaskControl for SuspendCoordinator<M, TASKS> {
    fn suspend_all(&self) {
        if self.transition(true) {
            info!("pausing {} tasks", self.task_count());
            self.channel.immediate_publisher().publish_immediate(TaskCommand::Pause);
        }
    }

    fn resume_all(&self) {
        if self.transition(false) {
            info!("resuming {} tasks", self.task_count());
            self.channel.immediate_publisher().publish_immediate(TaskCommand::Resume);
        }
    }
}

/// A registered task's view of the coordinator.
pub struct TaskGate<'a, M: RawMutex, const TASKS: usize> {
    name: &'static str,
    subscriber: Subscriber<'a, M, TaskCommand, QUEUE, TASKS, 1>,
    paused: bool,
}

impl<M: RawMutex, const TASKS: usize> TaskGate<'_, M, TASKS> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Drain pending commands without blocking.
    pub fn is_paused(&mut self) -> bool {
        while let Some(cmd) = self.subscriber.try_next_message_pure() {
            self.apply(cmd);
        }
        self.paused
    }

    /// Return once the task may run.
    pub async fn wait_resumed(&mut self) {
        while self.is_paused() {
            let cmd = self.subscriber.next_message_pure().await;
            self.apply(cmd);
        }
    }

    fn apply(&mut self, cmd: TaskCommand) {
        trace!("task {}: {:?}", self.name, cmd);
        self.paused = cmd == TaskCommand::Pause;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn pause_and_resume_reach_every_task() {
        let coordinator = SuspendCoordinator::<NoopRawMutex, 2>::new();
        let mut sensor = coordinator.register("sensor").unwrap();
        let mut display = coordinator.register("display").unwrap();
        assert!(coordinator.register("buttons").is_none());

        coordinator.suspend_all();
        assert!(sensor.is_paused());
        assert!(display.is_paused());

        coordinator.resume_all();
        assert!(!sensor.is_paused());
        block_on(display.wait_resumed());
        assert!(!display.is_paused());
    }

    #[test]
    fn transitions_are_idempotent() {
        let coordinator = SuspendCoordinator::<NoopRawMutex, 1>::new();
        let mut gate = coordinator.register("sensor").unwrap();

        coordinator.resume_all();
        assert!(!gate.is_paused());

        coordinator.suspend_all();
        coordinator.suspend_all();
        assert!(coordinator.is_suspended());
        assert!(gate.is_paused());

        coordinator.resume_all();
        coordinator.resume_all();
        assert!(!gate.is_paused());
    }

    #[test]
    fn late_registration_starts_paused() {
        let coordinator = SuspendCoordinator::<NoopRawMutex, 1>::new();
        coordinator.suspend_all();
        let mut gate = coordinator.register("display").unwrap();
        assert!(gate.is_paused());
        coordinator.resume_all();
        block_on(gate.wait_resumed());
    }
}
