//! Priority locks for movement and rotation.
//!
//! A lock is held at a single priority. Acquiring raises it only when the
//! caller outranks the current holder; releasing clears it only when the
//! caller is at least as important. There is no reference counting: the
//! highest priority wins.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Well-known lock priorities used by the controller itself.
pub mod priority {
    /// Held while recovering from a landing.
    pub const RECOVERY: u32 = 2;
    /// Held for the duration of a lunge.
    pub const LUNGE: u32 = 3;
    /// Held while attached to a rail.
    pub const RAIL: u32 = 5;
    /// Held while ragdolled; also used to force-release on ragdoll exit.
    pub const RAGDOLL: u32 = 100;
}

/// A single priority-ordered lock. `0` means unlocked.
#[derive(Reflect, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityLock {
    holder: u32,
}

impl PriorityLock {
    /// Raise the lock to `priority` if it outranks the current holder.
    ///
    /// Returns whether the caller now holds the lock.
    pub fn acquire(&mut self, priority: u32) -> bool {
        if priority > self.holder {
            self.holder = priority;
        }
        self.holder == priority && priority != 0
    }

    /// Clear the lock if `priority` is at least the holder's.
    ///
    /// Returns whether the lock was cleared.
    pub fn release(&mut self, priority: u32) -> bool {
        if priority >= self.holder {
            self.holder = 0;
            true
        } else {
            false
        }
    }

    /// Priority of the current holder, `0` when unlocked.
    #[inline]
    pub fn holder(&self) -> u32 {
        self.holder
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.holder != 0
    }
}

/// Movement and rotation locks owned by one character.
#[derive(Reflect, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionLocks {
    /// While held, per-state movement updates are skipped.
    pub movement: PriorityLock,
    /// While held, input-driven rotation is skipped.
    pub rotation: PriorityLock,
}

impl MotionLocks {
    /// Clear both locks at the given priority.
    pub fn release_all(&mut self, priority: u32) {
        self.movement.release(priority);
        self.rotation.release(priority);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_priority_wins() {
        let mut lock = PriorityLock::default();
        lock.acquire(2);
        lock.acquire(5);
        lock.acquire(3);
        assert_eq!(lock.holder(), 5);

        assert!(!lock.release(4), "a lower priority must not release");
        assert_eq!(lock.holder(), 5);

        assert!(lock.release(5));
        assert!(!lock.is_locked());
    }

    #[test]
    fn acquire_reports_ownership() {
        let mut lock = PriorityLock::default();
        assert!(lock.acquire(priority::RAIL));
        assert!(!lock.acquire(priority::LUNGE));
        assert!(lock.acquire(priority::RAIL));
        assert!(!lock.acquire(0));
    }

    #[test]
    fn release_on_unlocked_is_noop() {
        let mut lock = PriorityLock::default();
        assert!(lock.release(0));
        assert_eq!(lock.holder(), 0);
    }

    #[test]
    fn ragdoll_release_clears_everything() {
        let mut locks = MotionLocks::default();
        locks.movement.acquire(priority::RECOVERY);
        locks.rotation.acquire(priority::RAIL);
        locks.release_all(priority::RAGDOLL);
        assert!(!locks.movement.is_locked());
        assert!(!locks.rotation.is_locked());
    }
}
