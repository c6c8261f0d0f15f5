/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Ready and sleep queues.
//!
//! Both are plain vectors of unit ids.  Removal preserves order, so the ready
//! queue doubles as the tie-break record (earliest enqueued wins among equal
//! scores) and the sleep queue promotes simultaneous expiries in scan order.
//!
//! Neither queue allocates once the engine has reserved capacity for every
//! live unit, which is what lets the preemptive interrupt path use them.

use std::collections::BTreeMap;

use crate::unit::{ExecutionUnit, UnitId};

/// `true` once `now` has reached `deadline` on a wrapping millisecond counter.
///
/// Valid as long as deadlines are never more than `i32::MAX` ms away.
pub fn deadline_reached(now: u32, deadline: u32) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}

// ── Ready queue ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    ids: Vec<UnitId>,
}

impl ReadyQueue {
    /// Enqueue at the back. A unit already queued keeps its place.
    pub(crate) fn push(&mut self, id: UnitId) {
        if !self.contains(id) {
            self.ids.push(id);
        }
    }

    pub(crate) fn remove(&mut self, id: UnitId) -> bool {
        match self.ids.iter().position(|&q| q == id) {
            Some(pos) => {
                self.ids.remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains(&self, id: UnitId) -> bool {
        self.ids.contains(&id)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn reserve_total(&mut self, total: usize) {
        self.ids.reserve(total.saturating_sub(self.ids.len()));
    }

    /// Aging selection.
    ///
    /// Every queued unit is aged by one tick; the first unit with the highest
    /// score (measured before aging) is removed and its wait reset to zero.
    pub(crate) fn pick_aging<C>(
        &mut self,
        units: &mut BTreeMap<UnitId, ExecutionUnit<C>>,
    ) -> Option<UnitId> {
        let mut best: Option<(usize, u16)> = None;
        for (pos, id) in self.ids.iter().enumerate() {
            let Some(unit) = units.get_mut(id) else {
                continue;
            };
            let score = unit.score();
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((pos, score));
            }
            unit.age();
        }
        let (pos, _) = best?;
        let id = self.ids.remove(pos);
        if let Some(unit) = units.get_mut(&id) {
            unit.wait_ticks = 0;
        }
        Some(id)
    }

    /// Most recently queued first. No priority, no aging.
    pub(crate) fn pick_lifo(&mut self) -> Option<UnitId> {
        self.ids.pop()
    }
}

// ── Sleep queue ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SleepEntry {
    pub(crate) deadline: u32,
    pub(crate) unit: UnitId,
}

#[derive(Debug, Default)]
pub(crate) struct SleepQueue {
    entries: Vec<SleepEntry>,
}

impl SleepQueue {
    pub(crate) fn push(&mut self, unit: UnitId, deadline: u32) {
        self.remove(unit);
        self.entries.push(SleepEntry { deadline, unit });
    }

    pub(crate) fn remove(&mut self, unit: UnitId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.unit != unit);
        self.entries.len() != before
    }

    pub(crate) fn contains(&self, unit: UnitId) -> bool {
        self.entries.iter().any(|e| e.unit == unit)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn reserve_total(&mut self, total: usize) {
        self.entries
            .reserve(total.saturating_sub(self.entries.len()));
    }

    /// Deadline that expires first, measured from `now`.
    pub(crate) fn next_deadline(&self, now: u32) -> Option<u32> {
        self.entries
            .iter()
            .map(|e| e.deadline)
            .min_by_key(|&d| d.wrapping_sub(now) as i32)
    }

    /// Remove every entry whose deadline has been reached and hand its unit
    /// to `promote`, in queue order.
    pub(crate) fn drain_due(&mut self, now: u32, mut promote: impl FnMut(UnitId)) {
        let mut pos = 0;
        while pos < self.entries.len() {
            if deadline_reached(now, self.entries[pos].deadline) {
                let entry = self.entries.remove(pos);
                promote(entry.unit);
            } else {
                pos += 1;
            }
        }
    }
}
