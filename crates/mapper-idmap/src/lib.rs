//! Component D — the ID-map table.
//!
//! Per device and per signal group (group 0 is default), a table mapping a
//! local instance id (LID) to a global instance id (GID) with independently
//! maintained reference counts on each side. The source's intrusive
//! `active`/`reserve` linked lists are rewritten here as a single
//! `Vec<Slot>` object pool addressed by small `Handle`s (see the REDESIGN
//! FLAGS on intrusive linked lists): `reserve` becomes a free list of
//! indices rather than a second list of nodes.

use mapper_types::{DeviceId, Gid, Lid};

/// A handle into the table's backing storage. Stable for the lifetime of the
/// record it names; reused (with a fresh record) once that record is
/// released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

impl Handle {
    /// The slot index backing this handle. Exposed so callers that need a
    /// stable, small, reusable row number for a GID (a convergent map's
    /// per-instance slot row, for instance) can key off it directly instead
    /// of maintaining a second handle-to-row table.
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Record(Record),
}

/// `{LID, GID, LID_refcount, GID_refcount}`. A record is removed exactly
/// when both refcounts reach zero (Testable Property 1).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub lid: Lid,
    pub gid: Gid,
    pub lid_refcount: u32,
    pub gid_refcount: u32,
    /// Set when this device has locally released the instance but a remote
    /// peer may still be sending updates for its GID — see the release-race
    /// rule below.
    pub released_locally: bool,
}

impl Record {
    fn is_dead(&self) -> bool {
        self.lid_refcount == 0 && self.gid_refcount == 0
    }
}

/// One signal group's worth of LID<->GID bindings for a device.
pub struct IdMapTable {
    device: DeviceId,
    slots: Vec<Slot>,
    free: Vec<usize>,
    next_gid_counter: u32,
}

impl IdMapTable {
    pub fn new(device: DeviceId) -> Self {
        IdMapTable {
            device,
            slots: Vec::new(),
            free: Vec::new(),
            next_gid_counter: 1,
        }
    }

    fn mint_gid(&mut self) -> Gid {
        let counter = self.next_gid_counter;
        self.next_gid_counter += 1;
        Gid(self.device.0 | counter as u64)
    }

    /// Allocate a record, pulling from the reserve free list (enlarging it
    /// if empty) and pushing the new record onto the active set.
    pub fn add(&mut self, lid: Lid, gid: Option<Gid>) -> Handle {
        let gid = gid.unwrap_or_else(|| self.mint_gid());
        let record = Record {
            lid,
            gid,
            lid_refcount: 1,
            gid_refcount: 0,
            released_locally: false,
        };
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Slot::Record(record);
            Handle(idx)
        } else {
            self.slots.push(Slot::Record(record));
            Handle(self.slots.len() - 1)
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&Record> {
        match self.slots.get(handle.0) {
            Some(Slot::Record(r)) => Some(r),
            _ => None,
        }
    }

    pub fn lookup_by_lid(&self, lid: Lid) -> Option<Handle> {
        self.slots.iter().enumerate().find_map(|(i, s)| match s {
            Slot::Record(r) if r.lid == lid => Some(Handle(i)),
            _ => None,
        })
    }

    pub fn lookup_by_gid(&self, gid: Gid) -> Option<Handle> {
        self.slots.iter().enumerate().find_map(|(i, s)| match s {
            Slot::Record(r) if r.gid == gid => Some(Handle(i)),
            _ => None,
        })
    }

    pub fn active_handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| match s {
            Slot::Record(_) => Some(Handle(i)),
            Slot::Empty => None,
        })
    }

    pub fn active_count(&self) -> usize {
        self.active_handles().count()
    }

    fn retire_if_dead(&mut self, handle: Handle) {
        let dead = matches!(&self.slots[handle.0], Slot::Record(r) if r.is_dead());
        if dead {
            self.slots[handle.0] = Slot::Empty;
            self.free.push(handle.0);
        }
    }

    pub fn lid_decref(&mut self, handle: Handle) {
        if let Slot::Record(r) = &mut self.slots[handle.0] {
            r.lid_refcount = r.lid_refcount.saturating_sub(1);
        }
        self.retire_if_dead(handle);
    }

    pub fn gid_decref(&mut self, handle: Handle) {
        if let Slot::Record(r) = &mut self.slots[handle.0] {
            r.gid_refcount = r.gid_refcount.saturating_sub(1);
        }
        self.retire_if_dead(handle);
    }

    pub fn gid_incref(&mut self, handle: Handle) {
        if let Slot::Record(r) = &mut self.slots[handle.0] {
            r.gid_refcount += 1;
        }
    }

    pub fn mark_released_locally(&mut self, handle: Handle) {
        if let Slot::Record(r) = &mut self.slots[handle.0] {
            r.released_locally = true;
        }
    }
}

/// Outcome of resolving an incoming value/release message carrying a remote
/// GID, per the release-race rule in §4.D.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Bind (or reuse) this handle and apply the carried values.
    Bound(Handle),
    /// The message is a release and has been consumed; no value update
    /// should be applied.
    ReleaseConsumed,
    /// Nothing to do: a release for an instance this device never bound, or
    /// a value update that arrived after a local release already fired.
    Ignored,
}

impl IdMapTable {
    /// `get_idmap_with_gid` from §4.D: resolves the instance binding for an
    /// incoming message carrying GID `gid`. `has_values` is false when the
    /// message is a release (a fully-null vector). `allow_activate` gates
    /// whether a brand-new record may be created (vs. requiring the caller
    /// to have an idle instance to steal first — modelled by the caller
    /// passing `Some(lid)` only when it already chose a victim instance).
    pub fn resolve_incoming(
        &mut self,
        gid: Gid,
        has_values: bool,
        allow_activate: Option<Lid>,
    ) -> Resolution {
        if let Some(handle) = self.lookup_by_gid(gid) {
            let released_locally = self.get(handle).map(|r| r.released_locally).unwrap_or(false);
            if released_locally {
                // A record exists only because the remote side hasn't yet
                // heard our release; the release message itself is the only
                // thing this handle should ever consume again.
                return if has_values {
                    Resolution::Ignored
                } else {
                    self.gid_decref(handle);
                    Resolution::ReleaseConsumed
                };
            }
            return Resolution::Bound(handle);
        }

        if !has_values {
            // Release for an instance we never bound: nothing to release.
            return Resolution::Ignored;
        }

        match allow_activate {
            Some(lid) => {
                let handle = self.add(lid, Some(gid));
                self.gid_incref(handle);
                Resolution::Bound(handle)
            }
            None => Resolution::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> IdMapTable {
        IdMapTable::new(DeviceId(0x1234_0000_0000_0000))
    }

    #[test]
    fn add_then_decref_both_sides_retires_record() {
        let mut t = table();
        let h = t.add(Lid(1), None);
        t.gid_incref(h);
        assert_eq!(t.active_count(), 1);
        t.lid_decref(h);
        assert_eq!(t.active_count(), 1); // gid refcount still 1
        t.gid_decref(h);
        assert_eq!(t.active_count(), 0);
    }

    #[test]
    fn retired_slot_is_reused() {
        let mut t = table();
        let h1 = t.add(Lid(1), None);
        t.lid_decref(h1);
        let h2 = t.add(Lid(2), None);
        assert_eq!(h1, h2, "freed slot should be recycled");
    }

    #[test]
    fn release_after_local_release_is_consumed_once() {
        let mut t = table();
        let h = t.add(Lid(1), None);
        t.gid_incref(h);
        let gid = t.get(h).unwrap().gid;
        t.mark_released_locally(h);

        // A stray value update for the already-released GID is ignored.
        assert_eq!(t.resolve_incoming(gid, true, None), Resolution::Ignored);
        // The actual release message retires it.
        assert_eq!(t.resolve_incoming(gid, false, None), Resolution::ReleaseConsumed);
        assert_eq!(t.lookup_by_gid(gid), None);
    }

    #[test]
    fn release_for_unknown_instance_is_ignored_without_activating() {
        let mut t = table();
        assert_eq!(t.resolve_incoming(Gid(99), false, Some(Lid(5))), Resolution::Ignored);
        assert_eq!(t.active_count(), 0);
    }

    #[test]
    fn value_update_for_unknown_instance_activates_when_allowed() {
        let mut t = table();
        let res = t.resolve_incoming(Gid(99), true, Some(Lid(5)));
        assert!(matches!(res, Resolution::Bound(_)));
        assert_eq!(t.active_count(), 1);
    }

    proptest::proptest! {
        /// Testable Property 1 (module doc): whatever order incref/decref
        /// arrive in, the record is present if and only if at least one
        /// refcount is still positive, and gone the instant both hit zero.
        #[test]
        fn record_outlives_refcounts_exactly(ops in proptest::collection::vec(0u8..3, 0..30)) {
            let mut t = table();
            let h = t.add(Lid(1), None);
            let (mut lid_rc, mut gid_rc) = (1i32, 0i32);
            for op in ops {
                match op {
                    0 => { t.gid_incref(h); gid_rc += 1; }
                    1 if gid_rc > 0 => { t.gid_decref(h); gid_rc -= 1; }
                    2 if lid_rc > 0 => { t.lid_decref(h); lid_rc -= 1; }
                    _ => continue,
                }
                let should_be_alive = lid_rc > 0 || gid_rc > 0;
                proptest::prop_assert_eq!(t.get(h).is_some(), should_be_alive);
                if !should_be_alive {
                    break;
                }
            }
        }
    }
}
