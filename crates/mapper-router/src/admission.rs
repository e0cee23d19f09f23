/// Outcome of admitting one incoming value/release message into a map's
/// destination slot (§4.E "Convergent-map admission").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Apply to exactly the named instance index.
    Direct(usize),
    /// Convergent fan-in: the destination is non-instanced but a source
    /// reports more instances than it does, so the update is mirrored
    /// across every active map instance rather than tied to one index.
    Broadcast,
    /// A fully-null vector: reset the named instance and fire the release
    /// handler on the bound signal.
    Release(usize),
    /// A partial vector landed on a convergent slot, which must mirror the
    /// whole remote vector or not at all.
    RejectedPartial,
}

/// Decide how to admit one message. `max_source_num_inst` is the maximum
/// `num_inst` observed across this map's *sources* — the Open Question in
/// §9 was decided in favor of this reading rather than the destination
/// signal's own current `num_inst`, because it is robust to sources that
/// haven't reported their instance count yet (the behavior S4 tests).
pub fn admit(
    dest_is_instanced: bool,
    max_source_num_inst: usize,
    dest_slot_num_inst: usize,
    incoming_len: usize,
    slot_vec_len: usize,
    is_release: bool,
    inst_idx: usize,
) -> Admission {
    if is_release {
        return Admission::Release(inst_idx);
    }
    let is_convergent = !dest_is_instanced && max_source_num_inst > dest_slot_num_inst;
    if is_convergent {
        if incoming_len != slot_vec_len {
            return Admission::RejectedPartial;
        }
        return Admission::Broadcast;
    }
    Admission::Direct(inst_idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_convergent_update_is_direct() {
        assert_eq!(admit(true, 1, 1, 3, 3, false, 2), Admission::Direct(2));
    }

    #[test]
    fn more_source_instances_than_dest_exposes_triggers_broadcast() {
        assert_eq!(admit(false, 4, 1, 3, 3, false, 0), Admission::Broadcast);
    }

    #[test]
    fn convergent_partial_vector_is_rejected() {
        assert_eq!(admit(false, 4, 1, 2, 3, false, 0), Admission::RejectedPartial);
    }

    #[test]
    fn null_vector_is_always_a_release_even_when_convergent() {
        assert_eq!(admit(false, 4, 1, 3, 3, true, 1), Admission::Release(1));
    }

    proptest::proptest! {
        /// A release is admitted as `Release` regardless of how the rest
        /// of the map is shaped — convergence and vector width never
        /// override `is_release`.
        #[test]
        fn release_always_wins(
            dest_is_instanced in proptest::bool::ANY,
            max_source_num_inst in 1usize..8,
            dest_slot_num_inst in 1usize..8,
            incoming_len in 0usize..8,
            slot_vec_len in 0usize..8,
            inst_idx in 0usize..8,
        ) {
            let a = admit(dest_is_instanced, max_source_num_inst, dest_slot_num_inst, incoming_len, slot_vec_len, true, inst_idx);
            proptest::prop_assert_eq!(a, Admission::Release(inst_idx));
        }

        /// Outside the release path, a non-convergent admission is always
        /// `Direct` at the requested index, and a convergent one is either
        /// `Broadcast` (widths match) or `RejectedPartial` (they don't) —
        /// the decision never falls through to some other outcome.
        #[test]
        fn non_release_admission_is_direct_or_convergent(
            dest_is_instanced in proptest::bool::ANY,
            max_source_num_inst in 1usize..8,
            dest_slot_num_inst in 1usize..8,
            incoming_len in 0usize..8,
            slot_vec_len in 0usize..8,
            inst_idx in 0usize..8,
        ) {
            let a = admit(dest_is_instanced, max_source_num_inst, dest_slot_num_inst, incoming_len, slot_vec_len, false, inst_idx);
            let is_convergent = !dest_is_instanced && max_source_num_inst > dest_slot_num_inst;
            if is_convergent {
                proptest::prop_assert!(matches!(a, Admission::Broadcast | Admission::RejectedPartial));
                proptest::prop_assert_eq!(a == Admission::Broadcast, incoming_len == slot_vec_len);
            } else {
                proptest::prop_assert_eq!(a, Admission::Direct(inst_idx));
            }
        }
    }
}
