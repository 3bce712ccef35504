//! Property-based tests for the address codec and index allocator.
//!
//! Unlike the example-based tests in each module, these check invariants
//! that must hold across many randomly generated inputs rather than a
//! handful of hand-picked cases.

use std::collections::BTreeMap;

use proptest::prelude::*;

use hubsim::address::Address;
use hubsim::controller::tree::allocate_index;
use hubsim::message::Message;

// == Address Properties ========================================================

proptest! {
    /// Tag formatting is a bijection with the populated-address-field prefix:
    /// decoding the tag back out (via round-tripping through JSON, since
    /// `Address` has no direct tag parser) always reconstructs the same
    /// address.
    #[test]
    fn prop_address_json_round_trip(
        net in 0u32..256,
        hub in 0u32..256,
        ap in 0u32..256,
        rt in 0u32..256,
        depth in 0usize..5,
    ) {
        let address = match depth {
            0 => Address::root(),
            1 => Address::network(net),
            2 => Address::hub(net, hub),
            3 => Address::ap(net, hub, ap),
            _ => Address::rt(net, hub, ap, rt),
        };
        let json = serde_json::to_string(&address).unwrap();
        let back: Address = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(address, back);
    }

    /// A populated-prefix address's tag always carries exactly the fields
    /// that were set, each as a two-digit hex group behind its letter.
    #[test]
    fn prop_tag_reflects_populated_prefix(
        net in 0u32..256,
        hub in 0u32..256,
        ap in 0u32..256,
        rt in 0u32..256,
        depth in 0usize..5,
    ) {
        let (address, expected) = match depth {
            0 => (Address::root(), String::new()),
            1 => (Address::network(net), format!("N{net:02x}")),
            2 => (Address::hub(net, hub), format!("N{net:02x}H{hub:02x}")),
            3 => (
                Address::ap(net, hub, ap),
                format!("N{net:02x}H{hub:02x}A{ap:02x}"),
            ),
            _ => (
                Address::rt(net, hub, ap, rt),
                format!("N{net:02x}H{hub:02x}A{ap:02x}R{rt:02x}"),
            ),
        };
        prop_assert_eq!(address.tag(), expected.as_str());
    }

    /// Constructing an address with a deeper field set but a shallower one
    /// missing is always rejected, regardless of which fields are involved.
    #[test]
    fn prop_hierarchy_violation_always_rejected(
        net in proptest::option::of(0u32..256),
        hub in proptest::option::of(0u32..256),
        ap in proptest::option::of(0u32..256),
        rt in proptest::option::of(0u32..256),
    ) {
        let violates = (hub.is_some() && net.is_none())
            || (ap.is_some() && hub.is_none())
            || (rt.is_some() && ap.is_none());
        let result = Address::new(net, hub, ap, rt);
        prop_assert_eq!(result.is_err(), violates);
    }

    /// Descending one child index at a time from the root produces the same
    /// address as constructing it directly with the smart constructors.
    #[test]
    fn prop_child_descent_matches_direct_construction(
        net in 0u32..256,
        hub in 0u32..256,
        ap in 0u32..256,
        rt in 0u32..256,
    ) {
        let via_child = Address::root()
            .child(net).unwrap()
            .child(hub).unwrap()
            .child(ap).unwrap()
            .child(rt).unwrap();
        prop_assert_eq!(via_child, Address::rt(net, hub, ap, rt));
    }
}

// == Message Codec Round Trip ==================================================

proptest! {
    /// Every `HeartbeatStatsRsp`, across arbitrary counter values and
    /// address depths, survives an encode/decode cycle unchanged. This is
    /// the variant most likely to overflow or truncate since its fields are
    /// bare `u64` counters rather than bounded enums or strings.
    #[test]
    fn prop_heartbeat_stats_rsp_round_trips(
        net in 0u32..64,
        hub in 0u32..64,
        ap in 0u32..64,
        success in any::<u64>(),
        failure in any::<u64>(),
    ) {
        let msg = Message::HeartbeatStatsRsp {
            address: Address::ap(net, hub, ap),
            success,
            failure,
        };
        let frame = msg.encode().unwrap();
        let back = Message::decode(&frame).unwrap();
        prop_assert_eq!(msg, back);
    }

    /// The wire frame's leading tag, read back out by splitting on the
    /// first space, always equals the envelope's own address tag — the
    /// transport relies on this to filter without parsing JSON.
    #[test]
    fn prop_frame_tag_prefix_matches_address_tag(
        net in 0u32..64,
        hub in 0u32..64,
    ) {
        let msg = Message::HubConnectInd { address: Address::hub(net, hub) };
        let frame = msg.encode().unwrap();
        let (tag, _json) = frame.split_once(' ').unwrap();
        prop_assert_eq!(tag, msg.address().tag());
    }
}

// == Index Allocation ===========================================================

proptest! {
    /// Requesting an auto index `n` times in a row against a fresh, empty
    /// parent yields exactly `0..n` with no gaps or duplicates, regardless
    /// of `n`.
    #[test]
    fn prop_allocate_index_fills_contiguously_from_fresh(n in 0u32..64) {
        let mut used = BTreeMap::new();
        let mut allocated = Vec::new();
        for _ in 0..n {
            let idx = allocate_index(&used, None).unwrap();
            prop_assert!(used.insert(idx, ()).is_none(), "index {} allocated twice", idx);
            allocated.push(idx);
        }
        let expected: Vec<u32> = (0..n).collect();
        prop_assert_eq!(allocated, expected);
    }

    /// An explicit index is accepted iff it is not already in the used set.
    #[test]
    fn prop_allocate_index_explicit_matches_membership(
        existing in proptest::collection::vec(0u32..32, 0..16),
        requested in 0u32..32,
    ) {
        let used: BTreeMap<u32, ()> = existing.into_iter().map(|k| (k, ())).collect();
        let already_used = used.contains_key(&requested);
        let result = allocate_index(&used, Some(requested));
        prop_assert_eq!(result.is_ok(), !already_used);
        if let Ok(idx) = result {
            prop_assert_eq!(idx, requested);
        }
    }
}
