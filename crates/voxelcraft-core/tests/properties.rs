//! Property tests over random action streams.

#![allow(clippy::unwrap_used)]

mod common;

use std::collections::BTreeMap;

use proptest::prelude::*;
use voxelcraft_agents::governance::claims_overlap;
use voxelcraft_agents::{LandClaim, Law};
use voxelcraft_core::systems::laws::system_laws;
use voxelcraft_core::{OrgTransfer, SnapshotV1, TickInputs, World, state_digest};
use voxelcraft_types::{
    ActAck, ActionEnvelope, AgentId, ClaimType, Event, EventKind, InstantReq, LandId, LawId, LawStatus, OrgId, OrgKind,
    OrgRole, TaskReq, Vec3i, VoteChoice,
};

use common::{envelope, instant, join_all, task, world};

#[derive(Debug, Clone)]
enum Op {
    Say(String),
    Move(i32, i32),
    Idle,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        "[a-z]{1,12}".prop_map(Op::Say),
        (-6i32..=6, -6i32..=6).prop_map(|(dx, dz)| Op::Move(dx, dz)),
        Just(Op::Idle),
    ]
}

/// One tick of ops for agents A1 and A2.
fn script() -> impl Strategy<Value = Vec<(Op, Op)>> {
    proptest::collection::vec((op(), op()), 1..12)
}

fn to_envelope(w: &World, agent: &str, op: &Op) -> Option<ActionEnvelope> {
    let mut env = envelope(w, agent);
    match op {
        Op::Say(text) => env.instants.push(InstantReq {
            text: text.clone(),
            ..instant("SAY")
        }),
        Op::Move(dx, dz) => {
            let p = w.agents.get(agent)?.pos;
            env.tasks.push(TaskReq {
                target: [p.x + dx, 0, p.z + dz],
                ..task("MOVE_TO")
            });
        }
        Op::Idle => return None,
    }
    Some(env)
}

fn ballot() -> impl Strategy<Value = VoteChoice> {
    prop_oneof![Just(VoteChoice::Yes), Just(VoteChoice::No), Just(VoteChoice::Abstain)]
}

/// A world with one MARKET_TAX law in VOTING on A1's land.
fn voting_law(votes: &[VoteChoice]) -> World {
    let mut w = world();
    let land_id = LandId::from_counter("A1", 1);
    w.claims.insert(
        land_id.clone(),
        LandClaim::new(land_id.clone(), "A1", ClaimType::Default, Vec3i::ZERO, 32, 6000),
    );
    let law = Law {
        law_id: LawId::from_counter(1),
        land_id,
        template_id: "MARKET_TAX".to_owned(),
        title: "Market Tax".to_owned(),
        params: BTreeMap::from([("market_tax".to_owned(), "0.1".to_owned())]),
        proposed_by: AgentId::from("A1"),
        proposed_tick: 0,
        notice_ends_tick: 0,
        vote_ends_tick: 5,
        status: LawStatus::Voting,
        votes: votes
            .iter()
            .enumerate()
            .map(|(i, v)| (AgentId::from_counter(i as u64 + 1), *v))
            .collect(),
    };
    w.laws.insert(law.law_id.clone(), law);
    w
}

/// Run `script` on a fresh world and return the per-tick digests.
fn play(script: &[(Op, Op)]) -> (World, Vec<String>) {
    let mut w = world();
    join_all(&mut w, &["alice", "bob"]);
    let mut digests = Vec::new();
    for (a, b) in script {
        let envelopes = [("A1", a), ("A2", b)]
            .into_iter()
            .filter_map(|(agent, op)| to_envelope(&w, agent, op))
            .collect();
        let s = w.step(TickInputs {
            envelopes,
            ..TickInputs::default()
        });
        digests.push(s.digest);
    }
    (w, digests)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn same_inputs_same_digests(s in script()) {
        let (_, first) = play(&s);
        let (_, second) = play(&s);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn snapshot_round_trip_keeps_the_digest(s in script()) {
        let (w, _) = play(&s);
        let at = w.tick() - 1;
        let bytes = w.export_snapshot(at).to_json().unwrap();
        let mut copy = world();
        copy.import_snapshot(SnapshotV1::from_json(&bytes).unwrap()).unwrap();
        prop_assert_eq!(copy.tick(), w.tick());
        prop_assert_eq!(state_digest(&copy, at), state_digest(&w, at));
    }
}

proptest! {
    #[test]
    fn claim_overlap_is_symmetric(
        ax in -500i32..500, az in -500i32..500, ra in 1i32..=128,
        bx in -500i32..500, bz in -500i32..500, rb in 1i32..=128,
    ) {
        let (a, b) = (Vec3i::flat(ax, az), Vec3i::flat(bx, bz));
        prop_assert_eq!(claims_overlap(a, ra, b, rb), claims_overlap(b, rb, a, ra));
        prop_assert!(claims_overlap(a, ra, a, rb));
    }

    #[test]
    fn first_ack_wins(msgs in proptest::collection::vec("[a-z]{0,8}", 1..20), act in "[A-Z0-9]{1,6}") {
        let mut w = world();
        let ack = |msg: &str| ActAck {
            act_id: act.clone(),
            accepted: true,
            tick: 0,
            msg: msg.to_owned(),
        };
        let (first, dup) = w.dedupe.check_or_remember("A1", "W", &act, ack(&msgs[0]), 0);
        prop_assert!(!dup);
        for (t, m) in msgs.iter().enumerate().skip(1) {
            let (got, dup) = w.dedupe.check_or_remember("A1", "W", &act, ack(m), t as u64);
            prop_assert!(dup);
            prop_assert_eq!(&got, &first);
        }
    }

    #[test]
    fn paging_sees_every_event_once_in_order(n in 1usize..200, limit in 1usize..50) {
        let mut w = world();
        join_all(&mut w, &["alice"]);
        let id = AgentId::from("A1");
        for i in 0..n {
            w.inject_event(&id, Event::new(1, EventKind::Notice).with("seq", i)).unwrap();
        }
        let a = w.agents.get("A1").unwrap();
        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let (items, next) = a.events_after(cursor, limit);
            prop_assert!(next >= cursor);
            if items.is_empty() {
                break;
            }
            prop_assert!(items.len() <= limit);
            seen.extend(items.into_iter().filter_map(|c| c.event.get("seq").and_then(serde_json::Value::as_u64)));
            cursor = next;
        }
        let expected: Vec<u64> = (0..n as u64).collect();
        prop_assert_eq!(seen, expected);
    }

    #[test]
    fn org_meta_never_moves_backwards(versions in proptest::collection::vec(0u64..20, 1..10)) {
        let mut w = world();
        join_all(&mut w, &["alice"]);
        let org_id = OrgId::from_counter(1);
        for &v in &versions {
            w.org_meta_upsert(vec![OrgTransfer {
                org_id: org_id.clone(),
                kind: OrgKind::Guild,
                name: format!("v{v}"),
                created_tick: 0,
                meta_version: v,
                members: [(AgentId::from("A1"), OrgRole::Leader)].into_iter().collect(),
            }]);
        }
        let max = versions.iter().copied().max().unwrap();
        let org = w.orgs.get(&org_id).unwrap();
        prop_assert_eq!(org.meta_version, max);
        prop_assert_eq!(org.name.clone(), format!("v{max}"));
        prop_assert_eq!(w.agents.get("A1").unwrap().org_id.as_ref(), Some(&org_id));
    }
}

proptest! {
    #[test]
    fn laws_pass_on_strict_majority_only(votes in proptest::collection::vec(ballot(), 0..15)) {
        let mut w = voting_law(&votes);
        system_laws(&mut w, 5);
        let yes = votes.iter().filter(|v| **v == VoteChoice::Yes).count();
        let no = votes.iter().filter(|v| **v == VoteChoice::No).count();
        let expected = if yes > no { LawStatus::Active } else { LawStatus::Rejected };
        prop_assert_eq!(w.laws.get("LAW000001").unwrap().status, expected);
    }
}
