//! Property-based convergence tests.
//!
//! Random histories of three devices writing, deleting and pulling from one
//! another. Whatever the interleaving, once every device has pulled every
//! change set, all of them must resolve the shared object identically.

use consort_core::{
    apply_change_set, plan_merge, properties, Baseline, ChangeSet, DeviceId, GlobalId,
    LastWriterWins, LowestDeviceWins, ObjectChange, RecordTable, ResolvedObject, Revision,
    RevisionSet, ConflictResolver,
};
use proptest::prelude::*;

const DEVICES: usize = 3;

#[derive(Clone, Debug)]
enum Op {
    Set(i64),
    Delete,
    Reinsert(i64),
}

#[derive(Clone, Debug)]
enum Step {
    Write { device: usize, op: Op, ts: i64 },
    Pull { device: usize, from: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0i64..100).prop_map(Op::Set),
        1 => Just(Op::Delete),
        1 => (0i64..100).prop_map(Op::Reinsert),
    ]
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..DEVICES, op_strategy(), 0i64..50).prop_map(|(device, op, ts)| Step::Write { device, op, ts }),
        (0..DEVICES, 0..DEVICES).prop_map(|(device, from)| Step::Pull { device, from }),
    ]
}

fn gid() -> GlobalId {
    GlobalId::new("x")
}

struct Sim {
    ids: Vec<DeviceId>,
    logs: Vec<Vec<ChangeSet>>,
    applied: Vec<RevisionSet>,
    tables: Vec<RecordTable>,
}

impl Sim {
    fn new() -> Self {
        let baseline = Baseline::origin(
            DeviceId::new("origin"),
            0,
            vec![(gid(), "Number".to_string(), properties([("number", 0i64)]))],
        )
        .unwrap();

        Self {
            ids: (0..DEVICES).map(|i| DeviceId::new(format!("dev-{}", i))).collect(),
            logs: vec![Vec::new(); DEVICES],
            applied: vec![RevisionSet::new(); DEVICES],
            tables: vec![baseline.records.clone(); DEVICES],
        }
    }

    fn write(&mut self, device: usize, op: &Op, ts: i64) {
        let id = self.ids[device].clone();
        let sequence = self.logs[device].len() as u64 + 1;
        let change = match op {
            Op::Set(v) => ObjectChange::update(gid(), "Number", properties([("number", *v)])),
            Op::Delete => ObjectChange::delete(gid(), "Number"),
            Op::Reinsert(v) => ObjectChange::insert(gid(), "Number", properties([("number", *v)])),
        };
        let cs = ChangeSet::new(
            Revision::new(id.clone(), sequence),
            ts,
            self.applied[device].clone(),
            vec![change],
        );
        apply_change_set(&mut self.tables[device], &cs);
        self.applied[device].set(id, sequence);
        self.logs[device].push(cs);
    }

    fn pull(&mut self, device: usize, candidates: Vec<ChangeSet>) {
        let plan = plan_merge(&self.applied[device], candidates);
        for cs in &plan.ordered {
            apply_change_set(&mut self.tables[device], cs);
        }
        self.applied[device] = plan.applied;
    }

    fn run(&mut self, steps: &[Step]) {
        for step in steps {
            match step {
                Step::Write { device, op, ts } => self.write(*device, op, *ts),
                Step::Pull { device, from } => {
                    let candidates = self.logs[*from].clone();
                    self.pull(*device, candidates);
                }
            }
        }
    }

    fn settle(&mut self) {
        let everything: Vec<ChangeSet> = self.logs.iter().flatten().cloned().collect();
        for device in 0..DEVICES {
            self.pull(device, everything.clone());
        }
    }

    fn resolved(&self, device: usize, resolver: &dyn ConflictResolver) -> Option<ResolvedObject> {
        self.tables[device][&gid()].resolve(&gid(), resolver).unwrap()
    }
}

proptest! {
    #[test]
    fn devices_converge_after_full_exchange(steps in prop::collection::vec(step_strategy(), 0..40)) {
        let mut sim = Sim::new();
        sim.run(&steps);
        sim.settle();

        for device in 1..DEVICES {
            prop_assert_eq!(&sim.applied[device], &sim.applied[0]);
            prop_assert_eq!(sim.resolved(device, &LastWriterWins), sim.resolved(0, &LastWriterWins));
            prop_assert_eq!(sim.resolved(device, &LowestDeviceWins), sim.resolved(0, &LowestDeviceWins));
        }
    }

    #[test]
    fn merge_plan_ignores_input_order(
        steps in prop::collection::vec(step_strategy(), 0..30),
        rotation in 0usize..50,
    ) {
        let mut sim = Sim::new();
        sim.run(&steps);

        let mut everything: Vec<ChangeSet> = sim.logs.iter().flatten().cloned().collect();
        let forward = plan_merge(&RevisionSet::new(), everything.clone());
        if !everything.is_empty() {
            let len = everything.len();
            everything.rotate_left(rotation % len);
            everything.reverse();
        }
        let shuffled = plan_merge(&RevisionSet::new(), everything);

        let a: Vec<_> = forward.ordered.iter().map(|c| c.revision.clone()).collect();
        let b: Vec<_> = shuffled.ordered.iter().map(|c| c.revision.clone()).collect();
        prop_assert_eq!(a, b);
        prop_assert!(forward.deferred.is_empty());
    }

    #[test]
    fn replaying_is_idempotent(steps in prop::collection::vec(step_strategy(), 0..30)) {
        let mut sim = Sim::new();
        sim.run(&steps);
        sim.settle();

        let before = sim.tables[0].clone();
        let everything: Vec<ChangeSet> = sim.logs.iter().flatten().cloned().collect();
        for cs in &everything {
            apply_change_set(&mut sim.tables[0], cs);
        }
        prop_assert_eq!(&sim.tables[0], &before);
    }
}
