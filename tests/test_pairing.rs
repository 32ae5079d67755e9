extern crate cgmath;
extern crate env_logger;
extern crate itertools;
extern crate rand;
extern crate rand_chacha;
extern crate rustc_hash;
extern crate zvxryb_bvh as bvh;

use bvh::{Aabb, Bounds, Broadphase, BroadphaseBuilder, Expansion, Handle, Real, SpatialTree};

use cgmath::Point3;
use itertools::Itertools;
use rand::prelude::*;
use rand_chacha::ChaChaRng;
use rustc_hash::FxHashMap;

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

type Index = Broadphase<u32, u32>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn cube(x: Real, y: Real, z: Real, size: Real) -> Aabb {
    Bounds::new(Point3::new(x, y, z), Point3::new(x + size, y + size, z + size))
}

fn pairing_index(margin: Expansion) -> Index {
    BroadphaseBuilder::new()
        .with_pairing(true)
        .with_pairing_expansion(margin)
        .build()
}

#[derive(Default)]
struct Events {
    paired: Vec<(Handle, Handle, u32)>,
    unpaired: Vec<(Handle, Handle, u32)>,
    next_token: u32
}

impl Events {
    fn clear(&mut self) {
        self.paired.clear();
        self.unpaired.clear();
    }
}

fn record(index: &mut Index) -> Rc<RefCell<Events>> {
    let events = Rc::new(RefCell::new(Events::default()));

    let sink = events.clone();
    index.set_pair_callback(move |a, b| {
        assert!(a.handle < b.handle, "endpoints out of order");
        let mut events = sink.borrow_mut();
        events.next_token += 1;
        let token = events.next_token;
        events.paired.push((a.handle, b.handle, token));
        token
    });

    let sink = events.clone();
    index.set_unpair_callback(move |a, b, token| {
        assert!(a.handle < b.handle, "endpoints out of order");
        sink.borrow_mut().unpaired.push((a.handle, b.handle, token));
    });

    events
}

#[test]
fn pair_then_unpair() {
    init_logging();

    let mut index = pairing_index(Expansion::Auto);
    let events = record(&mut index);

    let a = index.create(10, cube(0.0, 0.0, 0.0, 1.0), 0, true, 1, 1);
    let b = index.create(20, cube(5.0, 5.0, 5.0, 1.0), 0, true, 1, 1);
    index.update();
    assert!(events.borrow().paired.is_empty());
    assert!(!index.is_paired(a, b));

    index.move_item(a, cube(4.9, 4.9, 4.9, 1.0));
    index.update();
    {
        let events = events.borrow();
        assert_eq!(events.paired.len(), 1);
        assert_eq!((events.paired[0].0, events.paired[0].1), (a, b));
        assert!(events.unpaired.is_empty());
    }
    assert!(index.is_paired(a, b));
    assert!(index.is_paired(b, a));
    index.verify_pairs();

    index.move_item(a, cube(20.0, 20.0, 20.0, 1.0));
    index.update();
    {
        let events = events.borrow();
        assert_eq!(events.paired.len(), 1);
        assert_eq!(events.unpaired.len(), 1);
        assert_eq!(events.unpaired[0], events.paired[0]);
    }
    assert!(!index.is_paired(a, b));
    assert_eq!(index.pair_count(a), 0);
    assert_eq!(index.pair_count(b), 0);
}

#[test]
fn endpoints_carry_userdata() {
    let mut index = pairing_index(Expansion::Fixed(0.0));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    index.set_pair_callback(move |a, b| {
        sink.borrow_mut().push((a.userdata, a.subindex, b.userdata, b.subindex));
        0
    });

    index.create(7, cube(0.0, 0.0, 0.0, 1.0), 3, true, 1, 1);
    index.create(9, cube(0.5, 0.0, 0.0, 1.0), 4, true, 1, 1);
    index.update();

    assert_eq!(*seen.borrow(), vec![(7, 3, 9, 4)]);
}

#[test]
fn no_repeat_callbacks() {
    let mut index = pairing_index(Expansion::Fixed(0.0));
    let events = record(&mut index);

    index.create(0, cube(0.0, 0.0, 0.0, 1.0), 0, true, 1, 1);
    index.create(1, cube(0.5, 0.5, 0.5, 1.0), 0, true, 1, 1);
    index.update();
    assert_eq!(events.borrow().paired.len(), 1);

    for _ in 0..5 {
        index.update();
    }
    assert_eq!(events.borrow().paired.len(), 1);
    assert!(events.borrow().unpaired.is_empty());
}

#[test]
fn both_moved_in_one_tick() {
    let mut index = pairing_index(Expansion::Fixed(0.0));
    let events = record(&mut index);

    let a = index.create(0, cube(0.0, 0.0, 0.0, 1.0), 0, true, 1, 1);
    let b = index.create(1, cube(10.0, 0.0, 0.0, 1.0), 0, true, 1, 1);
    index.update();

    index.move_item(a, cube(5.0, 0.0, 0.0, 1.0));
    index.move_item(b, cube(5.5, 0.0, 0.0, 1.0));
    assert_eq!(index.changed_count(), 2);
    index.update();

    assert_eq!(events.borrow().paired.len(), 1);
    index.verify_pairs();
}

#[test]
fn latest_move_wins() {
    let mut index = pairing_index(Expansion::Fixed(0.0));
    let events = record(&mut index);

    let a = index.create(0, cube(0.0, 0.0, 0.0, 1.0), 0, true, 1, 1);
    index.create(1, cube(10.0, 0.0, 0.0, 1.0), 0, true, 1, 1);
    index.update();

    // passes through the other item and out again before the tick ends
    index.move_item(a, cube(10.0, 0.0, 0.0, 1.0));
    index.move_item(a, cube(20.0, 0.0, 0.0, 1.0));
    index.update();

    assert!(events.borrow().paired.is_empty());
}

#[test]
fn erase_unpairs_everything() {
    let mut index = pairing_index(Expansion::Fixed(0.0));
    let events = record(&mut index);

    let hub = index.create(0, cube(0.0, 0.0, 0.0, 4.0), 0, true, 1, 1);
    let spokes: Vec<Handle> = (0..5)
        .map(|i| index.create(i + 1, cube(i as Real * 0.5, 1.0, 1.0, 1.0), 0, true, 1, 1))
        .collect();
    let far = index.create(99, cube(50.0, 50.0, 50.0, 1.0), 0, true, 1, 1);
    index.update();
    assert_eq!(index.pair_count(hub), 5);
    assert_eq!(index.pair_count(far), 0);
    events.borrow_mut().clear();

    index.erase(hub);
    assert!(!index.contains(hub));
    {
        let events = events.borrow();
        assert_eq!(events.unpaired.len(), 5);
        assert!(events.unpaired.iter().all(|&(a, b, _)| a == hub || b == hub));
    }
    for &spoke in &spokes {
        assert!(!index.pairs(spoke).any(|(partner, _)| partner == hub));
    }
    index.verify_pairs();

    // unpairing only happens once
    index.update();
    assert_eq!(events.borrow().unpaired.len(), 5);
}

#[test]
fn masks_filter_pairs() {
    let mut index = pairing_index(Expansion::Fixed(0.0));
    let events = record(&mut index);

    let a = index.create(0, cube(0.0, 0.0, 0.0, 1.0), 0, true, 1, 1);
    let wrong_type = index.create(1, cube(0.5, 0.0, 0.0, 1.0), 0, true, 2, 2);
    let deaf = index.create(2, cube(0.0, 0.5, 0.0, 1.0), 0, true, 1, 0);
    let matched = index.create(3, cube(0.0, 0.0, 0.5, 1.0), 0, true, 1, 1);
    index.update();

    assert!(!index.is_paired(a, wrong_type));
    assert!(!index.is_paired(a, deaf));
    assert!(!index.is_paired(matched, deaf));
    assert!(index.is_paired(a, matched));
    assert_eq!(events.borrow().paired.len(), 1);
}

#[test]
fn one_way_interest_is_not_enough() {
    let mut index = pairing_index(Expansion::Fixed(0.0));

    // a wants type 2, but b only wants type 4
    let a = index.create(0, cube(0.0, 0.0, 0.0, 1.0), 0, true, 1, 2);
    let b = index.create(1, cube(0.5, 0.0, 0.0, 1.0), 0, true, 2, 4);
    index.update();
    assert!(!index.is_paired(a, b));

    let c = index.create(2, cube(0.0, 0.5, 0.0, 1.0), 0, true, 2, 1);
    index.update();
    assert!(index.is_paired(a, c));
}

#[test]
fn non_pairable_targets() {
    let mut index = pairing_index(Expansion::Fixed(0.0));
    let events = record(&mut index);

    let wall = index.create(0, cube(0.0, 0.0, 0.0, 4.0), 0, false, 1, 1);
    assert_eq!(index.changed_count(), 0);
    assert!(!index.is_pairable(wall));

    let mover = index.create(1, cube(1.0, 1.0, 1.0, 1.0), 0, true, 1, 1);
    index.update();
    assert!(index.is_paired(wall, mover));

    // moving the wall away does not recheck it
    index.move_item(wall, cube(100.0, 0.0, 0.0, 4.0));
    assert_eq!(index.changed_count(), 0);
    index.update();
    assert!(index.is_paired(wall, mover));

    // the next recheck of the mover drops the pair
    index.move_item(mover, cube(1.5, 1.0, 1.0, 1.0));
    index.update();
    assert!(!index.is_paired(wall, mover));
    assert_eq!(events.borrow().unpaired.len(), 1);
}

#[test]
fn non_pairable_items_never_pair_each_other() {
    let mut index = pairing_index(Expansion::Fixed(0.0));
    let a = index.create(0, cube(0.0, 0.0, 0.0, 1.0), 0, false, 1, 1);
    let b = index.create(1, cube(0.5, 0.0, 0.0, 1.0), 0, false, 1, 1);
    index.move_item(a, cube(0.2, 0.0, 0.0, 1.0));
    index.update();
    assert!(!index.is_paired(a, b));
}

#[test]
fn set_pairable_keeps_existing_pairs() {
    let mut index = pairing_index(Expansion::Fixed(0.0));

    let a = index.create(0, cube(0.0, 0.0, 0.0, 1.0), 0, true, 1, 1);
    let b = index.create(1, cube(0.5, 0.0, 0.0, 1.0), 0, true, 1, 1);
    index.update();
    assert!(index.is_paired(a, b));

    index.set_pairable(b, false, 1, 1);
    assert!(!index.is_pairable(b));
    index.update();
    assert!(index.is_paired(a, b));

    // rechecks only drop pairs that stopped overlapping
    index.set_pairable(b, true, 8, 8);
    index.move_item(a, cube(0.25, 0.0, 0.0, 1.0));
    index.update();
    assert!(index.is_paired(a, b));

    index.move_item(a, cube(10.0, 0.0, 0.0, 1.0));
    index.update();
    assert!(!index.is_paired(a, b));

    index.move_item(a, cube(0.25, 0.0, 0.0, 1.0));
    index.update();
    assert!(!index.is_paired(a, b));
    index.verify_pairs();
}

#[test]
fn non_pairable_before_update_is_not_a_source() {
    let mut index = pairing_index(Expansion::Fixed(0.0));
    let events = record(&mut index);

    let c = index.create(0, cube(0.0, 0.0, 0.0, 2.0), 0, true, 1, 1);
    index.update();

    let a = index.create(1, cube(1.0, 1.0, 1.0, 1.0), 0, true, 1, 1);
    assert_eq!(index.changed_count(), 1);
    index.set_pairable(a, false, 1, 1);
    assert_eq!(index.changed_count(), 0);
    index.update();

    assert!(!index.is_paired(a, c));
    assert!(events.borrow().paired.is_empty());

    // once pairable again, its next move is rechecked
    index.set_pairable(a, true, 1, 1);
    index.move_item(a, cube(1.25, 1.0, 1.0, 1.0));
    index.update();
    assert!(index.is_paired(a, c));
    assert_eq!(events.borrow().paired.len(), 1);
}

#[test]
fn runtime_parameters() {
    let mut index: Index = BroadphaseBuilder::new()
        .with_pairing(true)
        .with_item_capacity(16)
        .build();
    index.params_set_node_expansion(0.0);
    index.params_set_pairing_expansion(1.0);
    assert_eq!(index.tree().node_expansion(), 0.0);
    assert_eq!(index.tree().pairing_expansion(), 1.0);

    // within the pairing margin, but not touching
    let a = index.create(0, cube(0.0, 0.0, 0.0, 1.0), 0, true, 1, 1);
    let b = index.create(1, cube(1.5, 0.0, 0.0, 1.0), 0, true, 1, 1);
    index.update();
    assert!(index.is_paired(a, b));

    index.params_set_pairing_expansion(-1.0);
    assert!(index.tree().pairing_expansion() < 1.0);
}

#[test]
fn raw_handles() {
    let mut index = pairing_index(Expansion::Fixed(0.0));

    let a = index.create(0, cube(0.0, 0.0, 0.0, 1.0), 0, true, 1, 1);
    let b = index.create(1, cube(10.0, 0.0, 0.0, 1.0), 0, true, 1, 1);
    index.update();

    index.move_item(a.id(), cube(9.5, 0.0, 0.0, 1.0));
    index.update();
    assert!(index.is_paired(a.id(), b.id()));
    assert_eq!(index.get(b.id()), 1);

    index.erase(u32::from(a));
    assert!(!index.contains(a.id()));
    assert_eq!(index.pair_count(b), 0);
}

#[test]
fn erased_handles_are_reused() {
    let mut index = pairing_index(Expansion::Fixed(0.0));
    let events = record(&mut index);

    let a = index.create(0, cube(0.0, 0.0, 0.0, 1.0), 0, true, 1, 1);
    let b = index.create(1, cube(0.5, 0.0, 0.0, 1.0), 0, true, 1, 1);
    index.update();
    index.erase(a);

    let c = index.create(2, cube(30.0, 0.0, 0.0, 1.0), 0, true, 1, 1);
    assert_eq!(c, a);
    assert_eq!(index.get(c), 2);
    index.update();

    assert!(!index.is_paired(b, c));
    assert_eq!(events.borrow().paired.len(), 1);
    assert_eq!(events.borrow().unpaired.len(), 1);
    index.verify_pairs();
}

#[test]
fn default_tokens_without_callbacks() {
    let mut index: Broadphase<u32, u32> = pairing_index(Expansion::Fixed(0.0));
    let a = index.create(0, cube(0.0, 0.0, 0.0, 1.0), 0, true, 1, 1);
    let b = index.create(1, cube(0.5, 0.0, 0.0, 1.0), 0, true, 1, 1);
    index.update();

    let pairs: Vec<(Handle, u32)> = index.pairs(a).map(|(partner, &token)| (partner, token)).collect();
    assert_eq!(pairs, vec![(b, 0)]);
}

struct Item {
    handle: Handle,
    size: Real,
    bounds: Aabb,
    pairable: bool,
    pairable_type: u32,
    pairable_mask: u32
}

fn random_bounds<R: Rng>(prng: &mut R, size: Real) -> Aabb {
    cube(
        prng.gen_range(0.0, 40.0),
        prng.gen_range(0.0, 40.0),
        prng.gen_range(0.0, 40.0),
        size)
}

fn random_filter<R: Rng>(prng: &mut R) -> (u32, u32) {
    ([1, 2][prng.gen_range(0, 2)], [1, 2, 3][prng.gen_range(0, 3)])
}

fn spawn<R: Rng>(index: &mut Index, prng: &mut R, pairable: bool) -> Item {
    let size = prng.gen_range(1.0, 6.0);
    let bounds = random_bounds(prng, size);
    let (pairable_type, pairable_mask) = random_filter(prng);
    let handle = index.create(0, bounds, 0, pairable, pairable_type, pairable_mask);
    Item{handle, size, bounds, pairable, pairable_type, pairable_mask}
}

fn eligible(a: &Item, b: &Item) -> bool {
    a.pairable_mask & b.pairable_type != 0 &&
    b.pairable_mask & a.pairable_type != 0
}

type TokenLedger = Rc<RefCell<FxHashMap<(Handle, Handle), u32>>>;

/// Mirrors every callback into a map, checking that each pair is reported once and unpaired
/// with the token it was given
fn track_tokens(index: &mut Index) -> TokenLedger {
    let tracked: TokenLedger = Rc::new(RefCell::new(FxHashMap::default()));
    let mut next_token = 0u32;

    let sink = tracked.clone();
    index.set_pair_callback(move |a, b| {
        next_token += 1;
        let previous = sink.borrow_mut().insert((a.handle, b.handle), next_token);
        assert!(previous.is_none(), "paired twice: {:?} {:?}", a.handle, b.handle);
        next_token
    });

    let sink = tracked.clone();
    index.set_unpair_callback(move |a, b, token| {
        let stored = sink.borrow_mut().remove(&(a.handle, b.handle));
        assert_eq!(stored, Some(token), "unpaired {:?} {:?} with the wrong token", a.handle, b.handle);
    });

    tracked
}

fn expected_pairs(items: &[Item]) -> BTreeSet<(Handle, Handle)> {
    items.iter()
        .tuple_combinations()
        .filter(|(a, b)| eligible(a, b) && a.bounds.intersects(b.bounds))
        .map(|(a, b)| Handle::sorted(a.handle, b.handle))
        .collect()
}

fn actual_pairs(index: &Index, items: &[Item]) -> BTreeSet<(Handle, Handle)> {
    items.iter()
        .flat_map(|item| index.pairs(item.handle).map(move |(partner, _)| (item.handle, partner)))
        .filter(|&(a, b)| a < b)
        .collect()
}

#[test]
fn random_ticks_match_brute_force() {
    init_logging();

    let mut prng = ChaChaRng::seed_from_u64(0x5eed_b00c);
    let mut index = pairing_index(Expansion::Fixed(0.0));

    let tracked = track_tokens(&mut index);

    let mut items: Vec<Item> = (0..48).map(|_| spawn(&mut index, &mut prng, true)).collect();

    for _ in 0..200 {
        for item in items.iter_mut() {
            item.bounds = random_bounds(&mut prng, item.size);
            index.move_item(item.handle, item.bounds);
        }

        if prng.gen_bool(0.3) {
            let victim = items.swap_remove(prng.gen_range(0, items.len()));
            index.erase(victim.handle);
        }
        if prng.gen_bool(0.3) {
            let item = spawn(&mut index, &mut prng, true);
            items.push(item);
        }

        index.update();

        let expected = expected_pairs(&items);
        assert_eq!(actual_pairs(&index, &items), expected);

        let reported: BTreeSet<(Handle, Handle)> = tracked.borrow().keys().cloned().collect();
        assert_eq!(reported, expected);

        index.verify_pairs();
    }
}

/// A new position at least `MIN_JUMP` away along x, so the item always leaves its expanded box
fn jump<R: Rng>(prng: &mut R, item: &Item) -> Aabb {
    const MIN_JUMP: Real = 4.0;
    let mut bounds = random_bounds(prng, item.size);
    if (bounds.min.x - item.bounds.min.x).abs() < MIN_JUMP {
        let x = (item.bounds.min.x + 20.0) % 40.0;
        bounds = cube(x, bounds.min.y, bounds.min.z, item.size);
    }
    bounds
}

/// Pairs must agree with the callbacks and stay symmetric whatever the margin.  Every pairable
/// item is moved each tick, so it is rechecked: overlapping eligible partners must be paired,
/// and a surviving pair must be within the margin of a pairable endpoint.
#[test]
fn random_ticks_with_margins_and_mixed_items() {
    init_logging();

    let margins = [Expansion::Fixed(0.0), Expansion::Fixed(0.5), Expansion::Auto];
    for seed in 0..6u64 {
        let mut prng = ChaChaRng::seed_from_u64(seed);
        let mut index = pairing_index(margins[seed as usize % margins.len()]);
        let tracked = track_tokens(&mut index);

        let mut items: Vec<Item> = (0..40)
            .map(|_| {
                let pairable = prng.gen_bool(0.7);
                spawn(&mut index, &mut prng, pairable)
            })
            .collect();

        for _ in 0..150 {
            for _ in 0..2 {
                let n = prng.gen_range(0, items.len());
                let item = &mut items[n];
                item.pairable = !item.pairable;
                if prng.gen_bool(0.5) {
                    let (pairable_type, pairable_mask) = random_filter(&mut prng);
                    item.pairable_type = pairable_type;
                    item.pairable_mask = pairable_mask;
                }
                index.set_pairable(item.handle, item.pairable, item.pairable_type, item.pairable_mask);
            }

            for item in items.iter_mut() {
                item.bounds = jump(&mut prng, item);
                index.move_item(item.handle, item.bounds);
            }

            if prng.gen_bool(0.2) {
                let victim = items.swap_remove(prng.gen_range(0, items.len()));
                index.erase(victim.handle);
            }
            if prng.gen_bool(0.2) {
                let pairable = prng.gen_bool(0.7);
                let item = spawn(&mut index, &mut prng, pairable);
                items.push(item);
            }

            let margin = index.tree().pairing_expansion();
            index.update();
            index.verify_pairs();

            let actual = actual_pairs(&index, &items);
            let reported: BTreeSet<(Handle, Handle)> = tracked.borrow().keys().cloned().collect();
            assert_eq!(reported, actual);

            for (a, b) in items.iter().tuple_combinations() {
                let paired = actual.contains(&Handle::sorted(a.handle, b.handle));
                let rechecked = a.pairable || b.pairable;
                if rechecked && eligible(a, b) && a.bounds.intersects(b.bounds) {
                    assert!(paired, "{:?} and {:?} overlap but are not paired", a.handle, b.handle);
                }
                if paired && rechecked {
                    let near = |from: &Item, to: &Item| from.pairable && from.bounds.grow_by(margin).intersects(to.bounds);
                    assert!(near(a, b) || near(b, a), "{:?} and {:?} are paired but apart", a.handle, b.handle);
                }
            }
        }
    }
}
