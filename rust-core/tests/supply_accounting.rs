use elastic_core::access::{CallContext, Capability, CapabilitySet};
use elastic_core::accounting::{AccountingEngine, AccountingError, SupplyController};
use elastic_core::config::AccountingConfig;
use elastic_core::event::ProtocolEvent;
use elastic_core::types::AccountId;

fn id(label: &str) -> AccountId {
    AccountId::from_label(label)
}

fn applier() -> CallContext {
    CallContext::new(id("engine"), CapabilitySet::of([Capability::DeltaApplier]))
}

fn ledger(initial: u128, max_delta_bps: u64) -> AccountingEngine {
    AccountingEngine::genesis(
        AccountingConfig {
            initial_supply: initial,
            max_delta_bps,
            ..AccountingConfig::default()
        },
        id("holder"),
    )
    .unwrap()
}

#[test]
fn cap_is_checked_per_call_not_accumulated() {
    let mut l = ledger(1_000_000, 500);
    assert!(matches!(
        l.apply_delta(&applier(), 60_000),
        Err(AccountingError::DeltaCapExceeded { .. })
    ));
    l.apply_delta(&applier(), 40_000).unwrap();
    assert_eq!(l.total_supply(), 1_040_000);

    // A second +5% step is measured against the new total.
    l.apply_delta(&applier(), 52_000).unwrap();
    assert_eq!(l.total_supply(), 1_092_000);
    assert!(l.apply_delta(&applier(), 54_601).is_err());
}

#[test]
fn every_holder_scales_in_proportion() {
    let mut l = ledger(1_000_000, 1_000);
    let owner = CallContext::new(id("holder"), CapabilitySet::empty());
    let shares = [("a", 100_000u128), ("b", 250_000), ("c", 50_000)];
    for (label, amount) in shares {
        l.transfer(&owner, id(label), amount).unwrap();
    }
    let units: Vec<u128> = shares
        .iter()
        .map(|(label, _)| l.internal_balance_of(&id(label)))
        .collect();
    l.drain_events();

    l.apply_delta(&applier(), -100_000).unwrap();
    for ((label, amount), before) in shares.iter().zip(&units) {
        assert_eq!(l.internal_balance_of(&id(label)), *before);
        assert_eq!(l.balance_of(&id(label)), amount * 9 / 10);
    }
    assert_eq!(l.balance_of(&id("holder")), 540_000);

    let events = l.drain_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        ProtocolEvent::SupplyDeltaApplied {
            epoch: 1,
            delta: -100_000,
            total_supply: 900_000,
            ..
        }
    ));
}

#[test]
fn reads_are_stable_between_mutations() {
    let mut l = ledger(777_777, 1_000);
    l.apply_delta(&applier(), 12_345).unwrap();
    let first = (l.total_supply(), l.scale_factor(), l.balance_of(&id("holder")));
    for _ in 0..3 {
        assert_eq!(
            (l.total_supply(), l.scale_factor(), l.balance_of(&id("holder"))),
            first
        );
    }
}

#[test]
fn failed_delta_changes_nothing() {
    let mut l = ledger(1_000, 10_000);
    let snapshot = (l.total_supply(), l.scale_factor(), l.epoch());
    assert_eq!(
        l.apply_delta(&applier(), -1_000),
        Err(AccountingError::NonPositiveSupply)
    );
    let admin = CallContext::new(id("admin"), CapabilitySet::of([Capability::Admin]));
    assert!(l.apply_delta(&admin, 10).is_err());
    assert_eq!((l.total_supply(), l.scale_factor(), l.epoch()), snapshot);
    assert!(l.drain_events().is_empty());
}

#[test]
fn supply_controller_is_object_safe() {
    let mut l = ledger(1_000_000, 500);
    let target: &mut dyn SupplyController = &mut l;
    target.apply_delta(&applier(), 1_000).unwrap();
    assert_eq!(target.total_supply(), 1_001_000);
}
