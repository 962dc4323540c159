mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::{TestLedger, ACTOR};
use inventory_ledger::{
    entities::stock_movement::{MovementReason, ReferenceKind},
    errors::LedgerError,
    events::LedgerEvent,
    services::ledger::StockMoveCommand,
};

#[tokio::test]
async fn sale_decrements_stock_and_records_movement() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    t.stock(t.main.id, mug.id, 10).await;

    let movement = t
        .services
        .ledger
        .execute_movement(
            StockMoveCommand::new(t.main.id, mug.id, -3, MovementReason::Sale, ACTOR)
                .with_reference(ReferenceKind::SalesOrder, 77),
        )
        .await
        .expect("sale should succeed");

    assert_eq!(movement.quantity_change, -3);
    assert_eq!(movement.reason, MovementReason::Sale);
    assert_eq!(movement.reference_type, Some(ReferenceKind::SalesOrder));
    assert_eq!(movement.reference_id, Some(77));
    assert_eq!(t.qty(t.main.id, mug.id).await, 7);
    t.assert_consistent().await;
}

#[tokio::test]
async fn oversell_is_rejected_without_side_effects() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    t.stock(t.main.id, mug.id, 5).await;

    let err = t
        .services
        .ledger
        .execute_movement(StockMoveCommand::new(
            t.main.id,
            mug.id,
            -6,
            MovementReason::Sale,
            ACTOR,
        ))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        LedgerError::InsufficientStock {
            requested: 6,
            available: 5,
            ..
        }
    );
    assert_eq!(t.qty(t.main.id, mug.id).await, 5);
    assert_eq!(t.movements(mug.id).await.len(), 1);
}

#[tokio::test]
async fn debit_of_never_stocked_pair_reports_zero_available() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;

    let err = t
        .services
        .ledger
        .execute_movement(StockMoveCommand::new(
            t.main.id,
            mug.id,
            -1,
            MovementReason::Sale,
            ACTOR,
        ))
        .await
        .unwrap_err();

    assert_matches!(err, LedgerError::InsufficientStock { available: 0, .. });
    assert!(t
        .services
        .ledger
        .get_stock_row(t.main.id, mug.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn draining_to_exactly_zero_is_allowed() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    t.stock(t.main.id, mug.id, 4).await;

    t.services
        .ledger
        .execute_movement(StockMoveCommand::new(
            t.main.id,
            mug.id,
            -4,
            MovementReason::Sale,
            ACTOR,
        ))
        .await
        .expect("draining to zero should succeed");

    assert_eq!(t.qty(t.main.id, mug.id).await, 0);
    t.assert_consistent().await;
}

#[tokio::test]
async fn zero_change_and_dangling_references_are_rejected() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    let ledger = &t.services.ledger;

    assert_matches!(
        ledger
            .execute_movement(StockMoveCommand::new(
                t.main.id,
                mug.id,
                0,
                MovementReason::Adjustment,
                ACTOR
            ))
            .await,
        Err(LedgerError::InvalidQuantity(_))
    );
    assert_matches!(
        ledger
            .execute_movement(StockMoveCommand::new(
                9999,
                mug.id,
                1,
                MovementReason::Adjustment,
                ACTOR
            ))
            .await,
        Err(LedgerError::InvalidLocation {
            location_id: 9999,
            ..
        })
    );
    assert_matches!(
        ledger
            .execute_movement(StockMoveCommand::new(
                t.main.id,
                9999,
                1,
                MovementReason::Adjustment,
                ACTOR
            ))
            .await,
        Err(LedgerError::InvalidVariant {
            variant_id: 9999,
            ..
        })
    );
}

#[tokio::test]
async fn unrepresentable_debit_is_rejected() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    t.stock(t.main.id, mug.id, 3).await;

    assert_matches!(
        t.services
            .ledger
            .execute_movement(StockMoveCommand::new(
                t.main.id,
                mug.id,
                i64::MIN,
                MovementReason::Sale,
                ACTOR
            ))
            .await,
        Err(LedgerError::InvalidQuantity(_))
    );
    assert_eq!(t.qty(t.main.id, mug.id).await, 3);
    t.assert_consistent().await;
}

#[tokio::test]
async fn batch_is_all_or_nothing() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    let cap = t.variant("CAP-1").await;
    t.stock(t.main.id, mug.id, 10).await;
    t.stock(t.main.id, cap.id, 1).await;

    let err = t
        .services
        .ledger
        .execute_batch(vec![
            StockMoveCommand::new(t.main.id, mug.id, -5, MovementReason::Sale, ACTOR),
            StockMoveCommand::new(t.main.id, cap.id, -2, MovementReason::Sale, ACTOR),
        ])
        .await
        .unwrap_err();

    assert_matches!(err, LedgerError::InsufficientStock { variant_id, .. } if variant_id == cap.id);
    assert_eq!(t.qty(t.main.id, mug.id).await, 10);
    assert_eq!(t.qty(t.main.id, cap.id).await, 1);
    t.assert_consistent().await;
}

#[tokio::test]
async fn batch_applies_in_caller_order() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;

    // The credit must land before the debit for the batch to succeed.
    let movements = t
        .services
        .ledger
        .execute_batch(vec![
            StockMoveCommand::new(t.main.id, mug.id, 3, MovementReason::Purchase, ACTOR),
            StockMoveCommand::new(t.main.id, mug.id, -2, MovementReason::Sale, ACTOR),
        ])
        .await
        .expect("ordered batch should succeed");

    assert_eq!(movements.len(), 2);
    assert!(movements[0].id < movements[1].id);
    assert_eq!(t.qty(t.main.id, mug.id).await, 1);
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let t = TestLedger::new().await;
    let movements = t.services.ledger.execute_batch(Vec::new()).await.unwrap();
    assert!(movements.is_empty());
}

#[tokio::test]
async fn inactive_location_can_be_drained_but_not_credited() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    let store = t.location("STORE-1").await;
    t.stock(store.id, mug.id, 3).await;
    t.services
        .locations
        .deactivate_location(store.id)
        .await
        .unwrap();

    assert_matches!(
        t.services
            .ledger
            .execute_movement(StockMoveCommand::new(
                store.id,
                mug.id,
                1,
                MovementReason::Adjustment,
                ACTOR
            ))
            .await,
        Err(LedgerError::InvalidLocation { .. })
    );
    t.services
        .ledger
        .execute_movement(StockMoveCommand::new(
            store.id,
            mug.id,
            -3,
            MovementReason::Sale,
            ACTOR,
        ))
        .await
        .expect("draining an inactive location should succeed");
    assert_eq!(t.qty(store.id, mug.id).await, 0);
}

#[tokio::test]
async fn history_is_newest_first_and_paged() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    for _ in 0..5 {
        t.stock(t.main.id, mug.id, 1).await;
    }

    let ledger = &t.services.ledger;
    let first = ledger
        .movement_history(Some(mug.id), Some(t.main.id), 1, 2)
        .await
        .unwrap();
    let third = ledger
        .movement_history(Some(mug.id), Some(t.main.id), 3, 2)
        .await
        .unwrap();

    assert_eq!(first.len(), 2);
    assert!(first[0].id > first[1].id);
    assert_eq!(third.len(), 1);
    assert!(third[0].id < first[1].id);
}

#[tokio::test]
async fn low_stock_is_reported_and_published() {
    let mut t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    t.stock(t.main.id, mug.id, 10).await;
    t.services
        .ledger
        .set_safety_stock(t.main.id, mug.id, 4)
        .await
        .unwrap();
    t.drain_events();

    t.services
        .ledger
        .execute_movement(StockMoveCommand::new(
            t.main.id,
            mug.id,
            -7,
            MovementReason::Sale,
            ACTOR,
        ))
        .await
        .unwrap();

    let low = t.services.ledger.low_stock_levels(None).await.unwrap();
    assert_eq!(low.len(), 1);
    assert_eq!(low[0].quantity, 3);

    let events = t.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        LedgerEvent::LowStock {
            quantity: 3,
            safety_stock: 4,
            ..
        }
    )));
}

#[tokio::test]
async fn total_on_hand_sums_locations() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    let store = t.location("STORE-1").await;
    t.stock(t.main.id, mug.id, 6).await;
    t.stock(store.id, mug.id, 4).await;

    assert_eq!(t.services.ledger.total_on_hand(mug.id).await.unwrap(), 10);
}

#[tokio::test]
async fn undrained_event_channel_does_not_stall_writers() {
    let t = TestLedger::with_event_capacity(1).await;
    let mug = t.variant("MUG-1").await;

    for expected in 1..=3 {
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            t.services.ledger.execute_movement(StockMoveCommand::new(
                t.main.id,
                mug.id,
                1,
                MovementReason::Purchase,
                ACTOR,
            )),
        )
        .await
        .expect("movement blocked on a full event channel");
        assert!(result.is_ok());
        assert_eq!(t.qty(t.main.id, mug.id).await, expected);
    }
    t.assert_consistent().await;
}
