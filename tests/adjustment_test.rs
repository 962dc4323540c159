mod common;

use assert_matches::assert_matches;
use common::{TestLedger, ACTOR};
use inventory_ledger::{
    entities::stock_movement::MovementReason,
    errors::LedgerError,
    services::{adjustments::CountLine, ledger::StockMoveCommand},
};

#[tokio::test]
async fn bulk_adjust_is_atomic() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    let cap = t.variant("CAP-1").await;
    t.stock(t.main.id, mug.id, 3).await;

    let err = t
        .services
        .adjustments
        .bulk_adjust(vec![
            StockMoveCommand::new(t.main.id, cap.id, 8, MovementReason::Adjustment, ACTOR),
            StockMoveCommand::new(t.main.id, mug.id, -4, MovementReason::Adjustment, ACTOR),
        ])
        .await
        .unwrap_err();

    assert_matches!(err, LedgerError::InsufficientStock { .. });
    assert_eq!(t.qty(t.main.id, cap.id).await, 0);
    assert_eq!(t.qty(t.main.id, mug.id).await, 3);

    let applied = t
        .services
        .adjustments
        .bulk_adjust(vec![
            StockMoveCommand::new(t.main.id, cap.id, 8, MovementReason::Adjustment, ACTOR),
            StockMoveCommand::new(t.main.id, mug.id, -3, MovementReason::Adjustment, ACTOR),
        ])
        .await
        .expect("valid batch should succeed");
    assert_eq!(applied.len(), 2);
    assert_eq!(t.qty(t.main.id, cap.id).await, 8);
    assert_eq!(t.qty(t.main.id, mug.id).await, 0);
    t.assert_consistent().await;
}

#[tokio::test]
async fn adjust_to_target_writes_the_difference() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    t.stock(t.main.id, mug.id, 10).await;
    let adjustments = &t.services.adjustments;

    let down = adjustments
        .adjust_to_target(t.main.id, mug.id, 7, MovementReason::Adjustment, ACTOR)
        .await
        .unwrap()
        .expect("a movement should be written");
    assert_eq!(down.quantity_change, -3);

    let unchanged = adjustments
        .adjust_to_target(t.main.id, mug.id, 7, MovementReason::Adjustment, ACTOR)
        .await
        .unwrap();
    assert!(unchanged.is_none());

    assert_matches!(
        adjustments
            .adjust_to_target(t.main.id, mug.id, -1, MovementReason::Adjustment, ACTOR)
            .await,
        Err(LedgerError::InvalidQuantity(_))
    );
    assert_eq!(t.qty(t.main.id, mug.id).await, 7);
    t.assert_consistent().await;
}

#[tokio::test]
async fn adjust_to_target_creates_stock_for_new_pair() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;

    let movement = t
        .services
        .adjustments
        .adjust_to_target(t.main.id, mug.id, 5, MovementReason::Adjustment, ACTOR)
        .await
        .unwrap()
        .expect("a movement should be written");

    assert_eq!(movement.quantity_change, 5);
    assert_eq!(t.qty(t.main.id, mug.id).await, 5);
}

#[tokio::test]
async fn cycle_count_reports_variances() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    let cap = t.variant("CAP-1").await;
    let pen = t.variant("PEN-1").await;
    t.stock(t.main.id, mug.id, 10).await;
    t.stock(t.main.id, cap.id, 4).await;

    let variances = t
        .services
        .adjustments
        .cycle_count(
            t.main.id,
            vec![
                CountLine {
                    variant_id: mug.id,
                    counted: 8,
                },
                CountLine {
                    variant_id: cap.id,
                    counted: 4,
                },
                CountLine {
                    variant_id: pen.id,
                    counted: 2,
                },
            ],
            MovementReason::Adjustment,
            ACTOR,
        )
        .await
        .expect("count should succeed");

    assert_eq!(variances.len(), 3);
    assert_eq!((variances[0].previous, variances[0].delta), (10, -2));
    assert!(variances[0].movement_id.is_some());
    assert_eq!(variances[1].delta, 0);
    assert!(variances[1].movement_id.is_none());
    assert_eq!((variances[2].previous, variances[2].delta), (0, 2));

    assert_eq!(t.qty(t.main.id, mug.id).await, 8);
    assert_eq!(t.qty(t.main.id, cap.id).await, 4);
    assert_eq!(t.qty(t.main.id, pen.id).await, 2);
    t.assert_consistent().await;
}

#[tokio::test]
async fn cycle_count_with_unknown_variant_changes_nothing() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    t.stock(t.main.id, mug.id, 10).await;

    let err = t
        .services
        .adjustments
        .cycle_count(
            t.main.id,
            vec![
                CountLine {
                    variant_id: mug.id,
                    counted: 1,
                },
                CountLine {
                    variant_id: 9999,
                    counted: 1,
                },
            ],
            MovementReason::Adjustment,
            ACTOR,
        )
        .await
        .unwrap_err();

    assert_matches!(err, LedgerError::InvalidVariant { variant_id: 9999, .. });
    assert_eq!(t.qty(t.main.id, mug.id).await, 10);
}
