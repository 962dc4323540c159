mod common;

use assert_matches::assert_matches;
use common::{TestLedger, ACTOR};
use inventory_ledger::{
    entities::{
        sales_order::{Entity as SalesOrder, SalesOrderStatus},
        stock_movement::{MovementReason, ReferenceKind},
    },
    errors::LedgerError,
    events::LedgerEvent,
};
use rstest::rstest;
use sea_orm::EntityTrait;

#[tokio::test]
async fn restock_credits_lines_and_cancels_order() {
    let mut t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    let cap = t.variant("CAP-1").await;
    t.stock(t.main.id, mug.id, 1).await;
    let order = t
        .sales_order(SalesOrderStatus::Confirmed, &[(mug.id, 2), (cap.id, 3)])
        .await;
    t.drain_events();

    let outcome = t
        .services
        .order_restock
        .restock_cancelled_order(order.id, ACTOR)
        .await
        .expect("restock should succeed");

    assert_eq!(outcome.order.status, SalesOrderStatus::Cancelled);
    assert_eq!(outcome.movements.len(), 2);
    assert!(outcome
        .movements
        .iter()
        .all(|m| m.reason == MovementReason::Return
            && m.reference_type == Some(ReferenceKind::SalesOrder)
            && m.reference_id == Some(order.id)));
    assert_eq!(t.qty(t.main.id, mug.id).await, 3);
    assert_eq!(t.qty(t.main.id, cap.id).await, 3);

    assert!(t.drain_events().iter().any(|e| matches!(
        e,
        LedgerEvent::OrderRestocked {
            units_restocked: 5,
            ..
        }
    )));
    t.assert_consistent().await;
}

#[rstest]
#[case::shipped(SalesOrderStatus::Shipped)]
#[case::completed(SalesOrderStatus::Completed)]
#[case::cancelled(SalesOrderStatus::Cancelled)]
#[case::returned(SalesOrderStatus::Returned)]
#[tokio::test]
async fn orders_past_fulfilment_cannot_be_restocked(#[case] status: SalesOrderStatus) {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    let order = t.sales_order(status, &[(mug.id, 2)]).await;

    assert_matches!(
        t.services
            .order_restock
            .restock_cancelled_order(order.id, ACTOR)
            .await,
        Err(LedgerError::OrderNotCancellable { .. })
    );
    assert_eq!(t.qty(t.main.id, mug.id).await, 0);
}

#[tokio::test]
async fn failed_line_keeps_order_uncancelled() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    let retired = t.variant("OLD-1").await;
    t.services.catalog.set_active(retired.id, false).await.unwrap();
    let order = t
        .sales_order(SalesOrderStatus::Pending, &[(mug.id, 2), (retired.id, 1)])
        .await;

    assert_matches!(
        t.services
            .order_restock
            .restock_cancelled_order(order.id, ACTOR)
            .await,
        Err(LedgerError::InvalidVariant { .. })
    );

    let reloaded = SalesOrder::find_by_id(order.id)
        .one(t.db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, SalesOrderStatus::Pending);
    assert_eq!(t.qty(t.main.id, mug.id).await, 0);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let t = TestLedger::new().await;
    assert_matches!(
        t.services
            .order_restock
            .restock_cancelled_order(9999, ACTOR)
            .await,
        Err(LedgerError::NotFound(_))
    );
}
