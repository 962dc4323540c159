mod common;

use common::{TestLedger, ACTOR};
use inventory_ledger::{
    entities::stock_movement::MovementReason, errors::LedgerError,
    services::ledger::StockMoveCommand,
};
use proptest::prelude::*;

fn movement_strategy() -> impl Strategy<Value = Vec<(usize, usize, i64)>> {
    prop::collection::vec((0usize..2, 0usize..2, -8i64..=8), 1..30)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_movements_keep_ledger_identity(moves in movement_strategy()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let t = TestLedger::new().await;
            let second = t.location("SECOND").await;
            let locations = [t.main.id, second.id];
            let variants = [t.variant("A").await.id, t.variant("B").await.id];
            let mut expected = [[0i64; 2]; 2];

            for (l, v, delta) in moves {
                if delta == 0 {
                    continue;
                }
                let result = t
                    .services
                    .ledger
                    .execute_movement(StockMoveCommand::new(
                        locations[l],
                        variants[v],
                        delta,
                        MovementReason::Adjustment,
                        ACTOR,
                    ))
                    .await;

                match result {
                    Ok(_) => expected[l][v] += delta,
                    Err(LedgerError::InsufficientStock { available, .. }) => {
                        assert!(expected[l][v] + delta < 0);
                        assert_eq!(available, expected[l][v]);
                    }
                    Err(other) => panic!("unexpected error: {}", other),
                }
            }

            for (l, location_id) in locations.iter().enumerate() {
                for (v, variant_id) in variants.iter().enumerate() {
                    let quantity = t.qty(*location_id, *variant_id).await;
                    assert!(quantity >= 0);
                    assert_eq!(quantity, expected[l][v]);
                }
            }
            t.assert_consistent().await;
        });
    }
}
