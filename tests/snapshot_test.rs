mod common;

use common::TestLedger;

#[tokio::test]
async fn snapshot_lists_every_stock_row_with_names() {
    let t = TestLedger::new().await;
    let mug = t.variant("MUG-1").await;
    let cap = t.variant("CAP-1").await;
    let store = t.location("STORE-1").await;
    t.stock(t.main.id, mug.id, 5).await;
    t.stock(store.id, cap.id, 2).await;
    t.services
        .ledger
        .set_safety_stock(store.id, cap.id, 1)
        .await
        .unwrap();

    let rows = t.services.reports.export_snapshot().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].location_name, "Main Warehouse");
    assert_eq!(rows[0].variant_name, "Variant MUG-1");
    assert_eq!(rows[0].quantity, 5);
    assert_eq!(rows[1].location_id, store.id);
    assert_eq!(rows[1].safety_stock, 1);

    let csv = t.services.reports.export_snapshot_csv().await.unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines[0],
        "Location ID,Location Name,Variant ID,Variant Name,Quantity,Safety Stock"
    );
    assert_eq!(
        lines[1],
        format!("{},Main Warehouse,{},Variant MUG-1,5,0", t.main.id, mug.id)
    );
    assert_eq!(lines.len(), 3);
}
