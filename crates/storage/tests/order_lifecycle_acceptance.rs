use chrono::Utc;
use shared::domain::{NewProduct, OrderState};
use storage::{AddItemOutcome, FinishOutcome, Storage};

#[tokio::test]
async fn finished_order_and_stock_survive_reopening_the_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database_url = format!("sqlite://{}", dir.path().join("multilens.db").display());

    let (order_id, product_id) = {
        let storage = Storage::new(&database_url).await.expect("db");
        let actor = storage.create_employee("acceptance").await.expect("actor");
        let product_id = storage
            .create_product(&NewProduct {
                name: "Lente tórica".into(),
                price: 150.0,
                amount: 5,
                available: true,
            })
            .await
            .expect("product");
        let order = storage
            .create_order(actor, Utc::now())
            .await
            .expect("order");

        let outcome = storage
            .add_order_item(order.order_id, product_id, 3)
            .await
            .expect("add");
        assert!(matches!(outcome, AddItemOutcome::Added { amount: 3, .. }));
        let outcome = storage
            .finish_order(order.order_id, None, Utc::now())
            .await
            .expect("finish");
        assert_eq!(outcome, FinishOutcome::Finished);

        storage.pool().close().await;
        (order.order_id, product_id)
    };

    let storage = Storage::new(&database_url).await.expect("reopen");
    let order = storage
        .order(order_id)
        .await
        .expect("order")
        .expect("order persisted");
    assert_eq!(order.state(), OrderState::Finished);
    assert!(order.finished_at.is_some());

    let lines = storage.order_lines(order_id).await.expect("lines");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].amount, 3);
    assert_eq!(lines[0].unit_price, 150.0);

    let product = storage
        .product(product_id)
        .await
        .expect("product")
        .expect("product persisted");
    assert_eq!(product.amount, 2);

    let outcome = storage
        .add_order_item(order_id, product_id, 1)
        .await
        .expect("add after finish");
    assert_eq!(outcome, AddItemOutcome::OrderFinished);
}
