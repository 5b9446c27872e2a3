use super::*;

async fn storage_with_product(amount: i64) -> (Storage, ActorId, ProductId) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let actor = storage.create_employee("balcao").await.expect("employee");
    let product = storage
        .create_product(&NewProduct {
            name: "Lente multifocal".into(),
            price: 250.0,
            amount,
            available: true,
        })
        .await
        .expect("product");
    (storage, actor, product)
}

fn doctor_profile(cpf: &str) -> DoctorProfile {
    DoctorProfile {
        name: "Carla Menezes".into(),
        cpf: cpf.into(),
        rg: "1234567890".into(),
        crm: "123456".into(),
        cel: "11987654321".into(),
        phone: "1133334444".into(),
        email: "carla@clinica.com".into(),
        speciality_id: SpecialityId(1),
    }
}

fn address(city: &str) -> Address {
    Address {
        zip: "01310100".into(),
        city: city.into(),
        address: "Av. Paulista, 1000".into(),
        district: "Bela Vista".into(),
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn reference_data_is_seeded() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    for table in [
        ReferenceTable::Speciality,
        ReferenceTable::SaleType,
        ReferenceTable::PaymentType,
    ] {
        let items = storage.list_reference(table).await.expect("list");
        assert!(!items.is_empty(), "{table:?} should be seeded");
        let first = storage
            .reference(table, items[0].id)
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(first, items[0]);
    }
}

#[tokio::test]
async fn employees_are_upserted_by_username() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let first = storage.create_employee("joana").await.expect("employee");
    let again = storage.create_employee("joana").await.expect("employee");
    assert_eq!(first, again);
    assert_eq!(
        storage.username_for_employee(first).await.expect("name"),
        Some("joana".to_string())
    );
    assert_eq!(storage.list_employees().await.expect("list").len(), 1);
}

#[tokio::test]
async fn only_one_open_order_per_actor() {
    let (storage, actor, _) = storage_with_product(5).await;
    assert!(storage
        .open_order_for_actor(actor)
        .await
        .expect("query")
        .is_none());

    let order = storage.create_order(actor, Utc::now()).await.expect("order");
    assert_eq!(order.state(), OrderState::Open);
    assert!(storage.create_order(actor, Utc::now()).await.is_err());

    let open = storage
        .open_order_for_actor(actor)
        .await
        .expect("query")
        .expect("open order");
    assert_eq!(open.order_id, order.order_id);
}

#[tokio::test]
async fn adding_items_moves_stock_and_merges_lines() {
    let (storage, actor, product) = storage_with_product(5).await;
    let order = storage.create_order(actor, Utc::now()).await.expect("order");

    let first = storage
        .add_order_item(order.order_id, product, 2)
        .await
        .expect("add");
    let second = storage
        .add_order_item(order.order_id, product, 1)
        .await
        .expect("add");
    let (AddItemOutcome::Added { item_id: a, .. }, AddItemOutcome::Added { item_id: b, amount }) =
        (first, second)
    else {
        panic!("unexpected outcomes {first:?} {second:?}");
    };
    assert_eq!(a, b);
    assert_eq!(amount, 3);

    let lines = storage.order_lines(order.order_id).await.expect("lines");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].unit_price, 250.0);
    assert_eq!(
        storage.product(product).await.expect("product").expect("some").amount,
        2
    );
}

#[tokio::test]
async fn insufficient_stock_changes_nothing() {
    let (storage, actor, product) = storage_with_product(2).await;
    let order = storage.create_order(actor, Utc::now()).await.expect("order");

    let outcome = storage
        .add_order_item(order.order_id, product, 3)
        .await
        .expect("add");
    assert_eq!(outcome, AddItemOutcome::InsufficientStock { available: 2 });
    assert_eq!(
        storage.order_item_count(order.order_id).await.expect("count"),
        0
    );
    assert_eq!(
        storage.product(product).await.expect("product").expect("some").amount,
        2
    );
}

#[tokio::test]
async fn unavailable_products_cannot_be_added() {
    let (storage, actor, product) = storage_with_product(4).await;
    storage
        .update_product_stock(product, 4, false)
        .await
        .expect("update");
    let order = storage.create_order(actor, Utc::now()).await.expect("order");

    let outcome = storage
        .add_order_item(order.order_id, product, 1)
        .await
        .expect("add");
    assert_eq!(outcome, AddItemOutcome::ProductUnavailable);
    assert!(storage
        .list_available_products()
        .await
        .expect("list")
        .is_empty());
}

#[tokio::test]
async fn selectable_products_exclude_empty_stock() {
    let (storage, _, product) = storage_with_product(0).await;
    assert_eq!(storage.list_available_products().await.expect("list").len(), 1);
    assert!(storage
        .list_selectable_products()
        .await
        .expect("list")
        .is_empty());
    storage
        .update_product_stock(product, 3, true)
        .await
        .expect("restock");
    assert_eq!(
        storage.list_selectable_products().await.expect("list")[0].product_id,
        product
    );
}

#[tokio::test]
async fn removing_an_item_restores_stock() {
    let (storage, actor, product) = storage_with_product(5).await;
    let order = storage.create_order(actor, Utc::now()).await.expect("order");
    let AddItemOutcome::Added { item_id, .. } = storage
        .add_order_item(order.order_id, product, 3)
        .await
        .expect("add")
    else {
        panic!("item should be added");
    };

    let missing = storage
        .remove_order_item(order.order_id, OrderItemId(item_id.0 + 100))
        .await
        .expect("remove");
    assert_eq!(missing, RemoveItemOutcome::ItemNotFound);

    let removed = storage
        .remove_order_item(order.order_id, item_id)
        .await
        .expect("remove");
    assert_eq!(removed, RemoveItemOutcome::Removed { restocked: 3 });
    assert_eq!(
        storage.product(product).await.expect("product").expect("some").amount,
        5
    );
}

#[tokio::test]
async fn finish_is_terminal_and_requires_items() {
    let (storage, actor, product) = storage_with_product(5).await;
    let order = storage.create_order(actor, Utc::now()).await.expect("order");

    assert_eq!(
        storage
            .finish_order(order.order_id, None, Utc::now())
            .await
            .expect("finish"),
        FinishOutcome::Empty
    );

    storage
        .add_order_item(order.order_id, product, 1)
        .await
        .expect("add");
    assert_eq!(
        storage
            .finish_order(order.order_id, None, Utc::now())
            .await
            .expect("finish"),
        FinishOutcome::Finished
    );
    assert_eq!(
        storage
            .finish_order(order.order_id, None, Utc::now())
            .await
            .expect("finish"),
        FinishOutcome::AlreadyFinished
    );
    assert_eq!(
        storage
            .add_order_item(order.order_id, product, 1)
            .await
            .expect("add"),
        AddItemOutcome::OrderFinished
    );

    let finished = storage
        .order(order.order_id)
        .await
        .expect("order")
        .expect("some");
    assert!(finished.finished);
    assert!(finished.finished_at.is_some());
    assert!(storage
        .open_order_for_actor(actor)
        .await
        .expect("query")
        .is_none());
}

#[tokio::test]
async fn dropped_finish_claim_leaves_the_order_open() {
    let (storage, actor, product) = storage_with_product(5).await;
    let order = storage.create_order(actor, Utc::now()).await.expect("order");
    storage
        .add_order_item(order.order_id, product, 2)
        .await
        .expect("add");

    let FinishClaim::Claimed(pending) = storage
        .claim_finish(order.order_id, None, Utc::now())
        .await
        .expect("claim")
    else {
        panic!("open order with lines should be claimable");
    };
    assert!(pending.order.finished);
    assert_eq!(pending.lines.len(), 1);
    assert_eq!(pending.lines[0].amount, 2);
    drop(pending);

    let reopened = storage
        .order(order.order_id)
        .await
        .expect("order")
        .expect("some");
    assert!(!reopened.finished);
    assert_eq!(reopened.finished_at, None);

    let FinishClaim::Claimed(pending) = storage
        .claim_finish(order.order_id, None, Utc::now())
        .await
        .expect("claim")
    else {
        panic!("rolled back order should be claimable again");
    };
    pending.commit().await.expect("commit");
    assert!(matches!(
        storage
            .claim_finish(order.order_id, None, Utc::now())
            .await
            .expect("claim"),
        FinishClaim::Refused(FinishOutcome::AlreadyFinished)
    ));
}

#[tokio::test]
async fn adding_to_a_missing_order_keeps_the_stock() {
    let (storage, _, product) = storage_with_product(5).await;
    assert_eq!(
        storage
            .add_order_item(OrderId(999), product, 2)
            .await
            .expect("add"),
        AddItemOutcome::OrderNotFound
    );
    assert_eq!(
        storage
            .product(product)
            .await
            .expect("product")
            .expect("some")
            .amount,
        5
    );
}

#[tokio::test]
async fn doctor_round_trip_with_address_upsert() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let doctor_id = storage
        .create_doctor(&doctor_profile("12345678901"), &address("São Paulo"))
        .await
        .expect("create");

    let doctor = storage
        .doctor(doctor_id)
        .await
        .expect("load")
        .expect("some");
    assert_eq!(doctor.profile.cpf, "12345678901");
    assert_eq!(doctor.address.as_ref().map(|a| a.city.as_str()), Some("São Paulo"));
    let register_id = doctor.register_id.expect("register");

    let updated = storage
        .update_doctor(doctor_id, &doctor_profile("12345678901"), &address("Campinas"))
        .await
        .expect("update");
    assert!(updated);
    let doctor = storage
        .doctor(doctor_id)
        .await
        .expect("load")
        .expect("some");
    assert_eq!(doctor.register_id, Some(register_id));
    assert_eq!(doctor.address.map(|a| a.city), Some("Campinas".to_string()));

    assert!(!storage
        .update_doctor(DoctorId(999), &doctor_profile("1"), &address("x"))
        .await
        .expect("update missing"));
}

#[tokio::test]
async fn duplicate_cpf_insert_is_a_unique_violation() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .create_doctor(&doctor_profile("12345678901"), &address("Recife"))
        .await
        .expect("first doctor");

    let err = storage
        .create_doctor(&doctor_profile("12345678901"), &address("Olinda"))
        .await
        .expect_err("duplicate cpf");
    assert!(is_unique_violation(&err), "{err:#}");
    assert_eq!(storage.list_doctors().await.expect("list").len(), 1);

    let other = anyhow::anyhow!("disk on fire");
    assert!(!is_unique_violation(&other));
}

#[tokio::test]
async fn deleting_a_registrant_keeps_its_orders() {
    let (storage, actor, product) = storage_with_product(5).await;
    let doctor_id = storage
        .create_doctor(&doctor_profile("12345678901"), &address("Recife"))
        .await
        .expect("create");
    let register_id = storage
        .doctor(doctor_id)
        .await
        .expect("load")
        .and_then(|d| d.register_id)
        .expect("register");

    let order = storage.create_order(actor, Utc::now()).await.expect("order");
    storage
        .add_order_item(order.order_id, product, 1)
        .await
        .expect("add");
    storage
        .finish_order(order.order_id, Some(register_id), Utc::now())
        .await
        .expect("finish");

    assert!(storage.delete_doctor(doctor_id).await.expect("delete"));
    assert!(!storage.delete_doctor(doctor_id).await.expect("delete again"));
    assert!(storage.list_registrant_refs().await.expect("refs").is_empty());

    let order = storage
        .order(order.order_id)
        .await
        .expect("order")
        .expect("order survives");
    assert_eq!(order.register_id, None);
}

#[tokio::test]
async fn institutions_show_up_as_registrants() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let profile = InstitutionProfile {
        name: "Santa Casa".into(),
        cnpj: "12345678000199".into(),
        administration: Contact {
            name: Some("Rui".into()),
            ..Contact::default()
        },
        nursing: Contact::default(),
    };
    let institution_id = storage
        .create_institution(&profile, &address("Santos"))
        .await
        .expect("create");

    assert_eq!(
        storage
            .institution_id_for_cnpj("12345678000199")
            .await
            .expect("lookup"),
        Some(institution_id)
    );
    let refs = storage.list_registrant_refs().await.expect("refs");
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].kind, RegistrantKind::Institution);
    assert_eq!(refs[0].registrant_id, institution_id.0);
    assert_eq!(refs[0].name, "Santa Casa");

    let listed = storage.list_institutions().await.expect("list");
    assert_eq!(listed[0].profile.administration.name.as_deref(), Some("Rui"));
}
