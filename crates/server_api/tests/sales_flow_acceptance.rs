use server_api::{catalog, orders, registrants, ApiContext, FolderSink};
use shared::{
    domain::{NewProduct, OrderState},
    error::ErrorCode,
    protocol::{CheckoutForm, DoctorForm, OrderForm, SaveOutcome},
};
use storage::Storage;

fn doctor_form(cpf: &str) -> DoctorForm {
    DoctorForm {
        name: "Marcos Lima".into(),
        cpf: cpf.into(),
        rg: "0987654321".into(),
        crm: "778899".into(),
        cel: "31988887777".into(),
        phone: "3132221111".into(),
        email: "marcos@visao.med.br".into(),
        speciality_id: "1".into(),
        zip: "30130010".into(),
        city: "Belo Horizonte".into(),
        address: "Av. Afonso Pena, 500".into(),
        district: "Centro".into(),
    }
}

#[tokio::test]
async fn register_sell_and_export_acceptance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database_url = format!("sqlite://{}", dir.path().join("multilens.db").display());
    let storage = Storage::new(&database_url).await.expect("db");
    let ctx = ApiContext::new(storage, FolderSink::new(dir.path().join("orders")));

    let rejected = registrants::create_doctor(&ctx, &doctor_form("1234567890"))
        .await
        .expect("create");
    assert_eq!(rejected.message(), "O CPF deve conter exatamente 11 números");
    let doctor = match registrants::create_doctor(&ctx, &doctor_form("12345678901"))
        .await
        .expect("create")
    {
        SaveOutcome::Saved { record, .. } => record,
        other => panic!("doctor rejected: {other:?}"),
    };
    assert_eq!(
        registrants::list_doctors(&ctx).await.expect("list"),
        vec![doctor.clone()]
    );

    let product = catalog::create_product(
        &ctx,
        &NewProduct {
            name: "Lente fotossensível".into(),
            price: 210.0,
            amount: 5,
            available: true,
        },
    )
    .await
    .expect("product");

    let actor = server_api::login(&ctx, "loja-centro").await.expect("login");
    let order = orders::current_order(&ctx, actor).await.expect("order");
    let item = orders::add_item(&ctx, order.order_id, product.product_id, 3)
        .await
        .expect("add");
    orders::save_order_terms(
        &ctx,
        order.order_id,
        &OrderForm {
            freight: "25,00".into(),
            discount: "10".into(),
            type_of_sale: "1".into(),
            type_pgto: "2".into(),
        },
    )
    .await
    .expect("terms");
    let details = orders::order_details(&ctx, order.order_id)
        .await
        .expect("details");
    assert_eq!(details.total, 3.0 * 210.0 + 25.0 - 10.0);

    orders::remove_item(&ctx, order.order_id, item)
        .await
        .expect("remove");
    assert_eq!(orders::item_count(&ctx, order.order_id).await.expect("count"), 0);
    let err = orders::finish_order(&ctx, order.order_id, None)
        .await
        .expect_err("empty order");
    assert_eq!(err.code, ErrorCode::Validation);

    orders::add_item(&ctx, order.order_id, product.product_id, 2)
        .await
        .expect("add again");
    let register_id = doctor.register_id.expect("register");
    let exported = orders::checkout(
        &ctx,
        order.order_id,
        &CheckoutForm {
            register_id: register_id.0.to_string(),
        },
    )
    .await
    .expect("checkout");
    assert_eq!(exported.details.state, OrderState::Finished);
    assert_eq!(
        std::fs::read(&exported.path).expect("artifact"),
        exported.document
    );

    let remaining = catalog::list_available_products(&ctx)
        .await
        .expect("products");
    assert_eq!(remaining[0].amount, 3);

    let next = orders::current_order(&ctx, actor).await.expect("next order");
    assert_ne!(next.order_id, order.order_id);
}
