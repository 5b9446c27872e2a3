//! The sales cart: one open order per employee, its lines, and the
//! `open -> finished` transition that ends with the order exported to disk.

use chrono::{DateTime, Utc};
use shared::{
    domain::{
        ActorId, OrderId, OrderItemId, OrderState, ProductId, ReferenceItem, ReferenceTable,
        RegisterId, RegistrantRef,
    },
    error::{ApiError, ErrorCode},
    protocol::{
        AddItemRequest, CartView, CheckoutForm, CheckoutView, OrderDetails, OrderForm, OrderLine,
        OrderSummary,
    },
    validation::{order_terms_from_form, parse_integer, register_from_checkout, FieldErrors},
};
use storage::{
    AddItemOutcome, FinishClaim, FinishOutcome, PendingFinish, RemoveItemOutcome, StoredOrder,
    StoredOrderLine,
};
use tracing::{info, warn};

use crate::{
    ensure_employee,
    export::{encode_details, export_file_name, ExportedOrder},
    internal, ApiContext,
};

pub const EMPTY_CART: &str = "Você precisa adicionar pelo menos um produto ao carrinho";

/// The employee's open order, opened on first use.
pub async fn current_order(ctx: &ApiContext, actor_id: ActorId) -> Result<StoredOrder, ApiError> {
    ensure_employee(ctx, actor_id).await?;
    if let Some(order) = ctx
        .storage
        .open_order_for_actor(actor_id)
        .await
        .map_err(internal)?
    {
        return Ok(order);
    }

    let order = ctx
        .storage
        .create_order(actor_id, Utc::now())
        .await
        .map_err(internal)?;
    info!(
        order_id = order.order_id.0,
        actor_id = actor_id.0,
        "opened new order"
    );
    Ok(order)
}

pub async fn load_order(ctx: &ApiContext, order_id: OrderId) -> Result<StoredOrder, ApiError> {
    ctx.storage
        .order(order_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::not_found(format!(
                "Não foi possível localizar a venda de número {}",
                order_id.0
            ))
        })
}

/// Reads the product and amount out of a cart PUT body.
pub fn parse_add_item(request: Option<&AddItemRequest>) -> Result<(ProductId, i64), ApiError> {
    let Some(request) = request else {
        return Err(ApiError::validation("Informe o produto e a quantidade"));
    };
    let Some(item_id) = request.item_id.as_ref().filter(|value| !value.is_null()) else {
        return Err(ApiError::validation(
            "Selecione o Produto que deve ser adicionado",
        ));
    };
    let Some(amount) = request.amount.as_ref().filter(|value| !value.is_null()) else {
        return Err(ApiError::validation("Informe a quantidade"));
    };
    let product_id = parse_integer(item_id)
        .map(ProductId)
        .ok_or_else(|| ApiError::validation("Produto inválido"))?;
    let amount = parse_integer(amount)
        .ok_or_else(|| ApiError::validation("A quantidade precisa ser um número"))?;
    Ok((product_id, amount))
}

pub async fn add_item(
    ctx: &ApiContext,
    order_id: OrderId,
    product_id: ProductId,
    amount: i64,
) -> Result<OrderItemId, ApiError> {
    if amount <= 0 {
        return Err(ApiError::validation(
            "A quantidade precisa ser maior que zero",
        ));
    }

    let outcome = ctx
        .storage
        .add_order_item(order_id, product_id, amount)
        .await
        .map_err(internal)?;
    match outcome {
        AddItemOutcome::Added {
            item_id,
            amount: line_amount,
        } => {
            info!(
                order_id = order_id.0,
                product_id = product_id.0,
                amount,
                line_amount,
                "item added to order"
            );
            Ok(item_id)
        }
        AddItemOutcome::OrderNotFound => {
            Err(ApiError::not_found(format!("Venda {} não localizada", order_id.0)))
        }
        AddItemOutcome::OrderFinished => Err(finished_error(order_id)),
        AddItemOutcome::ProductUnavailable => {
            Err(ApiError::validation("Produto indisponível para venda"))
        }
        AddItemOutcome::InsufficientStock { available } => {
            warn!(
                order_id = order_id.0,
                product_id = product_id.0,
                amount,
                available,
                "rejected item above stock"
            );
            Err(ApiError::validation(format!(
                "Estoque insuficiente: apenas {available} unidade(s) disponível(is)"
            )))
        }
    }
}

pub async fn remove_item(
    ctx: &ApiContext,
    order_id: OrderId,
    item_id: OrderItemId,
) -> Result<(), ApiError> {
    let outcome = ctx
        .storage
        .remove_order_item(order_id, item_id)
        .await
        .map_err(internal)?;
    match outcome {
        RemoveItemOutcome::Removed { restocked } => {
            info!(
                order_id = order_id.0,
                item_id = item_id.0,
                restocked,
                "item removed from order"
            );
            Ok(())
        }
        RemoveItemOutcome::OrderNotFound => {
            Err(ApiError::not_found(format!("Venda {} não localizada", order_id.0)))
        }
        RemoveItemOutcome::OrderFinished => Err(finished_error(order_id)),
        RemoveItemOutcome::ItemNotFound => {
            Err(ApiError::not_found("Item não localizado no carrinho"))
        }
    }
}

pub async fn item_count(ctx: &ApiContext, order_id: OrderId) -> Result<usize, ApiError> {
    ctx.storage
        .order_item_count(order_id)
        .await
        .map_err(internal)
}

pub async fn order_details(ctx: &ApiContext, order_id: OrderId) -> Result<OrderDetails, ApiError> {
    let order = load_order(ctx, order_id).await?;
    details_for(ctx, &order).await
}

async fn details_for(ctx: &ApiContext, order: &StoredOrder) -> Result<OrderDetails, ApiError> {
    let lines = ctx
        .storage
        .order_lines(order.order_id)
        .await
        .map_err(internal)?;
    let registrant = match order.register_id {
        Some(register_id) => ctx
            .storage
            .registrant_ref(register_id)
            .await
            .map_err(internal)?,
        None => None,
    };
    let sale_type = reference_for(
        ctx,
        ReferenceTable::SaleType,
        order.sale_type_id.map(|id| id.0),
    )
    .await?;
    let payment_type = reference_for(
        ctx,
        ReferenceTable::PaymentType,
        order.payment_type_id.map(|id| id.0),
    )
    .await?;
    Ok(compose_details(
        order,
        lines,
        registrant,
        sale_type,
        payment_type,
    ))
}

async fn reference_for(
    ctx: &ApiContext,
    table: ReferenceTable,
    id: Option<i64>,
) -> Result<Option<ReferenceItem>, ApiError> {
    match id {
        Some(id) => ctx.storage.reference(table, id).await.map_err(internal),
        None => Ok(None),
    }
}

/// Builds the read view; `total = subtotal + freight - discount`.
pub fn compose_details(
    order: &StoredOrder,
    lines: Vec<StoredOrderLine>,
    registrant: Option<RegistrantRef>,
    sale_type: Option<ReferenceItem>,
    payment_type: Option<ReferenceItem>,
) -> OrderDetails {
    let items: Vec<OrderLine> = lines
        .into_iter()
        .map(|line| OrderLine {
            item_id: line.item_id,
            product_id: line.product_id,
            product_name: line.product_name,
            unit_price: line.unit_price,
            amount: line.amount,
            subtotal: round_cents(line.amount as f64 * line.unit_price),
        })
        .collect();
    let subtotal = round_cents(items.iter().map(|item| item.subtotal).sum());
    OrderDetails {
        order_id: order.order_id,
        actor_id: order.actor_id,
        state: order.state(),
        registrant,
        sale_type,
        payment_type,
        item_count: items.len(),
        items,
        subtotal,
        freight: order.freight,
        discount: order.discount,
        total: round_cents(subtotal + order.freight - order.discount),
        created_at: order.created_at,
        finished_at: order.finished_at,
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Stores the cart form (freight, discount, sale and payment type).
pub async fn save_order_terms(
    ctx: &ApiContext,
    order_id: OrderId,
    form: &OrderForm,
) -> Result<(), ApiError> {
    let terms = order_terms_from_form(form).map_err(ApiError::invalid_fields)?;

    let mut errors = FieldErrors::default();
    if ctx
        .storage
        .reference(ReferenceTable::SaleType, terms.sale_type_id.0)
        .await
        .map_err(internal)?
        .is_none()
    {
        errors.add("type_of_sale", "Tipo de venda inválido");
    }
    if ctx
        .storage
        .reference(ReferenceTable::PaymentType, terms.payment_type_id.0)
        .await
        .map_err(internal)?
        .is_none()
    {
        errors.add("type_pgto", "Prazo de pagamento inválido");
    }
    if !errors.is_empty() {
        return Err(ApiError::invalid_fields(errors));
    }

    ensure_finishable(ctx, order_id).await?;
    let updated = ctx
        .storage
        .update_order_terms(order_id, &terms)
        .await
        .map_err(internal)?;
    if !updated {
        return Err(finished_error(order_id));
    }
    info!(
        order_id = order_id.0,
        freight = terms.freight,
        discount = terms.discount,
        "order terms saved"
    );
    Ok(())
}

/// Order exists, is open and has at least one line.
async fn ensure_finishable(ctx: &ApiContext, order_id: OrderId) -> Result<StoredOrder, ApiError> {
    let order = load_order(ctx, order_id).await?;
    if order.finished {
        return Err(finished_error(order_id));
    }
    if item_count(ctx, order_id).await? == 0 {
        return Err(ApiError::validation(EMPTY_CART));
    }
    Ok(order)
}

/// Takes the write lock on the order and marks it finished without committing.
async fn claim_finish(
    ctx: &ApiContext,
    order_id: OrderId,
    register_id: Option<RegisterId>,
    finished_at: DateTime<Utc>,
) -> Result<PendingFinish, ApiError> {
    let claim = ctx
        .storage
        .claim_finish(order_id, register_id, finished_at)
        .await
        .map_err(internal)?;
    match claim {
        FinishClaim::Claimed(pending) => Ok(pending),
        FinishClaim::Refused(FinishOutcome::AlreadyFinished) => Err(finished_error(order_id)),
        FinishClaim::Refused(FinishOutcome::Empty) => Err(ApiError::validation(EMPTY_CART)),
        FinishClaim::Refused(FinishOutcome::OrderNotFound | FinishOutcome::Finished) => {
            Err(ApiError::not_found(format!(
                "Não foi possível localizar a venda de número {}",
                order_id.0
            )))
        }
    }
}

async fn commit_finish(pending: PendingFinish) -> Result<(), ApiError> {
    let order_id = pending.order.order_id;
    pending.commit().await.map_err(internal)?;
    info!(order_id = order_id.0, "order finished");
    Ok(())
}

/// `OPEN -> FINISHED`. Fails on an empty or already finished order.
pub async fn finish_order(
    ctx: &ApiContext,
    order_id: OrderId,
    register_id: Option<RegisterId>,
) -> Result<OrderDetails, ApiError> {
    ensure_finishable(ctx, order_id).await?;
    let pending = claim_finish(ctx, order_id, register_id, Utc::now()).await?;
    commit_finish(pending).await?;
    order_details(ctx, order_id).await
}

/// Writes the detail view of a finished order to the export sink, replacing
/// any earlier artifact of the same order.
pub async fn export_order(ctx: &ApiContext, order_id: OrderId) -> Result<ExportedOrder, ApiError> {
    let details = order_details(ctx, order_id).await?;
    if details.state != OrderState::Finished {
        return Err(ApiError::invalid_state(
            "Somente vendas finalizadas podem ser exportadas",
        ));
    }
    write_export(ctx, details).await
}

async fn write_export(ctx: &ApiContext, details: OrderDetails) -> Result<ExportedOrder, ApiError> {
    let order_id = details.order_id;
    let document = encode_details(&details).map_err(|err| internal(err.into()))?;
    let path = ctx
        .exports
        .write(order_id, &document)
        .await
        .map_err(|err| {
            warn!(order_id = order_id.0, error = %err, "order export failed");
            ApiError::new(ErrorCode::Io, err.to_string())
        })?;
    info!(order_id = order_id.0, path = %path.display(), "order exported");
    Ok(ExportedOrder {
        path,
        file_name: export_file_name(order_id),
        document,
        details,
    })
}

/// Checkout: records the buyer, finishes the order and exports it. The order is
/// claimed first and the file written while the claim is held, so a concurrent
/// checkout waits and then fails, and a failed write leaves the order open.
pub async fn checkout(
    ctx: &ApiContext,
    order_id: OrderId,
    form: &CheckoutForm,
) -> Result<ExportedOrder, ApiError> {
    let register_id = register_from_checkout(form).map_err(ApiError::invalid_fields)?;
    let Some(registrant) = ctx
        .storage
        .registrant_ref(register_id)
        .await
        .map_err(internal)?
    else {
        let mut errors = FieldErrors::default();
        errors.add("register_id", "Cadastro não localizado");
        return Err(ApiError::invalid_fields(errors));
    };

    ensure_finishable(ctx, order_id).await?;
    let mut pending = claim_finish(ctx, order_id, Some(register_id), Utc::now()).await?;
    let sale_type = reference_for(
        ctx,
        ReferenceTable::SaleType,
        pending.order.sale_type_id.map(|id| id.0),
    )
    .await?;
    let payment_type = reference_for(
        ctx,
        ReferenceTable::PaymentType,
        pending.order.payment_type_id.map(|id| id.0),
    )
    .await?;
    let details = compose_details(
        &pending.order,
        std::mem::take(&mut pending.lines),
        Some(registrant),
        sale_type,
        payment_type,
    );

    // On failure `pending` is dropped here, rolling the order back to open.
    let exported = write_export(ctx, details).await?;
    commit_finish(pending).await?;
    Ok(exported)
}

pub async fn cart_view(ctx: &ApiContext, actor_id: ActorId) -> Result<CartView, ApiError> {
    let order = current_order(ctx, actor_id).await?;
    Ok(CartView {
        order: details_for(ctx, &order).await?,
        products: crate::catalog::list_selectable_products(ctx).await?,
        sale_types: crate::catalog::list_reference(ctx, ReferenceTable::SaleType).await?,
        payment_types: crate::catalog::list_reference(ctx, ReferenceTable::PaymentType).await?,
    })
}

pub async fn checkout_view(ctx: &ApiContext, order_id: OrderId) -> Result<CheckoutView, ApiError> {
    let order = load_order(ctx, order_id).await?;
    if order.finished {
        return Err(finished_error(order_id));
    }
    Ok(CheckoutView {
        order: details_for(ctx, &order).await?,
        registrants: crate::registrants::list_registrants(ctx).await?,
    })
}

pub async fn list_orders(ctx: &ApiContext) -> Result<Vec<OrderSummary>, ApiError> {
    let orders = ctx.storage.list_orders().await.map_err(internal)?;
    Ok(orders
        .into_iter()
        .map(|order| OrderSummary {
            order_id: order.order_id,
            actor_id: order.actor_id,
            state: OrderState::from_finished_flag(order.finished),
            item_count: usize::try_from(order.item_count).unwrap_or_default(),
            created_at: order.created_at,
            finished_at: order.finished_at,
        })
        .collect())
}

fn finished_error(order_id: OrderId) -> ApiError {
    ApiError::invalid_state(format!(
        "A venda com o registro {} já foi finalizada.",
        order_id.0
    ))
}

#[cfg(test)]
#[path = "tests/orders_tests.rs"]
mod tests;
