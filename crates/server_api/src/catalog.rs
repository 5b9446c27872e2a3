use shared::{
    domain::{NewProduct, Product, ReferenceItem, ReferenceTable},
    error::ApiError,
    validation::FieldErrors,
};
use tracing::info;

use crate::{internal, ApiContext};

pub async fn list_available_products(ctx: &ApiContext) -> Result<Vec<Product>, ApiError> {
    ctx.storage
        .list_available_products()
        .await
        .map_err(internal)
}

pub async fn list_selectable_products(ctx: &ApiContext) -> Result<Vec<Product>, ApiError> {
    ctx.storage
        .list_selectable_products()
        .await
        .map_err(internal)
}

pub async fn list_reference(
    ctx: &ApiContext,
    table: ReferenceTable,
) -> Result<Vec<ReferenceItem>, ApiError> {
    ctx.storage.list_reference(table).await.map_err(internal)
}

pub async fn create_product(ctx: &ApiContext, product: &NewProduct) -> Result<Product, ApiError> {
    let mut errors = FieldErrors::default();
    let name = product.name.trim();
    if name.is_empty() {
        errors.add("name", "Informe o nome do produto");
    }
    if !product.price.is_finite() || product.price < 0.0 {
        errors.add("price", "O preço não pode ser negativo");
    }
    if product.amount < 0 {
        errors.add("amount", "A quantidade em estoque não pode ser negativa");
    }
    if !errors.is_empty() {
        return Err(ApiError::invalid_fields(errors));
    }

    let product = NewProduct {
        name: name.to_string(),
        ..product.clone()
    };
    let product_id = ctx
        .storage
        .create_product(&product)
        .await
        .map_err(internal)?;
    info!(product_id = product_id.0, amount = product.amount, "product registered");
    ctx.storage
        .product(product_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("Produto não localizado"))
}
