use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use server_api::{catalog, orders, registrants, ExportedOrder, FolderSink};
use shared::{
    domain::{
        ActorId, Doctor, DoctorId, Institution, InstitutionId, NewProduct, OrderId, OrderItemId,
        Product, ReferenceTable,
    },
    error::{ApiError, ErrorCode},
    protocol::{
        ActionResponse, AddItemRequest, CartView, CheckoutForm, CheckoutView, DoctorForm,
        DoctorFormView, InstitutionForm, OrderDetails, OrderForm, OrderSummary, SaveOutcome,
    },
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url, prepare_order_folder};

type HttpError = (StatusCode, Json<ApiError>);
type ActionError = (StatusCode, Json<ActionResponse>);

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LoginResponse {
    user_id: i64,
}

#[derive(Debug, Serialize)]
struct LandingResponse {
    user_id: i64,
    username: String,
}

#[derive(Debug, Deserialize)]
struct LandingQuery {
    user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: i64,
}

/// Query of the cart PUT/DELETE calls. Kept as raw strings so a bad value is
/// answered with an `ActionResponse` instead of a plain-text rejection.
#[derive(Debug, Deserialize)]
struct CartActionQuery {
    user_id: Option<String>,
    item_id: Option<String>,
}

impl CartActionQuery {
    fn actor(&self) -> Result<ActorId, ActionError> {
        query_id(self.user_id.as_deref())
            .map(ActorId)
            .ok_or_else(bad_parameters)
    }

    fn item(&self) -> Result<OrderItemId, ActionError> {
        query_id(self.item_id.as_deref())
            .map(OrderItemId)
            .ok_or_else(bad_parameters)
    }
}

fn query_id(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|raw| raw.trim().parse().ok())
}

#[derive(Debug, Serialize, Deserialize)]
struct ExportResponse {
    order_id: i64,
    file_name: String,
    path: String,
}

const MAX_BODY_BYTES: usize = 64 * 1024;
const BAD_PARAMETERS: &str =
    "Não foi possível processar sua solicitação, verifique os parâmetros informados";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    prepare_order_folder(&settings.order_folder)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = server_api::ApiContext::new(storage, FolderSink::new(&settings.order_folder));

    let app = build_router(Arc::new(AppState { api }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, order_folder = %settings.order_folder.display(), "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/", get(landing))
        .route("/login", get(login_page).post(login))
        .route("/medicos/", get(http_list_doctors))
        .route(
            "/medicos/cadastro",
            get(doctor_form_view).post(http_create_doctor),
        )
        .route(
            "/medicos/:doctor_id",
            get(http_get_doctor)
                .post(http_update_doctor)
                .delete(http_remove_doctor),
        )
        .route("/instituicoes/", get(http_list_institutions))
        .route(
            "/instituicoes/cadastro",
            get(institution_form_view).post(http_create_institution),
        )
        .route(
            "/instituicoes/:institution_id",
            get(http_get_institution)
                .post(http_update_institution)
                .delete(http_remove_institution),
        )
        .route("/estoque", get(http_list_products).post(http_create_product))
        .route("/vendas/", get(http_list_orders))
        .route(
            "/vendas/nova",
            get(cart)
                .post(save_cart_terms)
                .put(add_cart_item)
                .delete(remove_cart_item),
        )
        .route(
            "/vendas/:order_id/checkout",
            get(checkout_page).post(http_checkout),
        )
        .route("/api/vendas/:order_id", get(http_order_details))
        .route(
            "/api/vendas/:order_id/export",
            post(http_export_order),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::Conflict | ErrorCode::InvalidState => StatusCode::CONFLICT,
        ErrorCode::Io | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn http_error(err: ApiError) -> HttpError {
    (status_for(err.code), Json(err))
}

fn action_error(err: ApiError) -> ActionError {
    (
        status_for(err.code),
        Json(ActionResponse::failed(err.message)),
    )
}

fn bad_parameters() -> ActionError {
    (
        StatusCode::BAD_REQUEST,
        Json(ActionResponse::failed(BAD_PARAMETERS)),
    )
}

fn save_response<T>(outcome: SaveOutcome<T>) -> (StatusCode, Json<SaveOutcome<T>>) {
    let status = match &outcome {
        SaveOutcome::Saved { .. } => StatusCode::OK,
        SaveOutcome::Rejected { code, .. } => status_for(*code),
    };
    (status, Json(outcome))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.api.storage.health_check().await.map_err(|error| {
        error!(%error, "health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

async fn landing(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LandingQuery>,
) -> Result<Response, HttpError> {
    let Some(user_id) = q.user_id else {
        return Ok(Redirect::to("/login").into_response());
    };
    let username = server_api::ensure_employee(&state.api, ActorId(user_id))
        .await
        .map_err(http_error)?;
    Ok(Json(LandingResponse { user_id, username }).into_response())
}

async fn login_page() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "method": "POST", "fields": ["username"] }))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, HttpError> {
    let actor_id = server_api::login(&state.api, &req.username)
        .await
        .map_err(http_error)?;
    info!(actor_id = actor_id.0, "employee logged in");
    Ok(Json(LoginResponse {
        user_id: actor_id.0,
    }))
}

async fn http_list_doctors(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Doctor>>, HttpError> {
    registrants::list_doctors(&state.api)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn doctor_form_view(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DoctorFormView>, HttpError> {
    let specialities = catalog::list_reference(&state.api, ReferenceTable::Speciality)
        .await
        .map_err(http_error)?;
    Ok(Json(DoctorFormView { specialities }))
}

async fn http_create_doctor(
    State(state): State<Arc<AppState>>,
    Form(form): Form<DoctorForm>,
) -> Result<(StatusCode, Json<SaveOutcome<Doctor>>), HttpError> {
    registrants::create_doctor(&state.api, &form)
        .await
        .map(save_response)
        .map_err(http_error)
}

async fn http_get_doctor(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
) -> Result<Json<Doctor>, HttpError> {
    registrants::get_doctor(&state.api, DoctorId(doctor_id))
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_update_doctor(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
    Form(form): Form<DoctorForm>,
) -> Result<(StatusCode, Json<SaveOutcome<Doctor>>), HttpError> {
    registrants::update_doctor(&state.api, DoctorId(doctor_id), &form)
        .await
        .map(save_response)
        .map_err(http_error)
}

async fn http_remove_doctor(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<i64>,
) -> Result<Json<ActionResponse>, ActionError> {
    registrants::remove_doctor(&state.api, DoctorId(doctor_id))
        .await
        .map(Json)
        .map_err(action_error)
}

async fn http_list_institutions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Institution>>, HttpError> {
    registrants::list_institutions(&state.api)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn institution_form_view() -> Json<InstitutionForm> {
    Json(InstitutionForm::default())
}

async fn http_create_institution(
    State(state): State<Arc<AppState>>,
    Form(form): Form<InstitutionForm>,
) -> Result<(StatusCode, Json<SaveOutcome<Institution>>), HttpError> {
    registrants::create_institution(&state.api, &form)
        .await
        .map(save_response)
        .map_err(http_error)
}

async fn http_get_institution(
    State(state): State<Arc<AppState>>,
    Path(institution_id): Path<i64>,
) -> Result<Json<Institution>, HttpError> {
    registrants::get_institution(&state.api, InstitutionId(institution_id))
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_update_institution(
    State(state): State<Arc<AppState>>,
    Path(institution_id): Path<i64>,
    Form(form): Form<InstitutionForm>,
) -> Result<(StatusCode, Json<SaveOutcome<Institution>>), HttpError> {
    registrants::update_institution(&state.api, InstitutionId(institution_id), &form)
        .await
        .map(save_response)
        .map_err(http_error)
}

async fn http_remove_institution(
    State(state): State<Arc<AppState>>,
    Path(institution_id): Path<i64>,
) -> Result<Json<ActionResponse>, ActionError> {
    registrants::remove_institution(&state.api, InstitutionId(institution_id))
        .await
        .map(Json)
        .map_err(action_error)
}

async fn http_list_products(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Product>>, HttpError> {
    catalog::list_available_products(&state.api)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_create_product(
    State(state): State<Arc<AppState>>,
    Json(product): Json<NewProduct>,
) -> Result<Json<Product>, HttpError> {
    catalog::create_product(&state.api, &product)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_list_orders(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<OrderSummary>>, HttpError> {
    orders::list_orders(&state.api)
        .await
        .map(Json)
        .map_err(http_error)
}

async fn cart(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Result<Json<CartView>, HttpError> {
    orders::cart_view(&state.api, ActorId(q.user_id))
        .await
        .map(Json)
        .map_err(http_error)
}

async fn save_cart_terms(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Form(form): Form<OrderForm>,
) -> Result<Redirect, HttpError> {
    let order = orders::current_order(&state.api, ActorId(q.user_id))
        .await
        .map_err(http_error)?;
    orders::save_order_terms(&state.api, order.order_id, &form)
        .await
        .map_err(http_error)?;
    Ok(Redirect::to(&format!(
        "/vendas/{}/checkout",
        order.order_id.0
    )))
}

async fn add_cart_item(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CartActionQuery>,
    body: Option<Json<AddItemRequest>>,
) -> Result<Json<ActionResponse>, ActionError> {
    let actor = q.actor()?;
    let request = body.map(|Json(request)| request);
    let (product_id, amount) = orders::parse_add_item(request.as_ref()).map_err(action_error)?;
    let order = orders::current_order(&state.api, actor)
        .await
        .map_err(action_error)?;
    orders::add_item(&state.api, order.order_id, product_id, amount)
        .await
        .map_err(action_error)?;
    Ok(Json(ActionResponse::ok("Item adicionado com sucesso!")))
}

async fn remove_cart_item(
    State(state): State<Arc<AppState>>,
    Query(q): Query<CartActionQuery>,
) -> Result<Json<ActionResponse>, ActionError> {
    let actor = q.actor()?;
    let item_id = q.item()?;
    let order = orders::current_order(&state.api, actor)
        .await
        .map_err(action_error)?;
    orders::remove_item(&state.api, order.order_id, item_id)
        .await
        .map_err(action_error)?;
    Ok(Json(ActionResponse::ok("Item excluido com sucesso!")))
}

async fn checkout_page(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<i64>,
) -> Result<Json<CheckoutView>, HttpError> {
    orders::checkout_view(&state.api, OrderId(order_id))
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_checkout(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<i64>,
    Form(form): Form<CheckoutForm>,
) -> Result<Response, HttpError> {
    let exported = orders::checkout(&state.api, OrderId(order_id), &form)
        .await
        .map_err(http_error)?;
    Ok(attachment(exported))
}

fn attachment(exported: ExportedOrder) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", exported.file_name))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    (StatusCode::OK, headers, exported.document).into_response()
}

async fn http_order_details(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<i64>,
) -> Result<Json<OrderDetails>, HttpError> {
    orders::order_details(&state.api, OrderId(order_id))
        .await
        .map(Json)
        .map_err(http_error)
}

async fn http_export_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<i64>,
) -> Result<Json<ExportResponse>, HttpError> {
    let exported = orders::export_order(&state.api, OrderId(order_id))
        .await
        .map_err(http_error)?;
    Ok(Json(ExportResponse {
        order_id: exported.details.order_id.0,
        file_name: exported.file_name,
        path: exported.path.display().to_string(),
    }))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
