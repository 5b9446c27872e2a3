use std::sync::Arc;

use shared::{
    domain::ActorId,
    error::{ApiError, ErrorCode},
};
use storage::Storage;

pub mod catalog;
pub mod export;
pub mod orders;
pub mod registrants;

pub use export::{ExportError, ExportSink, ExportedOrder, FolderSink};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub exports: Arc<dyn ExportSink>,
}

impl ApiContext {
    pub fn new(storage: Storage, exports: impl ExportSink + 'static) -> Self {
        Self {
            storage,
            exports: Arc::new(exports),
        }
    }
}

/// Resolves the employee acting on the request.
pub async fn ensure_employee(ctx: &ApiContext, actor_id: ActorId) -> Result<String, ApiError> {
    ctx.storage
        .username_for_employee(actor_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "Usuário não identificado"))
}

pub async fn login(ctx: &ApiContext, username: &str) -> Result<ActorId, ApiError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::validation("Informe o usuário"));
    }
    ctx.storage.create_employee(username).await.map_err(internal)
}

pub(crate) fn internal(err: anyhow::Error) -> ApiError {
    tracing::error!(error = %err, "record store failure");
    ApiError::new(ErrorCode::Internal, err.to_string())
}
