use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{
        ActorId, OrderId, OrderItemId, OrderState, Product, ProductId, ReferenceItem,
        RegistrantRef,
    },
    error::ErrorCode,
    validation::FieldErrors,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorForm {
    pub name: String,
    pub cpf: String,
    pub rg: String,
    pub crm: String,
    pub cel: String,
    pub phone: String,
    pub email: String,
    pub speciality_id: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub district: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstitutionForm {
    pub name: String,
    pub cnpj: String,
    pub adm_name: String,
    pub adm_email: String,
    pub adm_cel: String,
    pub adm_phone: String,
    pub enf_name: String,
    pub enf_email: String,
    pub enf_cel: String,
    pub enf_phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub district: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderForm {
    pub freight: String,
    pub discount: String,
    pub type_of_sale: String,
    pub type_pgto: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckoutForm {
    pub register_id: String,
}

/// Cart PUT body. Both fields stay loose so the handler can report which one is wrong.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddItemRequest {
    #[serde(default)]
    pub item_id: Option<Value>,
    #[serde(default)]
    pub amount: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Result of a registration or update: the saved record, or why it was refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveOutcome<T> {
    Saved {
        record: T,
        message: String,
    },
    Rejected {
        code: ErrorCode,
        message: String,
        #[serde(default)]
        fields: FieldErrors,
    },
}

impl<T> SaveOutcome<T> {
    pub fn saved(record: T, message: impl Into<String>) -> Self {
        Self::Saved {
            record,
            message: message.into(),
        }
    }

    pub fn rejected(fields: FieldErrors) -> Self {
        let message = fields
            .first_message()
            .unwrap_or("Dados inválidos")
            .to_string();
        Self::Rejected {
            code: ErrorCode::Validation,
            message,
            fields,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Rejected {
            code: ErrorCode::Conflict,
            message: message.into(),
            fields: FieldErrors::default(),
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Saved { message, .. } | Self::Rejected { message, .. } => message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub item_id: OrderItemId,
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: f64,
    pub amount: i64,
    pub subtotal: f64,
}

/// Read view of an order. The cart page, the detail endpoint and the exported
/// `<order_id>.json` file all serialize this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order_id: OrderId,
    pub actor_id: Option<ActorId>,
    pub state: OrderState,
    pub registrant: Option<RegistrantRef>,
    pub sale_type: Option<ReferenceItem>,
    pub payment_type: Option<ReferenceItem>,
    pub items: Vec<OrderLine>,
    pub item_count: usize,
    pub subtotal: f64,
    pub freight: f64,
    pub discount: f64,
    pub total: f64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub actor_id: Option<ActorId>,
    pub state: OrderState,
    pub item_count: usize,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartView {
    pub order: OrderDetails,
    pub products: Vec<Product>,
    pub sale_types: Vec<ReferenceItem>,
    pub payment_types: Vec<ReferenceItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutView {
    pub order: OrderDetails,
    pub registrants: Vec<RegistrantRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorFormView {
    pub specialities: Vec<ReferenceItem>,
}
