use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(ActorId);
id_newtype!(OrderId);
id_newtype!(OrderItemId);
id_newtype!(ProductId);
id_newtype!(DoctorId);
id_newtype!(InstitutionId);
id_newtype!(RegisterId);
id_newtype!(SpecialityId);
id_newtype!(SaleTypeId);
id_newtype!(PaymentTypeId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Open,
    Finished,
}

impl OrderState {
    pub fn from_finished_flag(finished: bool) -> Self {
        if finished {
            Self::Finished
        } else {
            Self::Open
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrantKind {
    Doctor,
    Institution,
}

/// Lookup tables selected from drop-downs: specialities, sale and payment types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTable {
    Speciality,
    SaleType,
    PaymentType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceItem {
    pub id: i64,
    pub label: String,
}

/// The "register" sub-record every registrant may carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub zip: String,
    pub city: String,
    pub address: String,
    pub district: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorProfile {
    pub name: String,
    pub cpf: String,
    pub rg: String,
    pub crm: String,
    pub cel: String,
    pub phone: String,
    pub email: String,
    pub speciality_id: SpecialityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub doctor_id: DoctorId,
    #[serde(flatten)]
    pub profile: DoctorProfile,
    pub register_id: Option<RegisterId>,
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: Option<String>,
    pub email: Option<String>,
    pub cel: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionProfile {
    pub name: String,
    pub cnpj: String,
    pub administration: Contact,
    pub nursing: Contact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    pub institution_id: InstitutionId,
    #[serde(flatten)]
    pub profile: InstitutionProfile,
    pub register_id: Option<RegisterId>,
    pub address: Option<Address>,
}

/// Buyer reference attached to an order at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrantRef {
    pub register_id: RegisterId,
    pub kind: RegistrantKind,
    pub registrant_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: ProductId,
    pub name: String,
    pub price: f64,
    pub amount: i64,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub price: f64,
    pub amount: i64,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}
