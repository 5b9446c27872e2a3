//! Field rules for the registration, cart and checkout forms.
//!
//! Rules run in order on the trimmed value. `Required` and `Optional` stop the
//! chain on an empty value; every other rule runs and reports independently, so
//! one field can collect several messages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::ValidateEmail;

use crate::{
    domain::{
        Address, Contact, DoctorProfile, InstitutionProfile, PaymentTypeId, RegisterId,
        SaleTypeId, SpecialityId,
    },
    protocol::{CheckoutForm, DoctorForm, InstitutionForm, OrderForm},
};

pub const ONLY_DIGITS: &str = "Informe somente números";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn first_message(&self) -> Option<&str> {
        self.0
            .values()
            .flat_map(|messages| messages.iter())
            .map(String::as_str)
            .next()
    }

    fn into_result<T>(self, value: T) -> Result<T, FieldErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Rule {
    Required(&'static str),
    Optional,
    Length {
        min: usize,
        max: usize,
        message: &'static str,
    },
    Digits,
    Email(&'static str),
}

/// Runs `rules` against `value` and records failures under `field`.
pub fn check(errors: &mut FieldErrors, field: &str, value: &str, rules: &[Rule]) {
    let value = value.trim();
    for rule in rules {
        match *rule {
            Rule::Required(message) => {
                if value.is_empty() {
                    errors.add(field, message);
                    return;
                }
            }
            Rule::Optional => {
                if value.is_empty() {
                    return;
                }
            }
            Rule::Length { min, max, message } => {
                let len = value.chars().count();
                if len < min || len > max {
                    errors.add(field, message);
                }
            }
            Rule::Digits => {
                if !value.chars().all(|c| c.is_ascii_digit()) {
                    errors.add(field, ONLY_DIGITS);
                }
            }
            Rule::Email(message) => {
                if !is_email(value) {
                    errors.add(field, message);
                }
            }
        }
    }
}

/// RFC 5322 address with a dotted domain; single-label hosts such as `a@b`
/// are refused.
pub fn is_email(value: &str) -> bool {
    value.validate_email()
        && value
            .rsplit_once('@')
            .is_some_and(|(_, domain)| domain.contains('.'))
}

/// Accepts JSON integers and numeric strings, the two shapes the cart widget sends.
pub fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Decimal input as typed in the forms; a comma works as the decimal separator.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn parse_id(
    errors: &mut FieldErrors,
    field: &str,
    raw: &str,
    required_message: &'static str,
) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        errors.add(field, required_message);
        return None;
    }
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Some(id),
        _ => {
            errors.add(field, required_message);
            None
        }
    }
}

fn check_address(errors: &mut FieldErrors, zip: &str, city: &str, address: &str, district: &str) {
    check(
        errors,
        "zip",
        zip,
        &[
            Rule::Required("Informe um CEP valido"),
            Rule::Length {
                min: 8,
                max: 8,
                message: "O CEP precisa conter exatamente 8 números",
            },
            Rule::Digits,
        ],
    );
    check(errors, "city", city, &[Rule::Required("Informe uma cidade")]);
    check(
        errors,
        "address",
        address,
        &[
            Rule::Required("Informe o endereço"),
            Rule::Length {
                min: 1,
                max: 70,
                message: "O endereço pode ter no máximo 70 caracteres",
            },
        ],
    );
    check(
        errors,
        "district",
        district,
        &[Rule::Required("Informe o bairro")],
    );
}

fn address_from_fields(zip: &str, city: &str, address: &str, district: &str) -> Address {
    Address {
        zip: zip.trim().to_string(),
        city: city.trim().to_string(),
        address: address.trim().to_string(),
        district: district.trim().to_string(),
    }
}

const CEL_LENGTH: Rule = Rule::Length {
    min: 11,
    max: 11,
    message: "O celular precisa conter exatamente 11 números",
};

const PHONE_LENGTH: Rule = Rule::Length {
    min: 10,
    max: 10,
    message: "O telefone precisa conter exatamente 10 números",
};

/// Validates a doctor form and maps it onto the stored doctor fields.
pub fn doctor_from_form(form: &DoctorForm) -> Result<(DoctorProfile, Address), FieldErrors> {
    let mut errors = FieldErrors::default();
    check(
        &mut errors,
        "name",
        &form.name,
        &[
            Rule::Required("Informe o nome"),
            Rule::Length {
                min: 5,
                max: 50,
                message: "O nome deve conter de 5 a 50 caracteres",
            },
        ],
    );
    check(
        &mut errors,
        "cpf",
        &form.cpf,
        &[
            Rule::Required("Informe o CPF"),
            Rule::Length {
                min: 11,
                max: 11,
                message: "O CPF deve conter exatamente 11 números",
            },
            Rule::Digits,
        ],
    );
    check(
        &mut errors,
        "rg",
        &form.rg,
        &[
            Rule::Required("Informe o RG"),
            Rule::Length {
                min: 10,
                max: 10,
                message: "O RG precisa conter exatamente 10 números",
            },
            Rule::Digits,
        ],
    );
    check(
        &mut errors,
        "crm",
        &form.crm,
        &[
            Rule::Required("Informe o CRM"),
            Rule::Length {
                min: 5,
                max: 12,
                message: "O CRM precisa conter de 5 a 12 números",
            },
            Rule::Digits,
        ],
    );
    check(
        &mut errors,
        "cel",
        &form.cel,
        &[
            Rule::Required("Informe um número de celular valido"),
            CEL_LENGTH,
            Rule::Digits,
        ],
    );
    check(
        &mut errors,
        "phone",
        &form.phone,
        &[
            Rule::Required("Informe um telefone valido"),
            PHONE_LENGTH,
            Rule::Digits,
        ],
    );
    check(
        &mut errors,
        "email",
        &form.email,
        &[
            Rule::Required("Informe o Email"),
            Rule::Email("Informe um e-mail valido"),
        ],
    );
    let speciality_id = parse_id(
        &mut errors,
        "speciality_id",
        &form.speciality_id,
        "Selecione a especialidade",
    );
    check_address(
        &mut errors,
        &form.zip,
        &form.city,
        &form.address,
        &form.district,
    );

    let Some(speciality_id) = speciality_id else {
        return Err(errors);
    };
    let profile = DoctorProfile {
        name: form.name.trim().to_string(),
        cpf: form.cpf.trim().to_string(),
        rg: form.rg.trim().to_string(),
        crm: form.crm.trim().to_string(),
        cel: form.cel.trim().to_string(),
        phone: form.phone.trim().to_string(),
        email: form.email.trim().to_string(),
        speciality_id: SpecialityId(speciality_id),
    };
    let address = address_from_fields(&form.zip, &form.city, &form.address, &form.district);
    errors.into_result((profile, address))
}

fn check_contact(errors: &mut FieldErrors, prefix: &str, email: &str, cel: &str, phone: &str) {
    check(
        errors,
        &format!("{prefix}_email"),
        email,
        &[Rule::Optional, Rule::Email("Informe um email valido")],
    );
    check(
        errors,
        &format!("{prefix}_cel"),
        cel,
        &[Rule::Optional, Rule::Digits, CEL_LENGTH],
    );
    check(
        errors,
        &format!("{prefix}_phone"),
        phone,
        &[Rule::Optional, Rule::Digits, PHONE_LENGTH],
    );
}

fn optional_text(raw: &str) -> Option<String> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| raw.to_string())
}

/// Validates an institution form and maps it onto the stored institution fields.
pub fn institution_from_form(
    form: &InstitutionForm,
) -> Result<(InstitutionProfile, Address), FieldErrors> {
    let mut errors = FieldErrors::default();
    check(
        &mut errors,
        "name",
        &form.name,
        &[Rule::Required("O nome da instituição é obrigatório")],
    );
    check(
        &mut errors,
        "cnpj",
        &form.cnpj,
        &[Rule::Required("O CNPJ é obrigatório"), Rule::Digits],
    );
    check_contact(
        &mut errors,
        "adm",
        &form.adm_email,
        &form.adm_cel,
        &form.adm_phone,
    );
    check_contact(
        &mut errors,
        "enf",
        &form.enf_email,
        &form.enf_cel,
        &form.enf_phone,
    );
    check_address(
        &mut errors,
        &form.zip,
        &form.city,
        &form.address,
        &form.district,
    );

    let profile = InstitutionProfile {
        name: form.name.trim().to_string(),
        cnpj: form.cnpj.trim().to_string(),
        administration: Contact {
            name: optional_text(&form.adm_name),
            email: optional_text(&form.adm_email),
            cel: optional_text(&form.adm_cel),
            phone: optional_text(&form.adm_phone),
        },
        nursing: Contact {
            name: optional_text(&form.enf_name),
            email: optional_text(&form.enf_email),
            cel: optional_text(&form.enf_cel),
            phone: optional_text(&form.enf_phone),
        },
    };
    let address = address_from_fields(&form.zip, &form.city, &form.address, &form.district);
    errors.into_result((profile, address))
}

/// Freight, discount, sale and payment type chosen on the cart page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderTerms {
    pub freight: f64,
    pub discount: f64,
    pub sale_type_id: SaleTypeId,
    pub payment_type_id: PaymentTypeId,
}

fn check_money(
    errors: &mut FieldErrors,
    field: &str,
    raw: &str,
    required_message: Option<&'static str>,
) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return match required_message {
            Some(message) => {
                errors.add(field, message);
                None
            }
            None => Some(0.0),
        };
    }
    match parse_decimal(raw) {
        Some(value) if value >= 0.0 => Some(value),
        Some(_) => {
            errors.add(field, "O valor não pode ser negativo");
            None
        }
        None => {
            errors.add(field, "Informe um valor numérico");
            None
        }
    }
}

pub fn order_terms_from_form(form: &OrderForm) -> Result<OrderTerms, FieldErrors> {
    let mut errors = FieldErrors::default();
    let freight = check_money(
        &mut errors,
        "freight",
        &form.freight,
        Some("O frete é obrigatório"),
    );
    let discount = check_money(&mut errors, "discount", &form.discount, None);
    let sale_type_id = parse_id(
        &mut errors,
        "type_of_sale",
        &form.type_of_sale,
        "O tipo de venda é obrigatório!",
    );
    let payment_type_id = parse_id(
        &mut errors,
        "type_pgto",
        &form.type_pgto,
        "O prazo do pagamento é obrigatório!",
    );

    match (freight, discount, sale_type_id, payment_type_id) {
        (Some(freight), Some(discount), Some(sale_type_id), Some(payment_type_id))
            if errors.is_empty() =>
        {
            Ok(OrderTerms {
                freight,
                discount,
                sale_type_id: SaleTypeId(sale_type_id),
                payment_type_id: PaymentTypeId(payment_type_id),
            })
        }
        _ => Err(errors),
    }
}

pub fn register_from_checkout(form: &CheckoutForm) -> Result<RegisterId, FieldErrors> {
    let mut errors = FieldErrors::default();
    match parse_id(
        &mut errors,
        "register_id",
        &form.register_id,
        "Informe para quem será feita a venda",
    ) {
        Some(id) => Ok(RegisterId(id)),
        None => Err(errors),
    }
}

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod tests;
