use super::*;
use serde_json::json;

fn doctor_form() -> DoctorForm {
    DoctorForm {
        name: "Ana Souza".into(),
        cpf: "12345678901".into(),
        rg: "1234567890".into(),
        crm: "123456".into(),
        cel: "11987654321".into(),
        phone: "1133334444".into(),
        email: "ana@clinica.com.br".into(),
        speciality_id: "1".into(),
        zip: "01310100".into(),
        city: "São Paulo".into(),
        address: "Av. Paulista, 1000".into(),
        district: "Bela Vista".into(),
    }
}

fn institution_form() -> InstitutionForm {
    InstitutionForm {
        name: "Hospital de Olhos".into(),
        cnpj: "12345678000199".into(),
        zip: "01310100".into(),
        city: "São Paulo".into(),
        address: "Rua Augusta, 200".into(),
        district: "Consolação".into(),
        ..InstitutionForm::default()
    }
}

#[test]
fn valid_doctor_form_maps_every_field() {
    let (profile, address) = doctor_from_form(&doctor_form()).expect("valid");
    assert_eq!(profile.cpf, "12345678901");
    assert_eq!(profile.speciality_id, SpecialityId(1));
    assert_eq!(address.zip, "01310100");
    assert_eq!(address.district, "Bela Vista");
}

#[test]
fn ten_digit_cpf_is_rejected_with_length_message() {
    let mut form = doctor_form();
    form.cpf = "1234567890".into();
    let errors = doctor_from_form(&form).expect_err("short cpf");
    assert_eq!(
        errors.get("cpf"),
        ["O CPF deve conter exatamente 11 números".to_string()]
    );
}

#[test]
fn non_numeric_documents_collect_every_failure() {
    let mut form = doctor_form();
    form.rg = "12345-789".into();
    let errors = doctor_from_form(&form).expect_err("bad rg");
    let rg = errors.get("rg");
    assert_eq!(rg.len(), 2);
    assert!(rg.contains(&ONLY_DIGITS.to_string()));
}

#[test]
fn crm_accepts_five_to_twelve_digits() {
    for crm in ["12345", "123456789012"] {
        let mut form = doctor_form();
        form.crm = crm.into();
        assert!(doctor_from_form(&form).is_ok(), "crm {crm}");
    }
    for crm in ["1234", "1234567890123"] {
        let mut form = doctor_form();
        form.crm = crm.into();
        let errors = doctor_from_form(&form).expect_err("crm out of range");
        assert_eq!(errors.get("crm").len(), 1);
    }
}

#[test]
fn required_field_stops_other_rules() {
    let mut form = doctor_form();
    form.phone = "   ".into();
    form.speciality_id = String::new();
    let errors = doctor_from_form(&form).expect_err("missing fields");
    assert_eq!(errors.get("phone"), ["Informe um telefone valido".to_string()]);
    assert_eq!(
        errors.get("speciality_id"),
        ["Selecione a especialidade".to_string()]
    );
}

#[test]
fn address_longer_than_seventy_chars_is_rejected() {
    let mut form = doctor_form();
    form.address = "x".repeat(71);
    let errors = doctor_from_form(&form).expect_err("long address");
    assert_eq!(errors.get("address").len(), 1);

    form.address = "x".repeat(70);
    assert!(doctor_from_form(&form).is_ok());
}

#[test]
fn institution_contacts_are_optional_but_checked_when_present() {
    let (profile, _) = institution_from_form(&institution_form()).expect("valid");
    assert_eq!(profile.administration.email, None);

    let mut form = institution_form();
    form.adm_cel = "119876".into();
    form.enf_email = "not-an-email".into();
    let errors = institution_from_form(&form).expect_err("bad contacts");
    assert_eq!(
        errors.get("adm_cel"),
        ["O celular precisa conter exatamente 11 números".to_string()]
    );
    assert_eq!(errors.get("enf_email").len(), 1);
}

#[test]
fn institution_zip_must_have_eight_digits() {
    let mut form = institution_form();
    form.zip = "0131010".into();
    let errors = institution_from_form(&form).expect_err("short zip");
    assert_eq!(errors.get("zip").len(), 1);
}

#[test]
fn order_terms_default_discount_to_zero() {
    let form = OrderForm {
        freight: "12,50".into(),
        discount: String::new(),
        type_of_sale: "1".into(),
        type_pgto: "2".into(),
    };
    let terms = order_terms_from_form(&form).expect("valid");
    assert_eq!(terms.freight, 12.5);
    assert_eq!(terms.discount, 0.0);
    assert_eq!(terms.payment_type_id, PaymentTypeId(2));
}

#[test]
fn order_terms_require_freight_and_types() {
    let errors = order_terms_from_form(&OrderForm::default()).expect_err("empty form");
    assert_eq!(errors.get("freight"), ["O frete é obrigatório".to_string()]);
    assert_eq!(errors.get("type_of_sale").len(), 1);
    assert_eq!(errors.get("type_pgto").len(), 1);
}

#[test]
fn negative_discount_is_rejected() {
    let form = OrderForm {
        freight: "0".into(),
        discount: "-1".into(),
        type_of_sale: "1".into(),
        type_pgto: "1".into(),
    };
    let errors = order_terms_from_form(&form).expect_err("negative");
    assert_eq!(errors.get("discount").len(), 1);
}

#[test]
fn checkout_requires_register() {
    let errors = register_from_checkout(&CheckoutForm::default()).expect_err("missing");
    assert_eq!(
        errors.first_message(),
        Some("Informe para quem será feita a venda")
    );
    let id = register_from_checkout(&CheckoutForm {
        register_id: " 7 ".into(),
    })
    .expect("valid");
    assert_eq!(id, RegisterId(7));
}

#[test]
fn parses_integers_from_numbers_and_strings() {
    assert_eq!(parse_integer(&json!(3)), Some(3));
    assert_eq!(parse_integer(&json!(" 4 ")), Some(4));
    assert_eq!(parse_integer(&json!("três")), None);
    assert_eq!(parse_integer(&json!(2.5)), None);
    assert_eq!(parse_integer(&json!(null)), None);
}

#[test]
fn email_check_rejects_obvious_garbage() {
    assert!(is_email("a@b.com"));
    assert!(!is_email("a@b"));
    assert!(!is_email("@b.com"));
    assert!(!is_email("a b@c.com"));
    assert!(!is_email("a@@c.com"));
}

#[test]
fn email_check_rejects_malformed_local_parts_and_hosts() {
    assert!(is_email("contato.loja+vendas@otica-central.com.br"));
    for bad in [
        "x<script>@evil.com",
        "a,b@c.com",
        "(x)@y.z",
        "a@b_c.com",
        "a@-b.com",
        "a@b.-",
    ] {
        assert!(!is_email(bad), "{bad} should be rejected");
    }
}

#[test]
fn institution_contact_email_uses_the_strict_check() {
    let mut form = institution_form();
    form.adm_email = "adm,financeiro@hospital.com".into();
    let errors = institution_from_form(&form).expect_err("bad email");
    assert!(!errors.get("adm_email").is_empty());
}
