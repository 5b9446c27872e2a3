//! Doctors and institutions with their address record.
//!
//! Form problems and duplicate documents come back as `SaveOutcome::Rejected`
//! so callers can show them next to the fields; `Err` is reserved for unknown
//! records and store failures.

use shared::{
    domain::{Doctor, DoctorId, Institution, InstitutionId, ReferenceTable, RegistrantRef, SpecialityId},
    error::ApiError,
    protocol::{ActionResponse, DoctorForm, InstitutionForm, SaveOutcome},
    validation::{doctor_from_form, institution_from_form, FieldErrors},
};
use tracing::info;

use crate::{internal, ApiContext};

const DUPLICATE_CPF: &str = "Já existe um médico cadastrado com este CPF";
const DUPLICATE_CNPJ: &str = "Já existe uma instituição cadastrada com este CNPJ";

pub async fn list_doctors(ctx: &ApiContext) -> Result<Vec<Doctor>, ApiError> {
    ctx.storage.list_doctors().await.map_err(internal)
}

pub async fn get_doctor(ctx: &ApiContext, doctor_id: DoctorId) -> Result<Doctor, ApiError> {
    ctx.storage
        .doctor(doctor_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("Cadastro não localizado!"))
}

async fn unknown_speciality<T>(
    ctx: &ApiContext,
    speciality_id: SpecialityId,
) -> Result<Option<SaveOutcome<T>>, ApiError> {
    let known = ctx
        .storage
        .reference(ReferenceTable::Speciality, speciality_id.0)
        .await
        .map_err(internal)?
        .is_some();
    if known {
        return Ok(None);
    }
    let mut errors = FieldErrors::default();
    errors.add("speciality_id", "Selecione a especialidade");
    Ok(Some(SaveOutcome::rejected(errors)))
}

pub async fn create_doctor(
    ctx: &ApiContext,
    form: &DoctorForm,
) -> Result<SaveOutcome<Doctor>, ApiError> {
    let (profile, address) = match doctor_from_form(form) {
        Ok(mapped) => mapped,
        Err(errors) => return Ok(SaveOutcome::rejected(errors)),
    };
    if let Some(rejected) = unknown_speciality(ctx, profile.speciality_id).await? {
        return Ok(rejected);
    }
    if ctx
        .storage
        .doctor_id_for_cpf(&profile.cpf)
        .await
        .map_err(internal)?
        .is_some()
    {
        return Ok(SaveOutcome::conflict(DUPLICATE_CPF));
    }

    let doctor_id = match ctx.storage.create_doctor(&profile, &address).await {
        Ok(doctor_id) => doctor_id,
        Err(err) if storage::is_unique_violation(&err) => {
            return Ok(SaveOutcome::conflict(DUPLICATE_CPF));
        }
        Err(err) => return Err(internal(err)),
    };
    info!(doctor_id = doctor_id.0, "doctor registered");
    let doctor = get_doctor(ctx, doctor_id).await?;
    Ok(SaveOutcome::saved(doctor, "Médico cadastrado com sucesso!"))
}

pub async fn update_doctor(
    ctx: &ApiContext,
    doctor_id: DoctorId,
    form: &DoctorForm,
) -> Result<SaveOutcome<Doctor>, ApiError> {
    get_doctor(ctx, doctor_id).await?;
    let (profile, address) = match doctor_from_form(form) {
        Ok(mapped) => mapped,
        Err(errors) => return Ok(SaveOutcome::rejected(errors)),
    };
    if let Some(rejected) = unknown_speciality(ctx, profile.speciality_id).await? {
        return Ok(rejected);
    }
    let owner = ctx
        .storage
        .doctor_id_for_cpf(&profile.cpf)
        .await
        .map_err(internal)?;
    if owner.is_some_and(|owner| owner != doctor_id) {
        return Ok(SaveOutcome::conflict(DUPLICATE_CPF));
    }

    let updated = match ctx.storage.update_doctor(doctor_id, &profile, &address).await {
        Ok(updated) => updated,
        Err(err) if storage::is_unique_violation(&err) => {
            return Ok(SaveOutcome::conflict(DUPLICATE_CPF));
        }
        Err(err) => return Err(internal(err)),
    };
    if !updated {
        return Err(ApiError::not_found("Cadastro não localizado!"));
    }
    info!(doctor_id = doctor_id.0, "doctor updated");
    let doctor = get_doctor(ctx, doctor_id).await?;
    Ok(SaveOutcome::saved(doctor, "Cadastro atualizado com sucesso!"))
}

pub async fn remove_doctor(
    ctx: &ApiContext,
    doctor_id: DoctorId,
) -> Result<ActionResponse, ApiError> {
    let removed = ctx
        .storage
        .delete_doctor(doctor_id)
        .await
        .map_err(internal)?;
    if !removed {
        return Err(ApiError::not_found("Informe um registro valido"));
    }
    info!(doctor_id = doctor_id.0, "doctor removed");
    Ok(ActionResponse::ok("Cadastro removido com sucesso!"))
}

pub async fn list_institutions(ctx: &ApiContext) -> Result<Vec<Institution>, ApiError> {
    ctx.storage.list_institutions().await.map_err(internal)
}

pub async fn get_institution(
    ctx: &ApiContext,
    institution_id: InstitutionId,
) -> Result<Institution, ApiError> {
    ctx.storage
        .institution(institution_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("Cadastro não localizado!"))
}

pub async fn create_institution(
    ctx: &ApiContext,
    form: &InstitutionForm,
) -> Result<SaveOutcome<Institution>, ApiError> {
    let (profile, address) = match institution_from_form(form) {
        Ok(mapped) => mapped,
        Err(errors) => return Ok(SaveOutcome::rejected(errors)),
    };
    if ctx
        .storage
        .institution_id_for_cnpj(&profile.cnpj)
        .await
        .map_err(internal)?
        .is_some()
    {
        return Ok(SaveOutcome::conflict(DUPLICATE_CNPJ));
    }

    let institution_id = match ctx.storage.create_institution(&profile, &address).await {
        Ok(institution_id) => institution_id,
        Err(err) if storage::is_unique_violation(&err) => {
            return Ok(SaveOutcome::conflict(DUPLICATE_CNPJ));
        }
        Err(err) => return Err(internal(err)),
    };
    info!(institution_id = institution_id.0, "institution registered");
    let institution = get_institution(ctx, institution_id).await?;
    Ok(SaveOutcome::saved(
        institution,
        "Instituição cadastrada com sucesso!",
    ))
}

pub async fn update_institution(
    ctx: &ApiContext,
    institution_id: InstitutionId,
    form: &InstitutionForm,
) -> Result<SaveOutcome<Institution>, ApiError> {
    get_institution(ctx, institution_id).await?;
    let (profile, address) = match institution_from_form(form) {
        Ok(mapped) => mapped,
        Err(errors) => return Ok(SaveOutcome::rejected(errors)),
    };
    let owner = ctx
        .storage
        .institution_id_for_cnpj(&profile.cnpj)
        .await
        .map_err(internal)?;
    if owner.is_some_and(|owner| owner != institution_id) {
        return Ok(SaveOutcome::conflict(DUPLICATE_CNPJ));
    }

    let updated = match ctx.storage.update_institution(institution_id, &profile, &address).await {
        Ok(updated) => updated,
        Err(err) if storage::is_unique_violation(&err) => {
            return Ok(SaveOutcome::conflict(DUPLICATE_CNPJ));
        }
        Err(err) => return Err(internal(err)),
    };
    if !updated {
        return Err(ApiError::not_found("Cadastro não localizado!"));
    }
    info!(institution_id = institution_id.0, "institution updated");
    let institution = get_institution(ctx, institution_id).await?;
    Ok(SaveOutcome::saved(
        institution,
        "Cadastro atualizado com sucesso!",
    ))
}

pub async fn remove_institution(
    ctx: &ApiContext,
    institution_id: InstitutionId,
) -> Result<ActionResponse, ApiError> {
    let removed = ctx
        .storage
        .delete_institution(institution_id)
        .await
        .map_err(internal)?;
    if !removed {
        return Err(ApiError::not_found("Informe um registro valido"));
    }
    info!(institution_id = institution_id.0, "institution removed");
    Ok(ActionResponse::ok("Cadastro removido com sucesso!"))
}

/// Buyers selectable at checkout.
pub async fn list_registrants(ctx: &ApiContext) -> Result<Vec<RegistrantRef>, ApiError> {
    ctx.storage.list_registrant_refs().await.map_err(internal)
}

#[cfg(test)]
#[path = "tests/registrants_tests.rs"]
mod tests;
