use std::fmt;

use crate::domain::Beneficiary;

pub const ACCOUNT_NUMBER_LEN: usize = 10;
pub const BANK_CODE_MIN_LEN: usize = 3;
pub const BANK_CODE_MAX_LEN: usize = 6;
pub const ACCOUNT_NAME_MAX_LEN: usize = 100;
pub const NARRATION_MAX_LEN: usize = 100;
pub const EMAIL_MAX_LEN: usize = 254;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.chars().count() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

fn validate_digits(field: &'static str, value: &str) -> ValidationResult {
    if !value.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(ValidationError::new(field, "must contain only digits"));
    }

    Ok(())
}

pub fn validate_account_number(account_number: &str) -> ValidationResult {
    let account_number = account_number.trim();
    validate_required("account_number", account_number)?;
    validate_digits("account_number", account_number)?;

    if account_number.len() != ACCOUNT_NUMBER_LEN {
        return Err(ValidationError::new(
            "account_number",
            format!("must be exactly {} digits", ACCOUNT_NUMBER_LEN),
        ));
    }

    Ok(())
}

pub fn validate_bank_code(bank_code: &str) -> ValidationResult {
    let bank_code = bank_code.trim();
    validate_required("bank_code", bank_code)?;
    validate_digits("bank_code", bank_code)?;

    if !(BANK_CODE_MIN_LEN..=BANK_CODE_MAX_LEN).contains(&bank_code.len()) {
        return Err(ValidationError::new(
            "bank_code",
            format!(
                "must be {} to {} digits",
                BANK_CODE_MIN_LEN, BANK_CODE_MAX_LEN
            ),
        ));
    }

    Ok(())
}

pub fn validate_account_name(account_name: &str) -> ValidationResult {
    let account_name = sanitize_string(account_name);
    validate_required("account_name", &account_name)?;
    validate_max_len("account_name", &account_name, ACCOUNT_NAME_MAX_LEN)?;

    if !account_name
        .chars()
        .all(|ch| ch.is_alphanumeric() || matches!(ch, ' ' | '-' | '.' | '\'' | '&' | ','))
    {
        return Err(ValidationError::new(
            "account_name",
            "contains unsupported characters",
        ));
    }

    Ok(())
}

/// Validate and return the beneficiary with trimmed, sanitized fields.
pub fn validate_beneficiary(beneficiary: &Beneficiary) -> Result<Beneficiary, ValidationError> {
    validate_account_number(&beneficiary.account_number)?;
    validate_bank_code(&beneficiary.bank_code)?;
    validate_account_name(&beneficiary.account_name)?;

    Ok(Beneficiary {
        account_number: beneficiary.account_number.trim().to_string(),
        bank_code: beneficiary.bank_code.trim().to_string(),
        account_name: sanitize_string(&beneficiary.account_name),
    })
}

pub fn validate_email(email: &str) -> ValidationResult {
    let email = email.trim();
    validate_required("email", email)?;
    validate_max_len("email", email, EMAIL_MAX_LEN)?;

    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ValidationError::new("email", "must be a valid email address")),
    }
}

pub fn validate_positive_amount(amount: i64) -> ValidationResult {
    if amount <= 0 {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(())
}
