//! Common validation utilities.

use validator::ValidationError;

lazy_static::lazy_static! {
    static ref PHONE_DIGITS_REGEX: regex::Regex = regex::Regex::new(r"^\d{7,15}$").unwrap();
    static ref PHONE_NOISE_REGEX: regex::Regex = regex::Regex::new(r"[\s\-()+]").unwrap();
    static ref EMAIL_REGEX: regex::Regex =
        regex::Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
}

/// Validates that a latitude value is within valid range (-90 to 90).
pub fn validate_latitude(lat: f64) -> Result<(), ValidationError> {
    if (-90.0..=90.0).contains(&lat) {
        Ok(())
    } else {
        let mut err = ValidationError::new("latitude_range");
        err.message = Some("Latitude must be between -90 and 90".into());
        Err(err)
    }
}

/// Validates that a longitude value is within valid range (-180 to 180).
pub fn validate_longitude(lon: f64) -> Result<(), ValidationError> {
    if (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        let mut err = ValidationError::new("longitude_range");
        err.message = Some("Longitude must be between -180 and 180".into());
        Err(err)
    }
}

/// Validates a coordinate pair, reporting the first offending axis.
pub fn validate_coordinates(lat: f64, lon: f64) -> Result<(), ValidationError> {
    validate_latitude(lat)?;
    validate_longitude(lon)
}

/// Validates that accuracy is non-negative.
pub fn validate_accuracy(accuracy: f64) -> Result<(), ValidationError> {
    if accuracy >= 0.0 {
        Ok(())
    } else {
        let mut err = ValidationError::new("accuracy_range");
        err.message = Some("Accuracy must be non-negative".into());
        Err(err)
    }
}

/// Validates that a heading is within valid range (0 to 360).
pub fn validate_heading(heading: f64) -> Result<(), ValidationError> {
    if (0.0..=360.0).contains(&heading) {
        Ok(())
    } else {
        let mut err = ValidationError::new("heading_range");
        err.message = Some("Heading must be between 0 and 360".into());
        Err(err)
    }
}

/// Validates that speed is non-negative.
pub fn validate_speed(speed: f64) -> Result<(), ValidationError> {
    if speed >= 0.0 {
        Ok(())
    } else {
        let mut err = ValidationError::new("speed_range");
        err.message = Some("Speed must be non-negative".into());
        Err(err)
    }
}

/// Strips spaces, dashes, parentheses and plus signs from a phone number.
pub fn clean_phone(phone: &str) -> String {
    PHONE_NOISE_REGEX.replace_all(phone.trim(), "").into_owned()
}

/// Validates a phone number: 7-15 digits once formatting characters are removed.
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
    let cleaned = clean_phone(phone);
    if PHONE_DIGITS_REGEX.is_match(&cleaned) {
        Ok(())
    } else {
        let mut err = ValidationError::new("phone_format");
        err.message = Some(
            format!(
                "Invalid phone number format: {}. Expected 7-15 digits.",
                phone
            )
            .into(),
        );
        Err(err)
    }
}

/// Validates an email address.
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if EMAIL_REGEX.is_match(email.trim()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("email_format");
        err.message = Some(format!("Invalid email address format: {}", email).into());
        Err(err)
    }
}
