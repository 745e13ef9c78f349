//! Channel-specific recipient validation.

use thiserror::Error;

use crate::models::notification::Channel;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContactError {
    #[error("Phone number is required for {0} notifications!")]
    MissingPhone(&'static str),

    #[error("Email address is required for email notifications!")]
    MissingEmail,

    #[error("Device token is required for push notifications!")]
    MissingDeviceToken,

    #[error("{0}")]
    InvalidFormat(String),
}

/// The contact fields a recipient may carry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContactInfo<'a> {
    pub phone: Option<&'a str>,
    pub email: Option<&'a str>,
    pub push_token: Option<&'a str>,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Validates the field `channel` needs and returns the address to send to.
///
/// Phones must be well formed for sms and whatsapp, emails for email. Push
/// only needs a device token; its format is the gateway's business.
pub fn recipient_for<'a>(channel: Channel, contact: &ContactInfo<'a>) -> Result<&'a str, ContactError> {
    match channel {
        Channel::Sms | Channel::Whatsapp => {
            let phone = present(contact.phone).ok_or(ContactError::MissingPhone(channel.label()))?;
            shared::validation::validate_phone(phone).map_err(|e| {
                ContactError::InvalidFormat(
                    e.message
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid phone number: {}", phone)),
                )
            })?;
            Ok(phone)
        }
        Channel::Email => {
            let email = present(contact.email).ok_or(ContactError::MissingEmail)?;
            shared::validation::validate_email(email).map_err(|e| {
                ContactError::InvalidFormat(
                    e.message
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid email address: {}", email)),
                )
            })?;
            Ok(email)
        }
        Channel::Push => present(contact.push_token).ok_or(ContactError::MissingDeviceToken),
    }
}

/// Same checks as [`recipient_for`], discarding the address.
pub fn validate_contact(channel: Channel, contact: &ContactInfo<'_>) -> Result<(), ContactError> {
    recipient_for(channel, contact).map(|_| ())
}
