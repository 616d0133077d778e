// libs/scheduling-cell/src/services/validation.rs
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{AppointmentDetails, Location, ModalityDetails};

pub const CLIENT_NAME_MAX_CHARS: usize = 50;
pub const DESCRIPTION_MAX_CHARS: usize = 300;

const ADDRESS_PLACEHOLDERS: &[&str] = &[
    "select a location",
    "selecciona una ubicación",
    "seleccione una ubicación",
    "ubicación",
    "unknown",
    "sin dirección",
];

fn contact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[67][0-9]{7}$").expect("contact pattern is a valid regex"))
}

fn meeting_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^https://(meet\.google\.com|([a-z0-9-]+\.)?zoom\.us|teams\.microsoft\.com|teams\.live\.com)(/\S*)?$",
        )
        .expect("meeting link pattern is a valid regex")
    })
}

// ==============================================================================
// FORM AND ERROR TYPES
// ==============================================================================

/// Raw booking form as entered by the requester. The modality is a tagged
/// union, so a form is either virtual with a link or presential with a location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingForm {
    pub client_name: String,
    pub client_contact: String,
    pub description: String,
    #[serde(flatten)]
    pub modality: ModalityDetails,
}

impl BookingForm {
    /// Pre-fills the form from an existing appointment for editing.
    pub fn from_details(details: &AppointmentDetails) -> Self {
        Self {
            client_name: details.client_name.clone(),
            client_contact: details.client_contact.clone(),
            description: details.description.clone(),
            modality: details.modality.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FormField {
    ClientName,
    ClientContact,
    Description,
    MeetingLink,
    Location,
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormField::ClientName => write!(f, "client_name"),
            FormField::ClientContact => write!(f, "client_contact"),
            FormField::Description => write!(f, "description"),
            FormField::MeetingLink => write!(f, "meeting_link"),
            FormField::Location => write!(f, "location"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldError {
    pub field: FormField,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn push(&mut self, field: FormField, message: impl Into<String>) {
        self.errors.push(FieldError { field, message: message.into() });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, field: FormField) -> Option<&str> {
        self.errors.iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = FormField> + '_ {
        self.errors.iter().map(|e| e.field)
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.errors.iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{}", joined)
    }
}

// ==============================================================================
// VALIDATION
// ==============================================================================

/// Validates every field and returns trimmed details, or all field errors at once.
pub fn validate_booking_form(form: &BookingForm) -> Result<AppointmentDetails, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let client_name = form.client_name.trim();
    if let Some(message) = check_client_name(client_name) {
        errors.push(FormField::ClientName, message);
    }

    let client_contact = form.client_contact.trim();
    if !contact_pattern().is_match(client_contact) {
        errors.push(
            FormField::ClientContact,
            "Contact must be an 8-digit mobile number starting with 6 or 7",
        );
    }

    let description = form.description.trim();
    if description.is_empty() {
        errors.push(FormField::Description, "Description is required");
    } else if description.chars().count() > DESCRIPTION_MAX_CHARS {
        errors.push(
            FormField::Description,
            format!("Description must be at most {} characters", DESCRIPTION_MAX_CHARS),
        );
    }

    let modality = match &form.modality {
        ModalityDetails::Virtual { meeting_link } => {
            let link = meeting_link.trim();
            if !meeting_link_pattern().is_match(link) {
                errors.push(
                    FormField::MeetingLink,
                    "Meeting link must be an https link to Google Meet, Zoom or Microsoft Teams",
                );
            }
            ModalityDetails::Virtual { meeting_link: link.to_string() }
        }
        ModalityDetails::Presential { location } => {
            if let Some(message) = check_location(location) {
                errors.push(FormField::Location, message);
            }
            ModalityDetails::Presential {
                location: Location {
                    lat: location.lat,
                    lon: location.lon,
                    address: location.address.trim().to_string(),
                },
            }
        }
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(AppointmentDetails {
        client_name: client_name.to_string(),
        client_contact: client_contact.to_string(),
        description: description.to_string(),
        modality,
    })
}

fn check_client_name(name: &str) -> Option<String> {
    if name.is_empty() {
        return Some("Name is required".to_string());
    }
    if name.chars().count() > CLIENT_NAME_MAX_CHARS {
        return Some(format!("Name must be at most {} characters", CLIENT_NAME_MAX_CHARS));
    }
    if !name.chars().all(|c| c.is_alphabetic() || c == ' ') {
        return Some("Name may only contain letters and spaces".to_string());
    }
    None
}

fn check_location(location: &Location) -> Option<String> {
    let address = location.address.trim();
    if address.is_empty() {
        return Some("Address is required".to_string());
    }
    let lowered = address.to_lowercase();
    if ADDRESS_PLACEHOLDERS.contains(&lowered.as_str()) {
        return Some("Pick a real address on the map".to_string());
    }
    if !location.lat.is_finite() || !(-90.0..=90.0).contains(&location.lat) {
        return Some("Latitude is out of range".to_string());
    }
    if !location.lon.is_finite() || !(-180.0..=180.0).contains(&location.lon) {
        return Some("Longitude is out of range".to_string());
    }
    None
}
