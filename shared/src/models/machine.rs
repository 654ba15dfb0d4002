//! Machine and spare part catalog

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::employee::UserRole;
use crate::validation::validate_non_negative;

/// A packaging machine, keyed by its model name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Machine {
    pub model: String,
    pub original_model: Option<String>,
    pub packing_speed: Option<String>,
    pub general_power: Option<String>,
    pub power_supply: Option<String>,
    pub air_source: Option<String>,
    pub machine_weight: Option<String>,
    pub dimensions: Option<String>,
    pub package_material: Option<String>,
    /// Thumbnail path relative to the assets directory
    pub image: Option<String>,
    pub added_count: i32,
    /// Purchase price; admins only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_price: Option<Decimal>,
    pub show_price: Option<Decimal>,
    /// Model-specific attributes as a JSON object
    pub custom_attrs: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A spare part type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PartType {
    pub part_type_id: i32,
    pub part_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_price: Option<Decimal>,
    pub show_price: Option<Decimal>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Only admins see purchase prices
pub fn can_see_original_price(role: UserRole) -> bool {
    role == UserRole::Admin
}

impl Machine {
    /// Drop fields the viewer's role may not see
    pub fn visible_to(mut self, role: UserRole) -> Self {
        if !can_see_original_price(role) {
            self.original_price = None;
        }
        self
    }
}

impl PartType {
    pub fn visible_to(mut self, role: UserRole) -> Self {
        if !can_see_original_price(role) {
            self.original_price = None;
        }
        self
    }
}

// ============================================================================
// Inputs
// ============================================================================

const MAX_KEY_LEN: usize = 100;

/// Machine fields for create, update and import
///
/// Absent fields leave the stored value unchanged on update and import.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MachineInput {
    pub model: Option<String>,
    pub original_model: Option<String>,
    pub packing_speed: Option<String>,
    pub general_power: Option<String>,
    pub power_supply: Option<String>,
    pub air_source: Option<String>,
    pub machine_weight: Option<String>,
    pub dimensions: Option<String>,
    pub package_material: Option<String>,
    pub image: Option<String>,
    pub added_count: Option<i32>,
    pub original_price: Option<Decimal>,
    pub show_price: Option<Decimal>,
    pub custom_attrs: Option<serde_json::Value>,
}

/// Part type fields for create, update and import
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PartTypeInput {
    pub part_model: Option<String>,
    pub original_price: Option<Decimal>,
    pub show_price: Option<Decimal>,
    pub image: Option<String>,
}

/// A rejected catalog field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogFieldError {
    pub field: &'static str,
    pub message: &'static str,
}

impl std::fmt::Display for CatalogFieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn field_error(field: &'static str, message: &'static str) -> CatalogFieldError {
    CatalogFieldError { field, message }
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Trimmed catalog key; keys are required, short and free of control characters
fn catalog_key(field: &'static str, value: Option<&str>) -> Result<String, CatalogFieldError> {
    let key = value.map(str::trim).unwrap_or_default();
    if key.is_empty() {
        return Err(field_error(field, "is required"));
    }
    if key.chars().count() > MAX_KEY_LEN {
        return Err(field_error(field, "must be at most 100 characters"));
    }
    if key.chars().any(|c| c.is_control() || c == '/') {
        return Err(field_error(field, "cannot contain control characters or '/'"));
    }
    Ok(key.to_string())
}

fn check_price(field: &'static str, price: Option<Decimal>) -> Result<(), CatalogFieldError> {
    match price {
        Some(p) => validate_non_negative(p).map_err(|msg| field_error(field, msg)),
        None => Ok(()),
    }
}

impl MachineInput {
    /// Trim text fields and check numbers; `require_model` for creates and imports
    pub fn normalized(mut self, require_model: bool) -> Result<Self, CatalogFieldError> {
        self.model = if require_model {
            Some(catalog_key("model", self.model.as_deref())?)
        } else {
            clean(self.model)
        };
        self.original_model = clean(self.original_model);
        self.packing_speed = clean(self.packing_speed);
        self.general_power = clean(self.general_power);
        self.power_supply = clean(self.power_supply);
        self.air_source = clean(self.air_source);
        self.machine_weight = clean(self.machine_weight);
        self.dimensions = clean(self.dimensions);
        self.package_material = clean(self.package_material);
        self.image = clean(self.image);

        if matches!(self.added_count, Some(n) if n < 0) {
            return Err(field_error("added_count", "cannot be negative"));
        }
        check_price("original_price", self.original_price)?;
        check_price("show_price", self.show_price)?;

        self.custom_attrs = match self.custom_attrs {
            None | Some(serde_json::Value::Null) => None,
            Some(attrs @ serde_json::Value::Object(_)) => Some(attrs),
            Some(_) => return Err(field_error("custom_attrs", "must be a JSON object")),
        };
        Ok(self)
    }
}

impl PartTypeInput {
    pub fn normalized(mut self, require_model: bool) -> Result<Self, CatalogFieldError> {
        self.part_model = match (require_model, self.part_model.as_deref()) {
            (true, value) => Some(catalog_key("part_model", value)?),
            (false, Some(value)) if !value.trim().is_empty() => {
                Some(catalog_key("part_model", Some(value))?)
            }
            (false, _) => None,
        };
        self.image = clean(self.image);
        check_price("original_price", self.original_price)?;
        check_price("show_price", self.show_price)?;
        Ok(self)
    }
}

// ============================================================================
// Import
// ============================================================================

/// A record that could not be imported
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportFailure {
    /// Position in the submitted list
    pub index: usize,
    pub key: Option<String>,
    pub reason: String,
}

/// Outcome of a catalog import
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ImportReport {
    pub imported_count: usize,
    pub failed_count: usize,
    pub failed_records: Vec<ImportFailure>,
}

impl ImportReport {
    pub fn record_success(&mut self) {
        self.imported_count += 1;
    }

    pub fn record_failure(&mut self, index: usize, key: Option<String>, reason: impl Into<String>) {
        self.failed_count += 1;
        self.failed_records.push(ImportFailure {
            index,
            key,
            reason: reason.into(),
        });
    }
}

/// Split an import payload into rows
///
/// Accepts a single object or an array of objects. Rows that do not
/// deserialize come back as `Err` with the reason so the rest can proceed.
pub fn import_rows<T: DeserializeOwned>(
    payload: serde_json::Value,
) -> Result<Vec<Result<T, String>>, &'static str> {
    let items = match payload {
        serde_json::Value::Array(items) => items,
        object @ serde_json::Value::Object(_) => vec![object],
        _ => return Err("JSON must be an object or an array of objects"),
    };
    if items.is_empty() {
        return Err("No records to import");
    }

    Ok(items
        .into_iter()
        .map(|item| {
            if !item.is_object() {
                return Err("record is not a JSON object".to_string());
            }
            serde_json::from_value(item).map_err(|e| e.to_string())
        })
        .collect())
}
