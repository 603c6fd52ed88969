//! Singleton settings documents.
//!
//! Each concern (payment, shipping, collection) is one row keyed by name.
//! Reads overlay the stored document on the built-in defaults, so a missing
//! row or a missing field falls back to the default. Updates are JSON merges:
//! fields absent from the patch keep their current value.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, DatabaseConnection, EntityTrait};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::entities::{setting, GatewayKind};
use crate::errors::ServiceError;

pub trait SettingsDocument: Serialize + DeserializeOwned + Default {
    const KEY: &'static str;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct PaymentSettings {
    pub enabled_gateways: Vec<GatewayKind>,
    pub bank_name: String,
    pub account_name: String,
    pub account_number: String,
    pub manual_transfer_instructions: String,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            enabled_gateways: vec![GatewayKind::Manual],
            bank_name: String::new(),
            account_name: String::new(),
            account_number: String::new(),
            manual_transfer_instructions:
                "Transfer the total amount and upload your receipt; we confirm within one business day."
                    .to_string(),
        }
    }
}

impl SettingsDocument for PaymentSettings {
    const KEY: &'static str = "payment";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ShippingSettings {
    /// Flat courier rate before markup and handling fees.
    pub base_rate: Decimal,
    pub free_shipping_enabled: bool,
    pub free_shipping_threshold: Decimal,
    /// When non-empty, every cart line must belong to one of these
    /// categories for the cart to ship free.
    pub free_shipping_categories: Vec<String>,
}

impl Default for ShippingSettings {
    fn default() -> Self {
        Self {
            base_rate: dec!(10),
            free_shipping_enabled: false,
            free_shipping_threshold: dec!(300),
            free_shipping_categories: Vec::new(),
        }
    }
}

impl SettingsDocument for ShippingSettings {
    const KEY: &'static str = "shipping";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct CollectionSettings {
    pub enabled: bool,
    /// Prefix of the reference printed on self-collection orders.
    pub reference_prefix: String,
    pub address: String,
    pub opening_hours: String,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reference_prefix: "PICKUP".to_string(),
            address: String::new(),
            opening_hours: String::new(),
        }
    }
}

impl SettingsDocument for CollectionSettings {
    const KEY: &'static str = "collection";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SettingsKind {
    Payment,
    Shipping,
    Collection,
}

/// Recursively overlays `patch` on `base`. Objects merge key by key; any
/// other value replaces what was there.
pub fn merge_json(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[derive(Clone)]
pub struct SettingsService {
    db: Arc<DatabaseConnection>,
}

impl SettingsService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn load_value<T: SettingsDocument>(&self) -> Result<Value, ServiceError> {
        let mut value = serde_json::to_value(T::default())?;
        if let Some(row) = setting::Entity::find_by_id(T::KEY.to_string())
            .one(&*self.db)
            .await?
        {
            merge_json(&mut value, row.value);
        }
        Ok(value)
    }

    pub async fn get<T: SettingsDocument>(&self) -> Result<T, ServiceError> {
        let value = self.load_value::<T>().await?;
        serde_json::from_value(value).map_err(|e| {
            ServiceError::ConfigurationError(format!("stored {} settings are invalid: {e}", T::KEY))
        })
    }

    #[instrument(skip(self, patch), fields(key = T::KEY))]
    pub async fn update<T: SettingsDocument>(&self, patch: Value) -> Result<T, ServiceError> {
        if !patch.is_object() {
            return Err(ServiceError::ValidationError(
                "settings patch must be a JSON object".into(),
            ));
        }

        let mut value = self.load_value::<T>().await?;
        merge_json(&mut value, patch);
        let merged: T = serde_json::from_value(value).map_err(|e| {
            ServiceError::ValidationError(format!("invalid {} settings: {e}", T::KEY))
        })?;
        let normalized = serde_json::to_value(&merged)?;

        let row = setting::ActiveModel {
            key: Set(T::KEY.to_string()),
            value: Set(normalized),
            updated_at: Set(Utc::now()),
        };
        setting::Entity::insert(row)
            .on_conflict(
                OnConflict::column(setting::Column::Key)
                    .update_columns([setting::Column::Value, setting::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&*self.db)
            .await?;

        info!("settings updated");
        Ok(merged)
    }

    pub async fn get_json(&self, kind: SettingsKind) -> Result<Value, ServiceError> {
        Ok(match kind {
            SettingsKind::Payment => serde_json::to_value(self.get::<PaymentSettings>().await?)?,
            SettingsKind::Shipping => serde_json::to_value(self.get::<ShippingSettings>().await?)?,
            SettingsKind::Collection => {
                serde_json::to_value(self.get::<CollectionSettings>().await?)?
            }
        })
    }

    pub async fn update_json(
        &self,
        kind: SettingsKind,
        patch: Value,
    ) -> Result<Value, ServiceError> {
        Ok(match kind {
            SettingsKind::Payment => {
                serde_json::to_value(self.update::<PaymentSettings>(patch).await?)?
            }
            SettingsKind::Shipping => {
                serde_json::to_value(self.update::<ShippingSettings>(patch).await?)?
            }
            SettingsKind::Collection => {
                serde_json::to_value(self.update::<CollectionSettings>(patch).await?)?
            }
        })
    }
}
