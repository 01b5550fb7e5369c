//! Demand record model and ingestion-time normalization.
//!
//! Backend payloads arrive partially typed: numeric fields may be JSON
//! numbers or strings, enum-like fields may hold unknown values, and
//! optional fields may be missing entirely. [`RawDemand`] accepts that
//! shape verbatim; [`Demand`] is the strongly-typed value every
//! downstream component consumes. Normalization happens exactly once,
//! here, and is never re-validated downstream.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Source marketplace of a demand signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    TikTok,
    Temu,
    Shein,
    Amazon,
    /// Any platform tag the backend emits that is not a known variant.
    #[serde(untagged)]
    Other(String),
}

impl Platform {
    fn from_raw(raw: Option<String>) -> Self {
        match raw.as_deref() {
            Some("TikTok") => Self::TikTok,
            Some("Temu") => Self::Temu,
            Some("Shein") => Self::Shein,
            Some("Amazon") | None | Some("") => Self::Amazon,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

/// Lifecycle status of a demand record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemandStatus {
    Inbound,
    Matching,
    Dispatched,
}

impl DemandStatus {
    fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            Some("matching") => Self::Matching,
            Some("dispatched") => Self::Dispatched,
            _ => Self::Inbound,
        }
    }
}

/// One unit of marketplace-intent data, fully normalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Demand {
    /// Backend-assigned opaque identifier, unique within the buffer.
    pub id: String,
    pub platform: Platform,
    pub product_name: String,
    /// Target unit price; absent, invalid, or negative values become zero.
    pub target_price: Decimal,
    /// Requested quantity; absent, invalid, or negative values become zero.
    pub quantity: u64,
    pub buyer_region: String,
    pub status: DemandStatus,
    /// RFC 3339 creation timestamp; defaults to ingestion time.
    pub date_created: String,
    pub date_expires: Option<String>,
    /// Asset reference, rewritten to a proxy-relative path unless it is
    /// already an absolute URL.
    pub product_image: Option<String>,
}

/// Demand payload exactly as the backend delivers it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDemand {
    pub id: String,
    pub platform: Option<String>,
    pub product_name: Option<String>,
    pub target_price: Option<serde_json::Value>,
    pub quantity: Option<serde_json::Value>,
    pub buyer_region: Option<String>,
    pub status: Option<String>,
    pub date_created: Option<String>,
    pub date_expires: Option<String>,
    pub product_image: Option<String>,
}

impl RawDemand {
    /// Normalizes the raw payload into a [`Demand`].
    ///
    /// `asset_prefix` is prepended to bare image identifiers so the
    /// display layer can fetch them through the proxy.
    #[must_use]
    pub fn normalize(self, asset_prefix: &str) -> Demand {
        Demand {
            id: self.id,
            platform: Platform::from_raw(self.platform),
            product_name: self.product_name.unwrap_or_default(),
            target_price: coerce_decimal(self.target_price),
            quantity: coerce_quantity(self.quantity),
            buyer_region: self
                .buyer_region
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            status: DemandStatus::from_raw(self.status.as_deref()),
            date_created: self
                .date_created
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| Utc::now().to_rfc3339()),
            date_expires: self.date_expires.filter(|d| !d.is_empty()),
            product_image: self.product_image.filter(|i| !i.is_empty()).map(|image| {
                if image.starts_with("http") {
                    image
                } else {
                    format!("{asset_prefix}/assets/{image}")
                }
            }),
        }
    }
}

/// Coerces a JSON number or numeric string into a non-negative decimal.
fn coerce_decimal(value: Option<serde_json::Value>) -> Decimal {
    let parsed = match value {
        Some(serde_json::Value::Number(n)) => n.to_string().parse::<Decimal>().ok(),
        Some(serde_json::Value::String(s)) => s.parse::<Decimal>().ok(),
        _ => None,
    };
    parsed.filter(|d| !d.is_sign_negative()).unwrap_or_default()
}

/// Coerces a JSON number or numeric string into a non-negative count.
fn coerce_quantity(value: Option<serde_json::Value>) -> u64 {
    match value {
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(serde_json::Value::String(s)) => s.parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw(id: &str) -> RawDemand {
        RawDemand {
            id: id.to_string(),
            platform: None,
            product_name: None,
            target_price: None,
            quantity: None,
            buyer_region: None,
            status: None,
            date_created: None,
            date_expires: None,
            product_image: None,
        }
    }

    #[test]
    fn absent_fields_get_documented_defaults() {
        let demand = raw("d1").normalize("/api/backend");

        assert_eq!(demand.id, "d1");
        assert_eq!(demand.platform, Platform::Amazon);
        assert_eq!(demand.product_name, "");
        assert_eq!(demand.target_price, Decimal::ZERO);
        assert_eq!(demand.quantity, 0);
        assert_eq!(demand.buyer_region, "Unknown");
        assert_eq!(demand.status, DemandStatus::Inbound);
        assert!(!demand.date_created.is_empty());
        assert!(demand.date_expires.is_none());
        assert!(demand.product_image.is_none());
    }

    #[test]
    fn numeric_strings_are_coerced() {
        let mut r = raw("d2");
        r.target_price = Some(serde_json::json!("19.99"));
        r.quantity = Some(serde_json::json!("250"));
        let demand = r.normalize("");

        assert_eq!(demand.target_price, dec!(19.99));
        assert_eq!(demand.quantity, 250);
    }

    #[test]
    fn invalid_and_negative_numerics_become_zero() {
        let mut r = raw("d3");
        r.target_price = Some(serde_json::json!("not-a-price"));
        r.quantity = Some(serde_json::json!(-5));
        let demand = r.normalize("");

        assert_eq!(demand.target_price, Decimal::ZERO);
        assert_eq!(demand.quantity, 0);

        let mut r = raw("d4");
        r.target_price = Some(serde_json::json!(-3.5));
        let demand = r.normalize("");
        assert_eq!(demand.target_price, Decimal::ZERO);
    }

    #[test]
    fn unknown_platform_preserved_as_other() {
        let mut r = raw("d5");
        r.platform = Some("Etsy".to_string());
        assert_eq!(r.normalize("").platform, Platform::Other("Etsy".into()));
    }

    #[test]
    fn unknown_status_defaults_to_inbound() {
        let mut r = raw("d6");
        r.status = Some("archived".to_string());
        assert_eq!(r.normalize("").status, DemandStatus::Inbound);
    }

    #[test]
    fn image_id_rewritten_absolute_url_kept() {
        let mut r = raw("d7");
        r.product_image = Some("abc123".to_string());
        assert_eq!(
            r.normalize("/api/backend").product_image.as_deref(),
            Some("/api/backend/assets/abc123")
        );

        let mut r = raw("d8");
        r.product_image = Some("https://cdn.example.com/x.jpg".to_string());
        assert_eq!(
            r.normalize("/api/backend").product_image.as_deref(),
            Some("https://cdn.example.com/x.jpg")
        );
    }
}
