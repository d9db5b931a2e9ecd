use crate::core::boolean::deserialize_bool_like;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub type ClientId = i64;
pub type ServiceId = i64;
pub type UniteId = i64;

/// Cache key of a price lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceKey {
    pub client_id: ClientId,
    pub service_id: ServiceId,
    pub unite_id: UniteId,
}

impl PriceKey {
    /// Builds a key only when all three ids are known.
    pub fn from_parts(
        client_id: Option<ClientId>,
        service_id: Option<ServiceId>,
        unite_id: Option<UniteId>,
    ) -> Option<Self> {
        Some(Self {
            client_id: client_id?,
            service_id: service_id?,
            unite_id: unite_id?,
        })
    }
}

/// Body of the remote price calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRequest {
    pub client_id: ClientId,
    pub service_id: ServiceId,
    pub unite_id: UniteId,
    pub date: NaiveDate,
}

impl PriceRequest {
    pub fn new(key: PriceKey, date: NaiveDate) -> Self {
        Self {
            client_id: key.client_id,
            service_id: key.service_id,
            unite_id: key.unite_id,
            date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalcMode {
    /// Lines with no price yet.
    Missing,
    /// Every line the user did not price by hand.
    All,
    /// Same selection as `All`, after the invoice changed client.
    ClientChange,
    /// One line, even if it was priced by hand.
    Single(usize),
}

impl RecalcMode {
    pub fn forces_lookup(&self) -> bool {
        matches!(self, RecalcMode::ClientChange | RecalcMode::Single(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactureLine {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub service_id: Option<ServiceId>,
    #[serde(default)]
    pub unite_id: Option<UniteId>,
    #[serde(default = "default_quantite", deserialize_with = "deserialize_price")]
    pub quantite: f64,
    #[serde(default, deserialize_with = "deserialize_price")]
    pub prix_unitaire: f64,
    #[serde(default, deserialize_with = "deserialize_price")]
    pub total_ligne: f64,
}

fn default_quantite() -> f64 {
    1.0
}

impl FactureLine {
    pub fn new(service_id: ServiceId, unite_id: UniteId, quantite: f64) -> Self {
        Self {
            description: String::new(),
            service_id: Some(service_id),
            unite_id: Some(unite_id),
            quantite,
            prix_unitaire: 0.0,
            total_ligne: 0.0,
        }
    }

    pub fn has_price(&self) -> bool {
        self.prix_unitaire > 0.0
    }

    pub fn set_prix(&mut self, prix: f64) {
        self.prix_unitaire = prix;
        self.recompute_total();
    }

    pub fn recompute_total(&mut self) {
        self.total_ligne = round_cents(self.quantite * self.prix_unitaire);
    }
}

pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Client {
    pub id: ClientId,
    pub nom: String,
    #[serde(default)]
    pub prenom: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub telephone: Option<String>,
    #[serde(default, deserialize_with = "deserialize_bool_like")]
    pub is_therapeute: bool,
    #[serde(default, deserialize_with = "deserialize_bool_like")]
    pub has_factures: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Service {
    pub id: ServiceId,
    pub nom: String,
    #[serde(default = "default_true", deserialize_with = "deserialize_bool_like")]
    pub actif: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Unite {
    pub id: UniteId,
    pub nom: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Tarif {
    pub id: i64,
    pub service_id: ServiceId,
    pub unite_id: UniteId,
    #[serde(deserialize_with = "deserialize_price")]
    pub prix: f64,
    #[serde(default, deserialize_with = "deserialize_bool_like")]
    pub is_default: bool,
    #[serde(default = "default_true", deserialize_with = "deserialize_bool_like")]
    pub actif: bool,
}

/// Per-client override of a [`Tarif`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TarifSpecial {
    pub id: i64,
    pub client_id: ClientId,
    pub service_id: ServiceId,
    pub unite_id: UniteId,
    #[serde(deserialize_with = "deserialize_price")]
    pub prix: f64,
}

fn default_true() -> bool {
    true
}

/// Amounts come back as JSON numbers or as decimal strings (`"45.00"`).
/// `null` and empty strings are treated as 0.
pub fn deserialize_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    price_from_value(&value).map_err(serde::de::Error::custom)
}

pub fn price_from_value(value: &Value) -> Result<f64, String> {
    match value {
        Value::Null => Ok(0.0),
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("invalid amount: {}", n)),
        Value::String(s) if s.trim().is_empty() => Ok(0.0),
        Value::String(s) => s
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .map_err(|_| format!("invalid amount: {:?}", s)),
        other => Err(format!("invalid amount: {}", other)),
    }
}
