use serde::{Deserialize, Deserializer};

use super::PanelError;

// ─── Response envelope ───────────────────────────────────────────

/// Every panel API answer is wrapped as `{success, msg, obj}`.
/// `obj` is `null` whenever `success` is false.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(rename = "msg", alias = "message", default)]
    pub message: String,
    #[serde(rename = "obj", alias = "object")]
    pub object: Option<T>,
}

impl<T: Default> Envelope<T> {
    /// Unwrap the payload, turning `success: false` into `RemoteApi`.
    pub fn into_result(self) -> Result<T, PanelError> {
        if !self.success {
            return Err(PanelError::RemoteApi(self.message));
        }
        Ok(self.object.unwrap_or_default())
    }
}

// ─── Inbounds ────────────────────────────────────────────────────

/// Per-client counters attached to an inbound.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientStats {
    pub id: i64,
    pub inbound_id: i64,
    pub enable: bool,
    pub email: String,
    pub up: i64,
    pub down: i64,
    pub expiry_time: i64,
    pub total: i64,
    pub reset: i64,
}

/// A routing rule as listed by `panel/api/inbounds/list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Inbound {
    pub id: i64,
    pub up: i64,
    pub down: i64,
    pub total: i64,
    pub remark: String,
    pub enable: bool,
    pub expiry_time: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub client_stats: Vec<ClientStats>,
    pub listen: String,
    pub port: i64,
    pub protocol: String,
    pub tag: String,
}

/// Emails of the clients currently connected, from `panel/api/inbounds/onlines`.
pub type Online = Vec<String>;

/// The panel serialises empty lists as `null`.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Traffic counters are signed on the wire; negative values carry no meaning.
pub(crate) fn bytes(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
