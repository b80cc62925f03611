use serde::{Deserialize as _, Deserializer};
use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A report member: `None` when the browser left it out, `Some(None)` when it
/// sent an explicit `null`. Both round-trip as received.
pub type Member<T> = Option<Option<T>>;

fn nullable<'de, D, T>(de: D) -> Result<Member<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Body of a `report-uri` request, forwarded to Sentry in the same shape.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "csp-report")]
    pub report: Report,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single violation. Members the browser left out stay out when the report
/// is serialized again, members we don't know about are carried in `extra`.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Report {
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub blocked_uri: Member<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub document_uri: Member<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub referrer: Member<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub original_policy: Member<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub violated_directive: Member<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub effective_directive: Member<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub disposition: Member<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub script_sample: Member<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub source_file: Member<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub status_code: Member<i64>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub line_number: Member<i64>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub column_number: Member<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Report {
    /// The blocked resource, empty when the browser sent none.
    pub fn blocked_uri(&self) -> &str {
        text(&self.blocked_uri)
    }

    pub fn document_uri(&self) -> &str {
        text(&self.document_uri)
    }
}

fn text(member: &Member<String>) -> &str {
    member.as_ref().and_then(Option::as_deref).unwrap_or_default()
}

impl Envelope {
    pub fn decode(body: &[u8]) -> serde_json::Result<Envelope> {
        serde_json::from_slice(body)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
