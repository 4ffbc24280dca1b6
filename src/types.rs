use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type RecordId = i64;

/// Headers captured from a webhook request at ingestion time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedHeaders {
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub user_agent: String,
}

/// A persisted webhook delivery, one row of the log table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRecord {
    pub id: RecordId,
    pub received_at: Option<String>,
    #[serde(default)]
    pub headers: CapturedHeaders,
    #[serde(default = "empty_object")]
    pub data: Value,
}

/// A record before the store has assigned it an id.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub received_at: Option<String>,
    pub headers: CapturedHeaders,
    pub data: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl WebhookRecord {
    /// Parsed `received_at`, or `None` when absent or unparseable.
    pub fn received_instant(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.received_at.as_deref()?)
    }

    pub fn email(&self) -> EmailPayload {
        EmailPayload::from_value(&self.data)
    }
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Shape of the `to` field: a bare address, an object carrying an `email`,
/// or a (possibly nested) list of either.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Recipient {
    PlainAddress(String),
    ListOf(Vec<Recipient>),
    AddressObject { email: Option<String> },
    Unknown(Value),
}

impl Recipient {
    fn collect<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Recipient::PlainAddress(addr) => out.push(addr),
            Recipient::AddressObject { email: Some(addr) } => out.push(addr),
            Recipient::AddressObject { email: None } | Recipient::Unknown(_) => {}
            Recipient::ListOf(items) => {
                for item in items {
                    item.collect(out);
                }
            }
        }
    }

    /// Flatten every address and join them for display.
    pub fn display(&self) -> String {
        let mut parts = Vec::new();
        self.collect(&mut parts);
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub const NO_SUBJECT: &str = "(no subject)";

/// Logical view of the email fields inside a record's `data`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailPayload {
    pub to: Option<Recipient>,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub html: Option<String>,
}

impl EmailPayload {
    pub fn from_value(data: &Value) -> Self {
        let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
        let to = data
            .get("to")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value::<Recipient>(v.clone()).ok());
        Self {
            to,
            from: text("from"),
            subject: text("subject"),
            html: text("html"),
        }
    }

    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or(NO_SUBJECT)
    }

    pub fn sender(&self) -> &str {
        self.from.as_deref().unwrap_or("")
    }

    pub fn recipients(&self) -> String {
        self.to.as_ref().map(Recipient::display).unwrap_or_default()
    }

    /// The HTML body, or `None` when absent or empty.
    pub fn body(&self) -> Option<&str> {
        self.html.as_deref().filter(|h| !h.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recipients_flatten_nested_lists_and_objects() {
        let email = EmailPayload::from_value(&json!({
            "to": ["a@x.com", [{"email": "b@y.com"}, {"name": "nobody"}], 42, ""]
        }));
        assert_eq!(email.recipients(), "a@x.com, b@y.com");
    }

    #[test]
    fn recipient_shapes() {
        let plain = EmailPayload::from_value(&json!({ "to": "c@z.com" }));
        assert_eq!(plain.recipients(), "c@z.com");

        let object = EmailPayload::from_value(&json!({ "to": { "email": "d@z.com" } }));
        assert_eq!(object.recipients(), "d@z.com");

        let missing = EmailPayload::from_value(&json!({ "to": null }));
        assert_eq!(missing.recipients(), "");
    }

    #[test]
    fn subject_defaults_and_empty_body() {
        let email = EmailPayload::from_value(&json!({ "html": "" }));
        assert_eq!(email.subject(), NO_SUBJECT);
        assert_eq!(email.sender(), "");
        assert!(email.body().is_none());
    }

    #[test]
    fn unparseable_timestamp_is_none() {
        let record = WebhookRecord {
            id: 1,
            received_at: Some("yesterday-ish".into()),
            headers: CapturedHeaders::default(),
            data: json!({}),
        };
        assert!(record.received_instant().is_none());
    }

    #[test]
    fn record_without_data_deserializes() {
        let record: WebhookRecord =
            serde_json::from_value(json!({ "id": 3, "received_at": null })).unwrap();
        assert_eq!(record.data, json!({}));
        assert_eq!(record.headers, CapturedHeaders::default());
    }
}
