//! Notion database query response shapes.
//!
//! Pages are kept as loose JSON: property layouts vary between databases, and
//! a missing or oddly typed property must degrade to "absent" instead of
//! failing the whole query.

use serde::Deserialize;
use serde_json::Value;

use super::{ExternalTask, FetchError, PropertyNames, SourceSnapshot};

/// Body returned by `POST /v1/databases/{id}/query`.
#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<Page>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// A single database row.
#[derive(Debug, Deserialize)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, Value>,
}

impl Page {
    /// Extract the fields deckhand mirrors.
    pub fn to_external(&self, names: &PropertyNames) -> ExternalTask {
        ExternalTask {
            id: self.id.clone(),
            title: self.title(&names.title),
            status: self.label(&names.status),
            priority: self.label(&names.priority),
        }
    }

    /// First rich-text fragment of the title property.
    ///
    /// Falls back to whichever property has type `title` when the configured
    /// name is not present; every Notion database has exactly one.
    fn title(&self, name: &str) -> Option<String> {
        let property = self.properties.get(name).or_else(|| {
            self.properties
                .values()
                .find(|p| p.get("type").and_then(Value::as_str) == Some("title"))
        })?;

        property
            .get("title")?
            .as_array()?
            .first()?
            .get("plain_text")?
            .as_str()
            .map(str::to_string)
    }

    /// Name of a select or status option.
    fn label(&self, name: &str) -> Option<String> {
        let property = self.properties.get(name)?;
        ["select", "status"].iter().find_map(|kind| {
            property
                .get(*kind)?
                .get("name")?
                .as_str()
                .map(str::to_string)
        })
    }
}

/// Parse a query response body into a snapshot.
pub fn parse_query_response(
    body: &str,
    names: &PropertyNames,
) -> Result<SourceSnapshot, FetchError> {
    let response: QueryResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;

    Ok(SourceSnapshot {
        tasks: response
            .results
            .iter()
            .map(|page| page.to_external(names))
            .collect(),
        truncated: response.has_more,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "object": "list",
        "results": [
            {
                "object": "page",
                "id": "a",
                "properties": {
                    "Name": {"id": "title", "type": "title", "title": [{"plain_text": "Write spec"}]},
                    "Status": {"type": "select", "select": {"name": "In Progress"}},
                    "Priority": {"type": "select", "select": null}
                }
            },
            {
                "object": "page",
                "id": "b",
                "properties": {
                    "Name": {"id": "title", "type": "title", "title": []},
                    "Status": {"type": "status", "status": {"name": "Done"}},
                    "Priority": {"type": "select", "select": {"name": "P0"}}
                }
            },
            {
                "object": "page",
                "id": "c",
                "properties": {}
            }
        ],
        "has_more": false,
        "next_cursor": null
    }"#;

    #[test]
    fn test_parse_fixture() {
        let snapshot = parse_query_response(FIXTURE, &PropertyNames::default()).unwrap();
        assert!(!snapshot.truncated);
        assert_eq!(snapshot.tasks.len(), 3);

        let a = &snapshot.tasks[0];
        assert_eq!(a.id, "a");
        assert_eq!(a.title.as_deref(), Some("Write spec"));
        assert_eq!(a.status.as_deref(), Some("In Progress"));
        assert_eq!(a.priority, None);

        let b = &snapshot.tasks[1];
        assert_eq!(b.title, None);
        assert_eq!(b.status.as_deref(), Some("Done"));
        assert_eq!(b.priority.as_deref(), Some("P0"));

        let c = &snapshot.tasks[2];
        assert_eq!(c.title, None);
        assert_eq!(c.status, None);
        assert_eq!(c.priority, None);
    }

    #[test]
    fn test_has_more_marks_truncated() {
        let body = r#"{"results": [], "has_more": true, "next_cursor": "xyz"}"#;
        let snapshot = parse_query_response(body, &PropertyNames::default()).unwrap();
        assert!(snapshot.truncated);
        assert!(snapshot.tasks.is_empty());
    }

    #[test]
    fn test_title_falls_back_to_title_typed_property() {
        let body = r#"{"results": [{
            "id": "x",
            "properties": {"Task": {"type": "title", "title": [{"plain_text": "Renamed"}]}}
        }]}"#;
        let snapshot = parse_query_response(body, &PropertyNames::default()).unwrap();
        assert_eq!(snapshot.tasks[0].title.as_deref(), Some("Renamed"));
    }

    #[test]
    fn test_custom_property_names() {
        let body = r#"{"results": [{
            "id": "x",
            "properties": {
                "State": {"type": "select", "select": {"name": "Done"}},
                "Urgency": {"type": "select", "select": {"name": "P1"}}
            }
        }]}"#;
        let names = PropertyNames {
            title: "Name".to_string(),
            status: "State".to_string(),
            priority: "Urgency".to_string(),
        };
        let snapshot = parse_query_response(body, &names).unwrap();
        assert_eq!(snapshot.tasks[0].status.as_deref(), Some("Done"));
        assert_eq!(snapshot.tasks[0].priority.as_deref(), Some("P1"));
    }

    #[test]
    fn test_malformed_body_is_parse_error() {
        let result = parse_query_response("not json", &PropertyNames::default());
        assert!(matches!(result, Err(FetchError::Parse(_))));
    }
}
