use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Structured PR summary the model must return.
///
/// All four keys are required. Missing keys make the response malformed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Short highlight bullets
    #[serde(deserialize_with = "one_or_many")]
    pub tldr: Vec<String>,
    pub file_summaries: Vec<FileSummary>,
    pub impact: String,
    /// One representative code excerpt
    pub key_snippet: String,
}

/// A file-level summary entry. Models usually return a bare string or an
/// object; anything else is kept as raw JSON rather than failing the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileSummary {
    PlainText(String),
    Structured {
        #[serde(
            default,
            alias = "name",
            alias = "filename",
            alias = "path",
            deserialize_with = "loose_text"
        )]
        file: Option<String>,
        #[serde(
            default,
            alias = "description",
            alias = "change",
            deserialize_with = "loose_text"
        )]
        summary: Option<String>,
    },
    Other(Value),
}

impl FileSummary {
    /// One markdown bullet line, without trailing newline.
    pub fn to_bullet(&self) -> String {
        match self {
            FileSummary::PlainText(text) => format!("- {}", text.trim()),
            FileSummary::Structured { file, summary } => {
                let name = file.as_deref().map(str::trim).filter(|s| !s.is_empty());
                let desc = summary.as_deref().map(str::trim).filter(|s| !s.is_empty());
                format!(
                    "- **{}**: {}",
                    name.unwrap_or("Unknown file"),
                    desc.unwrap_or("No description")
                )
            }
            FileSummary::Other(value) => {
                format!("- {}", value_text(value).unwrap_or_else(|| "No description".to_string()))
            }
        }
    }
}

/// Text of a JSON value; lists are joined with "; ".
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_text).collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        other => Some(other.to_string()),
    }
}

fn loose_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_text))
}

/// Accept `"text"` as well as `["text", ...]`.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.trim().is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_mixed_file_summaries() {
        let json = r#"{
            "tldr": ["Fixes crash", "Adds test"],
            "file_summaries": [
                "src/main.py: guard against None",
                {"file": "src/util.py", "summary": "new helper"},
                {"name": "README.md", "description": "docs"},
                {"unexpected": true}
            ],
            "impact": "Low risk",
            "key_snippet": "if x is None:\n    return"
        }"#;
        let summary: Summary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.tldr.len(), 2);
        let bullets: Vec<String> = summary.file_summaries.iter().map(|f| f.to_bullet()).collect();
        assert_eq!(
            bullets,
            vec![
                "- src/main.py: guard against None",
                "- **src/util.py**: new helper",
                "- **README.md**: docs",
                "- **Unknown file**: No description",
            ]
        );
    }

    #[test]
    fn test_file_summaries_of_any_shape_are_accepted() {
        let json = r#"{
            "tldr": ["Refactor"],
            "file_summaries": [
                {"file": "a.py", "summary": ["added x", "removed y"]},
                {"path": "b.py", "change": 3},
                42,
                ["c.py", "renamed"]
            ],
            "impact": "None",
            "key_snippet": ""
        }"#;
        let summary: Summary = serde_json::from_str(json).unwrap();
        let bullets: Vec<String> = summary.file_summaries.iter().map(|f| f.to_bullet()).collect();
        assert_eq!(
            bullets,
            vec![
                "- **a.py**: added x; removed y",
                "- **b.py**: 3",
                "- 42",
                "- c.py; renamed",
            ]
        );
    }

    #[test]
    fn test_tldr_as_single_string() {
        let json = r#"{"tldr":"One line","file_summaries":[],"impact":"","key_snippet":""}"#;
        let summary: Summary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.tldr, vec!["One line".to_string()]);
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let json = r#"{"tldr":[],"file_summaries":[],"impact":"none"}"#;
        assert!(serde_json::from_str::<Summary>(json).is_err());
    }
}
