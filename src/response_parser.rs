use serde::de::DeserializeOwned;

/// Top-level structure the caller expects to find in a model reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Object,
    Array,
}

impl JsonShape {
    fn delimiters(&self) -> (char, char) {
        match self {
            JsonShape::Object => ('{', '}'),
            JsonShape::Array => ('[', ']'),
        }
    }
}

/// Why a reply could not be turned into the expected type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// No opening/closing delimiter pair was found.
    StructureNotFound,
    /// The sliced text was not valid JSON for the target type.
    Invalid(String),
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseFailure::StructureNotFound => f.write_str("no JSON structure found in response"),
            ParseFailure::Invalid(message) => write!(f, "invalid JSON: {}", message),
        }
    }
}

/// Centralized JSON response parser with tolerant extraction logic
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonResponseParser;

impl JsonResponseParser {
    /// Strip code fences and slice from the first opening delimiter to the
    /// last closing one.
    pub fn extract_json_from_response(content: &str, shape: JsonShape) -> Option<String> {
        let unfenced = strip_code_fences(content);
        let (open, close) = shape.delimiters();

        let start = unfenced.find(open)?;
        let end = unfenced.rfind(close)?;
        if end <= start {
            return None;
        }
        Some(unfenced[start..=end].to_string())
    }

    /// Slice, then parse into `T`.
    pub fn parse_json_response<T>(&self, content: &str, shape: JsonShape) -> Result<T, ParseFailure>
    where
        T: DeserializeOwned,
    {
        let json_content =
            Self::extract_json_from_response(content, shape).ok_or(ParseFailure::StructureNotFound)?;
        serde_json::from_str::<T>(&json_content).map_err(|e| ParseFailure::Invalid(e.to_string()))
    }
}

/// Remove markdown fence markers. A leftover language tag is harmless because
/// the caller slices to the first structural delimiter afterwards.
fn strip_code_fences(content: &str) -> String {
    content
        .replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_fenced_object_with_prose_matches_bare_object() {
        let bare = r#"{"cards":[{"front":"Q","back":"A"}]}"#;
        let noisy = format!("Sure! Here are your cards:\n```json\n{}\n```\nLet me know.", bare);

        let parser = JsonResponseParser;
        let from_bare: Value = parser.parse_json_response(bare, JsonShape::Object).unwrap();
        let from_noisy: Value = parser.parse_json_response(&noisy, JsonShape::Object).unwrap();
        assert_eq!(from_bare, from_noisy);
    }

    #[test]
    fn test_array_shape_uses_bracket_delimiters() {
        let raw = "Result:\n```\n[{\"id\":\"1\",\"distractors\":[\"a\",\"b\",\"c\"]}]\n```";
        let parsed: Vec<Value> = JsonResponseParser
            .parse_json_response(raw, JsonShape::Array)
            .unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["id"], "1");
    }

    #[test]
    fn test_missing_structure_is_reported_separately() {
        let err = JsonResponseParser
            .parse_json_response::<Value>("I cannot help with that.", JsonShape::Object)
            .unwrap_err();
        assert_eq!(err, ParseFailure::StructureNotFound);

        let err = JsonResponseParser
            .parse_json_response::<Value>("} backwards {", JsonShape::Object)
            .unwrap_err();
        assert_eq!(err, ParseFailure::StructureNotFound);
    }

    #[test]
    fn test_broken_json_is_invalid() {
        let err = JsonResponseParser
            .parse_json_response::<Value>("{\"cards\": [ {\"front\": }", JsonShape::Object)
            .unwrap_err();
        assert!(matches!(err, ParseFailure::Invalid(_)));
    }

    #[test]
    fn test_backticks_inside_values_survive_when_not_fences() {
        let raw = r#"{"front":"What does `ls` do?","back":"Lists files"}"#;
        let parsed: Value = JsonResponseParser
            .parse_json_response(raw, JsonShape::Object)
            .unwrap();
        assert_eq!(parsed["front"], "What does `ls` do?");
    }
}
