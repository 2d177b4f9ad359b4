use crate::agent::Agent;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use thiserror::Error;

/// A decoded structured record: field name to JSON value.
pub type Record = Map<String, Value>;

/// Repair-agent invocations before giving up and placeholder-filling.
pub const REPAIR_ATTEMPTS: usize = 5;

/// Offending text is capped at this many chars in the repair prompt.
const REPAIR_TEXT_LIMIT: usize = 4000;

#[derive(Debug, Error)]
pub enum ParseError {
    /// No `{...}` fragment anywhere in the output. The only condition that
    /// propagates out of the repair path; callers retry the generation step.
    #[error("no structured content in model output")]
    NoStructure,

    /// A record decoded but required fields are absent.
    #[error("record is missing required fields: {missing:?}")]
    Incomplete { missing: Vec<String> },

    /// Structure is present but does not decode.
    #[error("structured content does not decode: {message}")]
    Invalid { message: String },
}

/// Strict single-shot parse: extract, normalize, decode, check required
/// fields. No repair, no placeholder fill.
pub fn parse_strict(raw: &str, required: &[&str]) -> Result<Record, ParseError> {
    let fragment = extract_object(raw).ok_or(ParseError::NoStructure)?;
    let cleaned = normalize(fragment);

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(record)) => {
            let missing = missing_fields(&record, required);
            if missing.is_empty() {
                Ok(record)
            } else {
                Err(ParseError::Incomplete { missing })
            }
        }
        Ok(_) => Err(ParseError::Invalid {
            message: "top-level value is not an object".to_string(),
        }),
        Err(e) => Err(ParseError::Invalid {
            message: e.to_string(),
        }),
    }
}

/// Decodes free text into a record, leaning on a dedicated repair agent when
/// the strict path fails. Only `NoStructure` ever escapes: anything that
/// decoded at least partially is completed with placeholders instead.
pub struct RecordParser {
    repair: Agent,
}

impl RecordParser {
    pub fn new(repair: Agent) -> Self {
        Self { repair }
    }

    pub fn clear(&mut self) {
        self.repair.clear();
    }

    pub async fn parse(&mut self, raw: &str, required: &[&str]) -> Result<Record, ParseError> {
        // best-decoded partial record seen so far, kept for placeholder fill
        let mut best: Option<Record> = None;
        let mut current = raw.to_string();

        let mut error = match parse_strict(&current, required) {
            Ok(record) => return Ok(record),
            Err(ParseError::NoStructure) => return Err(ParseError::NoStructure),
            Err(ParseError::Incomplete { missing }) => {
                if let Ok(record) = decode_loose(&current) {
                    best = Some(record);
                }
                format!("missing required fields: {missing:?}")
            }
            Err(ParseError::Invalid { message }) => message,
        };

        for attempt in 1..=REPAIR_ATTEMPTS {
            log::warn!(
                "structured output invalid ({error}); repair attempt {attempt}/{REPAIR_ATTEMPTS}"
            );
            self.repair.clear();

            let truncated: String = current.chars().take(REPAIR_TEXT_LIMIT).collect();
            let prompt = format!(
                "The following JSON document is invalid. Correct it and respond with only \
                 the corrected JSON document, no commentary.\n\n{truncated}\n\nDecode error: {error}"
            );
            let corrected = self.repair.invoke(&prompt).await;

            match parse_strict(&corrected, required) {
                Ok(record) => {
                    log::info!("structured output repaired on attempt {attempt}");
                    return Ok(record);
                }
                Err(ParseError::NoStructure) => {
                    // the repair lost the structure; keep reworking the last
                    // text that still had one
                    error = "no structured content in the corrected document".to_string();
                }
                Err(ParseError::Incomplete { missing }) => {
                    if let Ok(record) = decode_loose(&corrected) {
                        best = Some(record);
                    }
                    current = corrected;
                    error = format!("missing required fields: {missing:?}");
                }
                Err(ParseError::Invalid { message }) => {
                    current = corrected;
                    error = message;
                }
            }
        }

        log::warn!("repair bound reached; filling missing fields with placeholders");
        let mut record = best.unwrap_or_default();
        fill_missing(&mut record, required);
        Ok(record)
    }
}

fn decode_loose(raw: &str) -> Result<Record, ParseError> {
    parse_strict(raw, &[])
}

fn missing_fields(record: &Record, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|f| !record.contains_key(**f))
        .map(|f| f.to_string())
        .collect()
}

/// Inserts `"[Field Name]"` for every absent required field.
pub fn fill_missing(record: &mut Record, required: &[&str]) {
    for field in required {
        if !record.contains_key(*field) {
            record.insert(field.to_string(), Value::String(placeholder(field)));
        }
    }
}

/// Deterministic placeholder derived from the field name:
/// `physical_description` becomes `[Physical Description]`.
pub fn placeholder(field: &str) -> String {
    let pretty = field
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    format!("[{pretty}]")
}

/// Everything between the outermost braces, or None when no object exists.
fn extract_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

struct Fixups {
    emphasis: Regex,
    quoted_key: Regex,
    quoted_value: Regex,
    comma_between_strings: Regex,
    comma_after_object: Regex,
    comma_after_array: Regex,
    trailing_comma_object: Regex,
    trailing_comma_array: Regex,
}

fn fixups() -> &'static Fixups {
    static FIXUPS: OnceLock<Fixups> = OnceLock::new();
    FIXUPS.get_or_init(|| Fixups {
        emphasis: Regex::new(r"\*\*").expect("emphasis pattern"),
        quoted_key: Regex::new(r"'([^'\n]*)'\s*:").expect("quoted key pattern"),
        quoted_value: Regex::new(r":\s*'([^'\n]*)'").expect("quoted value pattern"),
        comma_between_strings: Regex::new(r#""[ \t]*\n\s*""#).expect("string comma pattern"),
        comma_after_object: Regex::new(r#"\}[ \t]*\n\s*""#).expect("object comma pattern"),
        comma_after_array: Regex::new(r#"\][ \t]*\n\s*""#).expect("array comma pattern"),
        trailing_comma_object: Regex::new(r",\s*\}").expect("trailing object comma pattern"),
        trailing_comma_array: Regex::new(r",\s*\]").expect("trailing array comma pattern"),
    })
}

/// Mechanical fixups for the malformations local models actually produce:
/// smart quotes, markdown emphasis, single-quoted keys, missing or trailing
/// separators, control characters.
pub fn normalize(raw: &str) -> String {
    let f = fixups();

    let mut text = raw
        .replace("\\'", "'")
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    text = f.emphasis.replace_all(&text, "").into_owned();
    text = f.quoted_key.replace_all(&text, "\"${1}\":").into_owned();
    text = f.quoted_value.replace_all(&text, ": \"${1}\"").into_owned();

    text = f
        .comma_between_strings
        .replace_all(&text, "\",\n\"")
        .into_owned();
    text = f
        .comma_after_object
        .replace_all(&text, "},\n\"")
        .into_owned();
    text = f
        .comma_after_array
        .replace_all(&text, "],\n\"")
        .into_owned();

    text = f.trailing_comma_object.replace_all(&text, "}").into_owned();
    text = f.trailing_comma_array.replace_all(&text, "]").into_owned();

    // raw control characters (including newlines) are illegal inside JSON
    // strings, and every separator fix above has already run
    text.chars().filter(|c| *c as u32 >= 0x20).collect()
}

// --- scalar and list coercion ---

/// Integer field, coercing numeric text; 0 when absent or unparseable.
pub fn int_field(record: &Record, key: &str) -> i64 {
    match record.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// String field; non-string scalars are rendered, absent fields placeholder.
pub fn string_field(record: &Record, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => placeholder(key),
        Some(other) => other.to_string(),
    }
}

/// List-of-strings field; a bare string becomes a single-element list.
pub fn list_field(record: &Record, key: &str) -> Vec<String> {
    match record.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// List field truncated or padded with `filler` to exactly `count` entries.
pub fn exact_list(record: &Record, key: &str, count: usize, filler: &str) -> Vec<String> {
    let mut items = list_field(record, key);
    items.truncate(count);
    while items.len() < count {
        items.push(filler.to_string());
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatTurn, LlmClient};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct ScriptedRepair {
        responses: Mutex<Vec<String>>,
        calls: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedRepair {
        async fn chat(&self, _system: &str, _turns: &[ChatTurn]) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok("still broken".to_string())
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    fn repair_parser(responses: Vec<&str>) -> (RecordParser, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        let llm = Arc::new(ScriptedRepair {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            calls: calls.clone(),
        });
        let agent = Agent::new(llm, "Repair", "You fix JSON.");
        (RecordParser::new(agent), calls)
    }

    #[test]
    fn strict_parse_trims_surrounding_prose() {
        let raw = "Sure, here is the topic:\n{\"genre\": \"noir\", \"setting\": \"city\"}\nHope that helps!";
        let record = parse_strict(raw, &["genre", "setting"]).unwrap();
        assert_eq!(record["genre"], "noir");
        assert_eq!(record["setting"], "city");
    }

    #[test]
    fn strict_parse_repairs_trailing_commas() {
        let raw = r#"{"genre": "noir", "elements": ["rain", "neon",], }"#;
        let record = parse_strict(raw, &["genre"]).unwrap();
        assert_eq!(record["elements"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn strict_parse_inserts_missing_commas() {
        let raw = "{\"genre\": \"noir\"\n\"setting\": \"city\"\n\"elements\": [\"rain\"]\n\"theme\": \"loss\"}";
        let record = parse_strict(raw, &["genre", "setting", "theme"]).unwrap();
        assert_eq!(record["setting"], "city");
        assert_eq!(record["theme"], "loss");
    }

    #[test]
    fn strict_parse_reconciles_quotes() {
        let raw = "{\u{201c}genre\u{201d}: \u{201c}noir\u{201d}, 'setting': 'rainy city'}";
        let record = parse_strict(raw, &["genre", "setting"]).unwrap();
        assert_eq!(record["genre"], "noir");
        assert_eq!(record["setting"], "rainy city");
    }

    #[test]
    fn strict_parse_strips_emphasis_fences_and_control_chars() {
        let raw = "```json\n{\"genre\": \"**noir**\", \"setting\": \"ci\u{0007}ty\"}\n```";
        let record = parse_strict(raw, &["genre", "setting"]).unwrap();
        assert_eq!(record["genre"], "noir");
        assert_eq!(record["setting"], "city");
    }

    #[test]
    fn strict_parse_reports_no_structure() {
        assert!(matches!(
            parse_strict("I could not produce JSON, sorry.", &["genre"]),
            Err(ParseError::NoStructure)
        ));
    }

    #[test]
    fn strict_parse_reports_missing_fields() {
        let raw = r#"{"genre": "noir"}"#;
        match parse_strict(raw, &["genre", "setting"]) {
            Err(ParseError::Incomplete { missing }) => assert_eq!(missing, vec!["setting"]),
            other => panic!("expected Incomplete, got {other:?}"),
        }
    }

    #[test]
    fn parse_serialize_roundtrip_is_identity() {
        let mut record = Record::new();
        record.insert("name".into(), Value::String("Mara Voss".into()));
        record.insert("age".into(), Value::from(34));
        record.insert(
            "traits".into(),
            Value::Array(vec!["wary".into(), "driven".into(), "precise".into()]),
        );

        let serialized = serde_json::to_string(&record).unwrap();
        let reparsed = parse_strict(&serialized, &["name", "age", "traits"]).unwrap();
        assert_eq!(reparsed, record);
    }

    #[tokio::test]
    async fn repair_agent_recovers_broken_document() {
        let (mut parser, calls) = repair_parser(vec![r#"{"genre": "noir", "setting": "city"}"#]);

        let raw = r#"{"genre": "noir" "setting": city}"#;
        let record = parser.parse(raw, &["genre", "setting"]).await.unwrap();
        assert_eq!(record["setting"], "city");
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn repair_exhaustion_fills_placeholders() {
        // every repair response still decodes but never gains the field
        let (mut parser, calls) = repair_parser(vec![
            r#"{"genre": "noir"}"#,
            r#"{"genre": "noir"}"#,
            r#"{"genre": "noir"}"#,
            r#"{"genre": "noir"}"#,
            r#"{"genre": "noir"}"#,
        ]);

        let record = parser
            .parse(r#"{"genre": "noir"}"#, &["genre", "setting"])
            .await
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), REPAIR_ATTEMPTS);
        assert_eq!(record["genre"], "noir");
        assert_eq!(record["setting"], "[Setting]");
    }

    #[tokio::test]
    async fn undecodable_structure_yields_all_placeholders() {
        let (mut parser, _calls) = repair_parser(vec![]);

        let record = parser
            .parse("{=== not json at all ===}", &["genre", "setting"])
            .await
            .unwrap();
        assert_eq!(record["genre"], "[Genre]");
        assert_eq!(record["setting"], "[Setting]");
    }

    #[tokio::test]
    async fn no_structure_skips_repair_entirely() {
        let (mut parser, calls) = repair_parser(vec![]);

        let result = parser.parse("plain refusal text", &["genre"]).await;
        assert!(matches!(result, Err(ParseError::NoStructure)));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn placeholder_titles_field_names() {
        assert_eq!(placeholder("physical_description"), "[Physical Description]");
        assert_eq!(placeholder("goals"), "[Goals]");
    }

    #[test]
    fn int_field_coerces_text_and_defaults() {
        let mut record = Record::new();
        record.insert("age".into(), Value::String("42".into()));
        record.insert("bad".into(), Value::String("young".into()));
        assert_eq!(int_field(&record, "age"), 42);
        assert_eq!(int_field(&record, "bad"), 0);
        assert_eq!(int_field(&record, "absent"), 0);
    }

    #[test]
    fn exact_list_truncates_and_pads() {
        let mut record = Record::new();
        record.insert(
            "traits".into(),
            Value::Array(vec!["a".into(), "b".into(), "c".into(), "d".into()]),
        );
        assert_eq!(exact_list(&record, "traits", 3, "Mysterious"), vec!["a", "b", "c"]);

        record.insert("traits".into(), Value::Array(vec!["a".into()]));
        assert_eq!(
            exact_list(&record, "traits", 3, "Mysterious"),
            vec!["a", "Mysterious", "Mysterious"]
        );
    }
}
