use crate::record::{exact_list, int_field, list_field, placeholder, string_field, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Characters carry exactly this many personality traits; short lists are
/// padded with `FILLER_TRAIT`.
pub const TRAIT_COUNT: usize = 3;
pub const FILLER_TRAIT: &str = "Mysterious";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topic {
    pub genre: String,
    pub setting: String,
    pub theme: String,
    pub elements: Vec<String>,
    pub subplots: Vec<String>,
}

impl Topic {
    pub const REQUIRED: &'static [&'static str] =
        &["genre", "setting", "theme", "elements", "subplots"];

    pub fn from_record(record: &Record) -> Self {
        Self {
            genre: string_field(record, "genre"),
            setting: string_field(record, "setting"),
            theme: string_field(record, "theme"),
            elements: list_field(record, "elements"),
            subplots: list_field(record, "subplots"),
        }
    }

    /// Prompt-ready context block.
    pub fn brief(&self) -> String {
        format!(
            "Genre: {}\nSetting: {}\nTheme: {}\nElements: {}\nSubplots: {}",
            self.genre,
            self.setting,
            self.theme,
            self.elements.join(", "),
            self.subplots.join(", ")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Character {
    pub name: String,
    pub age: i64,
    pub occupation: String,
    pub traits: Vec<String>,
    pub background: String,
    pub physical_description: String,
    pub skills: Vec<String>,
    pub conflicts: String,
    pub goals: String,
    pub relationships: String,
}

impl Character {
    pub const REQUIRED: &'static [&'static str] = &["name", "age", "occupation", "traits"];

    pub fn from_record(record: &Record) -> Self {
        Self {
            name: string_field(record, "name"),
            age: int_field(record, "age"),
            occupation: string_field(record, "occupation"),
            traits: exact_list(record, "traits", TRAIT_COUNT, FILLER_TRAIT),
            background: string_field(record, "background"),
            physical_description: string_field(record, "physical_description"),
            skills: list_field(record, "skills"),
            conflicts: string_field(record, "conflicts"),
            goals: string_field(record, "goals"),
            relationships: string_field(record, "relationships"),
        }
    }

    /// One-line summary used in chapter prompts.
    pub fn brief(&self) -> String {
        format!(
            "{}: {}, Traits: {}, Background: {}",
            self.name,
            self.occupation,
            self.traits.join(", "),
            self.background
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoryEvent {
    pub description: String,
    #[serde(default)]
    pub characters_involved: Vec<String>,
}

impl StoryEvent {
    pub const REQUIRED: &'static [&'static str] = &["description", "characters_involved"];

    pub fn from_record(record: &Record) -> Self {
        Self {
            description: string_field(record, "description"),
            characters_involved: list_field(record, "characters_involved"),
        }
    }

    /// Tolerates both the documented object shape and a bare string.
    fn from_value(value: Option<&Value>, key: &str) -> Self {
        match value {
            Some(Value::Object(map)) => Self::from_record(map),
            Some(Value::String(s)) => Self {
                description: s.clone(),
                characters_involved: Vec::new(),
            },
            _ => Self {
                description: placeholder(key),
                characters_involved: Vec::new(),
            },
        }
    }

    /// The stock event used when generation keeps failing.
    pub fn fallback(characters: &[Character]) -> Self {
        Self {
            description: "An unexpected twist occurs, challenging the characters.".to_string(),
            characters_involved: characters.iter().take(2).map(|c| c.name.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subplot {
    pub description: String,
    #[serde(default)]
    pub characters_involved: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoryArc {
    pub setting: StoryEvent,
    pub inciting_incident: StoryEvent,
    pub rising_action: Vec<StoryEvent>,
    pub climax: StoryEvent,
    pub falling_action: StoryEvent,
    pub resolution: StoryEvent,
    pub subplots: Vec<Subplot>,
}

impl StoryArc {
    pub const REQUIRED: &'static [&'static str] = &[
        "setting",
        "inciting_incident",
        "rising_action",
        "climax",
        "falling_action",
        "resolution",
        "subplots",
    ];

    /// Builds an arc from a repaired record. Every slot ends up populated:
    /// odd shapes degrade to placeholder events rather than errors.
    pub fn from_record(record: &Record) -> Self {
        let rising_action = match record.get("rising_action") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| StoryEvent::from_value(Some(v), "rising_action"))
                .collect(),
            other => vec![StoryEvent::from_value(other, "rising_action")],
        };

        let subplots = match record.get("subplots") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    Value::Object(map) => Subplot {
                        description: string_field(map, "description"),
                        characters_involved: list_field(map, "characters_involved"),
                        events: list_field(map, "events"),
                    },
                    Value::String(s) => Subplot {
                        description: s.clone(),
                        characters_involved: Vec::new(),
                        events: Vec::new(),
                    },
                    _ => Subplot {
                        description: placeholder("subplots"),
                        characters_involved: Vec::new(),
                        events: Vec::new(),
                    },
                })
                .collect(),
            _ => Vec::new(),
        };

        Self {
            setting: StoryEvent::from_value(record.get("setting"), "setting"),
            inciting_incident: StoryEvent::from_value(
                record.get("inciting_incident"),
                "inciting_incident",
            ),
            rising_action,
            climax: StoryEvent::from_value(record.get("climax"), "climax"),
            falling_action: StoryEvent::from_value(record.get("falling_action"), "falling_action"),
            resolution: StoryEvent::from_value(record.get("resolution"), "resolution"),
            subplots,
        }
    }

    /// Hand-built default arc, assembled from the topic and cast when the
    /// generator cannot produce a usable one.
    pub fn fallback(topic: &Topic, characters: &[Character]) -> Self {
        let names: Vec<String> = characters.iter().map(|c| c.name.clone()).collect();
        let first_two: Vec<String> = names.iter().take(2).cloned().collect();

        Self {
            setting: StoryEvent {
                description: topic.setting.clone(),
                characters_involved: first_two.clone(),
            },
            inciting_incident: StoryEvent {
                description: "A mysterious event occurs".to_string(),
                characters_involved: first_two.clone(),
            },
            rising_action: vec![
                StoryEvent {
                    description: "The characters investigate the event".to_string(),
                    characters_involved: names.clone(),
                },
                StoryEvent {
                    description: "A major discovery is made".to_string(),
                    characters_involved: names.iter().skip(1).take(2).cloned().collect(),
                },
            ],
            climax: StoryEvent {
                description: "Confrontation with the main challenge".to_string(),
                characters_involved: names.clone(),
            },
            falling_action: StoryEvent {
                description: "Dealing with the aftermath".to_string(),
                characters_involved: names.iter().take(3).cloned().collect(),
            },
            resolution: StoryEvent {
                description: "A new equilibrium is established".to_string(),
                characters_involved: names,
            },
            subplots: topic
                .subplots
                .iter()
                .map(|s| Subplot {
                    description: s.clone(),
                    characters_involved: first_two.clone(),
                    events: vec!["Event 1".to_string(), "Event 2".to_string()],
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chapter {
    pub number: usize,
    pub content: String,
    /// The arc event this chapter renders.
    pub event: StoryEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChapterFeedback {
    pub chapter_number: usize,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NarrativeReview {
    pub overall_assessment: String,
    #[serde(default)]
    pub chapter_feedback: Vec<ChapterFeedback>,
}

impl NarrativeReview {
    pub const REQUIRED: &'static [&'static str] = &["overall_assessment"];

    pub fn from_record(record: &Record) -> Self {
        let chapter_feedback = match record.get("chapter_feedback") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::Object(map) => {
                        let number = int_field(map, "chapter_number");
                        if number < 1 {
                            return None;
                        }
                        Some(ChapterFeedback {
                            chapter_number: number as usize,
                            issues: list_field(map, "issues"),
                            recommendations: list_field(map, "recommendations"),
                        })
                    }
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        Self {
            overall_assessment: string_field(record, "overall_assessment"),
            chapter_feedback,
        }
    }
}
