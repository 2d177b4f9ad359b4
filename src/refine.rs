use crate::book::Character;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

/// Produces candidates: an initial draft from a request, then revisions from
/// feedback. Implementations wrap a writer agent with their prompt shapes.
#[async_trait]
pub trait Drafter: Send {
    async fn draft(&mut self, request: &str) -> String;
    async fn revise(&mut self, current: &str, feedback: &str) -> String;
}

/// Judges candidates. `precheck` runs before each critique and may force a
/// mandatory revision; the default has nothing to check.
#[async_trait]
pub trait Critic: Send {
    async fn critique(&mut self, candidate: &str) -> String;

    fn precheck(&self, _candidate: &str) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
pub struct Refined {
    pub content: String,
    pub iterations: usize,
    pub approved: bool,
}

/// Generator-critic loop: Drafting -> UnderReview -> Approved | Drafting,
/// until approval or the iteration bound. A degraded last candidate is always
/// preferred over failure, so the result is never empty of content.
pub struct RefineLoop {
    max_iterations: usize,
}

impl RefineLoop {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }

    pub async fn refine(
        &self,
        drafter: &mut dyn Drafter,
        critic: &mut dyn Critic,
        request: &str,
    ) -> Refined {
        let mut content = drafter.draft(request).await;

        for iteration in 0..self.max_iterations {
            let issues = critic.precheck(&content);
            if !issues.is_empty() {
                log::info!(
                    "consistency pre-check flagged {} issue(s); forcing a revision",
                    issues.len()
                );
                content = drafter.revise(&content, &consistency_feedback(&issues)).await;
            }

            let feedback = critic.critique(&content).await;
            if is_approval(&feedback) {
                log::info!("draft approved after {} iteration(s)", iteration + 1);
                return Refined {
                    content,
                    iterations: iteration + 1,
                    approved: true,
                };
            }

            log::info!("revision {} of {}", iteration + 1, self.max_iterations);
            content = drafter.revise(&content, &feedback).await;
        }

        log::warn!("iteration bound reached; keeping the last draft");
        Refined {
            content,
            iterations: self.max_iterations,
            approved: false,
        }
    }
}

fn consistency_feedback(issues: &[String]) -> String {
    format!(
        "Please revise the chapter to address the following character inconsistencies:\n- {}",
        issues.join("\n- ")
    )
}

/// Known characters literally named in the content must also show their
/// declared traits and occupation (case-insensitive substring match).
pub fn check_consistency(content: &str, characters: &[Character]) -> Vec<String> {
    let lower = content.to_lowercase();
    let mut issues = Vec::new();

    for character in characters {
        if !content.contains(&character.name) {
            continue;
        }
        for personality_trait in &character.traits {
            if !lower.contains(&personality_trait.to_lowercase()) {
                issues.push(format!(
                    "Character {} trait '{}' is not reflected in the chapter.",
                    character.name, personality_trait
                ));
            }
        }
        if !lower.contains(&character.occupation.to_lowercase()) {
            issues.push(format!(
                "Character {} occupation '{}' is not mentioned in the chapter.",
                character.name, character.occupation
            ));
        }
    }

    issues
}

fn approval_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)^APPROVED:",
            r"(?i)^This is an? (?:great|excellent|fantastic|amazing|wonderful|superb) revision!",
            r"(?i)^This is a .+ revision!",
            r"(?i)^This is a well-written chapter",
            r"(?i)^The chapter (?:effectively|successfully|excellently) (?:sets up|establishes|presents|portrays)",
            r"(?i)^This chapter (?:effectively|successfully|excellently) (?:sets up|establishes|presents|portrays)",
            r"(?i)^(?:Overall|In summary), this (?:is an? excellent|is a strong|is a well-crafted) chapter",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("approval pattern"))
        .collect()
    })
}

const POSITIVE_WORDS: [&str; 8] = [
    "good",
    "great",
    "excellent",
    "well-written",
    "effective",
    "strong",
    "compelling",
    "engaging",
];

/// Heuristic acceptance test for critic feedback. Deliberately permissive and
/// deliberately frozen: long mixed-sentiment paragraphs can misclassify, and
/// that imprecision is accepted rather than patched case by case.
pub fn is_approval(feedback: &str) -> bool {
    if approval_patterns().iter().any(|p| p.is_match(feedback)) {
        return true;
    }

    let first_sentence = feedback.split('.').next().unwrap_or("").to_lowercase();
    POSITIVE_WORDS.iter().any(|w| first_sentence.contains(w)) && !first_sentence.contains("but")
}

struct Cleanup {
    revised_tail: Regex,
    hope_tail: Regex,
    note_lines: Regex,
    extra_blanks: Regex,
}

fn cleanup() -> &'static Cleanup {
    static CLEANUP: OnceLock<Cleanup> = OnceLock::new();
    CLEANUP.get_or_init(|| Cleanup {
        revised_tail: Regex::new(r"(?s)In this revised version,.*").expect("revised tail pattern"),
        hope_tail: Regex::new(r"(?s)I hope (?:this|these).*").expect("hope tail pattern"),
        note_lines: Regex::new(r"(?m)^\s*(?:\*|Note:).*$").expect("note line pattern"),
        extra_blanks: Regex::new(r"\n{3,}").expect("blank collapse pattern"),
    })
}

/// Strips the meta-commentary chapter writers wrap around their actual
/// output: preamble before the heading, editorial closers, bullet notes.
pub fn clean_chapter_content(content: &str) -> String {
    let c = cleanup();

    let body = match content.find("Chapter ") {
        Some(index) => &content[index..],
        None => content,
    };

    let text = c.revised_tail.replace(body, "");
    let text = c.hope_tail.replace(&text, "");
    let text = c.note_lines.replace_all(&text, "");
    let text = c.extra_blanks.replace_all(&text, "\n\n");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn character(name: &str, occupation: &str, traits: &[&str]) -> Character {
        let record = match json!({
            "name": name,
            "age": 30,
            "occupation": occupation,
            "traits": traits,
        }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        Character::from_record(&record)
    }

    struct ScriptedDrafter {
        calls: usize,
    }

    #[async_trait]
    impl Drafter for ScriptedDrafter {
        async fn draft(&mut self, _request: &str) -> String {
            self.calls += 1;
            format!("draft {}", self.calls)
        }

        async fn revise(&mut self, _current: &str, _feedback: &str) -> String {
            self.calls += 1;
            format!("draft {}", self.calls)
        }
    }

    struct ScriptedCritic {
        approve_on: Option<usize>,
        reviews: usize,
    }

    #[async_trait]
    impl Critic for ScriptedCritic {
        async fn critique(&mut self, _candidate: &str) -> String {
            self.reviews += 1;
            match self.approve_on {
                Some(n) if self.reviews >= n => "APPROVED: reads well.".to_string(),
                _ => "The pacing drags in the middle.".to_string(),
            }
        }
    }

    #[tokio::test]
    async fn approval_short_circuits() {
        let mut drafter = ScriptedDrafter { calls: 0 };
        let mut critic = ScriptedCritic {
            approve_on: Some(2),
            reviews: 0,
        };

        let refined = RefineLoop::new(5)
            .refine(&mut drafter, &mut critic, "write it")
            .await;
        assert!(refined.approved);
        assert_eq!(refined.iterations, 2);
        // initial draft + one revision
        assert_eq!(drafter.calls, 2);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_candidate_within_call_bound() {
        let max_iterations = 4;
        let mut drafter = ScriptedDrafter { calls: 0 };
        let mut critic = ScriptedCritic {
            approve_on: None,
            reviews: 0,
        };

        let refined = RefineLoop::new(max_iterations)
            .refine(&mut drafter, &mut critic, "write it")
            .await;
        assert!(!refined.approved);
        assert!(!refined.content.is_empty());
        assert_eq!(refined.iterations, max_iterations);
        // never more than max_iterations + 1 generator calls
        assert_eq!(drafter.calls, max_iterations + 1);
    }

    struct PrecheckCritic;

    #[async_trait]
    impl Critic for PrecheckCritic {
        async fn critique(&mut self, _candidate: &str) -> String {
            "APPROVED: consistent now.".to_string()
        }

        fn precheck(&self, candidate: &str) -> Vec<String> {
            if candidate == "draft 1" {
                vec!["trait missing".to_string()]
            } else {
                Vec::new()
            }
        }
    }

    #[tokio::test]
    async fn precheck_forces_revision_before_critique() {
        let mut drafter = ScriptedDrafter { calls: 0 };
        let mut critic = PrecheckCritic;

        let refined = RefineLoop::new(5)
            .refine(&mut drafter, &mut critic, "write it")
            .await;
        assert!(refined.approved);
        // draft 1 was revised into draft 2 before the critic ever saw it
        assert_eq!(refined.content, "draft 2");
    }

    #[test]
    fn approval_classifier_table() {
        // explicit approvals
        assert!(is_approval("APPROVED: fine work"));
        assert!(is_approval("approved: lowercase still counts"));
        assert!(is_approval("This is an excellent revision! Truly."));
        assert!(is_approval("This is a well-written chapter with strong bones."));
        assert!(is_approval(
            "The chapter effectively sets up the conflict to come."
        ));
        assert!(is_approval(
            "Overall, this is a strong chapter that lands its beats."
        ));

        // positive first sentence without contrast
        assert!(is_approval("Excellent pacing throughout."));
        assert!(is_approval("Strong dialogue carries the scene."));

        // rejections
        assert!(!is_approval("This needs work, but the dialogue is great."));
        assert!(!is_approval("The pacing drags and the stakes are unclear."));
        assert!(!is_approval("Consider tightening the opening paragraphs."));

        // documented imprecision: "but" later in the feedback does not matter
        assert!(is_approval(
            "Good opening. But the second half falls apart."
        ));
    }

    #[test]
    fn consistency_check_flags_missing_traits_and_occupation() {
        let characters = vec![
            character("Mara Voss", "smuggler", &["wary", "driven", "precise"]),
            character("Elias Kern", "detective", &["dogged", "tired", "honest"]),
        ];

        let chapter = "Mara Voss moved through the rain, wary and driven as ever.";
        let issues = check_consistency(chapter, &characters);

        // Elias is absent entirely, so only Mara is checked
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("precise"));
        assert!(issues[1].contains("smuggler"));
    }

    #[test]
    fn consistency_check_passes_complete_chapter() {
        let characters = vec![character("Mara Voss", "smuggler", &["wary", "driven", "precise"])];
        let chapter =
            "Mara Voss, ever the smuggler: wary, driven, precise in everything she touched.";
        assert!(check_consistency(chapter, &characters).is_empty());
    }

    #[test]
    fn cleanup_strips_preamble_and_closers() {
        let raw = "Here is the chapter you asked for:\n\nChapter 3: The Tide\n\nRain fell.\n\n* Note to editor\n\nI hope this revised version works better for you!";
        let cleaned = clean_chapter_content(raw);
        assert!(cleaned.starts_with("Chapter 3: The Tide"));
        assert!(!cleaned.contains("Here is the chapter"));
        assert!(!cleaned.contains("Note to editor"));
        assert!(!cleaned.contains("I hope"));
    }

    #[test]
    fn cleanup_keeps_headingless_content() {
        let raw = "Rain fell on the docks.\n\n\n\nThe night was long.";
        let cleaned = clean_chapter_content(raw);
        assert!(cleaned.starts_with("Rain fell"));
        assert!(!cleaned.contains("\n\n\n"));
    }
}
