use crate::agent::Agent;
use crate::book::{Chapter, Character, NarrativeReview, StoryArc, StoryEvent, Topic};
use crate::config::Config;
use crate::llm::LlmClient;
use crate::record::RecordParser;
use crate::refine::{check_consistency, clean_chapter_content, Critic, Drafter, RefineLoop};
use crate::roles::{self, AgentSet};
use crate::storage::Storage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;

pub const TOPIC_ATTEMPTS: usize = 3;
pub const CHARACTER_ATTEMPTS: usize = 5;
pub const ARC_ATTEMPTS: usize = 3;
pub const EVENT_ATTEMPTS: usize = 5;

/// Chapters reserved at the end of the book for climax, falling action and
/// resolution.
const RESERVED_CHAPTERS: usize = 3;

/// In-flight bound for concurrent character generation.
const CHARACTER_CONCURRENCY: usize = 4;

const ERROR_SENTINEL: &str = "Error in completion:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Topic,
    Characters,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Topic => write!(f, "topic"),
            Stage::Characters => write!(f, "characters"),
        }
    }
}

/// The only hard failure: a required upstream artifact could not be produced
/// within its bound. Everything else degrades in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("book generation aborted: no usable {stage} output within the retry bound")]
pub struct StageAborted {
    pub stage: Stage,
}

/// Drives one book from topic to assembled text. Artifacts land in the build
/// folder as they are produced and are reloaded on a re-run, so an
/// interrupted generation picks up where it stopped.
pub struct Pipeline {
    config: Config,
    llm: Arc<dyn LlmClient>,
    agents: AgentSet,
    parser: RecordParser,
    storage: Arc<dyn Storage>,
}

impl Pipeline {
    pub fn new(config: Config, llm: Arc<dyn LlmClient>, storage: Arc<dyn Storage>) -> Self {
        let agents = AgentSet::new(&llm);
        let parser = RecordParser::new(roles::repair_agent(&llm));
        Self {
            config,
            llm,
            agents,
            parser,
            storage,
        }
    }

    pub async fn run(&mut self) -> Result<String> {
        let num_chapters = self.config.book.num_chapters;
        anyhow::ensure!(
            num_chapters > RESERVED_CHAPTERS,
            "num_chapters must leave room for the inciting incident plus climax, falling action and resolution"
        );

        log::info!("Starting book generation...");
        let topic = self.generate_topic().await?;
        let characters = self.generate_characters(&topic).await?;
        let mut arc = self.generate_story_arc(&topic, &characters).await?;

        println!("Writing chapters...");
        let pb = ProgressBar::new(num_chapters as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                .progress_chars("#>-"),
        );

        let mut chapters: Vec<Chapter> = Vec::with_capacity(num_chapters);
        let mut number = 1;

        // inciting incident
        chapters.push(
            self.write_chapter(number, arc.inciting_incident.clone(), &topic, &characters)
                .await?,
        );
        pb.inc(1);
        number += 1;

        // rising action: a cursor over a growable event list, synthesizing
        // new events once the generated arc runs dry
        let mut cursor = 0;
        while number <= num_chapters - RESERVED_CHAPTERS {
            self.pause_checkpoint()?;
            let event = if cursor < arc.rising_action.len() {
                arc.rising_action[cursor].clone()
            } else {
                log::info!("rising action exhausted; synthesizing a new event");
                let event = self.synthesize_event(&topic, &characters).await;
                arc.rising_action.push(event.clone());
                event
            };
            cursor += 1;

            chapters.push(self.write_chapter(number, event, &topic, &characters).await?);
            pb.inc(1);
            number += 1;
        }

        // the reserved tail
        for event in [
            arc.climax.clone(),
            arc.falling_action.clone(),
            arc.resolution.clone(),
        ] {
            chapters.push(self.write_chapter(number, event, &topic, &characters).await?);
            pb.inc(1);
            number += 1;
        }
        pb.finish_with_message("chapters complete");

        if self.config.book.review_pass {
            self.review_pass(&mut chapters, &topic, &characters).await?;
        }

        let book = chapters
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let book_path = format!("{}/novel.txt", self.config.output_folder);
        self.storage.write(&book_path, book.as_bytes()).await?;

        self.agents.clear_all();
        self.parser.clear();
        log::info!("Book generation complete; saved to {book_path}");
        Ok(book)
    }

    async fn generate_topic(&mut self) -> Result<Topic> {
        let path = self.build_path("topic.json");
        if self.storage.exists(&path).await? {
            log::info!("Loading cached topic from {path}");
            let cached = self.storage.read_string(&path).await?;
            return serde_json::from_str(&cached).context("Failed to parse cached topic");
        }

        println!("Generating topic...");
        for attempt in 1..=TOPIC_ATTEMPTS {
            let raw = self
                .agents
                .topic
                .invoke(
                    "Generate a unique and engaging topic for a novel. Be creative and think \
                     outside the box.",
                )
                .await;

            match self.parser.parse(&raw, Topic::REQUIRED).await {
                Ok(record) => {
                    let topic = Topic::from_record(&record);
                    log::info!("Generated topic: {} set in {}", topic.genre, topic.setting);
                    let json = serde_json::to_string_pretty(&topic)?;
                    self.storage.write(&path, json.as_bytes()).await?;
                    return Ok(topic);
                }
                Err(e) => {
                    log::warn!("Failed to generate a valid topic ({e}). Attempt {attempt}/{TOPIC_ATTEMPTS}");
                }
            }
        }

        log::error!("Failed to generate a valid topic after {TOPIC_ATTEMPTS} attempts.");
        Err(StageAborted { stage: Stage::Topic }.into())
    }

    async fn generate_characters(&mut self, topic: &Topic) -> Result<Vec<Character>> {
        let path = self.build_path("characters.json");
        if self.storage.exists(&path).await? {
            log::info!("Loading cached characters from {path}");
            let cached = self.storage.read_string(&path).await?;
            return serde_json::from_str(&cached).context("Failed to parse cached characters");
        }

        let requested = self.config.book.num_characters;
        println!("Generating {requested} characters...");

        let registry: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let results: Vec<Option<(usize, Character)>> = stream::iter((0..requested).map(|slot| {
            let llm = self.llm.clone();
            let registry = registry.clone();
            let brief = topic.brief();
            async move {
                generate_one_character(llm, registry, brief, slot)
                    .await
                    .map(|character| (slot, character))
            }
        }))
        .buffer_unordered(CHARACTER_CONCURRENCY)
        .collect()
        .await;

        let mut slotted: Vec<(usize, Character)> = results.into_iter().flatten().collect();
        slotted.sort_by_key(|(slot, _)| *slot);
        let characters: Vec<Character> = slotted.into_iter().map(|(_, c)| c).collect();

        if characters.len() < requested {
            log::warn!(
                "Only generated {} of {} requested characters; continuing with the smaller cast",
                characters.len(),
                requested
            );
        }
        if characters.is_empty() {
            log::error!("No valid characters generated. Aborting book generation.");
            return Err(StageAborted {
                stage: Stage::Characters,
            }
            .into());
        }

        let json = serde_json::to_string_pretty(&characters)?;
        self.storage.write(&path, json.as_bytes()).await?;
        Ok(characters)
    }

    async fn generate_story_arc(
        &mut self,
        topic: &Topic,
        characters: &[Character],
    ) -> Result<StoryArc> {
        let path = self.build_path("story_arc.json");
        if self.storage.exists(&path).await? {
            log::info!("Loading cached story arc from {path}");
            let cached = self.storage.read_string(&path).await?;
            return serde_json::from_str(&cached).context("Failed to parse cached story arc");
        }

        println!("Generating story arc...");
        let names = character_names(characters);
        let prompt = format!(
            "Generate a complex, engaging story arc for our novel with the following details:\n\
             {}\nCharacters: {}\n\n\
             Make full use of the unique characters and ensure the arc explores the main theme. \
             Respond with a valid JSON object containing the required structure.",
            topic.brief(),
            names.join(", ")
        );

        let mut arc = None;
        for attempt in 1..=ARC_ATTEMPTS {
            let raw = self.agents.story_arc.invoke(&prompt).await;
            match self.parser.parse(&raw, StoryArc::REQUIRED).await {
                Ok(record) => {
                    arc = Some(StoryArc::from_record(&record));
                    log::info!("Successfully generated story arc");
                    break;
                }
                Err(e) => {
                    log::warn!("Failed to generate a valid story arc ({e}). Attempt {attempt}/{ARC_ATTEMPTS}");
                }
            }
        }

        let arc = arc.unwrap_or_else(|| {
            log::error!("Failed to generate a valid story arc. Using a basic structure.");
            StoryArc::fallback(topic, characters)
        });

        let json = serde_json::to_string_pretty(&arc)?;
        self.storage.write(&path, json.as_bytes()).await?;
        Ok(arc)
    }

    /// Produces one more rising-action event on demand. Never fails: the
    /// stock fallback event stands in after the attempt bound.
    async fn synthesize_event(&mut self, topic: &Topic, characters: &[Character]) -> StoryEvent {
        let names = character_names(characters);
        let prompt = format!(
            "Generate a new rising action event for our story with the following details:\n\
             {}\nCurrent characters: {}\n\n\
             Respond in strict JSON format with the following structure:\n\
             {{ \"description\": \"Event description\", \"characters_involved\": [\"Character 1\", \"Character 2\"] }}",
            topic.brief(),
            names.join(", ")
        );

        for attempt in 1..=EVENT_ATTEMPTS {
            self.agents.story_arc.clear();
            let raw = self.agents.story_arc.invoke(&prompt).await;
            match self.parser.parse(&raw, StoryEvent::REQUIRED).await {
                Ok(record) => return StoryEvent::from_record(&record),
                Err(e) => {
                    log::warn!("Failed to generate a valid rising action event ({e}). Attempt {attempt}/{EVENT_ATTEMPTS}");
                }
            }
        }

        log::error!("Failed to generate a rising action event after {EVENT_ATTEMPTS} attempts.");
        StoryEvent::fallback(characters)
    }

    async fn write_chapter(
        &mut self,
        number: usize,
        event: StoryEvent,
        topic: &Topic,
        characters: &[Character],
    ) -> Result<Chapter> {
        let path = self.chapter_path(number);
        if self.storage.exists(&path).await? {
            log::info!("Loading cached chapter {number} from {path}");
            let content = self.storage.read_string(&path).await?;
            return Ok(Chapter {
                number,
                content,
                event,
            });
        }

        let briefs = characters
            .iter()
            .map(Character::brief)
            .collect::<Vec<_>>()
            .join("\n");
        let request = format!(
            "Write Chapter {number} of our novel.\n\
             Topic: {}\n\
             Event: {}\n\
             Characters:\n{briefs}\n\n\
             Vividly depict the world and deeply explore the characters, incorporating each named \
             character's traits, occupation and background into the narrative. Balance action, \
             dialogue and introspective passages, and develop the subplots alongside the main \
             plot. Write a detailed chapter of approximately {} words.",
            serde_json::to_string(topic).context("Failed to serialize topic")?,
            serde_json::to_string(&event).context("Failed to serialize event")?,
            self.config.book.words_per_chapter
        );

        let refine_loop = RefineLoop::new(self.config.book.max_edit_iterations);
        let words_per_chapter = self.config.book.words_per_chapter;
        let AgentSet { writer, editor, .. } = &mut self.agents;
        let mut drafter = ChapterDrafter { writer };
        let mut critic = ChapterEditor {
            editor,
            characters,
            words_per_chapter,
        };

        let refined = refine_loop.refine(&mut drafter, &mut critic, &request).await;
        if !refined.approved {
            log::warn!("Chapter {number} shipped unapproved after {} iterations", refined.iterations);
        }

        let content = self.format_chapter(refined.content).await;
        self.storage.write(&path, content.as_bytes()).await?;

        Ok(Chapter {
            number,
            content,
            event,
        })
    }

    /// Publisher formatting pass. The heading survives even a publisher that
    /// drops it, and a failed publisher call leaves the chapter untouched.
    async fn format_chapter(&mut self, content: String) -> String {
        let heading = heading_regex()
            .find(&content)
            .map(|m| m.as_str().to_string());

        let formatted = self
            .agents
            .publisher
            .invoke(&format!(
                "Format the following chapter for publication.\n\n{content}"
            ))
            .await;
        self.agents.publisher.clear();

        if formatted.starts_with(ERROR_SENTINEL) {
            log::warn!("Publisher pass failed; keeping the unformatted chapter");
            return content;
        }

        let mut result = formatted.trim().to_string();
        if let Some(heading) = heading {
            if !result.starts_with(&heading) {
                result = format!("{heading}\n\n{result}");
            }
        }
        result
    }

    /// Whole-narrative critique: one structured review over chapter
    /// summaries, then a single targeted regeneration per flagged chapter.
    async fn review_pass(
        &mut self,
        chapters: &mut [Chapter],
        topic: &Topic,
        characters: &[Character],
    ) -> Result<()> {
        println!("Reviewing the overall narrative...");
        let summaries = chapters
            .iter()
            .map(|c| {
                let excerpt: String = c.content.chars().take(200).collect();
                format!("Chapter {} Summary: {excerpt}...", c.number)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Review the overall narrative structure of the novel with the following details:\n\
             Topic: {}\n\
             Characters: {}\n\
             Chapter Summaries:\n{summaries}\n\n\
             Provide feedback on narrative flow, character development, subplot integration and \
             thematic consistency. Respond with a JSON object containing your analysis and \
             per-chapter feedback.",
            serde_json::to_string(topic).context("Failed to serialize topic")?,
            character_names(characters).join(", ")
        );

        self.agents.reviewer.clear();
        let raw = self.agents.reviewer.invoke(&prompt).await;
        let review = match self.parser.parse(&raw, NarrativeReview::REQUIRED).await {
            Ok(record) => NarrativeReview::from_record(&record),
            Err(e) => {
                log::warn!("Failed to generate a valid narrative review ({e}); skipping the pass");
                return Ok(());
            }
        };

        log::info!("Narrative review: {}", review.overall_assessment);
        for feedback in &review.chapter_feedback {
            let index = feedback.chapter_number;
            if index < 1 || index > chapters.len() {
                log::warn!("Narrative review referenced unknown chapter {index}; ignoring");
                continue;
            }
            let chapter = &mut chapters[index - 1];

            log::info!("Applying narrative feedback to chapter {index}");
            self.agents.writer.clear();
            let prompt = format!(
                "Revise the following chapter based on this feedback:\n{}\n\n\
                 Original chapter:\n{}\n\n\
                 Address all points raised, maintain consistency with the overall narrative, and \
                 keep the original length.",
                serde_json::to_string(feedback).context("Failed to serialize feedback")?,
                chapter.content
            );
            let revised = self.agents.writer.invoke(&prompt).await;
            if revised.starts_with(ERROR_SENTINEL) {
                log::warn!("Revision of chapter {index} failed; keeping the original");
                continue;
            }

            chapter.content = clean_chapter_content(&revised);
            let path = self.chapter_path(index);
            self.storage.write(&path, chapter.content.as_bytes()).await?;
        }

        Ok(())
    }

    fn pause_checkpoint(&self) -> Result<()> {
        if self.config.unattended {
            return Ok(());
        }
        let proceed = inquire::Confirm::new("Continue to next chapter?")
            .with_default(true)
            .prompt()
            .unwrap_or(false);
        anyhow::ensure!(
            proceed,
            "stopping at user request; completed chapters are cached in {}",
            self.config.build_folder
        );
        Ok(())
    }

    fn build_path(&self, name: &str) -> String {
        format!("{}/{name}", self.config.build_folder)
    }

    fn chapter_path(&self, number: usize) -> String {
        self.build_path(&format!("chapter_{number:04}.txt"))
    }
}

async fn generate_one_character(
    llm: Arc<dyn LlmClient>,
    registry: Arc<Mutex<HashSet<String>>>,
    topic_brief: String,
    slot: usize,
) -> Option<Character> {
    let mut agent = roles::character_agent(&llm);
    let mut parser = RecordParser::new(roles::repair_agent(&llm));

    for attempt in 1..=CHARACTER_ATTEMPTS {
        let taken: Vec<String> = {
            let registry = registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.iter().cloned().collect()
        };
        let prompt = format!(
            "Generate character {} for our novel with the following topic:\n{topic_brief}\n\n\
             Existing characters: [{}]\n\
             Ensure the character has a UNIQUE NAME different from any existing character. \
             Respond ONLY with a valid JSON object containing the required fields.",
            slot + 1,
            taken.join(", ")
        );

        agent.clear();
        let raw = agent.invoke(&prompt).await;
        let record = match parser.parse(&raw, Character::REQUIRED).await {
            Ok(record) => record,
            Err(e) => {
                log::warn!(
                    "Invalid character data ({e}). Retrying character {} generation. Attempt {attempt}/{CHARACTER_ATTEMPTS}",
                    slot + 1
                );
                continue;
            }
        };

        let character = Character::from_record(&record);
        {
            let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
            if registry.contains(&character.name) {
                log::warn!(
                    "Duplicate character name: {}. Attempt {attempt}/{CHARACTER_ATTEMPTS}",
                    character.name
                );
                continue;
            }
            registry.insert(character.name.clone());
        }

        log::info!("Generated character: {}", character.name);
        return Some(character);
    }

    log::error!(
        "Failed to generate valid character {} after {CHARACTER_ATTEMPTS} attempts.",
        slot + 1
    );
    None
}

fn character_names(characters: &[Character]) -> Vec<String> {
    characters.iter().map(|c| c.name.clone()).collect()
}

fn heading_regex() -> &'static Regex {
    static HEADING: OnceLock<Regex> = OnceLock::new();
    HEADING.get_or_init(|| Regex::new(r"(?m)^Chapter \d+:[^\n]*").expect("heading pattern"))
}

struct ChapterDrafter<'a> {
    writer: &'a mut Agent,
}

#[async_trait]
impl<'a> Drafter for ChapterDrafter<'a> {
    async fn draft(&mut self, request: &str) -> String {
        clean_chapter_content(&self.writer.invoke(request).await)
    }

    async fn revise(&mut self, current: &str, feedback: &str) -> String {
        let prompt = format!(
            "Revise the following chapter based on this editorial feedback:\n{feedback}\n\n\
             Original chapter:\n{current}\n\n\
             Keep the chapter at roughly its current length and address every point raised."
        );
        clean_chapter_content(&self.writer.invoke(&prompt).await)
    }
}

struct ChapterEditor<'a> {
    editor: &'a mut Agent,
    characters: &'a [Character],
    words_per_chapter: usize,
}

#[async_trait]
impl<'a> Critic for ChapterEditor<'a> {
    async fn critique(&mut self, candidate: &str) -> String {
        let prompt = format!(
            "Review the following chapter:\n\n{candidate}\n\n\
             Provide specific, actionable feedback for improvement. If the chapter meets high \
             standards, start your response with 'APPROVED:' followed by a brief summary of its \
             strengths. The chapter should run to roughly {} words. Do not include any narrative \
             content in your response.",
            self.words_per_chapter
        );
        self.editor.invoke(&prompt).await
    }

    fn precheck(&self, candidate: &str) -> Vec<String> {
        check_consistency(candidate, self.characters)
    }
}
