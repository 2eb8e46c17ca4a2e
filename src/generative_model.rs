//! GenerativeModel (spec §4.5): one model behind two modes, extraction and
//! answering. Grounded on the teacher's `llm.rs` (`LlmManager`), generalized
//! from a single hardcoded provider/prompt to the bilingual, streaming,
//! schema-validated contract spec §4.5 names.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use rig::client::CompletionClient as _;
use rig::completion::Prompt;
use rig::providers::openai;
use serde::Deserialize;
use tracing::warn;

use crate::models::Language;

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedFact {
    pub content: String,
    pub fact_type: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedConcept {
    pub term: String,
    pub definition: String,
    pub category: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedCase {
    pub case_number: String,
    pub case_name: String,
    #[serde(default)]
    pub court: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// One edge between two of the entities/facts/concepts/cases above, named by
/// label so it can be dispatched to the correct typed relationship (spec
/// §3's `ABOUT`/`CONTAINS`/`MENTIONS`/`RELATED_TO`/`APPLIES_TO`/`INVOLVES`
/// table) instead of being hardcoded to one shape.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedRelation {
    pub src_name: String,
    pub dst_name: String,
    #[serde(rename = "type")]
    pub relation_type: String,
    pub src_label: String,
    pub dst_label: String,
}

fn default_confidence() -> f64 {
    1.0
}

/// Everything the model found in one chunk, per spec §4.5's extraction
/// schema.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExtractionResult {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub facts: Vec<ExtractedFact>,
    #[serde(default)]
    pub concepts: Vec<ExtractedConcept>,
    #[serde(default)]
    pub cases: Vec<ExtractedCase>,
    #[serde(default)]
    pub relations: Vec<ExtractedRelation>,
}

impl ExtractionResult {
    fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.facts.is_empty()
            && self.concepts.is_empty()
            && self.cases.is_empty()
            && self.relations.is_empty()
    }
}

const EXTRACTION_CONFIDENCE_FALLBACK: f64 = 0.2;

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Extracts entities/facts/concepts/cases/relations from one chunk,
    /// per the schema spec §4.5 defines. Never fails the ingest on malformed
    /// model output — falls back to a low-confidence heuristic extraction
    /// instead (spec §4.5, §5 edge cases).
    async fn extract(&self, text: &str, language: Language) -> Result<ExtractionResult>;

    /// Streams an answer assembled from the four prompt blocks the Answerer
    /// prepares (Disclaimer, Context, History, Question already folded into
    /// `system_preamble`/`question`).
    async fn answer(
        &self,
        system_preamble: &str,
        context: &str,
        question: &str,
    ) -> Result<BoxStream<'static, Result<String>>>;

    /// The language-coupled system persona for answer mode (spec §4.5's
    /// prompt-language coupling, applied to answering as well as extraction).
    fn answer_system_preamble(&self, language: Language) -> &'static str;
}

/// Generalizes the teacher's `answer_with_openai`/`extract_entities_and_relations`
/// behind the `GenerativeModel` trait, with a bilingual preamble and a
/// streaming answer surface synthesized by chunking rig's proven
/// non-streaming `agent.prompt()` completion (spec §4.5 open question: rig
/// has no exposed streaming completion API in this stack, so a full
/// response is split into word-sized pieces and forwarded through a
/// channel, mirroring the chat-streaming architecture used for SSE
/// elsewhere in this codebase).
pub struct RigGenerativeModel {
    chat_model: String,
}

impl RigGenerativeModel {
    pub fn new(chat_model: String) -> Self {
        Self { chat_model }
    }

    fn extraction_preamble(language: Language) -> &'static str {
        match language {
            Language::Ar | Language::Mixed => {
                r#"
أنت محلل قانوني متخصص في استخراج المعلومات لبناء رسم بياني معرفي. حلل النص التالي واستخرج:
- الكيانات (entities): أشخاص، منظمات، مفاهيم قانونية.
- الحقائق (facts): بيانات واقعية واردة في النص.
- المفاهيم القانونية (concepts): مصطلحات قانونية مع تعريفها.
- القضايا (cases): أرقام قضايا أو إشارات قضائية.
- العلاقات (relations): كل علاقة تربط طرفين مما سبق، بالشكل
  src_name, dst_name, type (ABOUT بين fact وentity، CONTAINS بين
  document وfact، MENTIONS بين document وentity، RELATED_TO بين
  entity/entity أو concept/concept، APPLIES_TO بين concept وentity،
  INVOLVES بين case وentity)، src_label, dst_label (أحد
  Document/Entity/Fact/LegalConcept/Case).

أجب حصراً بكائن JSON واحد صالح بالمفاتيح: entities, facts, concepts, cases, relations.
إن لم تجد شيئاً أعد قوائم فارغة. لا تكتب أي شرح خارج JSON.
"#
            }
            Language::En => {
                r#"
You are a legal analyst extracting information to populate a knowledge graph.
Analyze the text and extract:
- entities: people, organizations, legal concepts mentioned.
- facts: factual statements asserted in the text.
- concepts: legal terms with their definition and category.
- cases: case numbers or judicial references.
- relations: edges between the items above, named by label so they map onto
  a fixed schema: ABOUT (fact -> entity), CONTAINS (document -> fact),
  MENTIONS (document -> entity), RELATED_TO (entity <-> entity or
  concept <-> concept), APPLIES_TO (concept -> entity), INVOLVES
  (case -> entity).

Respond with exactly one valid JSON object with keys: entities, facts, concepts, cases, relations.
Each entity needs name/entity_type/description/confidence (0.0-1.0).
Each fact needs content/fact_type/confidence (0.0-1.0).
Each concept needs term/definition/category.
Each case needs case_number/case_name/court/jurisdiction/status.
Each relation needs src_name, dst_name, type (one of ABOUT/CONTAINS/MENTIONS/RELATED_TO/APPLIES_TO/INVOLVES),
src_label and dst_label (one of Document/Entity/Fact/LegalConcept/Case) naming the two endpoints' kinds.
Return empty lists if nothing applies. No explanation outside the JSON.
"#
            }
        }
    }

    fn answer_preamble(language: Language) -> &'static str {
        match language {
            Language::Ar => {
                r#"
أنت مساعد قانوني متخصص في الرد على أسئلة حول مستندات قانونية متعددة اللغات.
أجب حصراً استناداً إلى السياق المرفق (نصوص المستندات والمعرفة المستخرجة من الرسم البياني).
إن لم يحتوِ السياق على الإجابة، قل ذلك صراحةً. لا تقدم استشارة قانونية، بل ملخصاً للمستندات المتاحة.
"#
            }
            Language::En | Language::Mixed => {
                r#"
You are a legal research assistant answering questions about multilingual
legal documents. Answer strictly from the supplied context (document text
and knowledge extracted into the graph). If the context does not contain
the answer, say so explicitly. You summarize the available documents; you
do not give legal advice.
"#
            }
        }
    }

    fn fallback_extract(text: &str) -> ExtractionResult {
        let entities = capitalized_spans(text)
            .into_iter()
            .map(|name| ExtractedEntity {
                name,
                entity_type: "Unknown".to_string(),
                description: Some("heuristic fallback extraction".to_string()),
                confidence: EXTRACTION_CONFIDENCE_FALLBACK,
            })
            .collect();

        ExtractionResult {
            entities,
            ..Default::default()
        }
    }
}

#[async_trait]
impl GenerativeModel for RigGenerativeModel {
    async fn extract(&self, text: &str, language: Language) -> Result<ExtractionResult> {
        let client = openai::Client::from_env();
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(Self::extraction_preamble(language))
            .build();

        let response = agent.prompt(text).await?;
        let json_response = response
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        match serde_json::from_str::<ExtractionResult>(json_response) {
            Ok(result) if !result.is_empty() => Ok(result),
            Ok(empty) => Ok(empty),
            Err(e) => {
                warn!(
                    error = %e,
                    response = %response,
                    "extraction response was not valid JSON; falling back to heuristic extraction"
                );
                Ok(Self::fallback_extract(text))
            }
        }
    }

    async fn answer(
        &self,
        system_preamble: &str,
        context: &str,
        question: &str,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let client = openai::Client::from_env();
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(system_preamble)
            .context(context)
            .build();

        let full_answer = agent.prompt(question).await?;
        Ok(Box::pin(chunk_into_stream(full_answer)))
    }

    fn answer_system_preamble(&self, language: Language) -> &'static str {
        Self::answer_preamble(language)
    }
}

/// Splits a completed answer into word-sized pieces and yields them as an
/// async stream, so the Answerer can forward them over SSE exactly as it
/// would forward tokens from a truly-streaming provider.
fn chunk_into_stream(text: String) -> BoxStream<'static, Result<String>> {
    Box::pin(async_stream::stream! {
        for word in text.split_inclusive(' ') {
            yield Ok(word.to_string());
        }
    })
}

/// Fallback heuristic extractor (spec §4.5, §5): runs of consecutive
/// capitalized words, a cheap proxy for proper nouns when the model's JSON
/// cannot be parsed.
fn capitalized_spans(text: &str) -> Vec<String> {
    let mut spans = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for word in text.split_whitespace() {
        let starts_capital = word
            .chars()
            .next()
            .map(|c| c.is_uppercase())
            .unwrap_or(false);
        if starts_capital {
            current.push(word);
        } else if !current.is_empty() {
            spans.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        spans.push(current.join(" "));
    }

    spans.retain(|s| s.split_whitespace().count() >= 1);
    spans.sort();
    spans.dedup();
    spans
}
