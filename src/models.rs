//! Typed records for the two ingestion sources.
//!
//! Wire names mirror the upstream APIs exactly: Hansard fields are
//! PascalCase, written-question fields are camelCase. Contributions are
//! parsed strictly (unknown fields are an error) so upstream schema drift
//! surfaces at hydration time; everything else parses leniently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::chunker::SentenceChunker;

// ---------------------------------------------------------------------------
// Tolerant ISO datetime (de)serialization
// ---------------------------------------------------------------------------

/// The Hansard API emits naive datetimes (`2024-07-18T00:00:00`), the
/// questions API emits offsets and `Z` suffixes. Accept all of them,
/// treat naive values as UTC, and serialize back as RFC 3339 UTC.
pub mod datetime_flex {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Some(naive.and_utc());
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
        }
        None
    }

    pub fn format(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub mod optional {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => serializer.serialize_str(&super::format(dt)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            match raw {
                None => Ok(None),
                Some(s) if s.is_empty() => Ok(None),
                Some(s) => super::parse(&s)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid datetime: {s}"))),
            }
        }
    }

    pub mod required {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &DateTime<Utc>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&super::format(value))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<DateTime<Utc>, D::Error> {
            let raw = String::deserialize(deserializer)?;
            super::parse(&raw)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid datetime: {raw}")))
        }
    }
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Contribution,
    Question,
    Answer,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contribution => "contribution",
            Self::Question => "question",
            Self::Answer => "answer",
        }
    }
}

/// One embeddable window of a record. The payload is the record's full
/// serialization minus the embedded text fields, plus the chunk fields:
/// exactly what gets stored next to the vectors.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub chunk_type: ChunkType,
    pub text: String,
    pub payload: serde_json::Value,
}

fn attach_chunk_fields(
    mut payload: serde_json::Value,
    chunk_id: &str,
    chunk_type: ChunkType,
    text: &str,
) -> serde_json::Value {
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("text".into(), text.into());
        obj.insert("chunk_type".into(), chunk_type.as_str().into());
        obj.insert("chunk_id".into(), chunk_id.into());
    }
    payload
}

// ---------------------------------------------------------------------------
// Hansard contributions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DebateParent {
    pub id: i64,
    pub title: String,
    pub parent_id: Option<i64>,
    pub external_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Contribution {
    #[serde(default)]
    pub member_name: Option<String>,
    #[serde(default)]
    pub member_id: Option<i64>,
    #[serde(default)]
    pub attributed_to: Option<String>,
    #[serde(default)]
    pub item_id: Option<i64>,
    #[serde(default)]
    pub contribution_ext_id: Option<String>,
    #[serde(default)]
    pub contribution_text: Option<String>,
    #[serde(default)]
    pub contribution_text_full: Option<String>,
    #[serde(default, rename = "HRSTag")]
    pub hrs_tag: Option<String>,
    #[serde(default)]
    pub hansard_section: Option<String>,
    #[serde(default)]
    pub debate_section: Option<String>,
    #[serde(default)]
    pub debate_section_id: Option<i64>,
    #[serde(default)]
    pub debate_section_ext_id: Option<String>,
    #[serde(default, with = "datetime_flex::optional")]
    pub sitting_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub house: Option<String>,
    #[serde(default)]
    pub order_in_debate_section: Option<i64>,
    #[serde(default)]
    pub debate_section_order: Option<i64>,
    #[serde(default)]
    pub rank: Option<i64>,
    #[serde(default, with = "datetime_flex::optional")]
    pub timecode: Option<DateTime<Utc>>,
    /// Debate hierarchy root→leaf, resolved by the processor before
    /// chunking. Not present in the upstream search payload.
    #[serde(default, rename = "debate_parents")]
    pub debate_parents: Option<Vec<DebateParent>>,
    #[serde(default = "Utc::now", rename = "created_at", with = "datetime_flex::required")]
    pub created_at: DateTime<Utc>,
}

impl Contribution {
    pub fn debate_url(&self) -> String {
        format!(
            "https://hansard.parliament.uk/{}/{}/debates/{}/link",
            self.house.as_deref().unwrap_or_default(),
            self.sitting_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            self.debate_section_ext_id.as_deref().unwrap_or_default(),
        )
    }

    pub fn contribution_url(&self) -> Option<String> {
        self.contribution_ext_id
            .as_deref()
            .map(|ext_id| format!("{}#contribution-{ext_id}", self.debate_url()))
    }

    /// Deterministic document identity. Falls back to a content hash when
    /// the upstream external id is missing.
    pub fn document_uri(&self) -> String {
        let debate = self.debate_section_ext_id.as_deref().unwrap_or_default();
        match self.contribution_ext_id.as_deref() {
            Some(ext_id) => format!("debate_{debate}_contrib_{ext_id}"),
            None => {
                let mut hasher = Sha256::new();
                hasher.update(debate.as_bytes());
                hasher.update(b"_");
                hasher.update(self.contribution_text.as_deref().unwrap_or_default());
                hasher.update(b"_");
                hasher.update(
                    self.order_in_debate_section
                        .map(|o| o.to_string())
                        .unwrap_or_default(),
                );
                format!("debate_{debate}_contrib_{}", hex::encode(hasher.finalize()))
            }
        }
    }

    pub fn embeddable_text(&self) -> &str {
        self.contribution_text_full.as_deref().unwrap_or_default()
    }

    /// Record serialization minus the embedded text fields, plus computed
    /// identity/URL fields.
    fn base_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::to_value(self).expect("contribution serializes to JSON");
        let obj = payload
            .as_object_mut()
            .expect("contribution serializes to an object");
        obj.remove("ContributionText");
        obj.remove("ContributionTextFull");
        obj.insert("document_uri".into(), self.document_uri().into());
        obj.insert("debate_url".into(), self.debate_url().into());
        obj.insert(
            "contribution_url".into(),
            self.contribution_url().map(Into::into).unwrap_or(serde_json::Value::Null),
        );
        payload
    }

    pub fn to_chunks(&self, chunker: &SentenceChunker) -> Vec<ChunkRecord> {
        let document_uri = self.document_uri();
        let base = self.base_payload();
        chunker
            .chunk(self.embeddable_text())
            .into_iter()
            .enumerate()
            .map(|(k, text)| {
                let chunk_id = format!("{document_uri}_chunk_{k}");
                ChunkRecord {
                    payload: attach_chunk_fields(
                        base.clone(),
                        &chunk_id,
                        ChunkType::Contribution,
                        &text,
                    ),
                    chunk_id,
                    chunk_type: ChunkType::Contribution,
                    text,
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Parliamentary questions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: i64,
    #[serde(default)]
    pub list_as: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub party: Option<String>,
    #[serde(default)]
    pub party_colour: Option<String>,
    #[serde(default)]
    pub party_abbreviation: Option<String>,
    #[serde(default)]
    pub member_from: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub file_size_bytes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedQuestionDate {
    #[serde(default)]
    pub question_uin: Option<String>,
    #[serde(with = "datetime_flex::required")]
    pub date_tabled: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParliamentaryQuestion {
    pub id: i64,
    pub asking_member_id: i64,
    #[serde(default)]
    pub asking_member: Option<Member>,
    pub house: String,
    pub member_has_interest: bool,
    #[serde(with = "datetime_flex::required")]
    pub date_tabled: DateTime<Utc>,
    #[serde(default, with = "datetime_flex::optional")]
    pub date_for_answer: Option<DateTime<Utc>>,
    #[serde(default)]
    pub uin: Option<String>,
    #[serde(default)]
    pub question_text: Option<String>,
    pub answering_body_id: i64,
    #[serde(default)]
    pub answering_body_name: Option<String>,
    pub is_withdrawn: bool,
    pub is_named_day: bool,
    #[serde(default)]
    pub grouped_questions: Vec<String>,
    #[serde(default)]
    pub answer_is_holding: Option<bool>,
    #[serde(default)]
    pub answer_is_correction: Option<bool>,
    #[serde(default)]
    pub answering_member_id: Option<i64>,
    #[serde(default)]
    pub answering_member: Option<Member>,
    #[serde(default)]
    pub correcting_member_id: Option<i64>,
    #[serde(default)]
    pub correcting_member: Option<Member>,
    #[serde(default, with = "datetime_flex::optional")]
    pub date_answered: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answer_text: Option<String>,
    #[serde(default)]
    pub original_answer_text: Option<String>,
    #[serde(default)]
    pub comparable_answer_text: Option<String>,
    #[serde(default, with = "datetime_flex::optional")]
    pub date_answer_corrected: Option<DateTime<Utc>>,
    #[serde(default, with = "datetime_flex::optional")]
    pub date_holding_answer: Option<DateTime<Utc>>,
    pub attachment_count: i64,
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub grouped_questions_dates: Vec<GroupedQuestionDate>,
    #[serde(default = "Utc::now", rename = "created_at", with = "datetime_flex::required")]
    pub created_at: DateTime<Utc>,
}

impl ParliamentaryQuestion {
    pub fn document_uri(&self) -> String {
        format!("pq_{}", self.id)
    }

    /// Upstream truncates long question/answer text with a trailing
    /// ellipsis; such records need the detail endpoint before storage.
    pub fn is_truncated(&self) -> bool {
        let ends_ellipsis = |t: &Option<String>| {
            t.as_deref().is_some_and(|t| t.ends_with("..."))
        };
        ends_ellipsis(&self.question_text) || ends_ellipsis(&self.answer_text)
    }

    pub fn question_url(&self) -> String {
        format!(
            "https://questions-statements.parliament.uk/written-questions/detail/{}/{}",
            self.date_tabled.format("%Y-%m-%d"),
            self.uin.as_deref().unwrap_or_default(),
        )
    }

    fn base_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::to_value(self).expect("question serializes to JSON");
        let obj = payload
            .as_object_mut()
            .expect("question serializes to an object");
        obj.remove("questionText");
        obj.remove("answerText");
        obj.insert("document_uri".into(), self.document_uri().into());
        payload
    }

    /// Question chunks first (`k` in `[0, Q)`), then answer chunks
    /// (`[Q, Q+A)`). The chunk index never restarts mid-document.
    pub fn to_chunks(&self, chunker: &SentenceChunker) -> Vec<ChunkRecord> {
        let document_uri = self.document_uri();
        let base = self.base_payload();
        let question_chunks = chunker.chunk(self.question_text.as_deref().unwrap_or_default());
        let answer_chunks = chunker.chunk(self.answer_text.as_deref().unwrap_or_default());

        let typed = question_chunks
            .into_iter()
            .map(|text| (ChunkType::Question, text))
            .chain(answer_chunks.into_iter().map(|text| (ChunkType::Answer, text)));

        typed
            .enumerate()
            .map(|(k, (chunk_type, text))| {
                let chunk_id = format!("{document_uri}_chunk_{k}");
                ChunkRecord {
                    payload: attach_chunk_fields(base.clone(), &chunk_id, chunk_type, &text),
                    chunk_id,
                    chunk_type,
                    text,
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tagged record union
// ---------------------------------------------------------------------------

/// A hydrated record from either source, ready for chunking and storage.
#[derive(Debug, Clone)]
pub enum SourceRecord {
    Contribution(Box<Contribution>),
    Question(Box<ParliamentaryQuestion>),
}

impl SourceRecord {
    pub fn document_uri(&self) -> String {
        match self {
            Self::Contribution(c) => c.document_uri(),
            Self::Question(q) => q.document_uri(),
        }
    }

    pub fn to_chunks(&self, chunker: &SentenceChunker) -> Vec<ChunkRecord> {
        match self {
            Self::Contribution(c) => c.to_chunks(chunker),
            Self::Question(q) => q.to_chunks(chunker),
        }
    }
}

// ---------------------------------------------------------------------------
// Upstream response envelopes
// ---------------------------------------------------------------------------

/// One page of `/search/contributions/{type}.json`. Items stay as raw JSON
/// so the harvester can enqueue them verbatim for later strict decoding.
#[derive(Debug, Deserialize)]
pub struct ContributionsPage {
    #[serde(rename = "Results", default)]
    pub results: Vec<serde_json::Value>,
    #[serde(rename = "TotalResultCount", default)]
    pub total_result_count: u64,
}

/// One page of `/writtenquestions/questions`.
#[derive(Debug, Deserialize)]
pub struct QuestionsPage {
    #[serde(default)]
    pub results: Vec<QuestionsPageItem>,
    #[serde(rename = "totalResults", default)]
    pub total_results: u64,
}

#[derive(Debug, Deserialize)]
pub struct QuestionsPageItem {
    pub value: serde_json::Value,
}

/// `/writtenquestions/questions/{id}` detail envelope.
#[derive(Debug, Deserialize)]
pub struct QuestionDetail {
    pub value: ParliamentaryQuestion,
}

/// One section from `/overview/sectionsforday.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct DaySection {
    #[serde(rename = "Id")]
    pub id: i64,
    #[serde(rename = "Title", default)]
    pub title: Option<String>,
    #[serde(rename = "ParentId", default)]
    pub parent_id: Option<i64>,
    #[serde(rename = "ExternalId", default)]
    pub external_id: Option<String>,
}
