use crate::embeddings::CharacterNgramEmbedder;
use crate::traits::{Embedder, LanguageModel};
use crate::{ChatMessage, ServiceError};
use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::sync::Mutex;
use std::time::Duration;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

fn build_pdf(pages: &[Vec<String>]) -> TestResult<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for lines in pages {
        let mut operations = Vec::new();
        for (row, line) in lines.iter().enumerate() {
            let y = 780 - (row as i64 % 60) * 12;
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 10.into()]));
            operations.push(Operation::new("Td", vec![40.into(), y.into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(line.as_str())]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

/// One page per entry; lines inside an entry become separate text objects.
pub fn text_pdf(pages: &[&str]) -> TestResult<Vec<u8>> {
    let pages = pages
        .iter()
        .map(|page| page.lines().map(str::to_string).collect())
        .collect::<Vec<Vec<String>>>();
    build_pdf(&pages)
}

pub fn image_only_pdf(page_count: usize) -> TestResult<Vec<u8>> {
    build_pdf(&vec![Vec::new(); page_count])
}

pub fn brochure_pdf() -> TestResult<Vec<u8>> {
    text_pdf(&[
        "Tower A listing\nPrices: a 2-bedroom unit costs 450,000 dollars.\nA 3-bedroom unit costs 610,000 dollars.",
        "Amenities include a rooftop swimming pool, a gym and covered parking.\nHandover is planned for the fourth quarter.",
    ])
}

/// Embedder that always fails with the configured HTTP status.
pub struct FailingEmbedder {
    pub status: u16,
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_id(&self) -> &str {
        "char-trigram-128"
    }

    fn dimensions(&self) -> usize {
        128
    }

    async fn embed(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Err(ServiceError::Status {
            service: "embedding".to_string(),
            status: self.status,
            body: "invalid api key".to_string(),
        })
    }
}

/// Character-trigram embedder that sleeps before answering.
pub struct DelayedEmbedder {
    pub inner: CharacterNgramEmbedder,
    pub delay: Duration,
}

impl DelayedEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: CharacterNgramEmbedder::default(),
            delay,
        }
    }
}

#[async_trait]
impl Embedder for DelayedEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed(inputs).await
    }
}

pub struct SlowEmbedder;

#[async_trait]
impl Embedder for SlowEmbedder {
    fn model_id(&self) -> &str {
        "char-trigram-128"
    }

    fn dimensions(&self) -> usize {
        128
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![vec![0.0; 128]; inputs.len()])
    }
}

/// Language model that records every prompt and answers with a numbered echo
/// of the last user message.
#[derive(Default)]
pub struct RecordingModel {
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
    pub delay: Option<Duration>,
}

impl RecordingModel {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    pub fn recorded(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for RecordingModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let turn = {
            let mut prompts = self
                .prompts
                .lock()
                .map_err(|_| ServiceError::InvalidResponse {
                    service: "chat".to_string(),
                    details: "recorder poisoned".to_string(),
                })?;
            prompts.push(messages.to_vec());
            prompts.len()
        };

        let question = messages
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();
        Ok(format!("answer {turn} to: {question}"))
    }
}

pub struct FailingModel;

#[async_trait]
impl LanguageModel for FailingModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ServiceError> {
        Err(ServiceError::Status {
            service: "chat".to_string(),
            status: 401,
            body: "incorrect api key provided".to_string(),
        })
    }
}
