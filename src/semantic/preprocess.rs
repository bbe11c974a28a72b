//! Document text preparation for embedding generation.
//!
//! Fields are concatenated in a fixed order: title, keywords (space-joined),
//! creator, content, description. Documents whose text is empty are not sent
//! to the model, but keep their index so the collection stays aligned.

use crate::dataset::DocumentRecord;

/// Embedding input for one document, tagged with its dataset position.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedText {
    pub index: usize,
    pub text: String,
}

/// Build the embedding input for a single record. May be empty.
pub fn document_text(record: &DocumentRecord) -> String {
    let keywords = record
        .keywords
        .as_ref()
        .map(|k| k.join(" "))
        .unwrap_or_default();

    [
        record.title.as_deref().unwrap_or(""),
        keywords.as_str(),
        record.creator.as_deref().unwrap_or(""),
        record.content.as_deref().unwrap_or(""),
        record.description.as_deref().unwrap_or(""),
    ]
    .join(" ")
    .trim()
    .to_string()
}

/// Non-empty texts for every document, in dataset order.
pub fn prepare_texts(records: &[DocumentRecord]) -> Vec<PreparedText> {
    records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let text = document_text(record);
            (!text.is_empty()).then_some(PreparedText { index, text })
        })
        .collect()
}
