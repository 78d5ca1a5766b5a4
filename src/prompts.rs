use crate::models::{FlashcardFormat, SourceCard};

pub const NO_TEXT_SENTINEL: &str = "No text found";

pub fn extraction_prompt(is_pdf: bool) -> String {
    format!(
        "Extract all text from this {}. Return only the extracted text without any additional \
         explanation or formatting. If there's no text, return \"{} in the document.\"",
        if is_pdf { "PDF document" } else { "image" },
        NO_TEXT_SENTINEL
    )
}

/// Position of a batch within a multi-batch flashcard job.
#[derive(Debug, Clone, Copy)]
pub struct BatchPosition {
    /// 1-based
    pub index: usize,
    pub total_batches: usize,
    pub batch_size: usize,
    pub total_requested: usize,
}

pub fn flashcard_batch_prompt(
    text: &str,
    format: FlashcardFormat,
    position: BatchPosition,
) -> String {
    let continuation = if position.index > 1 {
        "\n- This is a continuation: cover different concepts than earlier batches and do not repeat cards"
    } else {
        ""
    };

    format!(
        r#"You are an expert at creating educational flashcards. Based on the following text content, generate exactly {batch_size} flashcards in {format_type} format.
This is batch {index} of {total_batches}; {total_requested} flashcards are requested in total.

Requirements:
- Generate exactly {batch_size} flashcards
- Each flashcard should have a clear front side and back side
- Front side: {front}
- Back side: {back}
- Make sure the content is accurate and educational
- Keep front side concise (max 100 words)
- Keep back side informative but concise (max 200 words){continuation}
- Also suggest a concise deck title (max 50 characters)

Return the flashcards in the following JSON format (no markdown, no code blocks, just pure JSON):
{{"deckTitle": "Deck title", "cards": [{{"front": "front side content", "back": "back side content"}}]}}

Text content:
{text}"#,
        batch_size = position.batch_size,
        format_type = format.format_type(),
        index = position.index,
        total_batches = position.total_batches,
        total_requested = position.total_requested,
        front = format.front_label(),
        back = format.back_label(),
        continuation = continuation,
        text = text,
    )
}

pub fn quiz_batch_prompt(cards: &[&SourceCard]) -> String {
    let listing = cards
        .iter()
        .map(|card| {
            format!(
                "ID: {}\nQuestion: {}\nCorrect answer: {}",
                card.id, card.front, card.back
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You are creating multiple-choice quiz questions from flashcards.
For EACH flashcard below, write exactly 3 plausible but incorrect answer options (distractors) and a short explanation of why the correct answer is right.

Rules:
- Distractors must be clearly wrong but believable
- Distractors must differ from the correct answer and from each other
- Keep distractors similar in length and style to the correct answer
- Use the exact ID given for each flashcard

Return ONLY a JSON array (no markdown, no code blocks) in this format:
[{{"id": "flashcard id", "distractors": ["wrong 1", "wrong 2", "wrong 3"], "explanation": "why the correct answer is right"}}]

Flashcards:
{listing}"#,
        listing = listing,
    )
}
