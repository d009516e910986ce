//! Prompts sent to OCR models.
//!
//! Kept in one place so tests can inspect them without a model, and so the
//! wording changes in exactly one spot.

/// System message for every OCR request.
pub const OCR_SYSTEM_PROMPT: &str = "You are an OCR engine. Convert provided documents to Markdown \
preserving structure, headings, lists, and tables. Respond with Markdown only without additional \
commentary.";

/// `data:` URL carrying the whole document inline.
pub fn data_url(mime_type: &str, base64: &str) -> String {
    format!("data:{mime_type};base64,{base64}")
}

/// User message wrapping the inlined document.
pub fn ocr_user_message(mime_type: &str, base64: &str) -> String {
    format!(
        "The document is provided as a base64 data URL. mimeType=\"{mime_type}\". \
Extract readable content and return Markdown. Data: {}",
        data_url(mime_type, base64)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_embeds_data_url() {
        let msg = ocr_user_message("image/png", "QUJD");
        assert!(msg.contains("mimeType=\"image/png\""));
        assert!(msg.ends_with("Data: data:image/png;base64,QUJD"));
    }

    #[test]
    fn system_prompt_asks_for_markdown_only() {
        assert!(OCR_SYSTEM_PROMPT.contains("Markdown only"));
    }
}
