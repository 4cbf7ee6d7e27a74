//! Instruction prompt for VLM-based form field extraction.
//!
//! The prompt lives here so the shape the parser expects and the shape the
//! model is asked for are defined side by side. Callers can override it via
//! [`crate::config::ExtractionConfig::system_prompt`]; the parser in
//! [`crate::pipeline::parse`] copes with models that ignore it.

/// Default instruction sent with every page image.
pub const EXTRACTION_PROMPT: &str = r#"You are an expert at reading and extracting information from handwritten forms and documents.

TASK:
Carefully analyze this handwritten form image. Identify all visible fields, labels, and their corresponding handwritten values. Create field names based on what you see in the form.

INSTRUCTIONS:
1. Look for any printed or handwritten labels (like "Name:", "Date:", "Address:", etc.)
2. Extract the handwritten values next to each label
3. If you see fields without clear labels, create appropriate descriptive labels based on the content
4. Include ALL text you can read from the image
5. If text is unclear or illegible, mark the value as "unreadable"

OUTPUT FORMAT (STRICT JSON ONLY):
{
  "fields": [
    {
      "label": "descriptive field name based on what you see",
      "value": "the actual handwritten text you read"
    }
  ]
}

CRITICAL RULES:
- Return ONLY valid JSON, no explanations or additional text
- Create labels dynamically based on what's actually in the image
- Do not assume or invent fields that aren't visible
- Extract exactly what you see, maintain original spelling and formatting
- List fields in reading order, top to bottom"#;
