// Shared prompt fragments. Each module that calls the LLM keeps its own
// prompts.rs next to it; this file only holds cross-cutting pieces.

/// System prompt suffix that enforces JSON-only output.
pub const JSON_ONLY_INSTRUCTION: &str = "\
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Keeps every statement tied to the supplied paper text.
pub const GROUNDING_INSTRUCTION: &str = "\
    Base every statement on the paper text provided. \
    Do NOT invent results, numbers, datasets or citations that are not in the text.";
