// Cross-cutting prompt fragments shared by every LLM call.
// Feature modules keep their own prompts.rs alongside them.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Keeps the model from inventing venues, prices or opening hours.
pub const FACTUALITY_INSTRUCTION: &str = "\
    Only recommend places that genuinely exist at the destination. \
    Do NOT invent opening hours, phone numbers or exact prices; \
    give cost estimates as rough ranges in the local currency.";
