// Shared prompt fragments.
// Stage-specific templates live in assessment::prompts and are seeded into the
// prompts table; the fragments here are appended to every seeded system prompt.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Reminder that requirement text must be carried through verbatim between stages.
pub const PRESERVE_TEXT_INSTRUCTION: &str = "\
    Copy every requirement_string exactly as you received it unless you are explicitly \
    told to rewrite it. Never merge, drop, or reorder items.";
