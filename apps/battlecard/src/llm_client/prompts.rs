// Cross-cutting prompt fragments shared by every completion call.
// Feature-specific templates live in generation/prompts.rs.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Instruction appended to every generation prompt to keep claims attributable.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Base every statement on the customer profile and research notes provided. \
    Do NOT invent figures, customers, or competitors. \
    If the data does not support a section, say so briefly instead of guessing.";

/// Instruction that biases research toward fresh evidence.
pub const RECENCY_INSTRUCTION: &str = "\
    Prefer sources from the last two years. Treat older data as potentially outdated \
    and say when a finding rests only on old evidence.";
