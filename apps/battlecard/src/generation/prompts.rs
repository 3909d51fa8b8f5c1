// All LLM prompt constants for battlecard generation.
// Reuses cross-cutting fragments from llm_client::prompts.

/// System prompt for the battlecard pass.
pub const BATTLECARD_SYSTEM: &str = "You are a sales intelligence analyst who writes concise, \
    factual battlecards that account teams use before customer conversations.";

/// Battlecard prompt template.
/// Replace: {grounding_instruction}, {tenant_id}, {profile}, {metrics}, {attributes}
pub const BATTLECARD_PROMPT_TEMPLATE: &str = r#"{grounding_instruction}

CUSTOMER PROFILE:
- Tenant ID: {tenant_id}
{profile}

USAGE METRICS:
{metrics}

ADDITIONAL ATTRIBUTES:
{attributes}

TASK: Write a sales battlecard for this customer and score the opportunity.

Return a JSON object with this EXACT schema:
{
  "tenant_id": "{tenant_id}",
  "summary": "2-3 sentences on who the customer is and where the account stands",
  "strengths": ["reasons this account is a good fit or likely to expand"],
  "weaknesses": ["risks, gaps, or churn signals"],
  "objection_handling": ["'likely objection' -> recommended response"],
  "competitive_positioning": ["how to position against alternatives this customer may consider"],
  "overall_score": 0,
  "confidence_score": 0.0,
  "priority_level": "immediate|high|medium|low|disqualify"
}

SCORING:
- overall_score is 0-100: opportunity value discounted by how confident the data is
- confidence_score is 0.0-1.0: how much of the profile you could verify
- 80-100 strong, well-evidenced fit; 40-79 promising but uncertain; below 40 weak or unverifiable

HARD RULES:
1. Every key above MUST be present; use an empty list when you have nothing for a section
2. Keep each list to at most 5 short items
3. Echo the tenant_id exactly as given"#;

/// System prompt for the optional research pass.
pub const RESEARCH_SYSTEM: &str = "You are a meticulous business researcher. \
    Report what you can verify about a company and state clearly what you could not.";

/// Research prompt template.
/// Replace: {recency_instruction}, {profile}
pub const RESEARCH_PROMPT_TEMPLATE: &str = r#"Research the following customer:
{profile}

{recency_instruction}

Provide a short report on:
1. Current operating status and recent news
2. Company size and any growth or contraction signals
3. Industry, business model, and infrastructure or tooling needs
4. Competitors or alternative vendors they are known to use

Cite the kind of source for each finding (company site, news, professional network, filings)."#;

/// Wrapper for research findings appended to the battlecard prompt.
/// Replace: {notes}
pub const RESEARCH_NOTES_TEMPLATE: &str = r#"

RESEARCH NOTES (gathered in a prior step; may be incomplete):
<<<
{notes}
>>>"#;

/// Text substituted for profile fields the input did not provide.
pub const NOT_PROVIDED: &str = "Not provided";
