// LLM prompt constants for itinerary generation.
// Reuses cross-cutting fragments from llm_client::prompts.

/// System prompt for itinerary generation. `{json_only}` is filled from llm_client::prompts.
pub const ITINERARY_SYSTEM_TEMPLATE: &str = "You are an experienced travel planner who writes \
    practical, well-paced day-by-day itineraries. {json_only}";

/// Generation prompt template. Placeholders are replaced before sending.
pub const ITINERARY_PROMPT_TEMPLATE: &str = r#"Plan a trip with these details:

- Destination: {destination}
- Length: {days} days
- Travelers: {travelers}
- Budget level: {budget}
- Interests: {interests}

Return a JSON object with this EXACT schema (no extra fields):
{
  "title": "Short catchy trip title",
  "summary": "Two or three sentences describing the trip",
  "days": [
    {
      "day": 1,
      "title": "Theme of the day",
      "places": [
        {
          "name": "Place name",
          "description": "What to do there and why",
          "time_of_day": "morning" | "afternoon" | "evening",
          "category": "sight" | "food" | "activity" | "shopping" | "nightlife" | "nature",
          "estimated_cost": "rough range in local currency"
        }
      ]
    }
  ],
  "tips": ["Practical tip"]
}

Rules:
- The "days" array MUST contain exactly {days} entries, numbered 1 to {days} in order.
- Every day MUST list between 2 and 5 places, grouped so travel between them is short.
- Match the budget level: "budget" favours free sights and street food, "luxury" fine dining and premium experiences.
- {factuality_instruction}
"#;

/// Appended on retries after the model returned a plan that failed validation.
pub const ITINERARY_RETRY_NOTE: &str = "\n\nYour previous answer was rejected: {issue}. \
    Return the complete corrected JSON object.";
