//! Itinerary Generation: prompts the tier's model and validates the returned plan.
//!
//! Flow: build prompt → LLM call (tier model + token budget) → parse → check day
//! structure → retry with the rejection reason appended, up to MAX_PLAN_RETRIES times.

use tracing::{info, warn};

use crate::errors::AppError;
use crate::itineraries::plan::{GenerateRequest, ItineraryPlan};
use crate::itineraries::prompts::{
    ITINERARY_PROMPT_TEMPLATE, ITINERARY_RETRY_NOTE, ITINERARY_SYSTEM_TEMPLATE,
};
use crate::llm_client::prompts::{FACTUALITY_INSTRUCTION, JSON_ONLY_SYSTEM};
use crate::llm_client::{parse_json_reply, ChatCompletion, CompletionParams};
use crate::tiers::ModelProfile;

/// Extra LLM calls allowed when the returned plan fails validation.
const MAX_PLAN_RETRIES: u32 = 2;
const TEMPERATURE: f32 = 0.7;

/// Calls the LLM until it returns a plan covering exactly the requested days.
pub async fn generate_plan(
    llm: &dyn ChatCompletion,
    model: &ModelProfile,
    request: &GenerateRequest,
) -> Result<ItineraryPlan, AppError> {
    let system = ITINERARY_SYSTEM_TEMPLATE.replace("{json_only}", JSON_ONLY_SYSTEM);
    let base_prompt = build_prompt(request);
    let params = CompletionParams {
        model: model.model,
        max_tokens: model.max_tokens,
        temperature: TEMPERATURE,
    };
    let expected_days = request.days as u32;

    let mut prompt = base_prompt.clone();
    let mut last_issue = String::new();

    for attempt in 0..=MAX_PLAN_RETRIES {
        let reply = llm
            .complete(params, &system, &prompt)
            .await
            .map_err(|e| AppError::Llm(format!("Itinerary LLM call failed: {e}")))?;

        let plan: ItineraryPlan = match parse_json_reply(&reply) {
            Ok(plan) => plan,
            Err(e) => {
                last_issue = format!("the reply was not valid JSON ({e})");
                warn!(
                    "Itinerary attempt {}/{}: {}",
                    attempt + 1,
                    MAX_PLAN_RETRIES + 1,
                    last_issue
                );
                prompt = retry_prompt(&base_prompt, &last_issue);
                continue;
            }
        };

        match plan.check(expected_days) {
            Ok(()) => {
                info!(
                    model = model.model,
                    destination = %request.destination,
                    days = expected_days,
                    "itinerary plan generated"
                );
                return Ok(plan);
            }
            Err(issue) => {
                last_issue = issue.to_string();
                warn!(
                    "Itinerary attempt {}/{}: plan rejected: {}",
                    attempt + 1,
                    MAX_PLAN_RETRIES + 1,
                    last_issue
                );
                prompt = retry_prompt(&base_prompt, &last_issue);
            }
        }
    }

    Err(AppError::Llm(format!(
        "Itinerary generation failed after {} attempts: {last_issue}",
        MAX_PLAN_RETRIES + 1
    )))
}

/// Fills the generation template from a validated request.
pub fn build_prompt(request: &GenerateRequest) -> String {
    let interests = if request.interests.is_empty() {
        "general sightseeing".to_string()
    } else {
        request.interests.join(", ")
    };

    ITINERARY_PROMPT_TEMPLATE
        .replace("{destination}", &request.destination)
        .replace("{days}", &request.days.to_string())
        .replace("{travelers}", &request.travelers.to_string())
        .replace("{budget}", request.budget.as_str())
        .replace("{interests}", &interests)
        .replace("{factuality_instruction}", FACTUALITY_INSTRUCTION)
}

fn retry_prompt(base_prompt: &str, issue: &str) -> String {
    format!("{base_prompt}{}", ITINERARY_RETRY_NOTE.replace("{issue}", issue))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::itineraries::plan::Budget;
    use crate::llm_client::LlmError;
    use crate::tiers::Tier;

    /// Replays canned replies in order and records every prompt it was sent.
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatCompletion for ScriptedModel {
        async fn complete(
            &self,
            _params: CompletionParams<'_>,
            _system: &str,
            prompt: &str,
        ) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyContent))
        }
    }

    fn plan_json(days: u32) -> String {
        let days: Vec<_> = (1..=days)
            .map(|day| {
                serde_json::json!({
                    "day": day,
                    "title": format!("Day {day}"),
                    "places": [{"name": "Fushimi Inari"}]
                })
            })
            .collect();
        serde_json::json!({"title": "Kyoto in four days", "days": days}).to_string()
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            destination: "Kyoto".to_string(),
            days: 4,
            travelers: 2,
            budget: Budget::Luxury,
            interests: vec!["temples".to_string(), "tea".to_string()],
            is_private: false,
            captcha_token: None,
        }
    }

    #[test]
    fn test_build_prompt_fills_every_placeholder() {
        let prompt = build_prompt(&request());
        assert!(prompt.contains("Destination: Kyoto"));
        assert!(prompt.contains("Length: 4 days"));
        assert!(prompt.contains("exactly 4 entries, numbered 1 to 4"));
        assert!(prompt.contains("Budget level: luxury"));
        assert!(prompt.contains("Interests: temples, tea"));
        assert!(prompt.contains(FACTUALITY_INSTRUCTION));
        for placeholder in ["{destination}", "{days}", "{travelers}", "{budget}", "{interests}"] {
            assert!(!prompt.contains(placeholder), "{placeholder} left in prompt");
        }
    }

    #[test]
    fn test_build_prompt_without_interests() {
        let mut req = request();
        req.interests.clear();
        assert!(build_prompt(&req).contains("Interests: general sightseeing"));
    }

    #[test]
    fn test_retry_prompt_carries_issue() {
        let prompt = retry_prompt("BASE", "expected 4 days, got 3");
        assert!(prompt.starts_with("BASE"));
        assert!(prompt.contains("rejected: expected 4 days, got 3"));
    }

    #[tokio::test]
    async fn test_invalid_reply_is_retried_with_the_issue() {
        let model = ScriptedModel::new(vec![Ok("not json at all".to_string()), Ok(plan_json(4))]);
        let plan = generate_plan(&model, &Tier::Free.model_profile(), &request())
            .await
            .unwrap();
        assert_eq!(plan.days.len(), 4);

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].contains("rejected:"));
        assert!(prompts[1].contains("rejected: the reply was not valid JSON"));
    }

    #[tokio::test]
    async fn test_plan_with_wrong_day_count_is_retried() {
        let model = ScriptedModel::new(vec![Ok(plan_json(3)), Ok(plan_json(4))]);
        let plan = generate_plan(&model, &Tier::Free.model_profile(), &request()).await;
        assert!(plan.is_ok());
        assert!(model.prompts()[1].contains("rejected: expected 4 days, got 3"));
    }

    #[tokio::test]
    async fn test_gives_up_after_three_invalid_replies() {
        let model = ScriptedModel::new(vec![
            Ok(plan_json(2)),
            Ok("{}".to_string()),
            Ok(plan_json(5)),
            Ok(plan_json(4)),
        ]);
        let err = generate_plan(&model, &Tier::Free.model_profile(), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Llm(ref msg) if msg.contains("after 3 attempts")));
        assert_eq!(model.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_retried_here() {
        let model = ScriptedModel::new(vec![
            Err(LlmError::Exhausted { attempts: 3 }),
            Ok(plan_json(4)),
        ]);
        let err = generate_plan(&model, &Tier::Free.model_profile(), &request())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Llm(_)));
        assert_eq!(model.prompts().len(), 1);
    }
}
