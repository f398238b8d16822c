//! Bounded LLM-assisted repair around the pure parser.
//!
//! On failure the error, the expected schema and the original text go back to
//! the model once with an instruction to emit corrected JSON only. The repaired
//! text goes through the same [`parse`] again. Retries are capped at one no
//! matter what the caller asks for.

use serde::de::DeserializeOwned;

use super::{parse, ParseError, Schema};
use crate::llm::{GenerateOptions, Generator, ModelSpec};

/// Hard cap on repair attempts.
pub const MAX_REPAIR_RETRIES: u32 = 1;

/// The model that performs repairs.
#[derive(Clone, Copy)]
pub struct RepairOptions<'a> {
    pub max_retries: u32,
    pub repairer: Option<(&'a dyn Generator, &'a ModelSpec)>,
}

impl<'a> RepairOptions<'a> {
    /// No repair: a single pure parse.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            repairer: None,
        }
    }

    /// One repair attempt through `generator` using `model`.
    pub fn with_repairer(generator: &'a dyn Generator, model: &'a ModelSpec) -> Self {
        Self {
            max_retries: MAX_REPAIR_RETRIES,
            repairer: Some((generator, model)),
        }
    }
}

/// A successful parse plus what the repair cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub repaired: bool,
    pub repair_tokens: u64,
    pub repair_calls: u64,
}

/// Parsing failed after every allowed attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct ParseFailure {
    /// The last error seen
    pub error: ParseError,
    /// The original, unrepaired model output
    pub raw: String,
    pub attempts: u32,
    pub repair_tokens: u64,
    pub repair_calls: u64,
}

fn repair_prompt(error: &ParseError, schema: &Schema, text: &str) -> String {
    format!(
        "The following output could not be parsed.\n\n\
         Error: {}\n\n\
         Expected JSON shape: {}\n\n\
         Original output:\n{}\n\n\
         Respond with the corrected JSON only, with no explanation and no code fences.",
        error,
        schema.describe(),
        text
    )
}

/// Parse `text`, asking the repairer to fix it at most once on failure.
pub async fn parse_with_repair<T: DeserializeOwned>(
    text: &str,
    schema: &Schema,
    options: RepairOptions<'_>,
) -> Result<Parsed<T>, ParseFailure> {
    let retries = options.max_retries.min(MAX_REPAIR_RETRIES);
    let mut attempts = 1;
    let mut repair_tokens = 0;
    let mut repair_calls = 0;

    let mut error = match parse::<T>(text, schema) {
        Ok(value) => {
            return Ok(Parsed {
                value,
                repaired: false,
                repair_tokens,
                repair_calls,
            })
        }
        Err(e) => e,
    };

    if let Some((generator, model)) = options.repairer.filter(|_| retries > 0) {
        tracing::debug!("Parse failed ({}), requesting repair from {}", error, model);
        attempts += 1;
        repair_calls += 1;

        let repair = generator
            .generate(
                model,
                &repair_prompt(&error, schema, text),
                &GenerateOptions::system("You fix malformed JSON. Output JSON only.")
                    .temperature(0.0),
            )
            .await;

        match repair {
            Ok(generation) => {
                repair_tokens += generation.tokens_used;
                match parse::<T>(&generation.content, schema) {
                    Ok(value) => {
                        tracing::info!("Model output repaired after parse failure");
                        return Ok(Parsed {
                            value,
                            repaired: true,
                            repair_tokens,
                            repair_calls,
                        });
                    }
                    Err(e) => error = e,
                }
            }
            Err(e) => {
                tracing::warn!("Repair request failed: {}", e);
            }
        }
    }

    Err(ParseFailure {
        error,
        raw: text.to_string(),
        attempts,
        repair_tokens,
        repair_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Field;
    use crate::testing::ScriptedGenerator;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Score {
        confidence: f64,
    }

    fn schema() -> Schema {
        Schema::Object(vec![Field::required("confidence", Schema::number(0.0, 100.0))])
    }

    #[tokio::test]
    async fn test_valid_input_needs_no_repair() {
        let generator = ScriptedGenerator::new(vec![]);
        let model = ModelSpec::new("test", "m");
        let parsed: Parsed<Score> = parse_with_repair(
            "{\"confidence\": 88}",
            &schema(),
            RepairOptions::with_repairer(&generator, &model),
        )
        .await
        .unwrap();
        assert_eq!(parsed.value.confidence, 88.0);
        assert!(!parsed.repaired);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_single_repair_succeeds() {
        let generator = ScriptedGenerator::new(vec![Ok("{\"confidence\": 64}".into())]);
        let model = ModelSpec::new("test", "m");
        let parsed: Parsed<Score> = parse_with_repair(
            "confidence: sixty four",
            &schema(),
            RepairOptions::with_repairer(&generator, &model),
        )
        .await
        .unwrap();
        assert!(parsed.repaired);
        assert_eq!(parsed.value.confidence, 64.0);
        assert_eq!(parsed.repair_calls, 1);
        assert!(generator.prompts()[0].contains("confidence: sixty four"));
    }

    #[tokio::test]
    async fn test_retries_are_capped_at_one() {
        let generator = ScriptedGenerator::new(vec![
            Ok("still broken".into()),
            Ok("{\"confidence\": 1}".into()),
        ]);
        let model = ModelSpec::new("test", "m");
        let options = RepairOptions {
            max_retries: 5,
            repairer: Some((&generator, &model)),
        };
        let failure = parse_with_repair::<Score>("broken", &schema(), options)
            .await
            .unwrap_err();
        assert_eq!(generator.calls(), 1);
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.raw, "broken");
        assert_eq!(failure.error, ParseError::NoJson);
    }

    #[tokio::test]
    async fn test_without_repairer_fails_once() {
        let failure = parse_with_repair::<Score>("{\"confidence\": 300}", &schema(), RepairOptions::none())
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert!(matches!(failure.error, ParseError::Schema(_)));
    }
}
