//! Reshapes raw upstream bodies into result records.
//!
//! The caller picks the path; bodies are never sniffed. Lengths are counted
//! in characters and the token estimate is `chars / 4`, rounded down.

use serde::Deserialize;
use chrono::Utc;

use crate::error::Error;
use crate::request::{
  Choice, GenerationRequest, GenerationResult, SentimentResult,
  SummaryResult, UsageEstimate,
};

pub const FINISH_REASON_STOP: &str = "stop";

#[derive(Debug, Deserialize)]
struct GeneratedText
{   generated_text: String
}

#[derive(Debug, Deserialize)]
struct LabelScore
{   label: String
  , score: f64
}

#[derive(Debug, Deserialize)]
struct SummaryText
{   summary_text: String
}

/// Rough token count for `chars` characters: one token per four
fn estimate_tokens(chars: usize) -> usize
{   chars / 4
}

/// Parse a generation body for `request`. `processing_ms` is stamped
/// by the caller once the whole operation is timed
pub fn generation(
  request: &GenerationRequest
, body: &[u8]
) -> Result<GenerationResult, Error>
{   let generated: Vec<GeneratedText> = serde_json::from_slice(body)
      .map_err(|e| Error::ParseError(
        format!("failed to parse response: {}", e)
      ))?;

    if generated.is_empty()
    {   return Err(Error::ParseError("no response generated".into()));
    }

    let prompt_chars = request.prompt.chars().count();
    let mut total_tokens = 0;
    let choices: Vec<Choice> = generated
      .into_iter()
      .enumerate()
      .map(|(index, item)| {
        let text = item.generated_text
          .strip_prefix(request.prompt.as_str())
          .map(str::to_string)
          .unwrap_or(item.generated_text);
        total_tokens += estimate_tokens(prompt_chars + text.chars().count());
        Choice
        {   index
          , text
          , finish_reason: FINISH_REASON_STOP.to_string()
        }
      })
      .collect();

    let prompt_tokens = estimate_tokens(prompt_chars);
    Ok(GenerationResult
    {   id: request.id.clone()
      , model: request.model.clone()
      , choices
      , usage: UsageEstimate
        {   prompt_tokens
          , completion_tokens: total_tokens.saturating_sub(prompt_tokens)
          , total_tokens
        }
      , generated_at: Utc::now()
      , processing_ms: 0
    })
}

/// Parse a sentiment body; the highest score wins, the first listed
/// label wins a tie
pub fn sentiment(
  text: &str
, body: &[u8]
) -> Result<SentimentResult, Error>
{   let batches: Vec<Vec<LabelScore>> = serde_json::from_slice(body)
      .map_err(|e| Error::ParseError(
        format!("failed to parse sentiment response: {}", e)
      ))?;

    let mut labels = batches
      .into_iter()
      .next()
      .unwrap_or_default()
      .into_iter();

    let first = labels.next()
      .ok_or_else(|| Error::ParseError(
        "no sentiment analysis result".into()
      ))?;
    let best = labels.fold(first, |best, candidate| {
      if candidate.score > best.score { candidate } else { best }
    });

    Ok(SentimentResult
    {   text: text.to_string()
      , sentiment: best.label
      , score: best.score
      , confidence: best.score
    })
}

/// Parse a summarization body; only the first summary is used.
/// Empty input text gives a compression of 0
pub fn summary(
  text: &str
, body: &[u8]
) -> Result<SummaryResult, Error>
{   let summaries: Vec<SummaryText> = serde_json::from_slice(body)
      .map_err(|e| Error::ParseError(
        format!("failed to parse summarization response: {}", e)
      ))?;

    let summary = summaries
      .into_iter()
      .next()
      .map(|s| s.summary_text)
      .ok_or_else(|| Error::ParseError("no summarization result".into()))?;

    let original_chars = text.chars().count();
    let compression = if original_chars == 0
    {   0.0
    } else
    {   summary.chars().count() as f64 / original_chars as f64
    };

    Ok(SummaryResult
    {   original_text: text.to_string()
      , summary
      , compression
    })
}
