//! Tokenize → prefill → greedy decode loop with turn-marker stop conditions.

use fastrace::local::LocalSpan;
use log::{debug, info, warn};

use crate::engine::{DecodeContext, InferenceBackend, TokenId};
use crate::error::{DecodePhase, Error, Result};
use crate::metrics::MetricsRecorder;
use crate::prompt::PromptTemplate;
use crate::session::ModelSession;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopReason {
    EndOfGeneration,
    EndTurnMarker,
    StartTurnMarker,
    Newline,
    Length,
    /// A decode step failed after the prompt was accepted; output is partial.
    DecodeFailed,
    /// The engine could not render a token as bytes; output is partial.
    Detokenize,
}

#[derive(Clone, Debug)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub stop: StopReason,
}

/// First index holding the strict maximum; ties go to the lowest index.
pub fn greedy(scores: &[f32]) -> Option<TokenId> {
    let mut best_score = *scores.first()?;
    let mut best = 0usize;
    for (i, &score) in scores.iter().enumerate().skip(1) {
        if score > best_score {
            best_score = score;
            best = i;
        }
    }
    TokenId::try_from(best).ok()
}

/// Two-pass tokenization: size query with an empty buffer, then fill.
pub fn tokenize<C: DecodeContext>(ctx: &C, text: &str) -> Result<Vec<TokenId>> {
    let query = ctx.tokenize(text, true, true, &mut []);
    let needed = if query < 0 {
        query.unsigned_abs() as usize
    } else {
        query as usize
    };
    if needed == 0 {
        return Err(Error::Tokenization);
    }

    let mut tokens = vec![0; needed];
    let written = ctx.tokenize(text, true, true, &mut tokens);
    if written < 0 {
        return Err(Error::Tokenization);
    }
    tokens.truncate(written as usize);
    if tokens.is_empty() {
        return Err(Error::Tokenization);
    }
    Ok(tokens)
}

/// Stop condition present in `text`, with the byte offset to truncate at.
///
/// Conditions are checked in priority order (end-turn marker, start-turn
/// marker for non-default families, newline); the text is cut before the
/// earliest occurrence of any condition that is present.
pub fn find_stop(text: &str, template: &PromptTemplate) -> Option<(StopReason, usize)> {
    let mut conditions = vec![(template.turn_end, StopReason::EndTurnMarker)];
    if !template.is_default() {
        conditions.push((template.turn_start, StopReason::StartTurnMarker));
    }
    conditions.push(("\n", StopReason::Newline));

    let reason = conditions
        .iter()
        .find(|(marker, _)| text.contains(marker))
        .map(|(_, reason)| *reason)?;
    let cut = conditions
        .iter()
        .filter_map(|(marker, _)| text.find(marker))
        .min()?;
    Some((reason, cut))
}

/// Run one generation on a loaded session.
pub fn generate<B: InferenceBackend>(
    session: &mut ModelSession<B>,
    prompt: &str,
    max_output_tokens: usize,
    reserved_margin: usize,
    recorder: &mut MetricsRecorder,
) -> Result<Generation> {
    let context_window = session.config().context_window as usize;
    let (ctx, template) = session.parts()?;
    run(
        ctx,
        template,
        prompt,
        max_output_tokens,
        context_window,
        reserved_margin,
        recorder,
    )
}

pub fn run<C: DecodeContext>(
    ctx: &mut C,
    template: &PromptTemplate,
    prompt: &str,
    max_output_tokens: usize,
    context_window: usize,
    reserved_margin: usize,
    recorder: &mut MetricsRecorder,
) -> Result<Generation> {
    let _span = LocalSpan::enter_with_local_parent("generate").with_properties(|| {
        [
            ("prompt_len", prompt.len().to_string()),
            ("max_output_tokens", max_output_tokens.to_string()),
        ]
    });

    let prompt_tokens = {
        let _span = LocalSpan::enter_with_local_parent("tokenize");
        tokenize(ctx, prompt)?
    };
    let n_prompt = prompt_tokens.len();
    debug!("Tokenized: {} tokens", n_prompt);

    let limit = context_window.saturating_sub(reserved_margin);
    if n_prompt >= limit {
        return Err(Error::ContextOverflow {
            prompt_tokens: n_prompt,
            limit,
        });
    }

    {
        let _span = LocalSpan::enter_with_local_parent("prefill")
            .with_property(|| ("prompt_tokens", n_prompt.to_string()));
        let status = ctx.decode(&prompt_tokens, 0);
        if status != 0 {
            return Err(Error::Decode {
                phase: DecodePhase::Prefill,
                status,
            });
        }
    }
    recorder.prefill_complete();

    let budget = max_output_tokens.min(context_window - n_prompt);
    let mut bytes: Vec<u8> = Vec::new();
    let mut text = String::new();
    let mut generated = 0usize;
    let mut stop = StopReason::Length;

    for step in 0..budget {
        let _span = LocalSpan::enter_with_local_parent("decode_step")
            .with_property(|| ("step", step.to_string()));

        let Some(token) = greedy(ctx.last_scores()) else {
            warn!("Empty score vector at step {}", step);
            if generated == 0 {
                return Err(Error::Decode {
                    phase: DecodePhase::Step(step),
                    status: -1,
                });
            }
            stop = StopReason::DecodeFailed;
            break;
        };

        if ctx.is_end_of_generation(token) {
            debug!("End of generation at step {}", step);
            stop = StopReason::EndOfGeneration;
            break;
        }

        recorder.first_token();

        let Some(piece) = ctx.token_to_bytes(token) else {
            warn!("Failed to convert token {} to text", token);
            stop = StopReason::Detokenize;
            break;
        };
        bytes.extend_from_slice(&piece);
        text = String::from_utf8_lossy(&bytes).into_owned();
        generated += 1;

        if let Some((reason, cut)) = find_stop(&text, template) {
            debug!("Stop condition {:?} at step {}", reason, step);
            text.truncate(cut);
            stop = reason;
            break;
        }

        let status = ctx.decode(&[token], n_prompt + step);
        if status != 0 {
            warn!(
                "Decode failed at step {} (status {}), keeping {} generated tokens",
                step, status, generated
            );
            stop = StopReason::DecodeFailed;
            break;
        }
    }

    info!(
        "Generation complete: prompt_tokens={}, generated_tokens={}, stop={:?}",
        n_prompt, generated, stop
    );

    Ok(Generation {
        text,
        prompt_tokens: n_prompt,
        generated_tokens: generated,
        stop,
    })
}
