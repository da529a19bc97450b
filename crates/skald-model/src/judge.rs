// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Verdict of the auto-continue judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeVerdict {
    Continue,
    Stop,
}

/// Model families whose judge output must be a pristine `CONTINUE` to count.
///
/// Mistral and Qwen3 models tend to wrap the verdict in prose or markup
/// ("Sure! CONTINUE.") even when told not to; accepting a leading token
/// there produces false continues.  For those families only an exact match
/// after trimming is accepted.
fn requires_pristine_verdict(model_name: &str) -> bool {
    let name = model_name.to_ascii_lowercase();
    name.contains("mistral") || name.contains("qwen3") || name.contains("qwen-3")
}

/// Parse a judge reply into a verdict.
///
/// Anything that is not recognisably `CONTINUE` is `Stop`: the judge exists
/// to keep the loop alive only when it is confident.
pub fn parse_judge_verdict(model_name: &str, raw: &str) -> JudgeVerdict {
    let trimmed = raw.trim();
    if requires_pristine_verdict(model_name) {
        return if trimmed == "CONTINUE" {
            JudgeVerdict::Continue
        } else {
            JudgeVerdict::Stop
        };
    }
    match trimmed.split_whitespace().next() {
        Some(first) if first.trim_end_matches(['.', '!']) == "CONTINUE" => JudgeVerdict::Continue,
        _ => JudgeVerdict::Stop,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_continue_continues() {
        assert_eq!(parse_judge_verdict("gpt-4o", "CONTINUE"), JudgeVerdict::Continue);
    }

    #[test]
    fn leading_continue_token_suffices_for_lenient_models() {
        assert_eq!(
            parse_judge_verdict("gpt-4o", "CONTINUE. The task is unfinished."),
            JudgeVerdict::Continue
        );
    }

    #[test]
    fn stop_stops() {
        assert_eq!(parse_judge_verdict("gpt-4o", "STOP"), JudgeVerdict::Stop);
    }

    #[test]
    fn garbage_stops() {
        assert_eq!(parse_judge_verdict("gpt-4o", "maybe?"), JudgeVerdict::Stop);
        assert_eq!(parse_judge_verdict("gpt-4o", ""), JudgeVerdict::Stop);
    }

    #[test]
    fn mistral_requires_pristine_continue() {
        assert_eq!(
            parse_judge_verdict("mistral-small", "CONTINUE"),
            JudgeVerdict::Continue
        );
        assert_eq!(
            parse_judge_verdict("mistral-small", "CONTINUE."),
            JudgeVerdict::Stop
        );
        assert_eq!(
            parse_judge_verdict("mistral-small", "Sure! CONTINUE"),
            JudgeVerdict::Stop
        );
    }

    #[test]
    fn qwen3_requires_pristine_continue() {
        assert_eq!(
            parse_judge_verdict("qwen3-8b-instruct", " CONTINUE \n"),
            JudgeVerdict::Continue
        );
        assert_eq!(
            parse_judge_verdict("qwen3-8b-instruct", "CONTINUE now"),
            JudgeVerdict::Stop
        );
    }

    #[test]
    fn embedded_continue_does_not_count() {
        assert_eq!(
            parse_judge_verdict("gpt-4o", "I would CONTINUE here"),
            JudgeVerdict::Stop
        );
    }
}
