//! Text of every message the engine sends.

use crate::error::ClarifyError;
use crate::request::ClarificationRequest;

pub(crate) const NO_RESPONSE: &str = "The user did not respond in time.";
pub(crate) const DELIVERY_FAILED: &str = "There was an error handling the clarification request";
pub(crate) const CLARIFIER_THANKS: &str =
    "Thanks! Your clarification has been delivered anonymously.";

pub(crate) fn single_prompt(request: &ClarificationRequest) -> String {
    format!(
        "You've received an anonymous request for clarification on your message: \"{}\". \
         Will you clarify your tone? Reply with your clarification.",
        request.content
    )
}

/// Numbered 1-based over exactly the requests shown, so indices stay dense
/// after earlier entries are resolved.
pub(crate) fn list_prompt(pending: &[ClarificationRequest]) -> String {
    let mut out = format!(
        "You have {} pending anonymous requests for clarification:\n",
        pending.len()
    );
    for (idx, request) in pending.iter().enumerate() {
        out.push_str(&format!("{}. \"{}\"\n", idx + 1, request.content));
    }
    out.push_str("Reply with the number of the message you want to clarify.");
    out
}

pub(crate) fn invalid_selection(count: usize) -> String {
    format!("Invalid selection. Please reply with a number between 1 and {count}.")
}

pub(crate) fn selected(request: &ClarificationRequest) -> String {
    format!(
        "You selected message: \"{}\". Please reply with your clarification now.",
        request.content
    )
}

pub(crate) fn tone_result(request: &ClarificationRequest, tone: &str) -> String {
    format!(
        "Requested Tone Clarification for message \"{}\": \"{}\"",
        request.content, tone
    )
}

/// Parse a 1-based selection reply into a 0-based index.
pub(crate) fn parse_selection(input: &str, count: usize) -> Result<usize, ClarifyError> {
    let invalid = || ClarifyError::InvalidSelection {
        input: input.to_string(),
        count,
    };
    let n: usize = input.trim().parse().map_err(|_| invalid())?;
    if n == 0 || n > count {
        return Err(invalid());
    }
    Ok(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibe_channels::{MessageId, UserId};

    fn request(content: &str) -> ClarificationRequest {
        ClarificationRequest::new(
            UserId::new("c"),
            UserId::new("r"),
            MessageId::new(content),
            content,
        )
    }

    #[test]
    fn selection_accepts_only_in_range_integers() {
        assert_eq!(parse_selection("1", 2).ok(), Some(0));
        assert_eq!(parse_selection(" 2\n", 2).ok(), Some(1));
        for bad in ["0", "3", "99", "abc", "", "-1", "1.5", "two"] {
            assert!(
                matches!(
                    parse_selection(bad, 2),
                    Err(ClarifyError::InvalidSelection { count: 2, .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn list_prompt_is_numbered_from_one() {
        let text = list_prompt(&[request("you ok?"), request("fine.")]);
        assert!(text.contains("1. \"you ok?\"\n2. \"fine.\""));
        assert!(text.ends_with("Reply with the number of the message you want to clarify."));
    }

    #[test]
    fn tone_result_quotes_content_and_tone() {
        assert_eq!(
            tone_result(&request("fine."), "Sincere"),
            "Requested Tone Clarification for message \"fine.\": \"Sincere\""
        );
        assert_eq!(
            selected(&request("fine.")),
            "You selected message: \"fine.\". Please reply with your clarification now."
        );
    }
}
