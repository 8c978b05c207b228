//! Word-budget trimming of a reconstructed thread.
//!
//! Whole messages are dropped oldest first until the newest messages fit
//! the budget. Messages are never split.

use crate::error::TruncateError;
use crate::models::Message;

fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '.' | '/' | '(' | ')' | '-' | '_')
}

/// Number of words in `text`, splitting on whitespace and `,./()-_`.
pub fn count_words(text: &str) -> usize {
    text.split(is_separator).filter(|w| !w.is_empty()).count()
}

/// Keep the longest suffix of `thread` whose word count fits `limit`.
///
/// A limit of 0 means unlimited. The scan stops at the first message (from
/// the newest) that would push the total over the limit, even if an older,
/// shorter message would still fit.
pub fn truncate_to_max_words(
    thread: &[Message],
    limit: i64,
) -> Result<Vec<Message>, TruncateError> {
    if limit < 0 {
        return Err(TruncateError::NegativeBudget(limit));
    }
    if limit == 0 {
        return Ok(thread.to_vec());
    }

    let budget = limit as usize;
    let mut total = 0usize;
    let mut keep_from = thread.len();
    for (i, message) in thread.iter().enumerate().rev() {
        let words = count_words(&message.content);
        if total + words > budget {
            break;
        }
        total += words;
        keep_from = i;
    }
    Ok(thread[keep_from..].to_vec())
}
