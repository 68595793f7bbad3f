use serde::{Deserialize, Serialize};

pub const TOKENS_PER_IMAGE: u64 = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenEstimate {
    pub text_tokens: u64,
    pub image_tokens: u64,
    pub total_tokens: u64,
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

/// Rough client-side count used before the API reports real usage.
///
/// CJK ideographs weigh 1.5, each run of ASCII letters weighs 1 and every
/// other character weighs 0.5. Each image adds a flat 1000.
pub fn estimate_token_usage(text: &str, image_count: usize) -> TokenEstimate {
    let mut cjk = 0u64;
    let mut words = 0u64;
    let mut other = 0u64;
    let mut in_word = false;

    for c in text.chars() {
        if c.is_ascii_alphabetic() {
            if !in_word {
                words += 1;
                in_word = true;
            }
            continue;
        }
        in_word = false;
        if is_cjk(c) {
            cjk += 1;
        } else {
            other += 1;
        }
    }

    // Half-token units keep the sum exact before rounding up.
    let halves = cjk * 3 + words * 2 + other;
    let text_tokens = (halves + 1) / 2;
    let image_tokens = image_count as u64 * TOKENS_PER_IMAGE;

    TokenEstimate {
        text_tokens,
        image_tokens,
        total_tokens: text_tokens + image_tokens,
    }
}

/// `ceil(chars / 4)`, the completion estimate for simulated replies.
pub fn estimate_completion_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    (chars + 3) / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_text_estimate() {
        assert_eq!(estimate_token_usage("", 0).total_tokens, 0);
        // 2 words + 1 space
        assert_eq!(estimate_token_usage("hello world", 0).text_tokens, 3);
        // 4 CJK chars = 6
        assert_eq!(estimate_token_usage("你好世界", 0).text_tokens, 6);
        // 1 CJK + 1 word + "!" = 1.5 + 1 + 0.5
        assert_eq!(estimate_token_usage("好hi!", 0).text_tokens, 3);
    }

    #[test]
    fn test_images_add_flat_cost() {
        let est = estimate_token_usage("hi", 2);
        assert_eq!(est.image_tokens, 2000);
        assert_eq!(est.total_tokens, 2001);
    }

    #[test]
    fn test_completion_estimate_rounds_up() {
        assert_eq!(estimate_completion_tokens(""), 0);
        assert_eq!(estimate_completion_tokens("abcd"), 1);
        assert_eq!(estimate_completion_tokens("abcde"), 2);
    }
}
