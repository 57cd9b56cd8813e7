//! Post-processing of the model's final text into the fixed five-part outline.

/// Section headers every displayed answer must carry, in this order.
pub const REQUIRED_SECTIONS: [&str; 5] = [
    "A) 60-Second Stabilize",
    "B) Teach the Concept (2 minutes)",
    "C) Check for Understanding (30 seconds)",
    "D) Extend for Fast Finishers",
    "E) If It Still Fails",
];

/// Longest excerpt of the original text embedded in a fallback answer.
const EXCERPT_CHARS: usize = 120;

/// Turns raw model text into text that is safe to display.
pub trait TextResponseValidator: Send + Sync {
    fn enforce(&self, text: &str) -> String;
}

/// Validator guaranteeing the five-section outline
#[derive(Debug, Default, Clone, Copy)]
pub struct OutlineEnforcer;

impl TextResponseValidator for OutlineEnforcer {
    fn enforce(&self, text: &str) -> String {
        enforce_outline(text)
    }
}

/// Returns `raw` trimmed when it already carries every section header in order,
/// otherwise a fallback outline whose first stabilize step quotes `raw`.
pub fn enforce_outline(raw: &str) -> String {
    let normalized = raw.trim();
    if has_required_outline(normalized) {
        return normalized.to_string();
    }

    log::debug!(
        "Response is missing required sections, using fallback outline ({} chars of input)",
        normalized.chars().count()
    );
    fallback_outline(normalized)
}

/// True when every header appears, each one after the previous.
pub fn has_required_outline(text: &str) -> bool {
    let mut cursor = 0;
    for header in REQUIRED_SECTIONS {
        match text[cursor..].find(header) {
            Some(offset) => cursor += offset + header.len(),
            None => return false,
        }
    }
    true
}

fn fallback_outline(normalized: &str) -> String {
    let [stabilize, teach, check, extend, fails] = REQUIRED_SECTIONS;
    let lines = [
        stabilize.to_string(),
        format!("1) {}", first_step(normalized)),
        "2) Calm, short reset with a clear instruction.".to_string(),
        String::new(),
        teach.to_string(),
        "1) Use the teacher's example. Keep sentences short.".to_string(),
        String::new(),
        check.to_string(),
        "1) Ask: What is the first step we do?".to_string(),
        String::new(),
        extend.to_string(),
        "1) Ask them to write two new examples in notebooks.".to_string(),
        String::new(),
        fails.to_string(),
        "1) Pause, breathe, and restate the key point in one sentence.".to_string(),
    ];
    lines.join("\n")
}

fn first_step(normalized: &str) -> String {
    let collapsed = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "Step 1: Ask for eyes forward and count down from three.".to_string();
    }
    let excerpt: String = collapsed.chars().take(EXCERPT_CHARS).collect();
    format!("Step 1: {}", excerpt.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_outline_is_trimmed_only() {
        let text = "\n  A) 60-Second Stabilize\n1) Breathe.\nB) Teach the Concept (2 minutes)\n1) Draw.\nC) Check for Understanding (30 seconds)\n1) Ask.\nD) Extend for Fast Finishers\n1) Extend.\nE) If It Still Fails\n1) Reset.  \n";
        assert_eq!(enforce_outline(text), text.trim());
    }

    #[test]
    fn test_fallback_embeds_excerpt() {
        let enforced = enforce_outline("just say calm down");
        assert!(enforced.starts_with("A) 60-Second Stabilize\n1) Step 1: just say calm down\n"));
        assert!(has_required_outline(&enforced));
        assert_eq!(enforced, enforced.trim());
    }

    #[test]
    fn test_empty_input_uses_default_step() {
        let enforced = enforce_outline("   \n ");
        assert!(enforced.contains("Step 1: Ask for eyes forward and count down from three."));
        assert!(has_required_outline(&enforced));
    }

    #[test]
    fn test_excerpt_is_bounded_and_single_line() {
        let long = "noise ".repeat(100);
        let enforced = enforce_outline(&long);
        let step = enforced.lines().nth(1).unwrap();
        let excerpt = step.trim_start_matches("1) Step 1: ");
        assert!(excerpt.chars().count() <= EXCERPT_CHARS);
        assert!(!excerpt.contains('\n'));
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let text = "é".repeat(200);
        let enforced = enforce_outline(&text);
        assert!(enforced.contains(&"é".repeat(EXCERPT_CHARS)));
        assert!(!enforced.contains(&"é".repeat(EXCERPT_CHARS + 1)));
    }

    #[test]
    fn test_out_of_order_headers_fall_back() {
        let reversed = REQUIRED_SECTIONS
            .iter()
            .rev()
            .map(|h| format!("{}\n1) Step.", h))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(!has_required_outline(&reversed));

        let enforced = enforce_outline(&reversed);
        assert_ne!(enforced, reversed);
        assert!(has_required_outline(&enforced));
        assert_eq!(enforce_outline(&enforced), enforced);
    }

    #[test]
    fn test_partial_outline_falls_back() {
        let partial = "A) 60-Second Stabilize\n1) Breathe.\nB) Teach the Concept (2 minutes)\n1) Draw.";
        let enforced = enforce_outline(partial);
        assert!(enforced.starts_with("A) 60-Second Stabilize\n1) Step 1: A) 60-Second Stabilize"));
        assert!(has_required_outline(&enforced));
    }

    #[test]
    fn test_enforce_is_idempotent() {
        let inputs = [
            "",
            "just say calm down",
            "E) If It Still Fails then A) 60-Second Stabilize",
            "A) 60-Second Stabilize B) Teach the Concept (2 minutes) C) Check for Understanding (30 seconds) D) Extend for Fast Finishers E) If It Still Fails",
            "  multi\n\nline\tinput  ",
        ];
        for input in inputs {
            let once = enforce_outline(input);
            assert_eq!(enforce_outline(&once), once, "input: {:?}", input);
            assert!(has_required_outline(&once));
        }
    }

    #[test]
    fn test_trait_object_dispatch() {
        let validator: Box<dyn TextResponseValidator> = Box::new(OutlineEnforcer);
        assert_eq!(validator.enforce("hi"), enforce_outline("hi"));
    }
}
