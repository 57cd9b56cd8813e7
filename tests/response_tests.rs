use classroom_coach::prompts::{DemoConversation, SYSTEM_PROMPT};
use classroom_coach::response::{
    enforce_outline, has_required_outline, OutlineEnforcer, TextResponseValidator,
    REQUIRED_SECTIONS,
};

#[test]
fn test_demo_response_passes_unchanged() {
    let response = DemoConversation::coach_response();
    assert!(has_required_outline(response));
    assert_eq!(OutlineEnforcer.enforce(response), response.trim());
}

#[test]
fn test_unstructured_teacher_prompt_gets_fallback() {
    let prompt = DemoConversation::teacher_prompt();
    let enforced = OutlineEnforcer.enforce(prompt);

    assert!(has_required_outline(&enforced));
    let first_step = enforced.lines().nth(1).unwrap();
    assert_eq!(first_step, format!("1) Step 1: {}", prompt));
}

#[test]
fn test_sections_are_separated_by_blank_lines() {
    let enforced = enforce_outline("just say calm down");
    let blocks: Vec<&str> = enforced.split("\n\n").collect();
    assert_eq!(blocks.len(), REQUIRED_SECTIONS.len());
    for (block, header) in blocks.iter().zip(REQUIRED_SECTIONS) {
        assert!(block.starts_with(header), "{:?} should start with {}", block, header);
    }
}

#[test]
fn test_headers_with_surrounding_text_pass() {
    let text = "Here is your plan.\nA) 60-Second Stabilize\n1) Pause.\n...B) Teach the Concept (2 minutes)\n1) Model it.\n...C) Check for Understanding (30 seconds)\n1) Ask.\n...D) Extend for Fast Finishers\n1) Extend.\n...E) If It Still Fails\n1) Reset.\n";
    assert_eq!(enforce_outline(text), text.trim());
}

#[test]
fn test_system_prompt_names_every_section_in_order() {
    assert!(has_required_outline(SYSTEM_PROMPT));
}
