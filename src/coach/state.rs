/// Caller-visible snapshot of the coach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoachState {
    pub status: String,
    pub is_streaming: bool,
    /// Latest answer, already passed through the outline validator
    pub last_response_text: String,
}

impl Default for CoachState {
    fn default() -> Self {
        Self {
            status: "Idle".to_string(),
            is_streaming: false,
            last_response_text: String::new(),
        }
    }
}
