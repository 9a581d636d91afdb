use crate::platform::{floor_char_boundary, Action};

/// Telegram drops callback data longer than this many bytes.
const CALLBACK_DATA_LIMIT: usize = 64;

/// Kinds of lesson content that can be generated for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonFormat {
    Explanation,
    Examples,
    Quiz,
    Summary,
}

impl LessonFormat {
    /// Offered as buttons under every lesson.
    pub const FOLLOW_UPS: [LessonFormat; 3] = [
        LessonFormat::Examples,
        LessonFormat::Quiz,
        LessonFormat::Summary,
    ];

    pub fn key(self) -> &'static str {
        match self {
            LessonFormat::Explanation => "explanation",
            LessonFormat::Examples => "examples",
            LessonFormat::Quiz => "quiz",
            LessonFormat::Summary => "summary",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "explanation" => Some(LessonFormat::Explanation),
            "examples" => Some(LessonFormat::Examples),
            "quiz" => Some(LessonFormat::Quiz),
            "summary" => Some(LessonFormat::Summary),
            _ => None,
        }
    }

    /// The prompt sent to the model.
    pub fn prompt(self, topic: &str) -> String {
        match self {
            LessonFormat::Explanation => {
                format!("Provide a clear explanation of {} suitable for learning.", topic)
            }
            LessonFormat::Examples => {
                format!("Provide practical examples that illustrate {}.", topic)
            }
            LessonFormat::Quiz => format!("Create a short quiz with answers about {}.", topic),
            LessonFormat::Summary => {
                format!("Provide a concise summary of the key points about {}.", topic)
            }
        }
    }

    /// First line of the posted lesson.
    pub fn heading(self, topic: &str) -> String {
        match self {
            LessonFormat::Explanation => format!("📚 Learning: {}", topic),
            LessonFormat::Examples => format!("📚 Examples: {}", topic),
            LessonFormat::Quiz => format!("🧠 Quiz: {}", topic),
            LessonFormat::Summary => format!("📝 Summary: {}", topic),
        }
    }

    fn button_label(self) -> &'static str {
        match self {
            LessonFormat::Explanation => "Explain",
            LessonFormat::Examples => "Examples",
            LessonFormat::Quiz => "Quiz Me",
            LessonFormat::Summary => "Summarize",
        }
    }
}

/// Buttons that ask for more material on the same topic.
pub fn follow_up_actions(topic: &str) -> Vec<Action> {
    LessonFormat::FOLLOW_UPS
        .iter()
        .map(|&format| Action {
            label: format.button_label().to_string(),
            data: encode_action(format, topic),
        })
        .collect()
}

/// `<format>:<topic>`, with the topic shortened to fit the callback data limit.
fn encode_action(format: LessonFormat, topic: &str) -> String {
    let room = CALLBACK_DATA_LIMIT - format.key().len() - 1;
    let topic = &topic[..floor_char_boundary(topic, room)];
    format!("{}:{}", format.key(), topic.trim_end())
}

/// Reverse of the button data. `None` for anything the bot did not produce.
pub fn parse_action(data: &str) -> Option<(LessonFormat, String)> {
    let (key, topic) = data.split_once(':')?;
    let format = LessonFormat::from_key(key)?;
    let topic = topic.trim();
    if topic.is_empty() {
        return None;
    }
    Some((format, topic.to_string()))
}
