//! Prompt text formats: the wire format toward the backend.
//!
//! Every literal marker lives here so a different model family only needs a
//! different [`PromptFormat`].

use serde::{Deserialize, Serialize};

/// The user line of the canned greeting seeded into a fresh prompt.
pub const GREETING_USER: &str = "Hello!";

/// The agent reply of the canned greeting seeded into a fresh prompt.
pub const GREETING_REPLY: &str = "Hello! How can I help you today?";

/// Builds model-formatted prompt text.
pub trait PromptFormat: Send + Sync {
    /// Marker closing every completed turn.
    fn terminator(&self) -> &str;

    /// The system directive wrapped in its open/close markers.
    fn directive_block(&self, directive: &str) -> String;

    /// A new user turn, ending with the agent continuation marker.
    ///
    /// `directive` is embedded as a directive block when given.
    fn turn(&self, speaker: &str, message: &str, agent: &str, directive: Option<&str>) -> String;

    /// Text opening a fresh prompt, before the first turn.
    fn preamble(&self) -> &str {
        ""
    }

    /// The start of an empty prompt: preamble, directive block, and a greeting exchange.
    fn seed(&self, directive: &str, speaker: &str, agent: &str) -> String {
        let directive = (!directive.is_empty()).then_some(directive);
        let mut prompt = String::from(self.preamble());
        prompt.push_str(&self.turn(speaker, GREETING_USER, agent, directive));
        prompt.push(' ');
        prompt.push_str(GREETING_REPLY);
        prompt.push_str(self.terminator());
        prompt
    }
}

/// Chat template families.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatTemplate {
    /// `<s>[INST] <<SYS>>\n{directive}\n<</SYS>>\n\n{speaker}: {message} [/INST] {agent}:`
    #[default]
    Llama2,
    /// `<|im_start|>user\n{speaker}: {message}<|im_end|>\n<|im_start|>assistant\n{agent}:`
    #[serde(rename = "chatml")]
    ChatMl,
    /// `<|start_header_id|>user<|end_header_id|>\n\n{speaker}: {message}<|eot_id|>…`
    Llama3,
}

struct Markers {
    preamble: &'static str,
    turn_open: &'static str,
    sys_open: &'static str,
    sys_close: &'static str,
    user_open: &'static str,
    user_close: &'static str,
    assistant_open: &'static str,
    terminator: &'static str,
}

const LLAMA2: Markers = Markers {
    preamble: "",
    turn_open: "<s>[INST] ",
    sys_open: "<<SYS>>\n",
    sys_close: "\n<</SYS>>\n\n",
    user_open: "",
    user_close: " [/INST]",
    assistant_open: " ",
    terminator: "</s>",
};

const CHATML: Markers = Markers {
    preamble: "",
    turn_open: "",
    sys_open: "<|im_start|>system\n",
    sys_close: "<|im_end|>\n",
    user_open: "<|im_start|>user\n",
    user_close: "<|im_end|>\n",
    assistant_open: "<|im_start|>assistant\n",
    terminator: "<|im_end|>\n",
};

const LLAMA3: Markers = Markers {
    preamble: "<|begin_of_text|>",
    turn_open: "",
    sys_open: "<|start_header_id|>system<|end_header_id|>\n\n",
    sys_close: "<|eot_id|>",
    user_open: "<|start_header_id|>user<|end_header_id|>\n\n",
    user_close: "<|eot_id|>",
    assistant_open: "<|start_header_id|>assistant<|end_header_id|>\n\n",
    terminator: "<|eot_id|>",
};

impl ChatTemplate {
    fn markers(&self) -> &'static Markers {
        match self {
            Self::Llama2 => &LLAMA2,
            Self::ChatMl => &CHATML,
            Self::Llama3 => &LLAMA3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llama2 => "llama2",
            Self::ChatMl => "chatml",
            Self::Llama3 => "llama3",
        }
    }
}

impl std::str::FromStr for ChatTemplate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "llama2" | "llama-2" | "mistral" => Ok(Self::Llama2),
            "chatml" => Ok(Self::ChatMl),
            "llama3" | "llama-3" => Ok(Self::Llama3),
            other => Err(format!(
                "Unknown chat template '{other}'. Available: llama2, chatml, llama3"
            )),
        }
    }
}

impl PromptFormat for ChatTemplate {
    fn terminator(&self) -> &str {
        self.markers().terminator
    }

    fn directive_block(&self, directive: &str) -> String {
        let m = self.markers();
        format!("{}{directive}{}", m.sys_open, m.sys_close)
    }

    fn turn(&self, speaker: &str, message: &str, agent: &str, directive: Option<&str>) -> String {
        let m = self.markers();
        let mut text = String::from(m.turn_open);
        if let Some(directive) = directive {
            text.push_str(&self.directive_block(directive));
        }
        text.push_str(m.user_open);
        text.push_str(speaker);
        text.push_str(": ");
        text.push_str(message);
        text.push_str(m.user_close);
        text.push_str(m.assistant_open);
        text.push_str(agent);
        text.push(':');
        text
    }

    fn preamble(&self) -> &str {
        self.markers().preamble
    }
}
