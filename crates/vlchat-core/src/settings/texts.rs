use serde::{Deserialize, Serialize};

/// Language used for every user-visible string the core writes into turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Zh,
}

impl Locale {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "en" | "en-us" | "english" => Some(Locale::En),
            "zh" | "zh-cn" | "cn" | "chinese" => Some(Locale::Zh),
            _ => None,
        }
    }

    fn pick(self, en: String, zh: String) -> String {
        match self {
            Locale::En => en,
            Locale::Zh => zh,
        }
    }

    /// Title of a thinking block while reasoning is still streaming.
    pub fn thinking_title(self) -> String {
        self.pick("Thinking...".into(), "思考中...".into())
    }

    /// Title of a closed thinking block. `seconds` is preformatted.
    pub fn thought_done_title(self, seconds: &str) -> String {
        self.pick(
            format!("End of Thought ({seconds}s)"),
            format!("已深度思考 (用时{seconds}s)"),
        )
    }

    /// Footer stamped on a completed assistant turn.
    pub fn elapsed_footer(self, seconds: &str) -> String {
        self.pick(format!("{seconds}s"), format!("用时{seconds}s"))
    }

    pub fn paused_footer(self) -> String {
        self.pick("Chat completion paused".into(), "对话已暂停".into())
    }

    pub fn edited_marker(self) -> String {
        self.pick("Edited".into(), "已编辑".into())
    }

    pub fn not_configured(self) -> String {
        self.pick(
            "API not configured. Please set API_KEY environment variable.".into(),
            "API 未配置，请设置 API_KEY 环境变量。".into(),
        )
    }
}

/// Format a duration in seconds with two decimals, as shown in titles and footers.
pub fn format_seconds(secs: f64) -> String {
    format!("{:.2}", secs)
}
