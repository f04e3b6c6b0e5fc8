//! Toolkit：外部能力域标识（邮件、日历、代码托管等）
//!
//! 序列化为小写 slug；未知 slug 保留为 Other。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Toolkit {
    Gmail,
    GoogleCalendar,
    GoogleDrive,
    GoogleSheets,
    GoogleDocs,
    Slack,
    Github,
    Notion,
    Linear,
    Outlook,
    Discord,
    Other(String),
}

const KNOWN: &[Toolkit] = &[
    Toolkit::Gmail,
    Toolkit::GoogleCalendar,
    Toolkit::GoogleDrive,
    Toolkit::GoogleSheets,
    Toolkit::GoogleDocs,
    Toolkit::Slack,
    Toolkit::Github,
    Toolkit::Notion,
    Toolkit::Linear,
    Toolkit::Outlook,
    Toolkit::Discord,
];

impl Toolkit {
    pub fn slug(&self) -> &str {
        match self {
            Toolkit::Gmail => "gmail",
            Toolkit::GoogleCalendar => "googlecalendar",
            Toolkit::GoogleDrive => "googledrive",
            Toolkit::GoogleSheets => "googlesheets",
            Toolkit::GoogleDocs => "googledocs",
            Toolkit::Slack => "slack",
            Toolkit::Github => "github",
            Toolkit::Notion => "notion",
            Toolkit::Linear => "linear",
            Toolkit::Outlook => "outlook",
            Toolkit::Discord => "discord",
            Toolkit::Other(s) => s.as_str(),
        }
    }

    /// 面向模型与用户的显示名
    pub fn display_name(&self) -> String {
        match self {
            Toolkit::Gmail => "Gmail".into(),
            Toolkit::GoogleCalendar => "Google Calendar".into(),
            Toolkit::GoogleDrive => "Google Drive".into(),
            Toolkit::GoogleSheets => "Google Sheets".into(),
            Toolkit::GoogleDocs => "Google Docs".into(),
            Toolkit::Slack => "Slack".into(),
            Toolkit::Github => "GitHub".into(),
            Toolkit::Notion => "Notion".into(),
            Toolkit::Linear => "Linear".into(),
            Toolkit::Outlook => "Outlook".into(),
            Toolkit::Discord => "Discord".into(),
            Toolkit::Other(s) => {
                let mut chars = s.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
    }

    /// 委派工具名：`<slug>_agent`
    pub fn agent_tool_name(&self) -> String {
        format!("{}_agent", self.slug())
    }

    pub fn from_slug(slug: &str) -> Self {
        let slug = slug.trim().to_ascii_lowercase();
        KNOWN
            .iter()
            .find(|t| t.slug() == slug)
            .cloned()
            .unwrap_or(Toolkit::Other(slug))
    }
}

/// 去重并保持请求顺序，丢弃空 slug
pub fn dedup_toolkits(toolkits: &[Toolkit]) -> Vec<Toolkit> {
    let mut out: Vec<Toolkit> = Vec::with_capacity(toolkits.len());
    for t in toolkits {
        if t.slug().is_empty() || out.contains(t) {
            continue;
        }
        out.push(t.clone());
    }
    out
}

impl fmt::Display for Toolkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for Toolkit {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Toolkit::from_slug(s))
    }
}

impl Serialize for Toolkit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.slug())
    }
}

impl<'de> Deserialize<'de> for Toolkit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Toolkit::from_slug(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_round_trip() {
        let t: Toolkit = serde_json::from_str("\"GoogleCalendar\"").unwrap();
        assert_eq!(t, Toolkit::GoogleCalendar);
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"googlecalendar\"");
        assert_eq!(t.display_name(), "Google Calendar");
    }

    #[test]
    fn test_unknown_slug_is_kept() {
        let t = Toolkit::from_slug("jira");
        assert_eq!(t, Toolkit::Other("jira".into()));
        assert_eq!(t.display_name(), "Jira");
        assert_eq!(t.agent_tool_name(), "jira_agent");
    }

    #[test]
    fn test_dedup_preserves_order() {
        let got = dedup_toolkits(&[
            Toolkit::Slack,
            Toolkit::Gmail,
            Toolkit::Slack,
            Toolkit::Other(String::new()),
        ]);
        assert_eq!(got, vec![Toolkit::Slack, Toolkit::Gmail]);
    }
}
