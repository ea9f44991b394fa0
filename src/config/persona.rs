use log::info;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::PersonaError;

/// Structured description of the assistant's character, rendered into the system message
/// that opens every request.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub prompt_title: String,
    #[serde(default)]
    pub role_personality: Vec<String>,
    #[serde(default)]
    pub backstory: Vec<String>,
    #[serde(default)]
    pub website_connection: Vec<String>,
    #[serde(default)]
    pub behavior_style: Vec<String>,
    #[serde(default)]
    pub overall_tone: Vec<String>,
}

impl Default for Persona {
    fn default() -> Self {
        let lines = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            prompt_title: "Ollama Assistant".to_string(),
            role_personality: lines(
                &[
                    "You are a friendly, quick-witted virtual assistant embedded in a website chat widget.",
                    "You answer questions directly and keep responses concise and engaging.",
                ]
            ),
            backstory: lines(
                &["You run on a self-hosted language model rather than a commercial cloud service."]
            ),
            website_connection: lines(
                &["You welcome visitors to the site and help them find their way around."]
            ),
            behavior_style: lines(
                &[
                    "Greet users on their first message.",
                    "Provide help and answers to the best of your ability.",
                    "Admit when you do not know something instead of guessing.",
                ]
            ),
            overall_tone: lines(&["Playful but genuinely helpful.", "Plain language over jargon."]),
        }
    }
}

impl Persona {
    /// Markdown system prompt. Empty sections are left out.
    pub fn render(&self) -> String {
        let sections = [
            ("Your Persona", &self.role_personality),
            ("Your Backstory", &self.backstory),
            ("Connection to the Website", &self.website_connection),
            ("Behavior and Style", &self.behavior_style),
            ("Overall Tone", &self.overall_tone),
        ];

        let mut out = format!("# {}\n", self.prompt_title.trim());
        for (heading, items) in sections {
            if items.is_empty() {
                continue;
            }
            out.push_str(&format!("\n## {}\n", heading));
            for item in items {
                out.push_str(&format!("- {}\n", item));
            }
        }
        out.push_str("\n---\n\nNow, begin the conversation.");
        out
    }
}

pub fn load_persona<P: AsRef<Path>>(path: P) -> Result<Persona, PersonaError> {
    let file_content = fs::read_to_string(path.as_ref())?;
    let persona: Persona = serde_json::from_str(&file_content)?;
    info!("Loaded persona '{}' from: {}", persona.prompt_title, path.as_ref().display());
    Ok(persona)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_sections_in_order() {
        let prompt = Persona::default().render();
        assert!(prompt.starts_with("# Ollama Assistant\n"));
        let persona_at = prompt.find("## Your Persona").unwrap();
        let tone_at = prompt.find("## Overall Tone").unwrap();
        assert!(persona_at < tone_at);
        assert!(prompt.ends_with("Now, begin the conversation."));
    }

    #[test]
    fn skips_empty_sections() {
        let persona = Persona {
            prompt_title: "Terse".into(),
            role_personality: vec!["Answer in one line.".into()],
            backstory: vec![],
            website_connection: vec![],
            behavior_style: vec![],
            overall_tone: vec![],
        };
        let prompt = persona.render();
        assert!(prompt.contains("- Answer in one line."));
        assert!(!prompt.contains("Backstory"));
    }

    #[test]
    fn loads_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persona.json");
        fs::write(
            &path,
            r#"{"promptTitle":"The Rebeldev","rolePersonality":["You are sarcastic."],"overallTone":["Playful."]}"#
        ).unwrap();
        let persona = load_persona(&path).unwrap();
        assert_eq!(persona.prompt_title, "The Rebeldev");
        assert!(persona.backstory.is_empty());
        assert!(persona.render().contains("- You are sarcastic."));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(load_persona("/definitely/not/here.json"), Err(PersonaError::IoError(_))));
    }
}
