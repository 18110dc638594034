//! Portrait styles and the instruction text sent upstream for each.

const CLASSIC_INSTRUCTION: &str = "Keep the person's face, identity, and expression exactly the same. \
Do not alter facial features, proportions, or hair. \
Transform only the clothing and background into a stylish British portrait: \
a classy outfit, London atmosphere, soft cinematic lighting, realistic color tones.";

const MODERN_INSTRUCTION: &str = "Keep the face unchanged. Reimagine the person in a modern British look: \
smart-casual outfit, London street background, daylight lighting, \
natural and realistic aesthetic.";

const ROYAL_INSTRUCTION: &str = "Preserve the same face and expression. Transform the clothing and background \
into a royal British portrait: luxurious outfit, palace or Victorian-style interior, \
warm lighting, elegant and photorealistic result.";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Style {
    #[default]
    Classic,
    Modern,
    Royal,
}

impl Style {
    pub const ALL: [Style; 3] = [Style::Classic, Style::Modern, Style::Royal];

    /// Resolves a user-supplied key. Unknown or empty keys fall back to the default style.
    pub fn resolve(key: &str) -> Self {
        Self::parse(key).unwrap_or_else(|| {
            if !key.trim().is_empty() {
                tracing::debug!(
                    requested = key,
                    fallback = %Self::default(),
                    "unknown style, using default"
                );
            }
            Self::default()
        })
    }

    pub fn parse(key: &str) -> Option<Self> {
        let key = key.trim();
        Self::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(key))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Modern => "modern",
            Self::Royal => "royal",
        }
    }

    pub fn instruction(self) -> &'static str {
        match self {
            Self::Classic => CLASSIC_INSTRUCTION,
            Self::Modern => MODERN_INSTRUCTION,
            Self::Royal => ROYAL_INSTRUCTION,
        }
    }
}

impl std::fmt::Display for Style {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_keys_resolve_case_insensitively() {
        assert_eq!(Style::resolve("royal"), Style::Royal);
        assert_eq!(Style::resolve(" Modern "), Style::Modern);
        assert_eq!(Style::resolve("CLASSIC"), Style::Classic);
    }

    #[test]
    fn unknown_key_falls_back_to_default_instruction() {
        let style = Style::resolve("cyberpunk");
        assert_eq!(style, Style::Classic);
        assert_eq!(style.instruction(), Style::default().instruction());
        assert_eq!(Style::resolve("").instruction(), CLASSIC_INSTRUCTION);
        assert_eq!(Style::parse("cyberpunk"), None);
    }

    #[test]
    fn every_style_has_its_own_instruction() {
        let instructions: std::collections::HashSet<_> =
            Style::ALL.iter().map(|style| style.instruction()).collect();
        assert_eq!(instructions.len(), Style::ALL.len());
    }
}
