use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Template,
    Ai,
    ParallelAi,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Template => "TEMPLATE",
            Mode::Ai => "AI",
            Mode::ParallelAi => "PARALLEL_AI",
        }
    }

    /// Next mode to try after a systemic failure. TEMPLATE is terminal.
    pub fn downgrade(&self) -> Option<Mode> {
        match self {
            Mode::ParallelAi => Some(Mode::Ai),
            Mode::Ai => Some(Mode::Template),
            Mode::Template => None,
        }
    }

    pub fn uses_completion_api(&self) -> bool {
        !matches!(self, Mode::Template)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TEMPLATE" => Ok(Mode::Template),
            "AI" => Ok(Mode::Ai),
            "PARALLEL_AI" => Ok(Mode::ParallelAi),
            other => Err(format!("Unknown generation mode '{}'", other)),
        }
    }
}

pub fn select_mode(has_credential: bool) -> Mode {
    if has_credential {
        Mode::ParallelAi
    } else {
        Mode::Template
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_mode() {
        assert_eq!(select_mode(true), Mode::ParallelAi);
        assert_eq!(select_mode(false), Mode::Template);
    }

    #[test]
    fn test_downgrade_chain_ends_at_template() {
        assert_eq!(Mode::ParallelAi.downgrade(), Some(Mode::Ai));
        assert_eq!(Mode::Ai.downgrade(), Some(Mode::Template));
        assert_eq!(Mode::Template.downgrade(), None);
    }

    #[test]
    fn test_mode_round_trips_through_str() {
        for mode in [Mode::Template, Mode::Ai, Mode::ParallelAi] {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
        assert!("turbo".parse::<Mode>().is_err());
    }
}
