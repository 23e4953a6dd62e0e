//! Cascade stages and their dependency edges.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One link position in the cascade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Admin link to the first service. Source of the config.
    Primary,
    /// Admin link to the service named in the config.
    Secondary,
    /// Push-event link derived from the secondary endpoint.
    Tertiary,
}

impl Stage {
    /// Every stage, upstream first.
    pub const ALL: [Self; 3] = [Self::Primary, Self::Secondary, Self::Tertiary];

    /// Lowercase name, also used as the link name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Tertiary => "tertiary",
        }
    }

    /// The stage this one cannot run without.
    pub fn depends_on(self) -> Option<Self> {
        match self {
            Self::Primary => None,
            Self::Secondary => Some(Self::Primary),
            Self::Tertiary => Some(Self::Secondary),
        }
    }

    /// Stages that directly depend on this one.
    pub fn direct_dependents(self) -> impl Iterator<Item = Self> {
        Self::ALL
            .into_iter()
            .filter(move |s| s.depends_on() == Some(self))
    }

    /// Every stage that transitively depends on this one, nearest first.
    pub fn dependents(self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut frontier: Vec<Self> = self.direct_dependents().collect();
        while let Some(stage) = frontier.pop() {
            if !out.contains(&stage) {
                out.push(stage);
                frontier.extend(stage.direct_dependents());
            }
        }
        out
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
