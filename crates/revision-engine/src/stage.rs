use std::fmt;

/// The two network-bound steps of a request, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Analysis,
    Generation,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Generation => "generation",
        }
    }

    /// Operation name used in logs and events.
    pub fn operation(self) -> &'static str {
        match self {
            Self::Analysis => "analyze_image",
            Self::Generation => "generate_image",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
