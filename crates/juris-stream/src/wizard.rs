use std::fmt;
use std::str::FromStr;

use crate::errors::JurisError;
use crate::phases::PhaseName;

/// The five assistant wizards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WizardKind {
    ContractAnalysis,
    EntityFormation,
    LegalChat,
    Correspondence,
    ProceduralDocument,
}

impl WizardKind {
    pub const ALL: [WizardKind; 5] = [
        WizardKind::ContractAnalysis,
        WizardKind::EntityFormation,
        WizardKind::LegalChat,
        WizardKind::Correspondence,
        WizardKind::ProceduralDocument,
    ];

    /// Stable slug, also the backend route segment.
    pub fn slug(self) -> &'static str {
        match self {
            Self::ContractAnalysis => "contract-analysis",
            Self::EntityFormation => "entity-formation",
            Self::LegalChat => "legal-chat",
            Self::Correspondence => "correspondence",
            Self::ProceduralDocument => "procedural-document",
        }
    }

    /// Path of the streaming endpoint, relative to the backend base URL.
    pub fn stream_path(self) -> String {
        format!("/api/{}/stream", self.slug())
    }

    /// Wire names of the phases this wizard is known to report, in pipeline
    /// order. The backend may report others; they are kept as `Other`.
    pub fn phase_names(self) -> Vec<&'static str> {
        fn names<P: PhaseName>(all: &'static [P]) -> Vec<&'static str> {
            all.iter().map(|p| p.as_str()).collect()
        }
        match self {
            Self::ContractAnalysis => names(ContractPhase::ALL),
            Self::EntityFormation => names(EntityPhase::ALL),
            Self::LegalChat => Vec::new(),
            Self::Correspondence => names(CorrespondencePhase::ALL),
            Self::ProceduralDocument => names(ProceduralPhase::ALL),
        }
    }
}

impl fmt::Display for WizardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for WizardKind {
    type Err = JurisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        WizardKind::ALL
            .into_iter()
            .find(|kind| kind.slug() == wanted)
            .ok_or_else(|| JurisError::Validation(format!("unknown wizard: {s}")))
    }
}

/// Binds a wizard kind to its phase vocabulary.
pub trait Wizard: Send + Sync + 'static {
    type Phase: PhaseName;
    const KIND: WizardKind;
}

macro_rules! phase_vocabulary {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
            /// A phase the backend reported outside the known pipeline.
            Other(String),
        }

        impl $name {
            /// The known phases, in pipeline order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];
        }

        impl PhaseName for $name {
            fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $wire,)+
                    $name::Other(name) => name,
                }
            }

            fn is_known(&self) -> bool {
                !matches!(self, $name::Other(_))
            }

            fn parse(name: &str) -> Option<Self> {
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                Some(match name.to_ascii_lowercase().as_str() {
                    $($wire => $name::$variant,)+
                    _ => $name::Other(name.to_string()),
                })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

phase_vocabulary! {
    /// Contract analysis pipeline.
    ContractPhase {
        Metadata => "metadata",
        Validity => "validity",
        Risks => "risks",
        Clauses => "clauses",
        Compliance => "compliance",
        Recommendations => "recommendations",
        Summary => "summary",
    }
}

phase_vocabulary! {
    /// Entity-formation guidance pipeline.
    EntityPhase {
        Profile => "profile",
        Structures => "structures",
        Comparison => "comparison",
        Recommendation => "recommendation",
        Steps => "steps",
    }
}

phase_vocabulary! {
    /// Correspondence drafting pipeline.
    CorrespondencePhase {
        Facts => "facts",
        Legal => "legal",
        Tone => "tone",
        Draft => "draft",
        Delivery => "delivery",
    }
}

phase_vocabulary! {
    /// Procedural-document drafting pipeline.
    ProceduralPhase {
        Facts => "facts",
        Jurisdiction => "jurisdiction",
        Legal => "legal",
        Strategy => "strategy",
        Draft => "draft",
        Deadlines => "deadlines",
    }
}

pub struct ContractAnalysis;
pub struct EntityFormation;
pub struct LegalChat;
pub struct Correspondence;
pub struct ProceduralDocument;

impl Wizard for ContractAnalysis {
    type Phase = ContractPhase;
    const KIND: WizardKind = WizardKind::ContractAnalysis;
}

impl Wizard for EntityFormation {
    type Phase = EntityPhase;
    const KIND: WizardKind = WizardKind::EntityFormation;
}

/// Chat has no pipeline; any phase it reports is kept under its own name.
impl Wizard for LegalChat {
    type Phase = String;
    const KIND: WizardKind = WizardKind::LegalChat;
}

impl Wizard for Correspondence {
    type Phase = CorrespondencePhase;
    const KIND: WizardKind = WizardKind::Correspondence;
}

impl Wizard for ProceduralDocument {
    type Phase = ProceduralPhase;
    const KIND: WizardKind = WizardKind::ProceduralDocument;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_round_trip_through_from_str() {
        for kind in WizardKind::ALL {
            assert_eq!(kind.slug().parse::<WizardKind>().expect("kind"), kind);
        }
        assert_eq!(
            "LEGAL_CHAT".parse::<WizardKind>().expect("kind"),
            WizardKind::LegalChat
        );
        assert!("tax-return".parse::<WizardKind>().is_err());
    }

    #[test]
    fn stream_path_uses_slug() {
        assert_eq!(
            WizardKind::Correspondence.stream_path(),
            "/api/correspondence/stream"
        );
    }

    #[test]
    fn vocabularies_map_known_names_and_keep_the_rest() {
        assert_eq!(ContractPhase::parse("Risks"), Some(ContractPhase::Risks));
        assert_eq!(
            ContractPhase::parse(" Parties "),
            Some(ContractPhase::Other("Parties".into()))
        );
        assert_eq!(ContractPhase::parse("  "), None);
        assert!(!ContractPhase::Other("tone".into()).is_known());
        assert_eq!(CorrespondencePhase::parse("tone"), Some(CorrespondencePhase::Tone));
        for name in WizardKind::ProceduralDocument.phase_names() {
            let parsed = ProceduralPhase::parse(name).expect("phase");
            assert!(parsed.is_known());
            assert_eq!(parsed.as_str(), name);
        }
    }

    #[test]
    fn chat_has_no_phases() {
        assert!(WizardKind::LegalChat.phase_names().is_empty());
        assert_eq!(WizardKind::ContractAnalysis.phase_names().len(), 7);
    }
}
