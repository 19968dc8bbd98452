//! Proposal conformance.
//!
//! A proposed subgraph SDL conforms when it is schema-equal to the SDL recorded
//! for that subgraph on an approved proposal. A deletion conforms when an
//! approved proposal marks the subgraph deleted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diff::diff_schemas;
use crate::normalize::normalize;
use crate::types::{Proposal, ProposalSettings, ProposalState, Severity};

/// Association between a check and one approved proposal it was compared to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalLinkage {
    pub proposal_id: Uuid,
    pub proposal_name: String,
    pub proposal_match: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalEvaluation {
    pub linkages: Vec<ProposalLinkage>,
    /// Set when no approved proposal matched.
    pub mismatch: Option<ProposalMismatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalMismatch {
    pub severity: Severity,
    pub message: String,
}

impl ProposalEvaluation {
    pub fn matched(&self) -> Option<&ProposalLinkage> {
        self.linkages.iter().find(|l| l.proposal_match)
    }

    pub fn is_blocking(&self) -> bool {
        self.mismatch
            .as_ref()
            .is_some_and(|m| m.severity == Severity::Error)
    }
}

/// Which severity from the namespace settings applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalGate {
    Check,
    Publish,
}

/// Compare a subgraph change against the approved proposals.
///
/// Returns `None` when proposals are disabled, so no linkage or finding is
/// ever produced for such a namespace. `proposed_sdl` is `None` for deletes.
pub fn evaluate_proposals(
    settings: &ProposalSettings,
    gate: ProposalGate,
    subgraph_name: &str,
    proposed_sdl: Option<&str>,
    proposals: &[Proposal],
) -> Option<ProposalEvaluation> {
    if !settings.enabled {
        return None;
    }
    let proposed = proposed_sdl.map(normalize);

    let mut linkages = Vec::new();
    for proposal in proposals
        .iter()
        .filter(|p| p.state == ProposalState::Approved)
    {
        let Some(entry) = proposal
            .subgraphs
            .iter()
            .find(|s| s.subgraph_name == subgraph_name)
        else {
            continue;
        };

        let proposal_match = match (&proposed, entry.is_deleted) {
            (None, deleted) => deleted,
            (Some(_), true) => false,
            (Some(Err(_)), false) => continue,
            (Some(Ok(proposed)), false) => match normalize(&entry.schema_sdl) {
                Ok(recorded) => diff_schemas(proposed, &recorded).is_empty(),
                Err(_) => continue,
            },
        };
        linkages.push(ProposalLinkage {
            proposal_id: proposal.id,
            proposal_name: proposal.name.clone(),
            proposal_match,
        });
        if proposal_match {
            break;
        }
    }

    let matched = linkages.iter().any(|l| l.proposal_match);
    let mismatch = (!matched).then(|| ProposalMismatch {
        severity: match gate {
            ProposalGate::Check => settings.check_severity,
            ProposalGate::Publish => settings.publish_severity,
        },
        message: if proposed_sdl.is_none() {
            format!(
                "The subgraph {subgraph_name} is not proposed to be deleted in any of the approved proposals."
            )
        } else {
            format!(
                "The subgraph {subgraph_name}'s schema does not match to this subgraph's schema in any approved proposal."
            )
        },
    });

    Some(ProposalEvaluation { linkages, mismatch })
}
