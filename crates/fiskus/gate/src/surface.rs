//! Read-model for the document form surface.
//!
//! Everything in this module is a pure function of the document passed
//! in. Nothing caches its answer: a form render re-evaluates
//! visibility from the current record every time, so a state change
//! shows up on the very next render.

use serde::Serialize;

use fiskus_types::{Document, DocumentState, FiscalFields};

/// Fiscal lifecycle position of a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FiscalStatus {
    /// Not posted, nothing to fiscalise yet.
    Unfiscalisable,
    /// Posted and awaiting fiscal registration.
    Fiscalisable,
    /// Carries a fiscal receipt. Terminal.
    Fiscalised,
}

pub fn fiscal_status(document: &Document) -> FiscalStatus {
    if document.fiscalised {
        FiscalStatus::Fiscalised
    } else if document.state == DocumentState::Posted {
        FiscalStatus::Fiscalisable
    } else {
        FiscalStatus::Unfiscalisable
    }
}

/// Whether the form offers the fiscalise action.
pub fn fiscalise_action_visible(document: &Document) -> bool {
    !document.fiscalised && document.state == DocumentState::Posted
}

/// Whether the form shows the read-only fiscal panel.
pub fn fiscal_panel_visible(document: &Document) -> bool {
    document.fiscalised && document.fiscal.device_id.is_some()
}

/// One render of the fiscal strip on a document form.
#[derive(Clone, Debug, Serialize)]
pub struct SurfaceView {
    pub status: FiscalStatus,
    pub fiscalise_action: bool,
    /// Panel contents when the panel is shown. The block is rendered
    /// as stored; missing fields stay blank rather than hiding the
    /// panel outright.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fiscal_panel: Option<FiscalFields>,
}

/// Evaluate the whole surface for one render.
pub fn surface_view(document: &Document) -> SurfaceView {
    SurfaceView {
        status: fiscal_status(document),
        fiscalise_action: fiscalise_action_visible(document),
        fiscal_panel: fiscal_panel_visible(document).then(|| document.fiscal.clone()),
    }
}

/// Detect a half-written fiscal block.
///
/// Returns a description when the flag and the block disagree. The
/// surface still renders; the caller decides whether to log or block.
pub fn fiscal_integrity_breach(document: &Document) -> Option<String> {
    if document.fiscalised && !document.fiscal.is_complete() {
        return Some(format!(
            "document {} is flagged fiscalised but its fiscal block is incomplete",
            document.number
        ));
    }
    if !document.fiscalised && !document.fiscal.is_empty() {
        return Some(format!(
            "document {} carries fiscal data without the fiscalised flag",
            document.number
        ));
    }
    None
}
