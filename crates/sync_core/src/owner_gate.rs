use serde::{Deserialize, Serialize};
use shared::domain::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerView {
    /// Balance plus the withdraw form.
    OwnerControls,
    /// Read-only owner and account details.
    ViewerInfo,
}

/// Owner controls are shown only when both sides are known and the strings
/// match exactly; no case folding.
pub fn select_view(account: Option<&Address>, owner: Option<&Address>) -> OwnerView {
    match (account, owner) {
        (Some(account), Some(owner)) if account.as_str() == owner.as_str() => {
            OwnerView::OwnerControls
        }
        _ => OwnerView::ViewerInfo,
    }
}
