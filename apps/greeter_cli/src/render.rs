use std::fmt::Write as _;

use shared::{
    domain::{Address, AddressRecord, MirrorState},
    protocol::{Notice, NoticeLevel},
    units::format_ether,
};
use sync_core::{OwnerView, Session};

const CONTRACT_NOT_DEPLOYED: &str = "<Contract not yet deployed>";
const ACCOUNT_NOT_CONNECTED: &str = "<Account not yet connected>";

pub struct StatusView<'a> {
    pub session: &'a Session,
    pub record: &'a AddressRecord,
    pub bound: Option<(u64, &'a Address)>,
    pub mirror: &'a MirrorState,
    pub view: OwnerView,
}

pub fn render_status(status: &StatusView<'_>) -> String {
    let mut out = String::new();
    let account = status
        .session
        .account
        .as_ref()
        .map(Address::as_str)
        .unwrap_or(ACCOUNT_NOT_CONNECTED);
    let _ = writeln!(out, "Account:  {account}");
    match status.bound {
        Some((generation, address)) => {
            let _ = writeln!(out, "Contract: {address} (binding #{generation})");
        }
        None => {
            let _ = writeln!(out, "Contract: {} (unbound)", status.record.current);
        }
    }
    let greeting = status.mirror.greeting.as_deref().unwrap_or("-");
    let _ = writeln!(out, "Greeting: {greeting}");

    match status.view {
        OwnerView::OwnerControls => {
            let balance = status
                .mirror
                .balance_wei
                .as_deref()
                .map(format_ether)
                .unwrap_or_else(|| "-".into());
            let _ = writeln!(out, "Balance:  {balance} ETH");
            let _ = write!(out, "You own this contract: `withdraw <wei>` is available.");
        }
        OwnerView::ViewerInfo => {
            let owner = status
                .mirror
                .owner
                .as_ref()
                .map(Address::as_str)
                .unwrap_or(CONTRACT_NOT_DEPLOYED);
            let _ = writeln!(out, "Owner:    {owner}");
            let _ = write!(out, "Only the owner can withdraw.");
        }
    }
    out
}

pub fn render_addresses(record: &AddressRecord) -> String {
    record
        .addresses
        .iter()
        .map(|address| {
            let marker = if *address == record.current { "*" } else { " " };
            format!("{marker} {address}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_notice(notice: &Notice) -> String {
    let tag = match notice.level {
        NoticeLevel::Success => "ok",
        NoticeLevel::Error => "error",
    };
    format!("[{tag}] {}", notice.message.replace("\n\n", " "))
}
