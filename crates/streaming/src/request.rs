use serde::Serialize;

/// Identifies one issued remote fetch.
///
/// Tickets are handed out in increasing order by a [`crate::FetchGate`];
/// a response is only applied if it carries the gate's latest ticket.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FetchTicket(pub u64);

impl std::fmt::Display for FetchTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
