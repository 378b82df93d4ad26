pub(crate) mod network;
mod membership_service;

pub use membership_service::{GetMembers, MembersReply, MembershipService};
