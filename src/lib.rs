//! Hosts-file site blocker with deliberate friction on the way out.
//!
//! `blk` re-activates every `# BLOCKME` line of the hosts file. `unblk` suppresses some of them for
//! a bounded time, after a reason, an enforced wait and (for `all`) a confirmation, and schedules
//! the reversal before returning.

pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod friction;
pub mod hosts;
pub mod lockdown;
pub mod logging;
pub mod mocks;
pub mod platform;
pub mod prompt;
pub mod recents;
pub mod scheduler;
pub mod unblock;

pub use error::{Denial, DenialClass, HostsError, PrivilegeError, SchedulerError, UnblockError};
pub use hosts::{HostEntry, HostsDocument, HostsStore, Pattern, Tag, classify_line};
pub use unblock::{UnblockFlow, UnblockGrant, UnblockRequest};
