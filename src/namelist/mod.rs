//! Domain membership for redirect blocks
//!
//! - [`DomainMatcher`]: the reloadable base set read from list files
//! - [`ExclusionSet`]: the static carve-out consulted after a positive match
//! - [`MembershipIndex`]: the immutable snapshot both are built on
//!
//! ```text
//!   list files ──reload──> MembershipIndex ──ArcSwap──> DomainMatcher::matches
//!                                                              │ true
//!                                                              v
//!                                                   ExclusionSet::matches ──> !excluded
//! ```

mod exclusion;
mod index;
mod matcher;
mod source;

pub use exclusion::ExclusionSet;
pub use index::MembershipIndex;
pub use matcher::{DomainMatcher, MatcherStats, ReloadOutcome, DEFAULT_RELOAD_INTERVAL};
pub use source::{parse_line, parse_list, ListLine, ListSource, ParsedList, SourceStamp};
