//! Instrumented domain repositories
//!
//! The integration point the UI layer consumes: cached, monitored
//! reads with ordered fallback fetching, and writes that invalidate
//! the affected cache keys and publish domain events.

pub mod instrumented;
pub mod member;

pub use instrumented::MemberRepository;
pub use member::{Member, MemberEvent, MemberFetchStrategy, MemberRole, MemberStore};
