//! Member domain types and data-source seams
//!
//! Defines the entity served by the instrumented repository and the
//! traits the hosted data service is reached through. Validation and
//! role/permission rules live with the service, not here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DataError;

/// Role a member holds within their team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
    Guest,
}

/// A team member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Primary identifier
    pub id: String,
    /// Secondary lookup key, unique per member
    pub email: String,
    /// Team this member belongs to
    pub team_id: String,
    pub display_name: String,
    pub role: MemberRole,
}

/// Domain events published after a successful write
#[derive(Debug, Clone)]
pub enum MemberEvent {
    Saved(Member),
    Deleted { id: String },
}

/// Write-side and secondary-read access to the hosted data service
#[async_trait]
pub trait MemberStore: Send + Sync {
    /// Look up a member by email
    async fn fetch_by_email(&self, email: &str) -> Result<Member, DataError>;

    /// List every member of a team
    async fn fetch_team(&self, team_id: &str) -> Result<Vec<Member>, DataError>;

    /// Persist a member, creating or replacing it
    async fn save(&self, member: &Member) -> Result<(), DataError>;

    /// Delete a member by id
    async fn delete(&self, id: &str) -> Result<(), DataError>;
}

/// One way to fetch a member by id.
///
/// Repositories hold an ordered list of these (preferred path first,
/// degraded paths after) and try them in sequence until one succeeds.
#[async_trait]
pub trait MemberFetchStrategy: Send + Sync {
    /// Strategy name used in logs and aggregated failure reports
    fn name(&self) -> &str;

    /// Fetch the member with the given id
    async fn fetch_by_id(&self, id: &str) -> Result<Member, DataError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_member() -> Member {
        Member {
            id: "m-1".to_string(),
            email: "ada@crewdeck.app".to_string(),
            team_id: "t-9".to_string(),
            display_name: "Ada".to_string(),
            role: MemberRole::Admin,
        }
    }

    #[test]
    fn test_member_serializes_camel_case() {
        let json = serde_json::to_string(&sample_member()).unwrap();
        assert!(json.contains("\"teamId\":\"t-9\""));
        assert!(json.contains("\"displayName\":\"Ada\""));
        assert!(json.contains("\"role\":\"admin\""));
    }

    #[test]
    fn test_member_roundtrip() {
        let member = sample_member();
        let json = serde_json::to_string(&member).unwrap();
        let parsed: Member = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, member);
    }
}
