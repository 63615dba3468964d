use std::fmt;

use clap::ValueEnum;

use crate::error::{RdpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    Admin,
    Mentor,
    Candidate,
    Committee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ViewRoster,
    ViewProfile,
    EditCandidates,
    RecordScores,
    ImportExport,
    ViewAnalytics,
    Administer,
}

impl Role {
    pub fn capabilities(self) -> &'static [Capability] {
        use Capability::*;
        match self {
            Role::Admin => &[
                ViewRoster,
                ViewProfile,
                EditCandidates,
                RecordScores,
                ImportExport,
                ViewAnalytics,
                Administer,
            ],
            Role::Mentor => &[ViewRoster, ViewProfile, RecordScores, ViewAnalytics],
            Role::Committee => &[ViewRoster, ViewProfile, ViewAnalytics],
            Role::Candidate => &[ViewProfile],
        }
    }

    pub fn can(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::Admin => "admin",
            Role::Mentor => "mentor",
            Role::Candidate => "candidate",
            Role::Committee => "committee",
        };
        f.write_str(label)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Capability::ViewRoster => "view the roster",
            Capability::ViewProfile => "view candidate profiles",
            Capability::EditCandidates => "edit candidates",
            Capability::RecordScores => "record KPI scores",
            Capability::ImportExport => "import or export data",
            Capability::ViewAnalytics => "view analytics",
            Capability::Administer => "administer the store",
        };
        f.write_str(label)
    }
}

/// Request-scoped identity, built once per invocation and passed to handlers.
#[derive(Debug, Clone)]
pub struct Session {
    pub role: Role,
    /// The caller's own candidate id when acting as [`Role::Candidate`].
    pub candidate_id: Option<String>,
}

impl Session {
    pub fn new(role: Role, candidate_id: Option<String>) -> Self {
        Self { role, candidate_id }
    }

    pub fn authorize(&self, capability: Capability) -> Result<()> {
        if self.role.can(capability) {
            Ok(())
        } else {
            Err(RdpError::Forbidden {
                role: self.role,
                capability,
            })
        }
    }

    /// Candidates may only open their own profile.
    pub fn authorize_profile(&self, candidate_id: &str) -> Result<()> {
        self.authorize(Capability::ViewProfile)?;
        match (self.role, self.candidate_id.as_deref()) {
            (Role::Candidate, Some(own)) if own == candidate_id => Ok(()),
            (Role::Candidate, _) => Err(RdpError::Forbidden {
                role: self.role,
                capability: Capability::ViewProfile,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_holds_every_capability() {
        let session = Session::new(Role::Admin, None);
        assert!(session.authorize(Capability::Administer).is_ok());
        assert!(session.authorize(Capability::EditCandidates).is_ok());
    }

    #[test]
    fn mentor_records_scores_but_cannot_edit() {
        let session = Session::new(Role::Mentor, None);
        assert!(session.authorize(Capability::RecordScores).is_ok());
        let err = session.authorize(Capability::EditCandidates).unwrap_err();
        assert!(matches!(
            err,
            RdpError::Forbidden {
                role: Role::Mentor,
                capability: Capability::EditCandidates
            }
        ));
    }

    #[test]
    fn committee_is_read_only() {
        let role = Role::Committee;
        assert!(role.can(Capability::ViewAnalytics));
        assert!(!role.can(Capability::RecordScores));
        assert!(!role.can(Capability::ImportExport));
    }

    #[test]
    fn candidate_sees_only_own_profile() {
        let session = Session::new(Role::Candidate, Some("1001".to_string()));
        assert!(session.authorize_profile("1001").is_ok());
        assert!(session.authorize_profile("1002").is_err());
        assert!(session.authorize(Capability::ViewRoster).is_err());

        let anonymous = Session::new(Role::Candidate, None);
        assert!(anonymous.authorize_profile("1001").is_err());
    }
}
