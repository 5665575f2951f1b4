use crate::storage::models::Role;

/// Operations gated by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    TrackOwnTime,
    ViewTeam,
    ViewMemberTimesheet,
    ManageUsers,
    ManageCommittees,
    ManageAllowlist,
    ViewSystemStats,
}

pub trait Policy {
    fn allows(&self, cap: Capability) -> bool;
}

impl Policy for Role {
    fn allows(&self, cap: Capability) -> bool {
        match self {
            Role::Admin => true,
            Role::Chair => matches!(cap, Capability::TrackOwnTime | Capability::ViewTeam | Capability::ViewMemberTimesheet),
            Role::Member => matches!(cap, Capability::TrackOwnTime),
        }
    }
}
