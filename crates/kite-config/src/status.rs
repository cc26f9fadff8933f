//! Status trail and canonical plan status values.
//!
//! Free-form phase messages ("creating role stack", ...) are recorded
//! alongside the canonical [`PlanStatus`] values. The `up` flag flips only
//! on the explicit `Active` / `DeletedOrNotExist` values; there is no
//! string sentinel outside this enum.

use chrono::Utc;

use crate::error::ConfigError;
use crate::plan::{Plan, StatusEntry};

/// Canonical plan statuses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::AsRefStr,
)]
pub enum PlanStatus {
    /// Every create phase finished; the cluster is usable.
    #[strum(serialize = "active")]
    Active,
    /// Teardown finished, or nothing was ever created.
    #[strum(serialize = "deleted/not-exist")]
    DeletedOrNotExist,
    /// A create pass is running.
    #[strum(serialize = "creating")]
    Creating,
    /// A delete pass is running.
    #[strum(serialize = "deleting")]
    Deleting,
    /// A create phase failed.
    #[strum(serialize = "create-failed")]
    CreateFailed,
}

impl PlanStatus {
    /// Whether this status changes the plan's `up` flag, and to what.
    pub fn up_transition(self) -> Option<bool> {
        match self {
            PlanStatus::Active => Some(true),
            PlanStatus::DeletedOrNotExist => Some(false),
            _ => None,
        }
    }
}

impl Plan {
    /// Prepend a status to the trail, update `status_current` and `up`,
    /// then persist.
    pub fn record_status(&mut self, status: impl Into<String>) -> Result<(), ConfigError> {
        let status = status.into();
        if let Ok(s) = status.parse::<PlanStatus>() {
            if let Some(up) = s.up_transition() {
                self.up = up;
            }
        }
        self.status_current = status.clone();
        self.status.insert(
            0,
            StatusEntry {
                time: Utc::now(),
                status,
            },
        );
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synced_plan() -> (tempfile::TempDir, Plan) {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = Plan::new_default();
        plan.config_path = dir.path().join("s.yaml").to_string_lossy().into_owned();
        plan.remote_access.commands_output_path =
            dir.path().join("s.ssh.sh").to_string_lossy().into_owned();
        plan.validate_and_set_defaults().unwrap();
        (dir, plan)
    }

    #[test]
    fn trail_is_newest_first_and_current_matches_head() {
        let (_dir, mut plan) = synced_plan();
        plan.record_status("creating").unwrap();
        plan.record_status("active").unwrap();

        assert_eq!(plan.status_current, "active");
        assert_eq!(plan.status[0].status, "active");
        assert_eq!(plan.status[1].status, "creating");
        // Newest first: timestamps descend from head to tail.
        for w in plan.status.windows(2) {
            assert!(w[0].time >= w[1].time);
        }
    }

    #[test]
    fn up_flips_only_on_canonical_values() {
        let (_dir, mut plan) = synced_plan();
        assert!(!plan.up);

        plan.record_status("creating").unwrap();
        assert!(!plan.up);

        plan.record_status(PlanStatus::Active.to_string()).unwrap();
        assert!(plan.up);

        plan.record_status("fetching logs").unwrap();
        assert!(plan.up, "free-form status must not flip up");

        plan.record_status(PlanStatus::DeletedOrNotExist.to_string())
            .unwrap();
        assert!(!plan.up);
    }

    #[test]
    fn plan_status_round_trip() {
        for s in [
            PlanStatus::Active,
            PlanStatus::DeletedOrNotExist,
            PlanStatus::Creating,
            PlanStatus::Deleting,
            PlanStatus::CreateFailed,
        ] {
            assert_eq!(s.to_string().parse::<PlanStatus>().unwrap(), s);
        }
        assert_eq!(PlanStatus::DeletedOrNotExist.to_string(), "deleted/not-exist");
    }
}
