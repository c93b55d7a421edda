// inventory-backup/src/recovery/plan.rs
use serde::Serialize;

use crate::config::RecoveryConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryStep {
    pub step: u32,
    pub action: String,
    pub estimated_minutes: u32,
    pub responsible: String,
    pub automated: bool,
}

/// Runbook for a real incident. Built on demand and never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryPlan {
    pub environment: String,
    pub rto_minutes: u32,
    pub rpo_minutes: u32,
    pub steps: Vec<RecoveryStep>,
}

/// Step whose estimate is replaced by the measured artifact size during a rehearsal.
pub(crate) const RESTORE_STEP: u32 = 5;

impl RecoveryPlan {
    pub fn build(config: &RecoveryConfig, environment: &str) -> Self {
        let ic = &config.incident_commander;
        let dba = &config.database_admin;
        let platform = &config.platform_engineer;

        let raw: [(&str, u32, &String, bool); 8] = [
            (
                "Declare the incident and put the inventory app into maintenance mode so no sync jobs write to the database",
                10,
                ic,
                false,
            ),
            (
                "Assess the damage and choose the most recent backup inside the RPO window (`inventory-backup list`)",
                15,
                dba,
                false,
            ),
            (
                "Verify the chosen artifact against its sidecar checksum (`inventory-backup verify --backup-path <artifact>`)",
                5,
                dba,
                true,
            ),
            (
                "Provision or clean the target database server and confirm client tools and credentials",
                30,
                platform,
                false,
            ),
            (
                "Restore the database (`inventory-backup restore --backup-path <artifact>`); a safety copy of the live state is kept",
                60,
                dba,
                true,
            ),
            (
                "Re-import store settings, custom fields and workflow rules from the latest application backup",
                20,
                platform,
                false,
            ),
            (
                "Reconcile stock levels with Shopify for the window between the recovery point and now",
                45,
                platform,
                true,
            ),
            (
                "Smoke test critical flows, lift maintenance mode and announce recovery",
                15,
                ic,
                false,
            ),
        ];

        let steps = raw
            .into_iter()
            .zip(1..)
            .map(|((action, estimated_minutes, responsible, automated), step)| RecoveryStep {
                step,
                action: action.to_string(),
                estimated_minutes,
                responsible: responsible.clone(),
                automated,
            })
            .collect();

        Self {
            environment: environment.to_string(),
            rto_minutes: config.rto_minutes,
            rpo_minutes: config.rpo_minutes,
            steps,
        }
    }

    pub fn total_estimated_minutes(&self) -> u32 {
        self.steps.iter().map(|s| s.estimated_minutes).sum()
    }

    /// Plan total with the restore estimate swapped for `restore_minutes`.
    pub fn estimate_with_restore(&self, restore_minutes: u32) -> u32 {
        self.steps
            .iter()
            .map(|s| {
                if s.step == RESTORE_STEP {
                    restore_minutes
                } else {
                    s.estimated_minutes
                }
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_is_numbered_and_fits_default_rto() {
        let config = RecoveryConfig {
            incident_commander: "Dana (on-call lead)".to_string(),
            ..Default::default()
        };
        let plan = RecoveryPlan::build(&config, "production");

        assert_eq!(plan.steps.len(), 8);
        assert!(plan.steps.iter().zip(1..).all(|(s, n)| s.step == n));
        assert_eq!(plan.steps[0].responsible, "Dana (on-call lead)");
        assert_eq!(plan.steps[4].responsible, config.database_admin);
        assert!(plan.steps[4].action.contains("restore"));
        assert!(plan.total_estimated_minutes() <= plan.rto_minutes);
        assert_eq!(plan.rpo_minutes, 60);
    }

    #[test]
    fn test_restore_estimate_substitution() {
        let plan = RecoveryPlan::build(&RecoveryConfig::default(), "staging");
        let total = plan.total_estimated_minutes();
        assert_eq!(plan.estimate_with_restore(60), total);
        assert_eq!(plan.estimate_with_restore(1), total - 59);
    }
}
