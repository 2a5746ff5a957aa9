use crate::error::RejectionError;
use crate::snapshot::SystemSnapshot;
use crate::validators::ValidatorRule;
use crate::workload::SessionWorkload;

/// Caps the number of running sessions per keypair.
///
/// Ordinary and SFTP sessions are counted separately; a workload is
/// checked against exactly one of the two counters.
pub struct ConcurrencyValidator;

impl ValidatorRule for ConcurrencyValidator {
    fn name(&self) -> &'static str {
        "concurrency"
    }

    fn validate(
        &self,
        snapshot: &SystemSnapshot,
        workload: &SessionWorkload,
    ) -> Result<(), RejectionError> {
        let Some(policy) = snapshot
            .resource_policy
            .keypair_policies
            .get(&workload.access_key)
        else {
            return Ok(());
        };

        let (limit, counters, what) = if workload.is_private {
            (
                policy.max_concurrent_sftp_sessions,
                &snapshot.concurrency.sftp_sessions_by_keypair,
                "SFTP",
            )
        } else {
            (
                policy.max_concurrent_sessions,
                &snapshot.concurrency.sessions_by_keypair,
                "concurrent",
            )
        };
        let current = counters.get(&workload.access_key).copied().unwrap_or(0);
        if let Some(max) = limit.value().filter(|_| limit.is_reached_by(current)) {
            return Err(RejectionError::ConcurrencyLimitExceeded(format!(
                "You cannot run more than {max} {what} sessions"
            )));
        }
        Ok(())
    }
}
