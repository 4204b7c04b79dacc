use crate::{
    actions::RefundVariant,
    ledger::WriteCall,
    pool::{
        PoolId,
        TicketId,
    },
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Done,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefundJob {
    pub ticket_id: TicketId,
    pub state: JobState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BulkProgress {
    pub pool_id: PoolId,
    pub completed: usize,
    pub total: usize,
}

/// Per-ticket refunds for one pool, consumed strictly one job at a time.
#[derive(Clone, Debug)]
pub struct BulkRefund {
    pool_id: PoolId,
    variant: RefundVariant,
    jobs: Vec<RefundJob>,
}

impl BulkRefund {
    pub fn new(pool_id: PoolId, variant: RefundVariant, tickets: &[TicketId]) -> Self {
        Self {
            pool_id,
            variant,
            jobs: tickets
                .iter()
                .map(|ticket_id| RefundJob {
                    ticket_id: *ticket_id,
                    state: JobState::Queued,
                })
                .collect(),
        }
    }

    pub fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    pub fn variant(&self) -> RefundVariant {
        self.variant
    }

    pub fn jobs(&self) -> &[RefundJob] {
        &self.jobs
    }

    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    pub fn completed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.state == JobState::Done)
            .count()
    }

    pub fn progress(&self) -> BulkProgress {
        BulkProgress {
            pool_id: self.pool_id,
            completed: self.completed(),
            total: self.total(),
        }
    }

    pub fn has_failed(&self) -> bool {
        self.jobs.iter().any(|job| job.state == JobState::Failed)
    }

    pub fn refunded(&self) -> Vec<TicketId> {
        self.jobs
            .iter()
            .filter(|job| job.state == JobState::Done)
            .map(|job| job.ticket_id)
            .collect()
    }

    /// Mark the next queued job running and return its call. Nothing starts while a job
    /// is running or after any job failed.
    pub fn start_next(&mut self) -> Option<(usize, WriteCall)> {
        if self.has_failed() || self.jobs.iter().any(|job| job.state == JobState::Running) {
            return None;
        }
        let index = self
            .jobs
            .iter()
            .position(|job| job.state == JobState::Queued)?;
        let job = &mut self.jobs[index];
        job.state = JobState::Running;
        Some((index, self.variant.ticket_call(self.pool_id, job.ticket_id)))
    }

    pub fn finish(&mut self, index: usize, succeeded: bool) {
        if let Some(job) = self.jobs.get_mut(index) {
            if job.state == JobState::Running {
                job.state = if succeeded {
                    JobState::Done
                } else {
                    JobState::Failed
                };
            }
        }
    }
}
