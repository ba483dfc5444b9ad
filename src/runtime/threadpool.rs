//! CLR thread-pool snapshot.
//!
//! A point-in-time copy of the pool's counters plus the queued work requests, read in one
//! bounded linked-list walk. The queue head may be torn in an inconsistent target; the walk
//! caps its length and stops at the first unreadable record.

use tracing::warn;

use crate::dac::{DacInterface, ThreadPoolData};

/// Hard cap on the work-request queue walk.
const MAX_WORK_REQUESTS: usize = 4096;

/// One queued thread-pool work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkRequest {
    /// Function pointer the pool will invoke
    pub function: u64,
    /// Context argument passed along
    pub context: u64,
}

/// Snapshot of the CLR thread pool.
#[derive(Debug, Clone)]
pub struct ClrThreadPool {
    /// Last sampled CPU utilization (percent)
    pub cpu_utilization: u32,
    /// Worker thread floor
    pub min_threads: u32,
    /// Worker thread ceiling
    pub max_threads: u32,
    /// Idle worker threads
    pub idle_workers: u32,
    /// Running worker threads
    pub running_workers: u32,
    /// Retired worker threads
    pub retired_workers: u32,
    /// Completion port thread floor
    pub min_completion_ports: u32,
    /// Completion port thread ceiling
    pub max_completion_ports: u32,
    /// Free completion port threads
    pub free_completion_ports: u32,
    /// Queued work requests, head first
    pub work_requests: Vec<WorkRequest>,
}

impl ClrThreadPool {
    pub(crate) fn read(dac: &dyn DacInterface, data: &ThreadPoolData) -> Self {
        ClrThreadPool {
            cpu_utilization: data.cpu_utilization,
            min_threads: data.min_threads,
            max_threads: data.max_threads,
            idle_workers: data.num_idle_workers,
            running_workers: data.num_working_workers,
            retired_workers: data.num_retired_workers,
            min_completion_ports: data.min_completion_ports,
            max_completion_ports: data.max_completion_ports,
            free_completion_ports: data.num_free_completion_ports,
            work_requests: Self::walk_queue(dac, data.first_work_request),
        }
    }

    fn walk_queue(dac: &dyn DacInterface, first: u64) -> Vec<WorkRequest> {
        let mut requests = Vec::new();
        let mut address = first;
        while address != 0 && requests.len() < MAX_WORK_REQUESTS {
            let Ok(data) = dac.work_request_data(address) else {
                warn!(address, "work request unreadable; queue truncated");
                break;
            };
            requests.push(WorkRequest {
                function: data.function,
                context: data.context,
            });
            address = data.next;
        }
        requests
    }

    /// Number of queued work requests captured in this snapshot.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.work_requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dac::WorkRequestData, test::MockDac};

    #[test]
    fn test_queue_walk_follows_links() {
        let dac = MockDac::new().with_thread_pool(
            ThreadPoolData {
                min_threads: 4,
                first_work_request: 0x7000,
                ..ThreadPoolData::default()
            },
            vec![
                (
                    0x7000,
                    WorkRequestData {
                        function: 0xAAA,
                        context: 1,
                        next: 0x7100,
                    },
                ),
                (
                    0x7100,
                    WorkRequestData {
                        function: 0xBBB,
                        context: 2,
                        next: 0,
                    },
                ),
            ],
        );

        let data = dac.thread_pool_data().unwrap();
        let pool = ClrThreadPool::read(&dac, &data);
        assert_eq!(pool.min_threads, 4);
        assert_eq!(pool.queue_length(), 2);
        assert_eq!(pool.work_requests[0].function, 0xAAA);
        assert_eq!(pool.work_requests[1].function, 0xBBB);
    }

    #[test]
    fn test_self_looping_queue_is_capped() {
        let dac = MockDac::new().with_thread_pool(
            ThreadPoolData {
                first_work_request: 0x7000,
                ..ThreadPoolData::default()
            },
            vec![(
                0x7000,
                WorkRequestData {
                    function: 0xAAA,
                    context: 1,
                    next: 0x7000,
                },
            )],
        );

        let data = dac.thread_pool_data().unwrap();
        let pool = ClrThreadPool::read(&dac, &data);
        assert_eq!(pool.queue_length(), MAX_WORK_REQUESTS);
    }
}
