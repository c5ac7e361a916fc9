// QuestSage - timing.rs

use std::time::Duration;

/// Budget for a wait-until-ready polling loop.
///
/// Both the heartbeat poll and the device reachability probe originally
/// looped forever; every loop now carries an explicit budget and surfaces a
/// timeout error once either limit is hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Sleep between consecutive attempts.
    pub interval: Duration,
    /// Give up once this much time has passed since the loop started.
    pub max_wait: Duration,
    /// Give up after this many attempts, regardless of elapsed time.
    pub max_attempts: u32,
}

impl PollTiming {
    /// Default budget for the level heartbeat poll: one check every 30
    /// seconds, for at most 30 minutes.
    pub fn heartbeat() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_wait: Duration::from_secs(30 * 60),
            max_attempts: 60,
        }
    }

    /// Default budget for the device reachability probe: one attempt every
    /// 10 seconds, for at most 10 minutes. Generous because the headset may
    /// be asleep or still joining the network.
    pub fn probe() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(10 * 60),
            max_attempts: 60,
        }
    }
}
