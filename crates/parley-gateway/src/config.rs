use std::time::Duration;

use chrono::{FixedOffset, NaiveTime, Offset, Utc};

/// Runtime knobs of the chat core. The server binary fills this from the
/// environment; tests use `Default`.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Time of day `break_time` deliveries are released.
    pub break_time: NaiveTime,
    /// Time of day `after_work` deliveries are released.
    pub after_work: NaiveTime,
    /// Offset of the tenant-local wall clock the two times above refer to.
    pub utc_offset: FixedOffset,
    pub sweep_interval: Duration,
    /// Max scheduled messages promoted per sweeper tick.
    pub sweep_batch: u32,
    pub heartbeat_interval: Duration,
    /// Bounded per-connection outbound queue. A connection that falls this
    /// far behind is disconnected.
    pub outbound_buffer: usize,
    /// In characters.
    pub max_content_len: usize,
    pub max_attachments: usize,
    pub max_history_page: u32,
}

pub(crate) fn time_of_day(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            break_time: time_of_day(12, 0),
            after_work: time_of_day(17, 0),
            utc_offset: Utc.fix(),
            sweep_interval: Duration::from_secs(60),
            sweep_batch: 500,
            heartbeat_interval: Duration::from_secs(30),
            outbound_buffer: 256,
            max_content_len: 4000,
            max_attachments: 10,
            max_history_page: 200,
        }
    }
}
