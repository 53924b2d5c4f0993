use crate::capture::StreamStats;

/// Counters of the current (or most recent) session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames pulled from the camera stream
    pub acquired: u64,
    pub presented: u64,
    pub persisted: u64,
    /// Dropped at acquisition because `max_in_flight` frames were in progress
    pub dropped_backpressure: u64,
    /// Dropped because the presentation stage did not take them in time
    pub dropped_sink: u64,
    /// Discarded because a newer frame had already been presented
    pub dropped_stale: u64,
    /// Discarded while the session was stopping
    pub dropped_cancelled: u64,
    pub in_flight: usize,
    pub in_flight_high_water: usize,
    pub capacity: usize,
    /// Camera reported end of stream
    pub stream_ended: bool,
    pub camera: Option<StreamStats>,
}

impl PipelineStats {
    /// Frames the scheduler dropped, excluding camera-side recycling
    pub fn dropped(&self) -> u64 {
        self.dropped_backpressure + self.dropped_sink + self.dropped_stale + self.dropped_cancelled
    }
}
