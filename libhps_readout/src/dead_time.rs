/// Tracks the trigger-issue history that gates trigger emission.
///
/// After any accepted trigger the electronics need `dead_time_ns` to
/// recover; a triggering condition inside that interval is lost outright,
/// exactly as in the hardware. Nothing is queued and nothing is retried.
#[derive(Debug, Clone)]
pub struct DeadTimeVeto {
    dead_time_ns: f64,
    last_trigger: Option<f64>,
}

impl DeadTimeVeto {
    pub fn new(dead_time_ns: f64) -> Self {
        DeadTimeVeto {
            dead_time_ns,
            last_trigger: None,
        }
    }

    /// Whether a trigger at `time` falls inside the recovery interval of
    /// the previous trigger.
    pub fn is_in_dead_time(&self, time: f64) -> bool {
        match self.last_trigger {
            Some(last) => time - last < self.dead_time_ns,
            None => false,
        }
    }

    /// Record an accepted trigger, opening a new dead-time interval.
    pub fn record_trigger(&mut self, time: f64) {
        self.last_trigger = Some(time);
    }

    pub fn dead_time_ns(&self) -> f64 {
        self.dead_time_ns
    }
}
