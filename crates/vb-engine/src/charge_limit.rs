use vb_core::{ClientConfig, VehicleState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    Inactive,
    /// The limit is reached; the caller disarms it either way
    Reached { dispatch_stop: bool },
}

/// One-shot charge limit
///
/// Fires once SOC reaches `chargeLimitPct` while power flows. The caller
/// resets the limit to 100 after acting on [`LimitDecision::Reached`], so a
/// limit only ever stops one session.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChargeLimitEnforcer;

impl ChargeLimitEnforcer {
    /// `stop_pending` suppresses a second stop while one is still active
    pub fn evaluate(config: &ClientConfig, state: &VehicleState, stop_pending: bool) -> LimitDecision {
        let reached = config.charge_limit_armed()
            && state.battery.soc_pct >= f64::from(config.charge_limit_pct)
            && state.charging.power_kw > 0.0;

        if reached {
            LimitDecision::Reached {
                dispatch_stop: !stop_pending,
            }
        } else {
            LimitDecision::Inactive
        }
    }
}
