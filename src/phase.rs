/// AC output phase of the inverter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    L1,
    L2,
    L3,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::L1, Phase::L2, Phase::L3];

    pub fn label(self) -> &'static str {
        match self {
            Phase::L1 => "L1",
            Phase::L2 => "L2",
            Phase::L3 => "L3",
        }
    }

    /// Position of the phase inside per-phase arrays.
    pub fn index(self) -> usize {
        match self {
            Phase::L1 => 0,
            Phase::L2 => 1,
            Phase::L3 => 2,
        }
    }

    // ShineX `/status` field names

    pub fn current_field(self) -> &'static str {
        match self {
            Phase::L1 => "L1ThreePhaseGridOutputCurrent",
            Phase::L2 => "L2ThreePhaseGridOutputCurrent",
            Phase::L3 => "L3ThreePhaseGridOutputCurrent",
        }
    }

    pub fn power_field(self) -> &'static str {
        match self {
            Phase::L1 => "L1ThreePhaseGridOutputPower",
            Phase::L2 => "L2ThreePhaseGridOutputPower",
            Phase::L3 => "L3ThreePhaseGridOutputPower",
        }
    }

    pub fn voltage_field(self) -> &'static str {
        match self {
            Phase::L1 => "L1ThreePhaseGridVoltage",
            Phase::L2 => "L2ThreePhaseGridVoltage",
            Phase::L3 => "L3ThreePhaseGridVoltage",
        }
    }

    // Bus attribute paths

    pub const fn current_path(self) -> &'static str {
        match self {
            Phase::L1 => "/Ac/L1/Current",
            Phase::L2 => "/Ac/L2/Current",
            Phase::L3 => "/Ac/L3/Current",
        }
    }

    pub const fn power_path(self) -> &'static str {
        match self {
            Phase::L1 => "/Ac/L1/Power",
            Phase::L2 => "/Ac/L2/Power",
            Phase::L3 => "/Ac/L3/Power",
        }
    }

    pub const fn voltage_path(self) -> &'static str {
        match self {
            Phase::L1 => "/Ac/L1/Voltage",
            Phase::L2 => "/Ac/L2/Voltage",
            Phase::L3 => "/Ac/L3/Voltage",
        }
    }

    pub const fn energy_forward_path(self) -> &'static str {
        match self {
            Phase::L1 => "/Ac/L1/Energy/Forward",
            Phase::L2 => "/Ac/L2/Energy/Forward",
            Phase::L3 => "/Ac/L3/Energy/Forward",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_follow_phase_label() {
        for phase in Phase::ALL {
            assert!(phase.current_field().starts_with(phase.label()));
            assert!(phase.power_field().starts_with(phase.label()));
            assert!(phase.voltage_field().starts_with(phase.label()));
            assert!(phase.current_path().contains(phase.label()));
            assert!(phase.energy_forward_path().contains(phase.label()));
        }
    }

    #[test]
    fn test_index_matches_order() {
        for (position, phase) in Phase::ALL.iter().enumerate() {
            assert_eq!(phase.index(), position);
        }
    }
}
