use modlink_core::{BitSpace, RegisterSpace};

/// Memory of one slave station.
#[derive(Debug, Default)]
pub struct SlaveDevice {
    pub coils: BitSpace,
    pub discrete_inputs: BitSpace,
    pub holding_registers: RegisterSpace,
    pub input_registers: RegisterSpace,
}

impl SlaveDevice {
    /// A device that grows its address spaces on write.
    pub fn new() -> Self {
        Self::with_auto_allocation(true)
    }

    pub fn with_auto_allocation(auto_allocation: bool) -> Self {
        Self {
            coils: BitSpace::with_auto_allocation(auto_allocation),
            discrete_inputs: BitSpace::with_auto_allocation(auto_allocation),
            holding_registers: RegisterSpace::with_auto_allocation(auto_allocation),
            input_registers: RegisterSpace::with_auto_allocation(auto_allocation),
        }
    }

    pub fn set_auto_allocation(&self, auto_allocation: bool) {
        self.coils.set_auto_allocation(auto_allocation);
        self.discrete_inputs.set_auto_allocation(auto_allocation);
        self.holding_registers.set_auto_allocation(auto_allocation);
        self.input_registers.set_auto_allocation(auto_allocation);
    }
}
