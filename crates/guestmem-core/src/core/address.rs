use super::macros::impl_ops;

impl_ops!(Ea, u64, "Effective Address");
impl_ops!(Ra, u64, "Real Address");

impl Ea {
    /// Returns the two most significant bits of the address.
    ///
    /// On radix MMUs these select the address quadrant.
    pub fn quadrant(self) -> u8 {
        (self.0 >> 62) as u8
    }

    /// Aligns the address down to a `1 << shift` boundary.
    pub fn align_down(self, shift: u64) -> Self {
        Self(self.0 & !((1u64 << shift) - 1))
    }
}

impl Ra {
    /// Aligns the address down to a `1 << shift` boundary.
    pub fn align_down(self, shift: u64) -> Self {
        Self(self.0 & !((1u64 << shift) - 1))
    }

    /// Returns the offset of the address within a `1 << shift` page.
    pub fn offset(self, shift: u64) -> u64 {
        self.0 & ((1u64 << shift) - 1)
    }
}
