//! Conversions between the alloy primitives used on the RPC side and the
//! `ethereum-types` primitives used by [`mpt_proof`].

pub trait Compat<Out> {
    fn compat(self) -> Out;
}

impl Compat<ethereum_types::H160> for alloy::primitives::Address {
    fn compat(self) -> ethereum_types::H160 {
        let alloy::primitives::Address(alloy::primitives::FixedBytes(arr)) = self;
        ethereum_types::H160(arr)
    }
}

impl Compat<ethereum_types::H256> for alloy::primitives::B256 {
    fn compat(self) -> ethereum_types::H256 {
        let alloy::primitives::FixedBytes(arr) = self;
        ethereum_types::H256(arr)
    }
}

impl Compat<ethereum_types::U256> for alloy::primitives::U256 {
    fn compat(self) -> ethereum_types::U256 {
        ethereum_types::U256(self.into_limbs())
    }
}

impl Compat<alloy::primitives::B256> for ethereum_types::H256 {
    fn compat(self) -> alloy::primitives::B256 {
        let ethereum_types::H256(arr) = self;
        alloy::primitives::FixedBytes(arr)
    }
}

impl Compat<alloy::primitives::U256> for ethereum_types::U256 {
    fn compat(self) -> alloy::primitives::U256 {
        let ethereum_types::U256(limbs) = self;
        alloy::primitives::U256::from_limbs(limbs)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, B256, U256};

    use super::*;

    #[test]
    fn round_trips() {
        let word = B256::from(U256::from(1337));
        let h: ethereum_types::H256 = word.compat();
        assert_eq!(h.to_low_u64_be(), 1337);
        let back: B256 = h.compat();
        assert_eq!(back, word);

        let n = U256::from(0x0102_0304_0506_0708_u64) << 100;
        let back: U256 = Compat::<ethereum_types::U256>::compat(n).compat();
        assert_eq!(back, n);
        assert_eq!(
            Compat::<ethereum_types::U256>::compat(U256::from(1337)),
            ethereum_types::U256::from(1337)
        );

        let a = address!("00000000000000000000000000000000deadbeef");
        let h: ethereum_types::H160 = a.compat();
        assert_eq!(h.as_bytes(), a.as_slice());
    }
}
