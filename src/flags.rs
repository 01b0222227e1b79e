//! Per-pair and per-instance feature flags.
//!
//! A pair's effective flag set is `pair.flags | instance.flags`; a feature
//! disabled on either level is disabled for the pair.

// Bit positions are wire-stable; gaps belong to features this core does
// not carry.
pub const DISABLE_QQ_TO_TG: u32 = 1;
pub const DISABLE_TG_TO_QQ: u32 = 1 << 1;
pub const COLOR_EMOJI_PREFIX: u32 = 1 << 6;
pub const DISABLE_QUOTE_PIN: u32 = 1 << 8;
pub const DISABLE_SEAMLESS: u32 = 1 << 11;
pub const DISABLE_FLASH_PIC: u32 = 1 << 12;
pub const DISABLE_RICH_HEADER: u32 = 1 << 14;

#[inline]
pub fn merged(pair_flags: u32, instance_flags: u32) -> u32 {
    pair_flags | instance_flags
}

#[inline]
pub fn has(flags: u32, flag: u32) -> bool {
    flags & flag != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_flags_apply_to_every_pair() {
        let effective = merged(DISABLE_FLASH_PIC, DISABLE_RICH_HEADER);
        assert!(has(effective, DISABLE_FLASH_PIC));
        assert!(has(effective, DISABLE_RICH_HEADER));
        assert!(!has(effective, DISABLE_SEAMLESS));
    }
}
