//! Verification code generation

/// Default number of digits in a verification code
pub const DEFAULT_CODE_DIGITS: u32 = 6;

/// Generate a uniformly random verification code with `digits` digits
///
/// Leading zeros are allowed, so the result lies in `0..10^digits`.
/// Randomness comes from the operating system.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_verification_code(digits: u32) -> Result<u32, getrandom::Error> {
    let bound = 10u64.pow(digits.clamp(1, 9));
    // Reject the tail of the u32 range so every code is equally likely
    let zone = (1u64 << 32) - (1u64 << 32) % bound;

    loop {
        let mut buf = [0u8; 4];
        getrandom::fill(&mut buf)?;
        let sample = u32::from_le_bytes(buf) as u64;
        if sample < zone {
            return Ok((sample % bound) as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_stay_in_range() {
        for digits in 4..=9 {
            for _ in 0..50 {
                let code = generate_verification_code(digits).unwrap();
                assert!((code as u64) < 10u64.pow(digits));
            }
        }
    }

    #[test]
    fn test_codes_vary() {
        let codes: std::collections::HashSet<u32> =
            (0..20).map(|_| generate_verification_code(9).unwrap()).collect();
        assert!(codes.len() > 1);
    }
}
