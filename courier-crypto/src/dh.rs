//! Validation of the Diffie-Hellman parameters the server hands out.
//!
//! A malicious or broken server can weaken the key exchange by sending a
//! composite modulus or a tiny subgroup generator, so every `(p, g)` pair
//! and every peer public value is checked before use. The rules follow the
//! published MTProto security guidelines.

use num_bigint::BigUint;
use num_traits::{One, Zero};

/// Why a DH parameter set was rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhError {
    /// `g` outside the supported 2..=7 range.
    BadGenerator,
    /// `p` is not exactly 2048 bits.
    BadPrimeLength,
    /// `p mod 4g` does not match the residue class required for `g`.
    BadResidue,
    /// `p` or `(p − 1) / 2` failed the primality test.
    NotPrime,
    /// The peer public value is out of the safe range.
    BadPublicValue,
}

impl std::fmt::Display for DhError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadGenerator => write!(f, "generator out of range"),
            Self::BadPrimeLength => write!(f, "modulus is not 2048 bits"),
            Self::BadResidue => write!(f, "modulus residue does not match generator"),
            Self::NotPrime => write!(f, "modulus is not a safe prime"),
            Self::BadPublicValue => write!(f, "public value out of safe range"),
        }
    }
}

impl std::error::Error for DhError {}

/// Number of Miller-Rabin rounds. 2^-50 error bound is far below the other
/// failure modes of the handshake.
const MILLER_RABIN_ROUNDS: usize = 25;

fn random_below(limit: &BigUint) -> BigUint {
    let bytes = (limit.bits() as usize + 7) / 8;
    loop {
        let mut buf = vec![0u8; bytes];
        getrandom::getrandom(&mut buf).expect("system rng unavailable");
        let candidate = BigUint::from_bytes_be(&buf);
        if &candidate < limit {
            return candidate;
        }
    }
}

/// Miller-Rabin probabilistic primality test with random witnesses.
pub fn is_probable_prime(n: &BigUint) -> bool {
    let zero = BigUint::zero();
    let one = BigUint::one();
    let two = &one + &one;
    let three = &two + &one;

    if n < &two {
        return false;
    }
    if n == &two || n == &three {
        return true;
    }
    if (n % &two).is_zero() {
        return false;
    }

    // n − 1 = d · 2^r with d odd
    let n_minus_one = n - &one;
    let mut d = n_minus_one.clone();
    let mut r = 0u32;
    while (&d % &two).is_zero() {
        d >>= 1;
        r += 1;
    }

    let upper = n - &three;
    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = random_below(&upper) + &two; // a ∈ [2, n − 2]
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 0..r - 1 {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Accept `(p, g)` iff `g ∈ 2..=7`, `p` is a 2048-bit safe prime, and
/// `p mod 4g` lands in the residue class that guarantees `g` generates the
/// full prime-order subgroup.
pub fn check_dh_params(p: &BigUint, g: i32) -> Result<(), DhError> {
    if !(2..=7).contains(&g) {
        return Err(DhError::BadGenerator);
    }
    if p.bits() != 2048 {
        return Err(DhError::BadPrimeLength);
    }

    let residue = (p % BigUint::from(4 * g as u32))
        .to_u64_digits()
        .first()
        .copied()
        .unwrap_or(0);
    let ok = match g {
        2 => residue == 7,
        3 => residue % 3 == 2,
        4 => true,
        5 => matches!(residue % 5, 1 | 4),
        6 => matches!(residue, 19 | 23),
        7 => matches!(residue % 7, 3 | 5 | 6),
        _ => unreachable!(),
    };
    if !ok {
        return Err(DhError::BadResidue);
    }

    if !is_probable_prime(p) {
        return Err(DhError::NotPrime);
    }
    let half = (p - BigUint::one()) >> 1;
    if !is_probable_prime(&half) {
        return Err(DhError::NotPrime);
    }
    Ok(())
}

/// Accept a peer public value `g_a` iff `1 < g_a < p − 1` and both `g_a`
/// and `p − g_a` are at least `2^(2048−64)`.
pub fn check_g_a(p: &BigUint, g_a: &BigUint) -> Result<(), DhError> {
    let one = BigUint::one();
    if g_a <= &one || g_a >= &(p - &one) {
        return Err(DhError::BadPublicValue);
    }
    let floor = 2048 - 64;
    if g_a.bits() < floor {
        return Err(DhError::BadPublicValue);
    }
    if (p - g_a).bits() < floor {
        return Err(DhError::BadPublicValue);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The 2048-bit modulus Telegram's production servers publish.
    const PUBLISHED_PRIME_HEX: &str = concat!(
        "C71CAEB9C6B1C9048E6C522F70F13F73980D40238E3E21C14934D037563D930F",
        "48198A0AA7C14058229493D22530F4DBFA336F6E0AC925139543AED44CCE7C37",
        "20FD51F69458705AC68CD4FE6B6B13ABDC9746512969328454F18FAF8C595F64",
        "2477FE96BB2A941D5BCD1D4AC8CC49880708FA9B378E3C4F3A9060BEE67CF9A4",
        "A4A695811051907E162753B56B0F6B410DBA74D8A84B2A14B3144E0EF1284754",
        "FD17ED950D5965B4B9DD46582DB1178D169C6BC465B0D6FF9CA3928FEF5B9AE4",
        "E418FC15E83EBEA0F87FA9FF5EED70050DED2849F47BF959D956850CE929851F",
        "0D8115F635B105EE2E4E15D04B2454BF6F4FADF034B10403119CD8E3B92FCC5B",
    );

    fn published_prime() -> BigUint {
        BigUint::parse_bytes(PUBLISHED_PRIME_HEX.as_bytes(), 16).unwrap()
    }

    #[test]
    fn published_prime_accepted_for_g3_and_g4() {
        let p = published_prime();
        assert_eq!(check_dh_params(&p, 3), Ok(()));
        assert_eq!(check_dh_params(&p, 4), Ok(()));
    }

    #[test]
    fn g2_rejected_when_p_mod_8_is_3() {
        let p = published_prime();
        let residue = (&p % BigUint::from(8u32)).to_u64_digits()[0];
        assert_eq!(residue, 3);
        assert_eq!(check_dh_params(&p, 2), Err(DhError::BadResidue));
    }

    #[test]
    fn generator_range_enforced() {
        let p = published_prime();
        assert_eq!(check_dh_params(&p, 1), Err(DhError::BadGenerator));
        assert_eq!(check_dh_params(&p, 8), Err(DhError::BadGenerator));
    }

    #[test]
    fn short_modulus_rejected() {
        let p = BigUint::from(0xffff_fffb_u32);
        assert_eq!(check_dh_params(&p, 3), Err(DhError::BadPrimeLength));
    }

    #[test]
    fn tiny_public_value_rejected() {
        let p = published_prime();
        assert_eq!(check_g_a(&p, &BigUint::one()), Err(DhError::BadPublicValue));
        assert_eq!(check_g_a(&p, &BigUint::from(1u32 << 20)), Err(DhError::BadPublicValue));
        assert_eq!(check_g_a(&p, &(&p - BigUint::one())), Err(DhError::BadPublicValue));
    }

    #[test]
    fn mid_range_public_value_accepted() {
        let p = published_prime();
        let g_a = &p >> 1; // 2047 bits, far from both edges
        assert_eq!(check_g_a(&p, &g_a), Ok(()));
    }

    #[test]
    fn miller_rabin_agrees_on_small_numbers() {
        let primes = [2u32, 3, 5, 7, 65537, 104729];
        let composites = [1u32, 4, 341, 561, 65535, 104730];
        for p in primes {
            assert!(is_probable_prime(&BigUint::from(p)), "{p} should be prime");
        }
        for c in composites {
            assert!(!is_probable_prime(&BigUint::from(c)), "{c} should be composite");
        }
    }
}
