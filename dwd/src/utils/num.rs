pub fn gcd(lhs: usize, rhs: usize) -> usize {
    if rhs == 0 {
        lhs
    } else {
        gcd(rhs, lhs % rhs)
    }
}

/// Least common multiple. Both arguments must be positive.
pub fn lcm(lhs: usize, rhs: usize) -> usize {
    debug_assert!(lhs > 0 && rhs > 0);
    lhs / gcd(lhs, rhs) * rhs
}
